#![allow(dead_code)]

use objstream::{StreamOptions, Writable};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Show engine logs with `RUST_LOG=objstream=trace cargo test -- --nocapture`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Let spawned stream tasks run until they block
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Writable that appends every item to a shared vector
pub fn collecting_sink<T: Send + 'static>(options: StreamOptions) -> (Writable<T>, Arc<Mutex<Vec<T>>>) {
    let output = Arc::new(Mutex::new(Vec::new()));
    let sink_output = Arc::clone(&output);
    let sink = Writable::from_fn(
        move |item: T| {
            sink_output.lock().push(item);
            async { Ok(()) }
        },
        options,
    );
    (sink, output)
}
