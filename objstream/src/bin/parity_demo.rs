//! Parity CLI Demo
//!
//! Reads integers from stdin, one per line, pipes them through a typed
//! transform and prints "odd" or "even" for each. Lines that are not
//! integers are skipped.

use objstream::{DuplexOptions, Readable, Sink, Source, StreamOptions, Transform, Writable};
use std::io::{self, BufRead};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let numbers: Vec<i64> = io::stdin()
        .lock()
        .lines()
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    log::info!("read {} numbers", numbers.len());

    let source = Readable::from_items(numbers, StreamOptions::new().with_name("stdin"));
    let parity = Transform::map(
        |n: i64| if n % 2 == 0 { "even" } else { "odd" },
        DuplexOptions::from(StreamOptions::new().with_name("parity")),
    );
    let sink = Writable::from_fn(
        |word: &'static str| async move {
            println!("{word}");
            Ok(())
        },
        StreamOptions::new().with_name("stdout"),
    );

    source.pipe(parity).pipe(sink.clone());
    sink.finished().await?;

    Ok(())
}
