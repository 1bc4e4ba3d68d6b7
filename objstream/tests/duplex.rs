mod common;

use futures::future::{self, BoxFuture};
use objstream::{
    Consume, Duplex, DuplexOptions, Produce, Pusher, Readable, Sink, Source, StreamError,
    StreamOptions, StreamResult, Writable,
};
use parking_lot::Mutex;
use std::sync::Arc;

use common::{collecting_sink, init_tracing};

/// Pushes `n, n-1, ..., 1` and then ends
struct Countdown(u32);

impl Produce<u32> for Countdown {
    fn read<'a>(&'a mut self, out: &'a Pusher<u32>) -> BoxFuture<'a, StreamResult<()>> {
        if self.0 == 0 {
            out.push(None);
        } else {
            out.push(Some(self.0));
            self.0 -= 1;
        }
        Box::pin(future::ready(Ok(())))
    }
}

struct Recorder(Arc<Mutex<Vec<String>>>);

impl Consume<String> for Recorder {
    fn write(&mut self, item: String) -> BoxFuture<'_, StreamResult<()>> {
        self.0.lock().push(item);
        Box::pin(future::ready(Ok(())))
    }
}

#[tokio::test]
async fn test_sides_are_independent() {
    init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));
    let duplex = Duplex::new(
        Countdown(3),
        Recorder(Arc::clone(&log)),
        DuplexOptions::default(),
    );

    duplex.write("hello".to_string());
    duplex.end();
    assert_eq!(duplex.finished().await, Ok(()));
    assert_eq!(*log.lock(), vec!["hello"]);

    assert_eq!(duplex.collect_items().await, Ok(vec![3, 2, 1]));
}

#[tokio::test]
async fn test_half_open_keeps_write_side() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let duplex = Duplex::new(
        Countdown(1),
        Recorder(Arc::clone(&log)),
        DuplexOptions::default(),
    );

    assert_eq!(duplex.collect_items().await, Ok(vec![1]));
    assert!(!duplex.is_writable_ending());
    assert_eq!(duplex.send("still open".to_string()).await, Ok(()));
}

#[tokio::test]
async fn test_no_half_open_ends_write_side() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let duplex = Duplex::new(
        Countdown(2),
        Recorder(Arc::clone(&log)),
        DuplexOptions::default().with_allow_half_open(false),
    );

    duplex.write("before end".to_string());
    assert_eq!(duplex.collect_items().await, Ok(vec![2, 1]));
    assert_eq!(duplex.finished().await, Ok(()));
    assert_eq!(*log.lock(), vec!["before end"]);
}

#[tokio::test]
async fn test_destroy_tears_down_both_sides() {
    let duplex = Duplex::new(
        Countdown(5),
        Recorder(Arc::new(Mutex::new(Vec::new()))),
        DuplexOptions::default(),
    );

    duplex.destroy(Some(StreamError::failed("boom")));

    assert!(duplex.is_destroyed());
    assert_eq!(duplex.error(), Some(StreamError::failed("boom")));
    assert_eq!(duplex.next_item().await, Err(StreamError::failed("boom")));
    assert_eq!(
        duplex.send("late".to_string()).await,
        Err(StreamError::Destroyed)
    );
}

#[tokio::test]
async fn test_echo_from_parts_in_pipeline() {
    let readable = Readable::new(StreamOptions::new().with_name("echo.readable"));
    let pusher = readable.pusher();
    let writable = Writable::from_fn(
        move |word: String| {
            pusher.push(Some(word.to_uppercase()));
            async { Ok(()) }
        },
        StreamOptions::new().with_name("echo.writable"),
    );
    let echo = Duplex::from_parts(readable, writable, true);

    let source = Readable::from_items(vec!["hi".to_string(), "there".to_string()], StreamOptions::default());
    source.pipe(echo.clone());
    source.ended().await.unwrap();

    assert_eq!(echo.next_item().await, Ok(Some("HI".to_string())));
    assert_eq!(echo.next_item().await, Ok(Some("THERE".to_string())));

    echo.finished().await.unwrap();
    echo.push(None);

    let (sink, output) = collecting_sink::<String>(StreamOptions::default());
    echo.pipe(sink.clone());
    sink.finished().await.unwrap();
    assert!(output.lock().is_empty());
}
