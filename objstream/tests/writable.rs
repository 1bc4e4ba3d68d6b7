mod common;

use futures::future::{self, BoxFuture};
use objstream::{Consume, Event, Sink, StreamError, StreamOptions, StreamResult, Writable};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use common::{collecting_sink, init_tracing, settle};

/// Records every batch it consumes and the hooks the engine calls
#[derive(Default, Clone)]
struct Journal {
    batches: Arc<Mutex<Vec<Vec<u32>>>>,
    log: Arc<Mutex<Vec<String>>>,
    destroyed_with: Arc<Mutex<Option<Option<StreamError>>>>,
}

impl Consume<u32> for Journal {
    fn write(&mut self, item: u32) -> BoxFuture<'_, StreamResult<()>> {
        self.batches.lock().push(vec![item]);
        self.log.lock().push(item.to_string());
        Box::pin(future::ready(Ok(())))
    }

    fn supports_writev(&self) -> bool {
        true
    }

    fn writev(&mut self, items: Vec<u32>) -> BoxFuture<'_, StreamResult<()>> {
        self.log.lock().extend(items.iter().map(u32::to_string));
        self.batches.lock().push(items);
        Box::pin(future::ready(Ok(())))
    }

    fn finalize(&mut self) -> BoxFuture<'_, StreamResult<()>> {
        self.log.lock().push("final".to_string());
        Box::pin(future::ready(Ok(())))
    }

    fn destroy(&mut self, error: Option<&StreamError>) {
        *self.destroyed_with.lock() = Some(error.cloned());
    }
}

/// Accepts everything and raises its flag when dropped
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Consume<u32> for DropFlag {
    fn write(&mut self, _item: u32) -> BoxFuture<'_, StreamResult<()>> {
        Box::pin(future::ready(Ok(())))
    }
}

#[tokio::test]
async fn test_write_consumes_in_order() {
    init_tracing();
    let (sink, output) = collecting_sink::<u32>(StreamOptions::default());

    for n in 1..=5 {
        assert!(sink.write(n));
    }
    sink.end();

    assert_eq!(sink.finished().await, Ok(()));
    assert_eq!(*output.lock(), vec![1, 2, 3, 4, 5]);
    assert!(sink.is_writable_finished());
}

#[tokio::test]
async fn test_write_returns_false_at_high_water_mark_then_drains() {
    let (sink, output) = collecting_sink::<u32>(StreamOptions::new().with_high_water_mark(2));

    assert!(sink.write(1));
    assert!(!sink.write(2));
    assert!(sink.writable_needs_drain());
    assert_eq!(sink.writable_length(), 2);

    sink.drained().await;
    assert!(!sink.writable_needs_drain());
    assert_eq!(sink.writable_length(), 0);
    assert_eq!(*output.lock(), vec![1, 2]);
}

#[tokio::test]
async fn test_write_callback_after_consumption() {
    let (sink, output) = collecting_sink::<&'static str>(StreamOptions::default());
    let (tx, rx) = oneshot::channel();

    sink.write_with("item", move |result| {
        let _ = tx.send(result);
    });

    assert_eq!(rx.await.unwrap(), Ok(()));
    assert_eq!(*output.lock(), vec!["item"]);
}

#[tokio::test]
async fn test_send_waits_for_consumption() {
    let (sink, output) = collecting_sink::<u32>(StreamOptions::default());

    assert_eq!(sink.send(5).await, Ok(()));
    assert_eq!(*output.lock(), vec![5]);
}

#[tokio::test]
async fn test_write_after_end() {
    let (sink, output) = collecting_sink::<u32>(StreamOptions::default());
    let mut events = sink.writable_events();
    sink.end();

    assert_eq!(sink.send(1).await, Err(StreamError::WriteAfterEnd));
    assert_eq!(sink.error(), Some(StreamError::WriteAfterEnd));
    assert_eq!(sink.finished().await, Err(StreamError::WriteAfterEnd));
    assert!(output.lock().is_empty());

    assert_eq!(events.recv().await, Ok(Event::Error));
    assert_eq!(events.recv().await, Ok(Event::Close));
}

#[tokio::test]
async fn test_write_after_destroy() {
    let (sink, _output) = collecting_sink::<u32>(StreamOptions::default());
    sink.destroy(None);

    assert!(!sink.write(1));
    assert_eq!(sink.send(2).await, Err(StreamError::Destroyed));
    assert_eq!(sink.finished().await, Err(StreamError::PrematureClose));
    assert_eq!(sink.error(), None);
}

#[tokio::test]
async fn test_cork_batches_into_writev() {
    let journal = Journal::default();
    let writable = Writable::new(journal.clone(), StreamOptions::default());

    writable.cork();
    for n in 1..=3 {
        writable.write(n);
    }
    settle().await;
    assert!(journal.batches.lock().is_empty());

    writable.uncork();
    writable.end();

    assert_eq!(writable.finished().await, Ok(()));
    assert_eq!(*journal.batches.lock(), vec![vec![1, 2, 3]]);
}

#[tokio::test]
async fn test_single_item_uses_write() {
    let journal = Journal::default();
    let writable = Writable::new(journal.clone(), StreamOptions::default());

    assert_eq!(writable.send(4).await, Ok(()));
    assert_eq!(*journal.batches.lock(), vec![vec![4]]);
}

#[tokio::test]
async fn test_finalize_runs_after_queue() {
    let journal = Journal::default();
    let writable = Writable::new(journal.clone(), StreamOptions::default());

    writable.write(1);
    writable.end_with(2);

    assert_eq!(writable.finished().await, Ok(()));
    assert_eq!(*journal.log.lock(), vec!["1", "2", "final"]);
    // Normal completion does not call the destroy hook
    settle().await;
    assert_eq!(*journal.destroyed_with.lock(), None);
}

#[tokio::test]
async fn test_destroy_calls_consumer_hook() {
    let journal = Journal::default();
    let writable = Writable::new(journal.clone(), StreamOptions::default());

    writable.destroy(Some(StreamError::failed("abort")));
    settle().await;

    assert_eq!(
        *journal.destroyed_with.lock(),
        Some(Some(StreamError::failed("abort")))
    );
    assert!(writable.is_destroyed());
}

#[tokio::test]
async fn test_consumer_error_reaches_callbacks() {
    let writable = Writable::from_fn(
        |n: u32| async move {
            if n == 2 {
                Err(StreamError::failed("disk full"))
            } else {
                Ok(())
            }
        },
        StreamOptions::default(),
    );
    let results = Arc::new(Mutex::new(Vec::new()));

    for n in 1..=3 {
        let results = Arc::clone(&results);
        writable.write_with(n, move |result| results.lock().push((n, result)));
    }

    assert_eq!(
        writable.finished().await,
        Err(StreamError::failed("disk full"))
    );
    assert_eq!(
        *results.lock(),
        vec![
            (1, Ok(())),
            (2, Err(StreamError::failed("disk full"))),
            (3, Err(StreamError::failed("disk full"))),
        ]
    );
}

#[tokio::test]
async fn test_writable_events() {
    let (sink, _output) = collecting_sink::<u32>(StreamOptions::new().with_high_water_mark(1));
    let mut events = sink.writable_events();

    assert!(!sink.write(1));
    sink.end();
    assert_eq!(sink.finished().await, Ok(()));

    assert_eq!(events.recv().await, Ok(Event::Drain));
    assert_eq!(events.recv().await, Ok(Event::Finish));
    assert_eq!(events.recv().await, Ok(Event::Close));
}

#[tokio::test]
async fn test_dropping_last_handle_releases_consumer() {
    let released = Arc::new(AtomicBool::new(false));
    let writable = Writable::new(DropFlag(Arc::clone(&released)), StreamOptions::default());

    writable.write(1);
    settle().await;
    assert!(!released.load(Ordering::SeqCst));

    let clone = writable.clone();
    drop(writable);
    settle().await;
    assert!(!released.load(Ordering::SeqCst));

    drop(clone);
    settle().await;
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_dropping_last_handle_after_end_still_finishes() {
    let (sink, output) = collecting_sink::<u32>(StreamOptions::default());
    let (tx, rx) = oneshot::channel();

    sink.write_with(1, move |result| {
        let _ = tx.send(result);
    });
    sink.end();
    drop(sink);

    assert_eq!(rx.await.unwrap(), Ok(()));
    assert_eq!(*output.lock(), vec![1]);
}
