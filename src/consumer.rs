//! Single writer draining the queue into the sink.

use crate::queue::{BoundedChannel, Popped};
use crate::reading::Reading;
use crate::storage::Sink;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters reported when the consumer loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Readings written to the sink
    pub processed: u64,
    /// Readings lost to write errors
    pub write_errors: u64,
    /// Flushes issued, the final one included
    pub flushes: u64,
}

/// Drains a [`BoundedChannel`] into a [`Sink`], flushing on an interval and once on exit.
///
/// Exactly one consumer exists per queue; the sink is never shared.
pub struct Consumer {
    queue: Arc<dyn BoundedChannel<Reading>>,
    sink: Box<dyn Sink>,
    poll_timeout: Duration,
    flush_interval: Duration,
}

impl Consumer {
    pub fn new(
        queue: Arc<dyn BoundedChannel<Reading>>,
        sink: Box<dyn Sink>,
        poll_timeout: Duration,
        flush_interval: Duration,
    ) -> Self {
        Self {
            queue,
            sink,
            poll_timeout,
            flush_interval,
        }
    }

    pub fn into_sink(self) -> Box<dyn Sink> {
        self.sink
    }

    /// Runs until the queue is complete and drained, or `cancel` fires.
    ///
    /// Write failures are reported and skipped. One unconditional flush happens on the
    /// way out, whichever condition ended the loop.
    pub async fn run(&mut self, cancel: &CancellationToken) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        let mut last_flush = Instant::now();
        info!("Consumer started");

        while !cancel.is_cancelled() {
            let popped = tokio::select! {
                _ = cancel.cancelled() => break,
                popped = self.queue.try_pop(self.poll_timeout) => popped,
            };

            match popped {
                Popped::Item(reading) => {
                    let line = reading.to_string();
                    match self.sink.write_line(&line).await {
                        Ok(()) => stats.processed += 1,
                        Err(err) => {
                            stats.write_errors += 1;
                            warn!(error = %err, line = %line, "Failed to write reading");
                        }
                    }
                }
                Popped::Empty => {}
                Popped::Closed => {
                    debug!("Queue complete and drained");
                    break;
                }
            }

            if last_flush.elapsed() >= self.flush_interval {
                self.flush(&mut stats).await;
                last_flush = Instant::now();
            }
        }

        self.flush(&mut stats).await;
        info!(
            processed = stats.processed,
            write_errors = stats.write_errors,
            "Consumer stopped. Processed {} items",
            stats.processed
        );
        stats
    }

    async fn flush(&mut self, stats: &mut ConsumerStats) {
        stats.flushes += 1;
        if let Err(err) = self.sink.flush().await {
            error!(error = %err, "Sink flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IngestError, IngestResult};
    use crate::queue::BoundedQueue;
    use crate::reading::SensorKind;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        lines: Vec<String>,
        flushes: usize,
        closes: usize,
    }

    /// In-memory sink; optionally fails every write whose line contains `fail_on`.
    #[derive(Clone, Default)]
    struct MemorySink {
        recorded: Arc<Mutex<Recorded>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Sink for MemorySink {
        async fn write_line(&mut self, line: &str) -> IngestResult<()> {
            if self.fail_on.is_some_and(|needle| line.contains(needle)) {
                return Err(IngestError::SinkWrite(std::io::Error::other("disk full")));
            }
            self.recorded.lock().unwrap().lines.push(line.to_string());
            Ok(())
        }

        async fn flush(&mut self) -> IngestResult<()> {
            self.recorded.lock().unwrap().flushes += 1;
            Ok(())
        }

        async fn close(&mut self) -> IngestResult<()> {
            self.recorded.lock().unwrap().closes += 1;
            Ok(())
        }
    }

    fn reading(payload: &str) -> Reading {
        let ts = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        Reading::new(ts, SensorKind::Coordinates, payload)
    }

    fn consumer(
        queue: Arc<BoundedQueue<Reading>>,
        sink: MemorySink,
        flush_every: Duration,
    ) -> Consumer {
        Consumer::new(queue, Box::new(sink), Duration::from_millis(10), flush_every)
    }

    #[tokio::test]
    async fn test_drains_completed_queue_with_single_final_flush() {
        let queue = Arc::new(BoundedQueue::new(8));
        for payload in ["X: 1, Y: 1, Z: 1", "X: 2, Y: 2, Z: 2", "X: 3, Y: 3, Z: 3"] {
            queue.push(reading(payload)).await.unwrap();
        }
        queue.mark_complete();

        let sink = MemorySink::default();
        let mut consumer = consumer(queue, sink.clone(), Duration::from_secs(60));
        let stats = consumer.run(&CancellationToken::new()).await;

        let recorded = sink.recorded.lock().unwrap();
        assert_eq!(recorded.lines.len(), 3);
        assert_eq!(
            recorded.lines[0],
            "[1970-01-01 00:00:00] [Coordinates] X: 1, Y: 1, Z: 1"
        );
        assert_eq!(recorded.lines[2], "[1970-01-01 00:00:00] [Coordinates] X: 3, Y: 3, Z: 3");
        assert_eq!(recorded.flushes, 1);
        assert_eq!(recorded.closes, 0, "closing the sink is the orchestrator's job");
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.flushes, 1);
    }

    #[tokio::test]
    async fn test_write_error_does_not_stop_the_stream() {
        let queue = Arc::new(BoundedQueue::new(8));
        queue.push(reading("X: 1, Y: 0, Z: 0")).await.unwrap();
        queue.push(reading("BAD")).await.unwrap();
        queue.push(reading("X: 3, Y: 0, Z: 0")).await.unwrap();
        queue.mark_complete();

        let sink = MemorySink {
            fail_on: Some("BAD"),
            ..Default::default()
        };
        let mut consumer = consumer(queue, sink.clone(), Duration::from_secs(60));
        let stats = consumer.run(&CancellationToken::new()).await;

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.write_errors, 1);
        assert_eq!(sink.recorded.lock().unwrap().lines.len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_on_empty_queue_flushes_once() {
        let queue = Arc::new(BoundedQueue::new(8));
        let sink = MemorySink::default();
        let mut consumer = consumer(queue, sink.clone(), Duration::from_secs(60));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let stats = tokio::time::timeout(Duration::from_secs(5), consumer.run(&cancel))
            .await
            .expect("consumer ignored cancellation");

        let recorded = sink.recorded.lock().unwrap();
        assert!(recorded.lines.is_empty());
        assert_eq!(recorded.flushes, 1);
        assert_eq!(stats, ConsumerStats { processed: 0, write_errors: 0, flushes: 1 });
    }

    #[tokio::test]
    async fn test_periodic_flush_while_idle() {
        let queue = Arc::new(BoundedQueue::new(8));
        let sink = MemorySink::default();
        let mut consumer = consumer(queue.clone(), sink.clone(), Duration::from_millis(30));

        let closer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            queue.mark_complete();
        });

        let stats = consumer.run(&CancellationToken::new()).await;
        closer.await.unwrap();

        // Several interval flushes plus the final one.
        assert!(stats.flushes >= 3, "only {} flushes", stats.flushes);
        assert_eq!(sink.recorded.lock().unwrap().flushes as u64, stats.flushes);
    }

    #[tokio::test]
    async fn test_into_sink_returns_the_same_sink() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.mark_complete();
        let sink = MemorySink::default();
        let mut consumer = consumer(queue, sink.clone(), Duration::from_secs(1));
        consumer.run(&CancellationToken::new()).await;

        let mut sink_back = consumer.into_sink();
        sink_back.close().await.unwrap();
        assert_eq!(sink.recorded.lock().unwrap().closes, 1);
    }
}
