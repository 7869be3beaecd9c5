//! Per-sensor acquisition loop.
//!
//! Each producer drives one [`NetworkSource`] through
//! `Disconnected → Connecting → Fetching → (Pushing | ReconnectWait) → Connecting …`
//! until cancelled. Any transport or decode failure disconnects the source and waits a
//! fixed backoff before the next attempt; failures are logged, never fatal.

use crate::error::{IngestError, IngestResult};
use crate::network::NetworkSource;
use crate::protocol::PacketDecoder;
use crate::queue::BoundedChannel;
use crate::reading::Reading;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters reported when a producer loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerStats {
    /// Readings accepted by the queue
    pub pushed: u64,
    /// Failed iterations (each followed by a disconnect and backoff)
    pub failures: u64,
    /// Successful connects, including the first one
    pub connects: u64,
}

/// Why a loop iteration did not push a reading.
enum Stop {
    Cancelled,
    QueueClosed,
}

pub struct Producer {
    source: Box<dyn NetworkSource>,
    decoder: Arc<dyn PacketDecoder>,
    queue: Arc<dyn BoundedChannel<Reading>>,
    reconnect_delay: Duration,
}

impl Producer {
    pub fn new(
        source: Box<dyn NetworkSource>,
        decoder: Arc<dyn PacketDecoder>,
        queue: Arc<dyn BoundedChannel<Reading>>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            source,
            decoder,
            queue,
            reconnect_delay,
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Hands the source back, e.g. so the orchestrator can dispose of it.
    pub fn into_source(self) -> Box<dyn NetworkSource> {
        self.source
    }

    /// Runs until `cancel` fires or the queue is closed.
    pub async fn run(&self, cancel: &CancellationToken) -> ProducerStats {
        let mut stats = ProducerStats::default();
        info!(sensor = %self.name(), "Producer started");

        while !cancel.is_cancelled() {
            match self.poll_once(cancel, &mut stats).await {
                Ok(()) => stats.pushed += 1,
                Err(err) => match classify(err) {
                    Ok(Stop::Cancelled) => break,
                    Ok(Stop::QueueClosed) => {
                        info!(sensor = %self.name(), "Queue closed, stopping producer");
                        break;
                    }
                    Err(err) => {
                        stats.failures += 1;
                        warn!(
                            sensor = %self.name(),
                            error = %err,
                            retry_in = ?self.reconnect_delay,
                            "Sensor poll failed, reconnecting"
                        );
                        self.source.disconnect().await;

                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.reconnect_delay) => {}
                        }
                    }
                },
            }
        }

        info!(
            sensor = %self.name(),
            pushed = stats.pushed,
            failures = stats.failures,
            "Producer stopped"
        );
        stats
    }

    /// One connect-if-needed → fetch → decode → push pass.
    async fn poll_once(
        &self,
        cancel: &CancellationToken,
        stats: &mut ProducerStats,
    ) -> IngestResult<()> {
        if !self.source.is_connected() {
            debug!(sensor = %self.name(), "Connecting");
            self.source.connect(cancel).await?;
            stats.connects += 1;
        }

        let packet = self
            .source
            .fetch(cancel)
            .await?
            .ok_or_else(|| IngestError::NoData {
                sensor: self.name().to_string(),
            })?;

        let reading = self.decoder.decode(&packet)?;
        debug!(sensor = %self.name(), reading = %reading, "Packet decoded");

        tokio::select! {
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            pushed = self.queue.push(reading) => pushed,
        }
    }
}

/// Splits loop-ending conditions from retryable failures.
fn classify(err: IngestError) -> Result<Stop, IngestError> {
    match err {
        IngestError::Cancelled => Ok(Stop::Cancelled),
        IngestError::QueueClosed => Ok(Stop::QueueClosed),
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{test_packets, WeatherDecoder};
    use crate::queue::{BoundedQueue, Popped};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    /// Scripted fetch results for the fake source.
    enum Step {
        Packet(Vec<u8>),
        Nothing,
    }

    #[derive(Default)]
    struct Counters {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        fetches: AtomicUsize,
    }

    struct FakeSource {
        script: Mutex<VecDeque<Step>>,
        connected: AtomicBool,
        counters: Arc<Counters>,
        fail_connect: bool,
    }

    impl FakeSource {
        fn new(script: Vec<Step>, counters: Arc<Counters>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                connected: AtomicBool::new(false),
                counters,
                fail_connect: false,
            }
        }
    }

    #[async_trait]
    impl NetworkSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn connect(&self, _cancel: &CancellationToken) -> IngestResult<()> {
            self.counters.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                return Err(IngestError::Transport(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn fetch(&self, _cancel: &CancellationToken) -> IngestResult<Option<Vec<u8>>> {
            self.counters.fetches.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Step::Packet(bytes)) => Ok(Some(bytes)),
                Some(Step::Nothing) => Ok(None),
                // Script exhausted: behave like a quiet sensor.
                None => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(None)
                }
            }
        }

        async fn disconnect(&self) {
            self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    fn producer(source: FakeSource, queue: Arc<BoundedQueue<Reading>>) -> Producer {
        Producer::new(
            Box::new(source),
            Arc::new(WeatherDecoder),
            queue,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_failure_then_success_reconnects_once_before_push() {
        let counters = Arc::new(Counters::default());
        let packet = test_packets::weather(0, 25.5, 1013);
        let source = FakeSource::new(
            vec![Step::Nothing, Step::Packet(packet)],
            counters.clone(),
        );
        let queue = Arc::new(BoundedQueue::new(16));
        let producer = producer(source, queue.clone());
        let cancel = CancellationToken::new();

        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { producer.run(&cancel).await })
        };

        let first = queue.try_pop(Duration::from_secs(5)).await;
        // At the moment of the first push: initial connect + exactly one reconnect.
        assert_eq!(counters.connects.load(Ordering::SeqCst), 2);
        assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
        match first {
            Popped::Item(reading) => assert!(reading.payload().contains("25.50")),
            other => panic!("expected a reading, got {other:?}"),
        }

        cancel.cancel();
        let stats = run.await.unwrap();
        assert_eq!(stats.pushed, 1);
        assert!(stats.failures >= 1);
    }

    #[tokio::test]
    async fn test_corrupt_packet_is_discarded_and_retried() {
        let counters = Arc::new(Counters::default());
        let mut corrupt = test_packets::weather(0, 1.0, 2);
        corrupt[14] ^= 0xFF;
        let good = test_packets::weather(0, 3.0, 4);
        let source = FakeSource::new(
            vec![Step::Packet(corrupt), Step::Packet(good)],
            counters.clone(),
        );
        let queue = Arc::new(BoundedQueue::new(16));
        let producer = producer(source, queue.clone());
        let cancel = CancellationToken::new();

        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { producer.run(&cancel).await })
        };

        match queue.try_pop(Duration::from_secs(5)).await {
            Popped::Item(reading) => {
                assert_eq!(reading.payload(), "Temperature: 3.00°C, Pressure: 4 hPa")
            }
            other => panic!("expected a reading, got {other:?}"),
        }
        assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);

        cancel.cancel();
        run.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_exits_promptly() {
        let counters = Arc::new(Counters::default());
        let mut source = FakeSource::new(vec![], counters.clone());
        source.fail_connect = true;
        let queue = Arc::new(BoundedQueue::new(4));
        let producer = Producer::new(
            Box::new(source),
            Arc::new(WeatherDecoder),
            queue,
            Duration::from_secs(60),
        );
        let cancel = CancellationToken::new();

        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { producer.run(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("producer ignored cancellation during backoff")
            .unwrap();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.pushed, 0);
        assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_connect_is_logged_and_retried() {
        let counters = Arc::new(Counters::default());
        let mut source = FakeSource::new(vec![], counters.clone());
        source.fail_connect = true;
        let producer = producer(source, Arc::new(BoundedQueue::new(4)));

        // Polled in place so the log lines stay inside this test's span.
        let cancel = CancellationToken::new();
        let outcome =
            tokio::time::timeout(Duration::from_millis(100), producer.run(&cancel)).await;
        assert!(outcome.is_err(), "producer gave up on a refusing sensor");

        assert!(counters.connects.load(Ordering::SeqCst) >= 2);
        assert!(logs_contain("Sensor poll failed, reconnecting"));
        assert!(logs_contain("refused"));
    }

    #[tokio::test]
    async fn test_already_cancelled_does_nothing() {
        let counters = Arc::new(Counters::default());
        let source = FakeSource::new(vec![], counters.clone());
        let producer = producer(source, Arc::new(BoundedQueue::new(4)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = producer.run(&cancel).await;
        assert_eq!(stats, ProducerStats::default());
        assert_eq!(counters.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_queue_closed_stops_without_retry() {
        let counters = Arc::new(Counters::default());
        let packet = test_packets::weather(0, 1.0, 1);
        let source = FakeSource::new(vec![Step::Packet(packet)], counters.clone());
        let queue = Arc::new(BoundedQueue::new(4));
        queue.mark_complete();
        let producer = producer(source, queue);

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            producer.run(&CancellationToken::new()),
        )
        .await
        .expect("producer kept running after the queue closed");
        assert_eq!(stats.pushed, 0);
        assert_eq!(stats.failures, 0);
        assert_eq!(counters.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure_and_honours_cancel() {
        let counters = Arc::new(Counters::default());
        let script = (0..10)
            .map(|i| Step::Packet(test_packets::weather(0, i as f32, 0)))
            .collect();
        let source = FakeSource::new(script, counters.clone());
        let queue = Arc::new(BoundedQueue::new(2));
        let producer = producer(source, queue.clone());
        let cancel = CancellationToken::new();

        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { producer.run(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Two accepted, the third decoded reading is parked in push.
        assert_eq!(queue.len(), 2);
        assert_eq!(counters.fetches.load(Ordering::SeqCst), 3);

        cancel.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("producer stuck in push after cancel")
            .unwrap();
        assert_eq!(stats.pushed, 2);
    }
}
