//! Pipeline supervisor.
//!
//! Builds one producer per endpoint plus the single consumer, runs them concurrently, and
//! owns shutdown. Producers and consumer get separate cancellation tokens so that shutdown
//! can stop acquisition first and still write out everything already queued:
//!
//! 1. cancel producers and wait for every producer task to exit
//! 2. disconnect every sensor client
//! 3. mark the queue complete
//! 4. let the consumer drain to `Closed` (bounded by the drain timeout, after which the
//!    consumer is cancelled too); the consumer flushes on exit
//! 5. close the sink
//!
//! Nothing spawned here outlives [`Orchestrator::run`].

use crate::config::Settings;
use crate::consumer::{Consumer, ConsumerStats};
use crate::error::{IngestError, IngestResult};
use crate::network::TcpSensorClient;
use crate::producer::{Producer, ProducerStats};
use crate::protocol::decoder_for;
use crate::queue::{BoundedChannel, BoundedQueue};
use crate::reading::Reading;
use crate::storage::FileSink;
use futures::future::{join_all, ready, select_all, Either};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What each loop reported on the way out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Per-producer counters, keyed by endpoint name
    pub producers: Vec<(String, ProducerStats)>,
    pub consumer: ConsumerStats,
}

pub struct Orchestrator {
    queue: Arc<dyn BoundedChannel<Reading>>,
    producers: Vec<Producer>,
    consumer: Consumer,
    drain_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        queue: Arc<dyn BoundedChannel<Reading>>,
        producers: Vec<Producer>,
        consumer: Consumer,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            producers,
            consumer,
            drain_timeout,
        }
    }

    /// Wires TCP clients, decoders, the shared queue and a file sink from `settings`.
    pub async fn from_settings(settings: &Settings) -> IngestResult<Self> {
        settings.validate()?;

        let queue: Arc<dyn BoundedChannel<Reading>> =
            Arc::new(BoundedQueue::new(settings.queue.capacity));

        let producers = settings
            .endpoints
            .iter()
            .map(|endpoint| {
                let client = TcpSensorClient::from_settings(endpoint.clone(), settings);
                Producer::new(
                    Box::new(client),
                    decoder_for(endpoint.sensor_type),
                    queue.clone(),
                    settings.timing.reconnect_delay(),
                )
            })
            .collect();

        let sink = FileSink::open(&settings.application.output_path).await?;
        let consumer = Consumer::new(
            queue.clone(),
            Box::new(sink),
            settings.timing.poll_timeout(),
            settings.timing.flush_interval(),
        );

        Ok(Self::new(
            queue,
            producers,
            consumer,
            settings.timing.drain_timeout(),
        ))
    }

    /// Runs the pipeline until `shutdown` resolves, then performs the full shutdown sequence.
    ///
    /// A producer or consumer that exits on its own, e.g. by panicking, is treated as an
    /// unrecoverable failure: the pipeline is shut down the same way and the failure is
    /// returned once cleanup is done.
    pub async fn run<F>(self, shutdown: F) -> IngestResult<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let Orchestrator {
            queue,
            producers,
            consumer,
            drain_timeout,
        } = self;

        let producer_cancel = CancellationToken::new();
        let consumer_cancel = CancellationToken::new();

        info!(producers = producers.len(), "Starting ingestion pipeline");

        let mut producer_tasks: Vec<JoinHandle<(Producer, ProducerStats)>> = producers
            .into_iter()
            .map(|producer| {
                let cancel = producer_cancel.child_token();
                tokio::spawn(async move {
                    let stats = producer.run(&cancel).await;
                    (producer, stats)
                })
            })
            .collect();

        let mut consumer_task: JoinHandle<(Consumer, ConsumerStats)> = {
            let cancel = consumer_cancel.clone();
            let mut consumer = consumer;
            tokio::spawn(async move {
                let stats = consumer.run(&cancel).await;
                (consumer, stats)
            })
        };

        let mut failure: Option<IngestError> = None;
        let mut consumer_result = None;
        let mut exited_producer = None;

        // Producers only return once cancelled, so any earlier exit is a failure.
        let producer_exit = async {
            if producer_tasks.is_empty() {
                return std::future::pending().await;
            }
            let (joined, index, _) = select_all(producer_tasks.iter_mut()).await;
            (index, joined)
        };

        tokio::select! {
            _ = shutdown => info!("Stop requested, shutting down"),
            finished = &mut consumer_task => {
                error!("Consumer exited while producers were running");
                failure = Some(IngestError::Task("consumer exited unexpectedly".to_string()));
                consumer_result = Some(finished);
            }
            (index, joined) = producer_exit => {
                error!(index, "Producer exited before shutdown");
                failure = Some(IngestError::Task("producer exited unexpectedly".to_string()));
                exited_producer = Some((index, joined));
            }
        }

        // 1. Stop producers and collect their clients. A handle that already completed
        // must not be polled again, so its stored result stands in for it.
        producer_cancel.cancel();
        let joins = producer_tasks
            .into_iter()
            .enumerate()
            .map(|(index, task)| match exited_producer.take() {
                Some((exited, joined)) if exited == index => Either::Left(ready(joined)),
                other => {
                    exited_producer = other;
                    Either::Right(task)
                }
            })
            .collect::<Vec<_>>();

        let mut summary = RunSummary::default();
        for joined in join_all(joins).await {
            match joined {
                Ok((producer, stats)) => {
                    let name = producer.name().to_string();
                    // 2. Dispose of the client.
                    producer.into_source().disconnect().await;
                    summary.producers.push((name, stats));
                }
                Err(err) => {
                    error!(error = %err, "Producer task failed");
                    failure = failure.or(Some(IngestError::from(err)));
                }
            }
        }

        // 3. No more readings can arrive.
        queue.mark_complete();

        // 4. Drain.
        let consumer_result = match consumer_result {
            Some(result) => result,
            None => match tokio::time::timeout(drain_timeout, &mut consumer_task).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout = ?drain_timeout, "Drain timed out, cancelling consumer");
                    consumer_cancel.cancel();
                    consumer_task.await
                }
            },
        };

        // 5. Close the sink.
        match consumer_result {
            Ok((consumer, stats)) => {
                summary.consumer = stats;
                let mut sink = consumer.into_sink();
                if let Err(err) = sink.close().await {
                    error!(error = %err, "Failed to close sink");
                    failure = failure.or(Some(err));
                }
            }
            Err(err) => {
                error!(error = %err, "Consumer task failed");
                failure = failure.or(Some(IngestError::from(err)));
            }
        }

        info!(
            processed = summary.consumer.processed,
            "Ingestion pipeline stopped"
        );

        match failure {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }
}
