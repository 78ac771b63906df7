//! Ingestion pipeline for graphite-exporter
//!
//! The ingester is responsible for:
//! - Reading newline-delimited plaintext from TCP connections and UDP datagrams
//! - Parsing, mapping and validating each line on a single line worker
//! - Applying samples to the store on a single sample worker
//! - Expiring stale samples on a fixed interval

mod guard;
mod line;
mod listener;
mod store;
mod tags;
mod telemetry;

pub use guard::LabelGuard;
pub use line::{DropReason, LineProcessor, ProcessorConfig};
pub use listener::{serve_tcp, serve_udp};
pub use store::SampleStore;
pub use tags::{parse_metric_name_and_tags, TagParseError};
pub use telemetry::IngestMetrics;

use crate::clock::Clock;
use crate::mapper::MetricMapper;
use crate::schema::Sample;
use crate::{Error, Result};

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest accepted plaintext line in bytes, newline excluded
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Configuration for the collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Drop metrics that match no mapping rule
    pub strict_match: bool,
    /// Enforce a single label-key set per metric name
    pub label_consistency: bool,
    /// How long a sample stays visible after its timestamp
    pub sample_expiry: Duration,
    /// How often stale samples are removed
    pub sweep_interval: Duration,
    /// Capacity of the line and sample channels
    pub channel_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            strict_match: false,
            label_consistency: true,
            sample_expiry: Duration::from_secs(300), // 5 minutes
            sweep_interval: Duration::from_secs(60),
            channel_capacity: 1024,
        }
    }
}

enum LineMessage {
    Line(String),
    Barrier(oneshot::Sender<()>),
}

enum SampleMessage {
    Sample(Sample),
    Barrier(oneshot::Sender<()>),
    /// Exit immediately without draining
    Stop,
}

/// Two-stage pipeline from raw lines to the sample store.
pub struct Collector {
    line_tx: mpsc::Sender<LineMessage>,
    store: Arc<SampleStore>,
    metrics: IngestMetrics,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Collector {
    /// Build the pipeline and spawn its workers on the current runtime.
    pub fn start(
        config: CollectorConfig,
        mapper: Arc<dyn MetricMapper>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if config.channel_capacity == 0 {
            return Err(Error::Config("channel capacity must be positive".to_string()));
        }
        if config.sweep_interval.is_zero() {
            return Err(Error::Config("sweep interval must be positive".to_string()));
        }

        let metrics = IngestMetrics::new(config.sample_expiry)?;
        let store = Arc::new(SampleStore::new(config.sample_expiry, clock.clone()));
        let processor = LineProcessor::new(
            ProcessorConfig {
                strict_match: config.strict_match,
                label_consistency: config.label_consistency,
            },
            mapper,
            metrics.clone(),
            clock,
        );

        let (line_tx, line_rx) = mpsc::channel(config.channel_capacity);
        let (sample_tx, sample_rx) = mpsc::channel(config.channel_capacity);
        let shutdown = CancellationToken::new();

        let line_worker = tokio::spawn(run_line_worker(
            processor,
            line_rx,
            sample_tx,
            shutdown.clone(),
        ));
        let sample_worker = tokio::spawn(run_sample_worker(
            store.clone(),
            sample_rx,
            config.sweep_interval,
            shutdown.clone(),
        ));

        info!(
            sample_expiry = ?config.sample_expiry,
            strict_match = config.strict_match,
            label_consistency = config.label_consistency,
            "Collector started"
        );

        Ok(Self {
            line_tx,
            store,
            metrics,
            shutdown,
            workers: Mutex::new(vec![line_worker, sample_worker]),
        })
    }

    /// Queue one raw line, waiting for channel capacity.
    pub async fn push_line(&self, line: String) -> Result<()> {
        self.line_tx
            .send(LineMessage::Line(line))
            .await
            .map_err(|_| Error::Internal("collector is shut down".to_string()))
    }

    /// Read newline-delimited lines until EOF or shutdown, queueing each in order.
    ///
    /// A line longer than [`MAX_LINE_LENGTH`] ends the stream: it is logged
    /// and the rest of the input is not read.
    pub async fn process_reader<R>(&self, reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let codec = AnyDelimiterCodec::new_with_max_length(
            b"\n".to_vec(),
            b"\n".to_vec(),
            MAX_LINE_LENGTH,
        );
        let mut lines = FramedRead::new(reader, codec);
        loop {
            let next = tokio::select! {
                next = lines.next() => next,
                _ = self.shutdown.cancelled() => return Ok(()),
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded)) => {
                    warn!(max_length = MAX_LINE_LENGTH, "Line too long, closing input");
                    return Ok(());
                }
                Some(Err(AnyDelimiterCodecError::Io(e))) => return Err(e.into()),
                None => return Ok(()),
            };
            let line = String::from_utf8_lossy(&chunk);
            if line.trim().is_empty() {
                continue;
            }
            self.push_line(line.into_owned()).await?;
        }
    }

    /// Resolve once every line queued before this call has reached the store.
    pub async fn sync(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.line_tx
            .send(LineMessage::Barrier(tx))
            .await
            .map_err(|_| Error::Internal("collector is shut down".to_string()))?;
        rx.await
            .map_err(|_| Error::Internal("collector stopped before sync".to_string()))
    }

    /// Stop the workers and wait for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
        info!("Collector stopped");
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    pub fn metrics(&self) -> &IngestMetrics {
        &self.metrics
    }

    /// Live samples for a scrape
    pub fn snapshot(&self) -> Vec<Sample> {
        self.store.snapshot()
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("store", &self.store)
            .field("cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

async fn run_line_worker(
    processor: LineProcessor,
    mut lines: mpsc::Receiver<LineMessage>,
    samples: mpsc::Sender<SampleMessage>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            message = lines.recv() => message,
            _ = shutdown.cancelled() => break,
        };
        let forward = match message {
            Some(LineMessage::Line(line)) => match processor.process(&line) {
                Ok(sample) => SampleMessage::Sample(sample),
                Err(_) => continue,
            },
            Some(LineMessage::Barrier(done)) => SampleMessage::Barrier(done),
            None => break,
        };
        if samples.send(forward).await.is_err() {
            break;
        }
    }
    let _ = samples.send(SampleMessage::Stop).await;
    debug!("Line worker exited");
}

async fn run_sample_worker(
    store: Arc<SampleStore>,
    mut samples: mpsc::Receiver<SampleMessage>,
    sweep_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = samples.recv() => match message {
                Some(SampleMessage::Sample(sample)) => store.put(sample),
                Some(SampleMessage::Barrier(done)) => {
                    let _ = done.send(());
                }
                Some(SampleMessage::Stop) | None => break,
            },
            _ = ticker.tick() => {
                store.sweep();
            }
            _ = shutdown.cancelled() => break,
        }
    }
    debug!("Sample worker exited");
}
