//! Scrape coordination: fetch a statistics snapshot and stream it as metric records.
//!
//! A [`Scraper`] owns everything a scrape needs (the snapshot source with its
//! connection pool, and the exporter's own scrape statistics). Each call to
//! [`Scraper::scrape`] spawns a producer task that fetches and classifies one
//! snapshot, handing records to the returned [`ScrapeOutcome`] through a
//! bounded channel.
//!
//! The producer holds the scraper's in-flight guard until it ends, so at most
//! one fetch is outstanding even when a consumer abandons its outcome.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::classifier::{MetricRecord, classify};
use crate::config::SourceConfig;

/// Decoded statistics snapshot: stat name to arbitrary JSON value.
pub type RawSnapshot = Map<String, Value>;

/// Errors that make a scrape fail.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Source returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("Failed to decode snapshot: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Something that can produce a statistics snapshot.
pub trait SnapshotSource: Send + Sync + 'static {
    /// Fetch one snapshot. Called once per scrape, never retried.
    fn fetch(&self) -> impl Future<Output = Result<RawSnapshot, ScrapeError>> + Send;
}

/// Fetches snapshots from a Twitter Server `metrics.json` endpoint.
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSource {
    /// Create a source with a pooled HTTP client built from configuration.
    pub fn new(config: &SourceConfig) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.response_timeout_secs))
            .tcp_keepalive(Duration::from_secs(config.keepalive_secs))
            .pool_max_idle_per_host(config.max_idle_connections)
            .build()
            .map_err(ScrapeError::Client)?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

impl SnapshotSource for HttpSource {
    async fn fetch(&self) -> Result<RawSnapshot, ScrapeError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status(status));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// The exporter's own scrape statistics.
#[derive(Debug, Default)]
pub struct ScrapeStats {
    errors_total: AtomicU64,
    last_duration_bits: AtomicU64,
}

impl ScrapeStats {
    /// Total number of failed scrapes.
    pub fn errors_total(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    /// Duration of the most recent scrape, in seconds.
    pub fn last_duration_secs(&self) -> f64 {
        f64::from_bits(self.last_duration_bits.load(Ordering::Relaxed))
    }

    fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    fn set_last_duration(&self, secs: f64) {
        self.last_duration_bits.store(secs.to_bits(), Ordering::Relaxed);
    }
}

/// Summary of a finished scrape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrapeReport {
    /// Whether fetching or decoding the snapshot failed.
    pub failed: bool,
    /// Records handed to the consumer.
    pub records: usize,
    /// Wall-clock duration of the scrape, in seconds.
    pub duration_secs: f64,
    /// Failed scrapes so far, including this one.
    pub errors_total: u64,
}

/// The record stream of one scrape.
///
/// Yields records until the producer has classified the whole snapshot. The
/// stream cannot be restarted; call [`Scraper::scrape`] again for fresh data.
pub struct ScrapeOutcome {
    records: mpsc::Receiver<MetricRecord>,
    producer: JoinHandle<ScrapeReport>,
    stats: Arc<ScrapeStats>,
}

impl ScrapeOutcome {
    /// Receive the next record, or `None` once the scrape is complete.
    pub async fn next(&mut self) -> Option<MetricRecord> {
        self.records.recv().await
    }

    /// Stop consuming and wait for the producer to finish.
    ///
    /// Records not yet received are discarded.
    pub async fn finish(self) -> ScrapeReport {
        let Self {
            mut records,
            producer,
            stats,
        } = self;
        records.close();

        match producer.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Scrape task terminated abnormally");
                ScrapeReport {
                    failed: true,
                    records: 0,
                    duration_secs: 0.0,
                    errors_total: stats.errors_total(),
                }
            }
        }
    }
}

/// Scrape context: snapshot source, record hand-off capacity and statistics.
pub struct Scraper<S = HttpSource> {
    source: Arc<S>,
    stats: Arc<ScrapeStats>,
    channel_capacity: usize,
    /// Owned by the running producer.
    in_flight: Arc<Mutex<()>>,
}

impl Scraper<HttpSource> {
    /// Create a scraper fetching over HTTP.
    pub fn from_config(config: &SourceConfig) -> Result<Self, ScrapeError> {
        Ok(Self::new(HttpSource::new(config)?, config.channel_capacity))
    }
}

impl<S: SnapshotSource> Scraper<S> {
    /// Create a scraper around an arbitrary snapshot source.
    pub fn new(source: S, channel_capacity: usize) -> Self {
        Self {
            source: Arc::new(source),
            stats: Arc::new(ScrapeStats::default()),
            channel_capacity: channel_capacity.max(1),
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// The snapshot source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Scrape statistics.
    pub fn stats(&self) -> &ScrapeStats {
        &self.stats
    }

    /// Start one scrape once the previous one has finished fetching.
    ///
    /// Concurrent callers wait in turn. Dropping the returned outcome does
    /// not release the scraper until its producer has ended.
    pub async fn scrape(&self) -> ScrapeOutcome {
        let permit = Arc::clone(&self.in_flight).lock_owned().await;

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let producer = tokio::spawn(produce(
            Arc::clone(&self.source),
            Arc::clone(&self.stats),
            tx,
            permit,
        ));

        ScrapeOutcome {
            records: rx,
            producer,
            stats: Arc::clone(&self.stats),
        }
    }
}

async fn produce<S: SnapshotSource>(
    source: Arc<S>,
    stats: Arc<ScrapeStats>,
    tx: mpsc::Sender<MetricRecord>,
    _permit: OwnedMutexGuard<()>,
) -> ScrapeReport {
    let start = Instant::now();

    let (failed, records) = match source.fetch().await {
        Ok(snapshot) => (false, send_records(snapshot, &tx).await),
        Err(e) => {
            warn!(error = %e, "Failed to scrape statistics");
            stats.record_error();
            (true, 0)
        }
    };

    let duration_secs = start.elapsed().as_nanos() as f64 / 1_000_000_000.0;
    stats.set_last_duration(duration_secs);
    drop(tx);

    debug!(failed, records, duration_secs, "Scrape finished");

    ScrapeReport {
        failed,
        records,
        duration_secs,
        errors_total: stats.errors_total(),
    }
}

/// Classify every numeric entry and hand it to the consumer.
async fn send_records(snapshot: RawSnapshot, tx: &mpsc::Sender<MetricRecord>) -> usize {
    let mut sent = 0;

    for (key, value) in snapshot {
        let Some(value) = value.as_f64() else {
            trace!(key = %key, "Skipping non-numeric stat");
            continue;
        };

        if tx.send(classify(&key, value)).await.is_err() {
            debug!("Record consumer went away, stopping scrape early");
            break;
        }
        sent += 1;
    }

    sent
}
