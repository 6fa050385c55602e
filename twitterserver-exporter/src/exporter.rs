//! Exposition of scraped statistics in the Prometheus text format.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::classifier::{MetricKind, MetricRecord};
use crate::config::ExporterConfig;
use crate::scrape::{HttpSource, ScrapeError, ScrapeReport, ScrapeStats, Scraper, SnapshotSource};

/// Name of the scrape error counter, before namespacing.
pub const SCRAPE_ERRORS_METRIC: &str = "exporter_scrape_errors_total";

/// Name of the last scrape duration gauge, before namespacing.
pub const SCRAPE_DURATION_METRIC: &str = "exporter_last_scrape_duration_seconds";

/// Content type of the Prometheus text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Scrapes the source on demand, one scrape at a time.
pub struct Exporter<S = HttpSource> {
    scraper: Scraper<S>,
    /// Metric name prefix.
    namespace: String,
}

/// Exporter handle shared by the HTTP handlers.
pub type SharedExporter<S = HttpSource> = Arc<Exporter<S>>;

impl Exporter<HttpSource> {
    /// Create an exporter fetching from the configured source.
    pub fn from_config(config: &ExporterConfig) -> Result<Self, ScrapeError> {
        Ok(Self::new(
            Scraper::from_config(&config.source)?,
            config.web.namespace.clone(),
        ))
    }
}

impl<S: SnapshotSource> Exporter<S> {
    /// Create a new exporter.
    pub fn new(scraper: Scraper<S>, namespace: impl Into<String>) -> Self {
        Self {
            scraper,
            namespace: namespace.into(),
        }
    }

    /// Metric name prefix.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Scrape statistics.
    pub fn stats(&self) -> &ScrapeStats {
        self.scraper.stats()
    }

    /// The underlying scraper.
    pub fn scraper(&self) -> &Scraper<S> {
        &self.scraper
    }

    /// Run one scrape and pass every resulting record to `emit`.
    ///
    /// Records arrive in the order they were classified, followed by the
    /// scrape error counter and the last scrape duration. Concurrent callers
    /// are serialized by the scraper; each runs its own scrape.
    ///
    /// Snapshot stats named like one of the exporter's own metrics are
    /// dropped.
    pub async fn collect<F>(&self, mut emit: F) -> ScrapeReport
    where
        F: FnMut(MetricRecord),
    {
        let mut outcome = self.scraper.scrape().await;
        while let Some(record) = outcome.next().await {
            if is_reserved(&record.name) {
                debug!(name = %record.name, "Dropping stat shadowing an exporter metric");
                continue;
            }
            emit(record);
        }
        let report = outcome.finish().await;

        emit(MetricRecord::counter(
            SCRAPE_ERRORS_METRIC,
            report.errors_total as f64,
        ));
        emit(MetricRecord::gauge(
            SCRAPE_DURATION_METRIC,
            report.duration_secs,
        ));

        report
    }

    /// Scrape and render metrics in Prometheus exposition format.
    pub async fn render(&self) -> String {
        let mut families = MetricFamilies::default();
        let report = self.collect(|record| families.push(record)).await;

        debug!(
            failed = report.failed,
            records = report.records,
            families = families.len(),
            "Rendering scrape"
        );

        families.encode(&self.namespace)
    }
}

fn is_reserved(name: &str) -> bool {
    name == SCRAPE_ERRORS_METRIC || name == SCRAPE_DURATION_METRIC
}

/// Build a full metric name from the namespace and a record name.
pub fn qualified_name(namespace: &str, name: &str) -> String {
    match (namespace.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (false, true) => namespace.to_string(),
        (false, false) => format!("{}_{}", namespace, name),
    }
}

/// Records grouped by metric name, in the order each name first appeared.
#[derive(Debug, Default)]
pub struct MetricFamilies {
    index: HashMap<String, usize>,
    families: Vec<MetricFamily>,
}

/// All series sharing one metric name.
#[derive(Debug)]
pub struct MetricFamily {
    /// Metric name, without the namespace.
    pub name: String,
    /// Type of the first record seen with this name.
    pub kind: MetricKind,
    /// Series in arrival order.
    pub records: Vec<MetricRecord>,
}

impl MetricFamilies {
    /// Add a record to its family.
    pub fn push(&mut self, record: MetricRecord) {
        match self.index.get(&record.name) {
            Some(&i) => self.families[i].records.push(record),
            None => {
                self.index.insert(record.name.clone(), self.families.len());
                self.families.push(MetricFamily {
                    name: record.name.clone(),
                    kind: record.kind,
                    records: vec![record],
                });
            }
        }
    }

    /// Number of families.
    pub(crate) fn len(&self) -> usize {
        self.families.len()
    }

    /// Iterate over families in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricFamily> {
        self.families.iter()
    }

    /// Encode all families in Prometheus text format.
    pub fn encode(&self, namespace: &str) -> String {
        let mut output = Vec::with_capacity(self.families.len() * 100);

        for family in &self.families {
            let name = qualified_name(namespace, &family.name);
            if name.is_empty() {
                trace!(
                    series = family.records.len(),
                    "Skipping metric family with empty name"
                );
                continue;
            }

            if let Some(help) = help_text(&family.name) {
                writeln!(output, "# HELP {} {}", name, help).ok();
            }
            writeln!(output, "# TYPE {} {}", name, family.kind.as_str()).ok();

            for record in &family.records {
                writeln!(
                    output,
                    "{}{} {}",
                    name,
                    format_labels(&record.labels),
                    format_value(record.value)
                )
                .ok();
            }
        }

        String::from_utf8(output).unwrap_or_default()
    }
}

/// HELP text for the exporter's own metrics.
fn help_text(name: &str) -> Option<&'static str> {
    match name {
        SCRAPE_ERRORS_METRIC => Some("Total scrape errors"),
        SCRAPE_DURATION_METRIC => Some("The last scrape duration"),
        _ => None,
    }
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
