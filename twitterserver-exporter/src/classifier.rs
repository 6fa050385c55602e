//! Mapping from raw Twitter Server stat names to Prometheus metric records.

/// Statistical suffixes emitted by Twitter Server stats and histograms.
///
/// Checked in this order; the first suffix a name ends with wins.
pub const STAT_SUFFIXES: [&str; 12] = [
    "count", "sum", "avg", "min", "max", "stddev", "p50", "p90", "p95", "p99", "p9990", "p9999",
];

/// Label carrying the statistical suffix of a summary-style stat.
pub const BUCKET_LABEL: &str = "bucket";

/// Prometheus metric type of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    /// Get the TYPE comment string for Prometheus exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// A single metric sample ready for exposition.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    /// Metric name, without the exporter namespace.
    pub name: String,
    /// Sample value.
    pub value: f64,
    /// Ordered label pairs.
    pub labels: Vec<(String, String)>,
    /// Metric type.
    pub kind: MetricKind,
}

impl MetricRecord {
    /// Create an unlabeled gauge record.
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            labels: Vec::new(),
            kind: MetricKind::Gauge,
        }
    }

    /// Create an unlabeled counter record.
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            labels: Vec::new(),
            kind: MetricKind::Counter,
        }
    }

    /// Add a label pair.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }
}

/// Sanitize a stat name to be Prometheus-compatible.
///
/// Every character outside `[a-zA-Z0-9_:]` becomes an underscore. Unlike a
/// general-purpose sanitizer this keeps a one-to-one character mapping, so
/// `a..b` becomes `a__b`.
pub fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Find the statistical suffix a sanitized name ends with, if any.
pub fn stat_suffix(name: &str) -> Option<&'static str> {
    STAT_SUFFIXES
        .iter()
        .copied()
        .find(|suffix| name.ends_with(suffix))
}

/// Classify a raw stat into a metric record.
///
/// Summary-style stats such as `requests_p99` or `requests_avg` collapse into
/// the `requests` family with a `bucket` label; anything else passes through
/// as an unlabeled gauge under its sanitized name.
///
/// The suffix is only stripped when it follows an `_`. A name that merely
/// ends with a suffix (`checksum`) keeps its full name and still gets the
/// label.
pub fn classify(raw_key: &str, value: f64) -> MetricRecord {
    let name = sanitize_metric_name(raw_key);

    let Some(suffix) = stat_suffix(&name) else {
        return MetricRecord::gauge(name, value);
    };

    let base = name[..name.len() - suffix.len()]
        .strip_suffix('_')
        .unwrap_or(name.as_str());

    MetricRecord::gauge(base, value).with_label(BUCKET_LABEL, suffix)
}
