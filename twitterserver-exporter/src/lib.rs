//! Prometheus exporter for Twitter Server statistics.
//!
//! This crate polls a Twitter Server `metrics.json` endpoint every time
//! Prometheus scrapes it and re-exposes the statistics via an HTTP `/metrics`
//! endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  metrics.json   │<────│     Scraper     │<────│   HTTP Server   │
//! │ (Twitter Server)│────>│   (classify)    │────>│   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! Stat names are sanitized into valid metric names, and summary-style stats
//! (`requests_p99`, `requests_avg`, ...) are folded into a single family with a
//! `bucket` label. See [`classifier::classify`].
//!
//! # Usage
//!
//! ```bash
//! twitterserver-exporter --twitterserver.url http://localhost:9990/admin/metrics.json
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod classifier;
pub mod config;
pub mod exporter;
pub mod http;
pub mod scrape;

pub use classifier::{MetricKind, MetricRecord, classify};
pub use config::ExporterConfig;
pub use exporter::{Exporter, SharedExporter};
pub use http::HttpServer;
pub use scrape::{HttpSource, ScrapeError, ScrapeOutcome, Scraper, SnapshotSource};
