//! Prometheus metrics exporter for balena fleets.
//!
//! This crate polls the balena API for applications, devices and releases,
//! resolves which application and release each device belongs to, and
//! exposes the result via an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   balena API    │────>│   FleetPoller   │────>│   HTTP Server   │
//! │ (apps/devices/  │     │ (fetch, resolve,│     │   (/metrics)    │
//! │   releases)     │     │  build)         │     │                 │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! The exporter is configured through environment variables, optionally on
//! top of a JSON5 file:
//!
//! ```bash
//! BALENA_API_URI=https://api.balena-cloud.com BALENA_USER=me BALENA_PWD=secret \
//!     balena-exporter-prometheus --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod poller;
pub mod resolver;
pub mod snapshot;

pub use config::ExporterConfig;
pub use error::PollError;
pub use http::HttpServer;
pub use metrics::{BalenaMetrics, SharedMetrics};
pub use poller::{FleetPoller, PollerStats, SharedStats};
pub use snapshot::FleetSnapshot;
