//! Read-only client for the balena fleet API.
//!
//! The exporter only needs three read operations from the remote platform,
//! captured by the [`FleetApi`] trait:
//!
//! - all applications
//! - all devices
//! - a single release by identifier
//!
//! [`BalenaClient`] implements them over HTTP against the OData (`/v6`)
//! endpoints. [`MockFleet`] is an in-memory implementation for tests and
//! local runs without a backend.

pub mod api;
pub mod client;
pub mod error;
pub mod mock;
pub mod model;

pub use api::FleetApi;
pub use client::BalenaClient;
pub use error::{ClientError, Result};
pub use mock::{MockFailure, MockFleet};
pub use model::{Application, Device, Reference, Release};
