//! The read operations the exporter consumes from the fleet platform.

use std::future::Future;

use crate::error::Result;
use crate::model::{Application, Device, Release};

/// Read access to fleet state.
///
/// Implementations perform no retries: any failure is returned to the caller
/// as-is.
pub trait FleetApi: Send + Sync {
    /// Fetch every application visible to the authenticated user.
    fn applications(&self) -> impl Future<Output = Result<Vec<Application>>> + Send;

    /// Fetch every device visible to the authenticated user.
    fn devices(&self) -> impl Future<Output = Result<Vec<Device>>> + Send;

    /// Fetch a single release by identifier.
    fn release(&self, id: u64) -> impl Future<Output = Result<Release>> + Send;
}
