//! One poll cycle's view of the fleet and its translation into metrics.
//!
//! A cycle runs in two phases. [`FleetSnapshot::collect`] fetches every
//! entity and resolves every device; any failure there aborts the cycle
//! before the registry is touched. [`FleetSnapshot::apply`] then writes the
//! snapshot into [`BalenaMetrics`] and cannot fail.
//!
//! Series of devices that disappear from the fleet are never removed: their
//! last written values stay in the registry.

use balena_client::FleetApi;
use tracing::debug;

use crate::error::PollError;
use crate::metrics::{BalenaMetrics, NONE_LABEL};
use crate::resolver::{ResolvedDevice, resolve_device};

/// Fleet state fetched and resolved for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetSnapshot {
    pub application_count: usize,
    pub devices: Vec<ResolvedDevice>,
}

impl FleetSnapshot {
    /// Fetch applications and devices, then resolve each device in fetch
    /// order. Releases are looked up one device at a time.
    pub async fn collect<A: FleetApi>(api: &A) -> Result<Self, PollError> {
        let applications = api.applications().await?;
        let devices = api.devices().await?;

        debug!(
            applications = applications.len(),
            devices = devices.len(),
            "Fetched fleet"
        );

        let mut resolved = Vec::with_capacity(devices.len());
        for device in devices {
            resolved.push(resolve_device(api, device, &applications).await?);
        }

        Ok(Self {
            application_count: applications.len(),
            devices: resolved,
        })
    }

    /// Write this snapshot into the registry.
    ///
    /// `balena_release_number_devices` is incremented once per device on a
    /// release and is never reset, so it accumulates across cycles.
    pub fn apply(&self, metrics: &BalenaMetrics) {
        metrics.set_application_count(self.application_count);
        metrics.set_device_count(self.devices.len());

        for resolved in &self.devices {
            let device = &resolved.device;
            let labels = resolved.labels();

            metrics.set_memory_usage(&labels, device.memory_usage.unwrap_or(0.0));
            let status =
                metrics.set_device_status(&labels, device.status.as_deref().unwrap_or(NONE_LABEL));
            let overall_status = metrics.set_overall_status(
                &labels,
                device.overall_status.as_deref().unwrap_or(NONE_LABEL),
            );

            if let Some(release) = &resolved.release {
                let release_labels = release.labels();
                metrics.inc_release_devices(&release_labels);
                metrics.set_release_created_at(&release_labels, release.created_at);
            }

            debug!(
                device = %labels.deviceuuid,
                application = %labels.application,
                release = %labels.release,
                status,
                overall_status,
                "Updated device metrics"
            );
        }
    }
}
