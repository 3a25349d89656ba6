//! Resolution of device relationships.
//!
//! A device references its application and running release by identifier.
//! Resolution follows those references to produce the labels the metrics
//! are keyed by. Results live for a single poll cycle.

use balena_client::{Application, Device, FleetApi};
use chrono::DateTime;
use tracing::trace;

use crate::error::PollError;
use crate::metrics::{DeviceLabels, NONE_LABEL, ReleaseLabels};

/// The release a device is running, with its creation time parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelease {
    pub id: u64,
    pub commit: String,
    /// Seconds since the Unix epoch.
    pub created_at: i64,
}

impl ResolvedRelease {
    pub fn labels(&self) -> ReleaseLabels {
        ReleaseLabels::new(&self.commit)
    }
}

/// A device combined with its resolved application and release.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDevice {
    pub device: Device,
    /// Name of the owning application, if it was found.
    pub application: Option<String>,
    /// Running release, if the device references one.
    pub release: Option<ResolvedRelease>,
}

impl ResolvedDevice {
    /// Application name, or `None` when unresolved.
    pub fn application_label(&self) -> &str {
        self.application.as_deref().unwrap_or(NONE_LABEL)
    }

    /// Release commit, or `None` when the device runs no release.
    pub fn release_label(&self) -> &str {
        self.release
            .as_ref()
            .map(|r| r.commit.as_str())
            .unwrap_or(NONE_LABEL)
    }

    /// Label triple of the per-device series.
    pub fn labels(&self) -> DeviceLabels {
        DeviceLabels::new(
            &self.device.uuid,
            self.application_label(),
            self.release_label(),
        )
    }
}

/// Find the application a device belongs to.
///
/// Identifiers are expected to be unique; should several applications match,
/// the first one in fetch order wins.
pub fn resolve_application<'a>(
    device: &Device,
    applications: &'a [Application],
) -> Option<&'a Application> {
    applications
        .iter()
        .find(|app| app.id == device.application.id)
}

/// Parse an RFC 3339 timestamp such as `2023-05-01T12:00:00.000Z` into Unix
/// seconds.
pub fn parse_created_at(value: &str) -> Result<i64, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.timestamp())
}

/// Fetch and parse the release a device is running.
///
/// Returns `Ok(None)` without any remote call when the device has no release
/// reference.
pub async fn resolve_release<A: FleetApi>(
    api: &A,
    device: &Device,
) -> Result<Option<ResolvedRelease>, PollError> {
    let Some(reference) = device.release else {
        return Ok(None);
    };

    let release = api.release(reference.id).await?;
    let created_at =
        parse_created_at(&release.created_at).map_err(|source| PollError::InvalidTimestamp {
            release: release.id,
            value: release.created_at.clone(),
            source,
        })?;

    Ok(Some(ResolvedRelease {
        id: release.id,
        commit: release.commit,
        created_at,
    }))
}

/// Resolve a device's application and release.
pub async fn resolve_device<A: FleetApi>(
    api: &A,
    device: Device,
    applications: &[Application],
) -> Result<ResolvedDevice, PollError> {
    let application = resolve_application(&device, applications).map(|app| app.name.clone());
    let release = resolve_release(api, &device).await?;

    trace!(
        device = %device.uuid,
        application = application.as_deref().unwrap_or(NONE_LABEL),
        release = release.as_ref().map(|r| r.commit.as_str()).unwrap_or(NONE_LABEL),
        "Resolved device"
    );

    Ok(ResolvedDevice {
        device,
        application,
        release,
    })
}
