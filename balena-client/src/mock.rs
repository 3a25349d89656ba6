//! In-memory fleet for testing.
//!
//! [`MockFleet`] serves a fixed set of applications, devices and releases
//! without a backend. Handles are cheap to clone and share state, so a test
//! can keep one handle and mutate the fleet between poll cycles.

use std::future::{Future, ready};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::FleetApi;
use crate::error::{ClientError, Result};
use crate::model::{Application, Device, Release};

/// Which read operation should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Applications,
    Devices,
    Releases,
}

#[derive(Debug, Default)]
struct FleetState {
    applications: Vec<Application>,
    devices: Vec<Device>,
    releases: Vec<Release>,
    failure: Option<MockFailure>,
    release_lookups: usize,
}

/// Shared in-memory fleet implementing [`FleetApi`].
#[derive(Debug, Clone, Default)]
pub struct MockFleet {
    state: Arc<RwLock<FleetState>>,
}

impl MockFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_application(self, application: Application) -> Self {
        self.state.write().applications.push(application);
        self
    }

    pub fn with_device(self, device: Device) -> Self {
        self.state.write().devices.push(device);
        self
    }

    pub fn with_release(self, release: Release) -> Self {
        self.state.write().releases.push(release);
        self
    }

    /// Replace the device list.
    pub fn set_devices(&self, devices: Vec<Device>) {
        self.state.write().devices = devices;
    }

    /// Remove a device by UUID. Returns whether it was present.
    pub fn remove_device(&self, uuid: &str) -> bool {
        let mut state = self.state.write();
        let before = state.devices.len();
        state.devices.retain(|d| d.uuid != uuid);
        state.devices.len() != before
    }

    /// Insert or replace a release.
    pub fn upsert_release(&self, release: Release) {
        let mut state = self.state.write();
        match state.releases.iter_mut().find(|r| r.id == release.id) {
            Some(existing) => *existing = release,
            None => state.releases.push(release),
        }
    }

    /// Make the given operation fail until cleared with `None`.
    pub fn fail_on(&self, failure: Option<MockFailure>) {
        self.state.write().failure = failure;
    }

    /// Number of release lookups served so far (successful or not).
    pub fn release_lookups(&self) -> usize {
        self.state.read().release_lookups
    }

    fn check(&self, operation: MockFailure) -> Result<()> {
        if self.state.read().failure == Some(operation) {
            return Err(ClientError::Unavailable(format!(
                "injected failure on {:?}",
                operation
            )));
        }
        Ok(())
    }

    fn find_release(&self, id: u64) -> Result<Release> {
        self.state.write().release_lookups += 1;
        self.check(MockFailure::Releases)?;
        self.state
            .read()
            .releases
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(ClientError::ReleaseNotFound(id))
    }
}

impl FleetApi for MockFleet {
    fn applications(&self) -> impl Future<Output = Result<Vec<Application>>> + Send {
        ready(
            self.check(MockFailure::Applications)
                .map(|_| self.state.read().applications.clone()),
        )
    }

    fn devices(&self) -> impl Future<Output = Result<Vec<Device>>> + Send {
        ready(
            self.check(MockFailure::Devices)
                .map(|_| self.state.read().devices.clone()),
        )
    }

    fn release(&self, id: u64) -> impl Future<Output = Result<Release>> + Send {
        ready(self.find_release(id))
    }
}
