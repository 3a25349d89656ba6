//! Fleet entities as returned by the balena OData API.

use serde::{Deserialize, Serialize};

/// A foreign-key style reference to another resource (`{"__id": 42}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "__id")]
    pub id: u64,
}

impl Reference {
    pub fn new(id: u64) -> Self {
        Self { id }
    }
}

/// An application (fleet) on the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: u64,
    #[serde(rename = "app_name")]
    pub name: String,
}

impl Application {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A managed device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub uuid: String,

    /// Owning application.
    #[serde(rename = "belongs_to__application")]
    pub application: Reference,

    /// Release currently running on the device, if any.
    #[serde(rename = "is_running__release", default)]
    pub release: Option<Reference>,

    #[serde(default)]
    pub memory_usage: Option<f64>,

    /// Operational status (`Idle`, `Running`, `Updating`, ...).
    #[serde(default)]
    pub status: Option<String>,

    /// Connectivity status (`online`, `offline`, ...).
    #[serde(default)]
    pub overall_status: Option<String>,
}

impl Device {
    /// Create a device belonging to `application_id` with every optional
    /// field absent.
    pub fn new(uuid: impl Into<String>, application_id: u64) -> Self {
        Self {
            uuid: uuid.into(),
            application: Reference::new(application_id),
            release: None,
            memory_usage: None,
            status: None,
            overall_status: None,
        }
    }

    pub fn with_release(mut self, release_id: u64) -> Self {
        self.release = Some(Reference::new(release_id));
        self
    }

    pub fn with_memory_usage(mut self, memory_usage: f64) -> Self {
        self.memory_usage = Some(memory_usage);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_overall_status(mut self, overall_status: impl Into<String>) -> Self {
        self.overall_status = Some(overall_status.into());
        self
    }
}

/// A release (build) of an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: u64,
    pub commit: String,
    /// RFC 3339 timestamp, e.g. `2023-05-01T12:00:00.000Z`.
    pub created_at: String,
}

impl Release {
    pub fn new(id: u64, commit: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            id,
            commit: commit.into(),
            created_at: created_at.into(),
        }
    }
}

/// Envelope of every OData collection response.
#[derive(Debug, Clone, Deserialize)]
pub struct ODataResponse<T> {
    pub d: Vec<T>,
}
