//! The fixed set of exported fleet series.
//!
//! [`BalenaMetrics`] owns a `prometheus_client` registry created once at
//! startup. The series it contains never change shape; only their values are
//! overwritten by each poll cycle.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::{error, warn};

/// Label value used when a relationship or field cannot be resolved.
pub const NONE_LABEL: &str = "None";

/// States of `balena_device_status`.
pub const DEVICE_STATUS_STATES: &[&str] = &["Idle", "Running", "Updating", NONE_LABEL];

/// States of `balena_device_overall_status`.
pub const OVERALL_STATUS_STATES: &[&str] =
    &["online", "offline", "configuring", "updating", NONE_LABEL];

pub const APPLICATION_COUNT: &str = "balena_count_applications";
pub const DEVICE_COUNT: &str = "balena_count_devices";
pub const DEVICE_MEMORY_USAGE: &str = "balena_device_memory_usage";
pub const DEVICE_STATUS: &str = "balena_device_status";
pub const DEVICE_OVERALL_STATUS: &str = "balena_device_overall_status";
pub const RELEASE_NUMBER_DEVICES: &str = "balena_release_number_devices";
pub const RELEASE_CREATED_AT: &str = "balena_release_created_at";

/// Escape a label value for the text exposition format.
///
/// The encoder writes label values verbatim, so backslash, double quote and
/// line feed must be escaped before they reach a label set.
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Labels of every per-device series. Values are stored escaped.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeviceLabels {
    pub deviceuuid: String,
    pub application: String,
    pub release: String,
}

impl DeviceLabels {
    pub fn new(deviceuuid: &str, application: &str, release: &str) -> Self {
        Self {
            deviceuuid: escape_label_value(deviceuuid),
            application: escape_label_value(application),
            release: escape_label_value(release),
        }
    }
}

/// Labels of every per-release series. The value is stored escaped.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReleaseLabels {
    pub release: String,
}

impl ReleaseLabels {
    pub fn new(release: &str) -> Self {
        Self {
            release: escape_label_value(release),
        }
    }
}

/// An enum-valued metric over a fixed state domain.
///
/// Follows the Prometheus enum convention: each state is its own series,
/// distinguished by a label named after the metric, with value 1 for the
/// current state and 0 for the others.
#[derive(Debug, Clone)]
pub struct StateSet {
    name: &'static str,
    states: &'static [&'static str],
    family: Family<Vec<(String, String)>, Gauge>,
}

impl StateSet {
    fn new(name: &'static str, states: &'static [&'static str]) -> Self {
        Self {
            name,
            states,
            family: Family::default(),
        }
    }

    /// Set the current state for `labels`.
    ///
    /// Strings outside the domain are coerced to `None`. Returns the state
    /// actually recorded.
    pub fn set(&self, labels: &DeviceLabels, state: &str) -> &'static str {
        let current = match self.states.iter().find(|s| **s == state) {
            Some(s) => *s,
            None => {
                warn!(
                    metric = self.name,
                    device = %labels.deviceuuid,
                    state,
                    "State outside of metric domain, recording as None"
                );
                NONE_LABEL
            }
        };

        for candidate in self.states {
            self.family
                .get_or_create(&self.label_set(labels, candidate))
                .set(i64::from(*candidate == current));
        }

        current
    }

    fn label_set(&self, labels: &DeviceLabels, state: &str) -> Vec<(String, String)> {
        vec![
            ("deviceuuid".to_string(), labels.deviceuuid.clone()),
            ("application".to_string(), labels.application.clone()),
            ("release".to_string(), labels.release.clone()),
            (self.name.to_string(), state.to_string()),
        ]
    }
}

/// Registry of all exported fleet series.
#[derive(Debug)]
pub struct BalenaMetrics {
    registry: Registry,
    application_count: Gauge,
    device_count: Gauge,
    device_memory_usage: Family<DeviceLabels, Gauge<f64, AtomicU64>>,
    device_status: StateSet,
    device_overall_status: StateSet,
    release_number_devices: Family<ReleaseLabels, Gauge>,
    release_created_at: Family<ReleaseLabels, Gauge>,
}

impl BalenaMetrics {
    /// Create and register every series.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let application_count = Gauge::default();
        registry.register(
            APPLICATION_COUNT,
            "All active Applications",
            application_count.clone(),
        );

        let device_count = Gauge::default();
        registry.register(DEVICE_COUNT, "All existing devices", device_count.clone());

        let device_memory_usage = Family::<DeviceLabels, Gauge<f64, AtomicU64>>::default();
        registry.register(
            DEVICE_MEMORY_USAGE,
            "Device Memory Usage",
            device_memory_usage.clone(),
        );

        let device_status = StateSet::new(DEVICE_STATUS, DEVICE_STATUS_STATES);
        registry.register(DEVICE_STATUS, "Device Status", device_status.family.clone());

        let device_overall_status = StateSet::new(DEVICE_OVERALL_STATUS, OVERALL_STATUS_STATES);
        registry.register(
            DEVICE_OVERALL_STATUS,
            "Device Overall Status",
            device_overall_status.family.clone(),
        );

        let release_number_devices = Family::<ReleaseLabels, Gauge>::default();
        registry.register(
            RELEASE_NUMBER_DEVICES,
            "Number of devices running a release",
            release_number_devices.clone(),
        );

        let release_created_at = Family::<ReleaseLabels, Gauge>::default();
        registry.register(
            RELEASE_CREATED_AT,
            "Release creation time in seconds since the Unix epoch",
            release_created_at.clone(),
        );

        Self {
            registry,
            application_count,
            device_count,
            device_memory_usage,
            device_status,
            device_overall_status,
            release_number_devices,
            release_created_at,
        }
    }

    pub fn set_application_count(&self, count: usize) {
        self.application_count.set(count as i64);
    }

    pub fn set_device_count(&self, count: usize) {
        self.device_count.set(count as i64);
    }

    pub fn set_memory_usage(&self, labels: &DeviceLabels, value: f64) {
        self.device_memory_usage.get_or_create(labels).set(value);
    }

    pub fn set_device_status(&self, labels: &DeviceLabels, state: &str) -> &'static str {
        self.device_status.set(labels, state)
    }

    pub fn set_overall_status(&self, labels: &DeviceLabels, state: &str) -> &'static str {
        self.device_overall_status.set(labels, state)
    }

    /// Count one more device on `labels`. Never reset between cycles.
    pub fn inc_release_devices(&self, labels: &ReleaseLabels) {
        self.release_number_devices.get_or_create(labels).inc();
    }

    pub fn set_release_created_at(&self, labels: &ReleaseLabels, timestamp: i64) {
        self.release_created_at.get_or_create(labels).set(timestamp);
    }

    /// Render the registry in the OpenMetrics text format.
    pub fn render(&self) -> String {
        let mut output = String::new();
        if let Err(e) = encode(&mut output, &self.registry) {
            error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        output
    }
}

impl Default for BalenaMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a shareable metrics handle.
pub type SharedMetrics = Arc<BalenaMetrics>;

/// Read access for tests. Reading a labeled series that was never written
/// creates it with value 0.
#[cfg(test)]
impl BalenaMetrics {
    pub(crate) fn application_count(&self) -> i64 {
        self.application_count.get()
    }

    pub(crate) fn device_count(&self) -> i64 {
        self.device_count.get()
    }

    pub(crate) fn memory_usage(&self, labels: &DeviceLabels) -> f64 {
        self.device_memory_usage.get_or_create(labels).get()
    }

    pub(crate) fn device_status(&self, labels: &DeviceLabels) -> Option<&'static str> {
        self.device_status.current(labels)
    }

    pub(crate) fn overall_status(&self, labels: &DeviceLabels) -> Option<&'static str> {
        self.device_overall_status.current(labels)
    }

    pub(crate) fn release_devices(&self, labels: &ReleaseLabels) -> i64 {
        self.release_number_devices.get_or_create(labels).get()
    }

    pub(crate) fn release_created_at(&self, labels: &ReleaseLabels) -> i64 {
        self.release_created_at.get_or_create(labels).get()
    }
}

#[cfg(test)]
impl StateSet {
    fn current(&self, labels: &DeviceLabels) -> Option<&'static str> {
        self.states.iter().copied().find(|state| {
            self.family
                .get_or_create(&self.label_set(labels, state))
                .get()
                == 1
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(uuid: &str) -> DeviceLabels {
        DeviceLabels::new(uuid, "sensors", "abc123")
    }

    #[test]
    fn test_render_contains_all_series() {
        let metrics = BalenaMetrics::new();
        metrics.set_application_count(2);
        metrics.set_device_count(3);
        metrics.set_memory_usage(&labels("dev-1"), 128.0);
        metrics.set_device_status(&labels("dev-1"), "Idle");
        metrics.set_overall_status(&labels("dev-1"), "online");
        metrics.inc_release_devices(&ReleaseLabels::new("abc123"));
        metrics.set_release_created_at(&ReleaseLabels::new("abc123"), 1682942400);

        let output = metrics.render();

        for name in [
            APPLICATION_COUNT,
            DEVICE_COUNT,
            DEVICE_MEMORY_USAGE,
            DEVICE_STATUS,
            DEVICE_OVERALL_STATUS,
            RELEASE_NUMBER_DEVICES,
            RELEASE_CREATED_AT,
        ] {
            assert!(
                output.contains(&format!("# TYPE {} gauge", name)),
                "missing {} in {}",
                name,
                output
            );
        }
        assert!(output.contains("balena_count_applications 2"));
        assert!(output.contains("balena_count_devices 3"));
        assert!(output.contains("balena_release_created_at{release=\"abc123\"} 1682942400"));
    }

    #[test]
    fn test_device_labels_order() {
        let metrics = BalenaMetrics::new();
        metrics.set_memory_usage(&labels("dev-1"), 64.0);

        let output = metrics.render();
        assert!(output.contains(
            "balena_device_memory_usage{deviceuuid=\"dev-1\",application=\"sensors\",release=\"abc123\"}"
        ));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("sensors"), "sensors");
        assert_eq!(escape_label_value(r#"my "quoted" app\x"#), r#"my \"quoted\" app\\x"#);
        assert_eq!(escape_label_value("two\nlines"), "two\\nlines");
    }

    #[test]
    fn test_render_escapes_label_values() {
        let metrics = BalenaMetrics::new();
        let device = DeviceLabels::new("dev-1", "my \"quoted\" app\\x", "None");
        metrics.set_memory_usage(&device, 0.0);
        metrics.set_device_status(&device, "Idle");
        metrics.set_release_created_at(&ReleaseLabels::new("line\nbreak"), 1);

        let output = metrics.render();

        assert!(output.contains(
            r#"balena_device_memory_usage{deviceuuid="dev-1",application="my \"quoted\" app\\x",release="None"} 0.0"#
        ));
        assert!(output.contains(r#"application="my \"quoted\" app\\x",release="None",balena_device_status="Idle"} 1"#));
        assert!(output.contains(r#"balena_release_created_at{release="line\nbreak"} 1"#));
        // Every sample stays on one line
        assert!(output.lines().all(|l| l.starts_with('#') || l.starts_with("balena_")));
    }

    #[test]
    fn test_state_set_one_hot() {
        let metrics = BalenaMetrics::new();
        let device = labels("dev-1");

        assert_eq!(metrics.set_device_status(&device, "Running"), "Running");

        let output = metrics.render();
        let status_lines: Vec<&str> = output
            .lines()
            .filter(|l| l.starts_with("balena_device_status{"))
            .collect();
        assert_eq!(status_lines.len(), DEVICE_STATUS_STATES.len());
        assert!(
            status_lines
                .iter()
                .any(|l| l.contains("balena_device_status=\"Running\"") && l.ends_with(" 1"))
        );
        assert_eq!(
            status_lines.iter().filter(|l| l.ends_with(" 1")).count(),
            1
        );
    }

    #[test]
    fn test_state_set_transition() {
        let metrics = BalenaMetrics::new();
        let device = labels("dev-1");

        metrics.set_device_status(&device, "Updating");
        metrics.set_device_status(&device, "Idle");

        assert_eq!(metrics.device_status(&device), Some("Idle"));
    }

    #[test]
    fn test_state_set_coerces_unknown_state() {
        let metrics = BalenaMetrics::new();
        let device = labels("dev-1");

        assert_eq!(metrics.set_overall_status(&device, "post-provisioning"), NONE_LABEL);
        assert_eq!(metrics.overall_status(&device), Some(NONE_LABEL));
    }

    #[test]
    fn test_release_devices_increments() {
        let metrics = BalenaMetrics::new();
        let release = ReleaseLabels::new("abc123");

        metrics.inc_release_devices(&release);
        metrics.inc_release_devices(&release);

        assert_eq!(metrics.release_devices(&release), 2);
    }

    #[test]
    fn test_fresh_registries_are_isolated() {
        let first = BalenaMetrics::new();
        let second = BalenaMetrics::new();

        first.set_device_count(5);

        assert_eq!(first.device_count(), 5);
        assert_eq!(second.device_count(), 0);
    }
}
