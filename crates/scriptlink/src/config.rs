//! Bridge configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Action the script service registers for.
pub const DEFAULT_SERVICE_ACTION: &str = "net.pierrox.lightning_launcher.script.IMPORT";

/// Permission required before binding to the script service.
pub const DEFAULT_PERMISSION: &str = "net.pierrox.lightning_launcher.IMPORT_SCRIPTS";

/// Oldest service version this client can talk to.
pub const MIN_SERVICE_VERSION: u32 = 30;

/// Configuration for a [`ScriptClient`](crate::ScriptClient).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Action used to discover the service
    pub service_action: String,
    /// Permission requested before binding
    pub permission: String,
    /// Minimum supported service version
    pub min_service_version: u32,
    /// How long to wait for the permission flow before treating it as denied
    #[serde(with = "duration_ms")]
    pub permission_timeout: Duration,
    /// How long to wait for the service to connect (unbounded if unset)
    #[serde(default, with = "opt_duration_ms")]
    pub bind_timeout: Option<Duration>,
    /// How long to wait for a remote callback (unbounded if unset)
    #[serde(default, with = "opt_duration_ms")]
    pub call_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            service_action: DEFAULT_SERVICE_ACTION.to_string(),
            permission: DEFAULT_PERMISSION.to_string(),
            min_service_version: MIN_SERVICE_VERSION,
            permission_timeout: Duration::from_secs(120), // 2 minutes for the user to answer
            bind_timeout: None,
            call_timeout: None,
        }
    }
}

impl BridgeConfig {
    /// Set the permission wait bound.
    pub fn with_permission_timeout(mut self, timeout: Duration) -> Self {
        self.permission_timeout = timeout;
        self
    }

    /// Bound the wait for the service connection.
    pub fn with_bind_timeout(mut self, timeout: Duration) -> Self {
        self.bind_timeout = Some(timeout);
        self
    }

    /// Bound the wait for each remote callback.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Override the minimum supported service version.
    pub fn with_min_service_version(mut self, version: u32) -> Self {
        self.min_service_version = version;
        self
    }
}

/// Helper for serializing Duration as milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();

        assert_eq!(config.min_service_version, 30);
        assert_eq!(config.service_action, DEFAULT_SERVICE_ACTION);
        assert_eq!(config.permission, DEFAULT_PERMISSION);
        assert_eq!(config.permission_timeout, Duration::from_secs(120));
        assert_eq!(config.bind_timeout, None);
        assert_eq!(config.call_timeout, None);
    }

    #[test]
    fn test_config_serialization_format() {
        let config = BridgeConfig::default()
            .with_permission_timeout(Duration::from_millis(5000))
            .with_call_timeout(Duration::from_millis(250));

        let json = serde_json::to_string(&config).unwrap();

        assert!(json.contains("\"permission_timeout\":5000"));
        assert!(json.contains("\"call_timeout\":250"));
        assert!(json.contains("\"bind_timeout\":null"));
    }

    #[test]
    fn test_config_missing_optional_timeouts() {
        let json = r#"{
            "service_action": "a",
            "permission": "p",
            "min_service_version": 31,
            "permission_timeout": 1000
        }"#;

        let config: BridgeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.min_service_version, 31);
        assert_eq!(config.permission_timeout, Duration::from_secs(1));
        assert_eq!(config.bind_timeout, None);
        assert_eq!(config.call_timeout, None);
    }
}
