//! Process configuration.
//!
//! [`Settings`] starts from code defaults and applies `DRIVEGUARD_*`
//! environment overrides on top. An unset variable keeps the default; an
//! unparseable one is logged and ignored rather than aborting a monitoring
//! process at startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

use crate::coordinator::CoordinatorConfig;
use crate::detector::EdgeConfig;
use crate::transport::TransportConfig;

/// Broker address override, e.g. `tcp://10.0.0.7:1883`.
pub const ENV_BROKER: &str = "DRIVEGUARD_BROKER";

/// Alerts topic override.
pub const ENV_ALERTS_TOPIC: &str = "DRIVEGUARD_ALERTS_TOPIC";

/// Control topic override.
pub const ENV_CONTROL_TOPIC: &str = "DRIVEGUARD_CONTROL_TOPIC";

/// Edge frame pacing override.
pub const ENV_TARGET_FPS: &str = "DRIVEGUARD_TARGET_FPS";

/// Edge frame-skip override.
pub const ENV_PROCESS_EVERY: &str = "DRIVEGUARD_PROCESS_EVERY";

/// Store retry attempt budget override.
pub const ENV_RETRY_ATTEMPTS: &str = "DRIVEGUARD_RETRY_ATTEMPTS";

/// Initial store retry backoff override, in milliseconds.
pub const ENV_RETRY_BACKOFF_MS: &str = "DRIVEGUARD_RETRY_BACKOFF_MS";

/// Push-notification service token.
pub const ENV_NOTIFIER_TOKEN: &str = "DRIVEGUARD_NOTIFIER_TOKEN";

/// Everything a DriveGuard process reads at startup.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Broker to dial. `None` means the deployment wires its own client.
    pub broker_addr: Option<String>,
    /// Token for the push-notification service. `None` disables pushes.
    pub notifier_token: Option<String>,
    /// Transport queue and reconnect tuning.
    pub transport: TransportConfig,
    /// Edge loop tuning.
    pub edge: EdgeConfig,
    /// Coordinator retry and placeholder tuning.
    pub coordinator: CoordinatorConfig,
}

impl Settings {
    /// Builds settings from defaults plus `DRIVEGUARD_*` overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(addr) = env_string(ENV_BROKER) {
            settings.broker_addr = Some(addr);
        }
        if let Some(topic) = env_string(ENV_ALERTS_TOPIC) {
            settings.transport.alerts_topic = topic;
        }
        if let Some(topic) = env_string(ENV_CONTROL_TOPIC) {
            settings.transport.control_topic = topic;
        }
        if let Some(fps) = env_parse::<u32>(ENV_TARGET_FPS) {
            settings.edge.target_fps = fps.max(1);
        }
        if let Some(every) = env_parse::<u32>(ENV_PROCESS_EVERY) {
            settings.edge.process_every = every.max(1);
        }
        if let Some(attempts) = env_parse::<u32>(ENV_RETRY_ATTEMPTS) {
            settings.coordinator.store_retry_attempts = attempts.max(1);
        }
        if let Some(ms) = env_parse::<u64>(ENV_RETRY_BACKOFF_MS) {
            settings.coordinator.store_retry_backoff = Duration::from_millis(ms);
        }
        if let Some(token) = env_string(ENV_NOTIFIER_TOKEN) {
            settings.notifier_token = Some(token);
        }

        settings
    }
}

/// Reads a string variable. Unset or blank both mean "not configured".
fn env_string(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

/// Reads and parses a variable, keeping the default on a bad value.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring unparseable {key}={raw}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable names; the test harness runs tests
    // in parallel within one process environment.

    #[test]
    fn defaults_without_environment() {
        let settings = Settings::default();
        assert_eq!(settings.broker_addr, None);
        assert_eq!(settings.notifier_token, None);
        assert_eq!(settings.transport.alerts_topic, "driveguard/alerts");
        assert_eq!(settings.edge.target_fps, 15);
        assert_eq!(settings.coordinator.store_retry_attempts, 3);
    }

    #[test]
    fn env_string_treats_blank_as_unset() {
        env::set_var("DRIVEGUARD_TEST_BLANK", "   ");
        assert_eq!(env_string("DRIVEGUARD_TEST_BLANK"), None);
        env::set_var("DRIVEGUARD_TEST_BLANK", "tcp://broker:1883");
        assert_eq!(
            env_string("DRIVEGUARD_TEST_BLANK").as_deref(),
            Some("tcp://broker:1883")
        );
        env::remove_var("DRIVEGUARD_TEST_BLANK");
    }

    #[test]
    fn env_parse_keeps_default_on_garbage() {
        env::set_var("DRIVEGUARD_TEST_FPS", "fast");
        assert_eq!(env_parse::<u32>("DRIVEGUARD_TEST_FPS"), None);
        env::set_var("DRIVEGUARD_TEST_FPS", "30");
        assert_eq!(env_parse::<u32>("DRIVEGUARD_TEST_FPS"), Some(30));
        env::remove_var("DRIVEGUARD_TEST_FPS");
    }
}
