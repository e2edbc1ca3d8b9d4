//! Alert and control wire types.
//!
//! Edge devices publish alert JSON on the alerts topic; the backend publishes
//! control JSON on the control topic. Both payloads are plain serde structs:
//!
//! ```json
//! {"trip_id": 4, "alert_type": "DROWSINESS", "severity": "HIGH",
//!  "message": "Driver is drowsy", "driver_id": 1, "vehicle_id": 2}
//! ```
//!
//! ```json
//! {"action": "apagar_buzzer"}
//! ```
//!
//! The alert type vocabulary is open (new detectors mint new strings); only
//! `TRIP` is special, driving the trip lifecycle toggle. The control action
//! strings are fixed device commands consumed by deployed edge firmware.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::fleet::{DriverId, VehicleId};
use crate::trip::TripId;

/// Alert type that toggles the trip lifecycle instead of logging only.
pub const TRIP_ALERT_TYPE: &str = "TRIP";

/// Maximum accepted `alert_type` length.
pub const MAX_ALERT_TYPE_LEN: usize = 64;

/// Maximum accepted `message` length.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Maximum accepted driver name / plate / place length.
pub const MAX_LABEL_LEN: usize = 256;

/// How urgent an alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Severity {
    /// Informational.
    Low,
    /// Worth an operator's attention.
    Medium,
    /// Driver safety is degrading.
    High,
    /// Immediate intervention required.
    Critical,
}

impl TryFrom<String> for Severity {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("low") {
            Ok(Self::Low)
        } else if value.eq_ignore_ascii_case("medium") {
            Ok(Self::Medium)
        } else if value.eq_ignore_ascii_case("high") {
            Ok(Self::High)
        } else if value.eq_ignore_ascii_case("critical") {
            Ok(Self::Critical)
        } else {
            Err(format!(
                "unknown severity: {value}. Use LOW, MEDIUM, HIGH or CRITICAL"
            ))
        }
    }
}

impl From<Severity> for String {
    fn from(value: Severity) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// An alert as it travels over the broker.
///
/// Identity fields are optional because edge devices differ in what they
/// know: a provisioned device sends ids, an unprovisioned one sends the
/// driver's name and the vehicle plate and lets the backend resolve them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// The trip this alert belongs to. Required for everything but `TRIP`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<TripId>,

    /// What happened, e.g. `DROWSINESS`, `LOOKING-AWAY`, `HELP`, `TRIP`.
    pub alert_type: String,

    /// How urgent it is.
    pub severity: Severity,

    /// Human-readable description.
    pub message: String,

    /// Driver id, when the device knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<DriverId>,

    /// Vehicle id, when the device knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<VehicleId>,

    /// Driver full name, for backend resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,

    /// Vehicle plate, for backend resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_plate: Option<String>,

    /// Trip origin override, only meaningful on `TRIP` alerts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    /// Trip destination override, only meaningful on `TRIP` alerts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl Alert {
    /// Creates an alert with no identity attached.
    #[must_use]
    pub fn new(
        alert_type: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            trip_id: None,
            alert_type: alert_type.into(),
            severity,
            message: message.into(),
            driver_id: None,
            vehicle_id: None,
            driver_name: None,
            vehicle_plate: None,
            origin: None,
            destination: None,
        }
    }

    /// Returns true for alerts that toggle the trip lifecycle.
    #[must_use]
    pub fn is_trip_event(&self) -> bool {
        self.alert_type == TRIP_ALERT_TYPE
    }

    /// Validates field shape at the ingestion boundary.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` when a required field is empty or a field
    /// exceeds its length cap. Identity resolution is not checked here;
    /// that is the coordinator's job.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.alert_type.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "alert_type".to_string(),
            });
        }
        if self.alert_type.len() > MAX_ALERT_TYPE_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "alert_type".to_string(),
                max_length: MAX_ALERT_TYPE_LEN,
            });
        }
        if self.message.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "message".to_string(),
            });
        }
        if self.message.len() > MAX_MESSAGE_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "message".to_string(),
                max_length: MAX_MESSAGE_LEN,
            });
        }
        for (field, value) in [
            ("driver_name", &self.driver_name),
            ("vehicle_plate", &self.vehicle_plate),
            ("origin", &self.origin),
            ("destination", &self.destination),
        ] {
            if let Some(value) = value {
                if value.len() > MAX_LABEL_LEN {
                    return Err(ValidationError::FieldTooLong {
                        field: field.to_string(),
                        max_length: MAX_LABEL_LEN,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Device commands published on the control topic.
///
/// The wire strings are fixed: deployed edge firmware matches on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlAction {
    /// Silence the in-cab buzzer.
    #[serde(rename = "apagar_buzzer")]
    BuzzerOff,

    /// Sound the in-cab buzzer.
    #[serde(rename = "encender_buzzer")]
    BuzzerOn,

    /// Turn the warning LED off.
    #[serde(rename = "apagar_led")]
    LedOff,

    /// Turn the warning LED on.
    #[serde(rename = "encender_led")]
    LedOn,
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuzzerOff => write!(f, "apagar_buzzer"),
            Self::BuzzerOn => write!(f, "encender_buzzer"),
            Self::LedOff => write!(f, "apagar_led"),
            Self::LedOn => write!(f, "encender_led"),
        }
    }
}

/// The control topic payload: `{"action": "..."}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// The command for the device.
    pub action: ControlAction,
}

impl ControlMessage {
    /// Wraps an action in its wire envelope.
    #[must_use]
    pub const fn new(action: ControlAction) -> Self {
        Self { action }
    }
}

/// Stable integer identifier for a logged alert row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertRecordId(i64);

impl AlertRecordId {
    /// Wraps a raw record id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the underlying integer.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AlertRecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logged alert as persisted against a trip.
///
/// Unlike the wire [`Alert`], a record always belongs to a trip and carries
/// the detection timestamp the store assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Stable identifier.
    pub id: AlertRecordId,

    /// The trip the alert was logged against.
    pub trip_id: TripId,

    /// What happened.
    pub alert_type: String,

    /// How urgent it was.
    pub severity: Severity,

    /// Human-readable description.
    pub message: String,

    /// When the store logged it.
    pub detected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_wire_format() {
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"HIGH\"");

        let back: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(back, Severity::Critical);
    }

    #[test]
    fn test_severity_rejects_unknown() {
        let result: Result<Severity, _> = serde_json::from_str("\"URGENT\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_alert_minimal_wire_shape() {
        let mut alert = Alert::new("DROWSINESS", Severity::High, "Driver is drowsy");
        alert.trip_id = Some(TripId::new(4));

        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("\"trip_id\":4"));
        assert!(json.contains("\"alert_type\":\"DROWSINESS\""));
        assert!(json.contains("\"severity\":\"HIGH\""));
        // Absent optionals stay off the wire.
        assert!(!json.contains("driver_name"));
        assert!(!json.contains("origin"));
    }

    #[test]
    fn test_alert_decodes_without_optionals() {
        let json = r#"{"alert_type":"SPEEDING","severity":"LOW","message":"over limit"}"#;
        let alert: Alert = serde_json::from_str(json).unwrap();
        assert_eq!(alert.trip_id, None);
        assert_eq!(alert.alert_type, "SPEEDING");
        assert!(!alert.is_trip_event());
    }

    #[test]
    fn test_alert_trip_event() {
        let alert = Alert::new(TRIP_ALERT_TYPE, Severity::Low, "toggle");
        assert!(alert.is_trip_event());

        // Exact match only; the vocabulary is case-sensitive.
        let other = Alert::new("trip", Severity::Low, "toggle");
        assert!(!other.is_trip_event());
    }

    #[test]
    fn test_alert_validate_empty_type() {
        let alert = Alert::new("  ", Severity::Low, "msg");
        let Err(err) = alert.validate() else {
            panic!("blank alert_type must fail validation");
        };
        assert!(matches!(err, ValidationError::EmptyField { ref field } if field == "alert_type"));
    }

    #[test]
    fn test_alert_validate_empty_message() {
        let alert = Alert::new("DROWSINESS", Severity::High, "");
        assert!(alert.validate().is_err());
    }

    #[test]
    fn test_alert_validate_too_long() {
        let alert = Alert::new("DROWSINESS", Severity::High, "x".repeat(MAX_MESSAGE_LEN + 1));
        let Err(err) = alert.validate() else {
            panic!("oversized message must fail validation");
        };
        assert!(matches!(err, ValidationError::FieldTooLong { .. }));
    }

    #[test]
    fn test_alert_validate_long_label() {
        let mut alert = Alert::new("TRIP", Severity::Low, "toggle");
        alert.vehicle_plate = Some("P".repeat(MAX_LABEL_LEN + 1));
        assert!(alert.validate().is_err());
    }

    #[test]
    fn test_control_action_wire_strings() {
        let json = serde_json::to_string(&ControlMessage::new(ControlAction::BuzzerOff)).unwrap();
        assert_eq!(json, r#"{"action":"apagar_buzzer"}"#);

        let msg: ControlMessage = serde_json::from_str(r#"{"action":"encender_led"}"#).unwrap();
        assert_eq!(msg.action, ControlAction::LedOn);
    }

    #[test]
    fn test_alert_round_trip_full() {
        let mut alert = Alert::new(TRIP_ALERT_TYPE, Severity::Low, "start please");
        alert.driver_name = Some("Ana Torres".to_string());
        alert.vehicle_plate = Some("ABC-123".to_string());
        alert.origin = Some("Depot".to_string());
        alert.destination = Some("Port".to_string());

        let json = serde_json::to_string(&alert).unwrap();
        let back: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(back, alert);
    }
}
