//! Wire types for the backend HTTP API and their typed work-item form.
//!
//! Poll responses arrive as loosely-shaped JSON; each element is decoded
//! into a [`WorkItem`] exactly once and consumed by the session controller.
//! Command metadata the bridge does not interpret (customer name, policy
//! number, amount) is passed through unopened.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Wire Types
// ============================================================================

/// Response body of `POST /api/device/register`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    /// Explicit success flag; absent means rejected.
    #[serde(default)]
    pub success: bool,
}

/// Response body of `GET /api/device/poll`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollResponse {
    /// Explicit "has pending work" flag; absent means none.
    #[serde(default)]
    pub has_commands: bool,

    /// Pending command elements, oldest first.
    #[serde(default)]
    pub commands: Vec<RawCommand>,
}

/// One undecoded element of a poll response.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCommand {
    /// Identifier used to correlate the eventual status report.
    #[serde(default = "unknown_id")]
    pub command_id: String,

    /// Command type discriminator.
    #[serde(rename = "type", default = "unknown_id")]
    pub command_type: String,

    /// Everything else, passed through unopened.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn unknown_id() -> String {
    "unknown".to_string()
}

/// Response body of `POST /api/device/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    /// Whether the backend accepted the report.
    #[serde(default)]
    pub success: bool,
}

/// Response body of `GET /api/device/health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    /// Service status; `"online"` means reachable and serving.
    #[serde(default)]
    pub status: String,
}

/// Request body of `POST /api/device/register`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    /// Derived device identity.
    pub device_id: String,
    /// Host name of the machine driving the device.
    pub computer_name: String,
    /// Serial endpoint the device is attached to, when known.
    pub com_port: Option<String>,
}

/// Request body of `POST /api/device/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Registered device identity.
    pub device_id: String,
    /// Work item this report corresponds to.
    pub command_id: String,
    /// Final outcome.
    pub status: Outcome,
    /// Wall-clock seconds the dispatch took, when measured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    /// Error text, for failed and errored items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Outcome
// ============================================================================

/// Final outcome of one dispatched work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The item was carried out.
    Success,
    /// The item was understood but could not be carried out.
    Failed,
    /// Dispatch raised an error.
    Error,
}

impl Outcome {
    /// Maps a boolean completion result to success/failed.
    #[inline]
    #[must_use]
    pub fn from_completed(completed: bool) -> Self {
        if completed { Self::Success } else { Self::Failed }
    }
}

// ============================================================================
// WorkItem
// ============================================================================

/// A unit of work pulled from the backend.
///
/// Created by decoding one poll-response element, consumed exactly once by
/// the session controller, and discarded after its status report is sent.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Opaque identifier, unique per item.
    pub id: String,
    /// What the item asks the bridge to do.
    pub kind: WorkKind,
}

/// The kinds of work the backend can request.
#[derive(Debug, Clone)]
pub enum WorkKind {
    /// Upload and display an encoded image.
    DisplayImage {
        /// Image payload as a `data:image/...;base64,...` URI.
        ///
        /// Absence is only detected at dispatch, so the item can still be
        /// reported against its id.
        image: Option<String>,
        /// Display metadata, passed through unopened.
        metadata: Map<String, Value>,
    },
    /// Resume the idle image carousel.
    RestartRotation,
    /// Unrecognized command type, reported as failed without device I/O.
    Unknown(String),
}

impl From<RawCommand> for WorkItem {
    fn from(raw: RawCommand) -> Self {
        let kind = match raw.command_type.as_str() {
            "display_qr" => {
                let image = raw
                    .extra
                    .get("qr_image")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                WorkKind::DisplayImage {
                    image,
                    metadata: raw.extra,
                }
            }
            "start_rotation" => WorkKind::RestartRotation,
            other => WorkKind::Unknown(other.to_string()),
        };

        Self {
            id: raw.command_id,
            kind,
        }
    }
}

impl PollResponse {
    /// Decodes the response into typed work items.
    ///
    /// Empty unless the backend explicitly signals pending work.
    #[must_use]
    pub fn into_work_items(self) -> Vec<WorkItem> {
        if !self.has_commands {
            return Vec::new();
        }
        self.commands.into_iter().map(WorkItem::from).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_response_without_flag_yields_no_items() {
        let response: PollResponse =
            serde_json::from_str(r#"{"has_commands": false, "commands": [{"command_id": "c1", "type": "display_qr"}]}"#)
                .expect("parse");

        assert!(response.into_work_items().is_empty());
    }

    #[test]
    fn test_poll_response_missing_fields_defaults_empty() {
        let response: PollResponse = serde_json::from_str("{}").expect("parse");
        assert!(!response.has_commands);
        assert!(response.into_work_items().is_empty());
    }

    #[test]
    fn test_display_qr_command_decodes_with_metadata() {
        let json = r#"{
            "has_commands": true,
            "commands": [{
                "command_id": "cmd-7",
                "type": "display_qr",
                "qr_image": "data:image/png;base64,AAAA",
                "customer_name": "A. Customer",
                "amount": 1200
            }]
        }"#;

        let items = serde_json::from_str::<PollResponse>(json)
            .expect("parse")
            .into_work_items();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "cmd-7");
        match &items[0].kind {
            WorkKind::DisplayImage { image, metadata } => {
                assert_eq!(image.as_deref(), Some("data:image/png;base64,AAAA"));
                assert_eq!(
                    metadata.get("customer_name").and_then(Value::as_str),
                    Some("A. Customer")
                );
                assert_eq!(metadata.get("amount").and_then(Value::as_i64), Some(1200));
            }
            other => panic!("expected DisplayImage, got {other:?}"),
        }
    }

    #[test]
    fn test_start_rotation_command_decodes() {
        let raw = RawCommand {
            command_id: "cmd-1".to_string(),
            command_type: "start_rotation".to_string(),
            extra: Map::new(),
        };

        let item = WorkItem::from(raw);
        assert!(matches!(item.kind, WorkKind::RestartRotation));
    }

    #[test]
    fn test_unrecognized_command_decodes_as_unknown() {
        let raw = RawCommand {
            command_id: "cmd-2".to_string(),
            command_type: "reboot".to_string(),
            extra: Map::new(),
        };

        let item = WorkItem::from(raw);
        match item.kind {
            WorkKind::Unknown(kind) => assert_eq!(kind, "reboot"),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn test_register_response_defaults_to_rejected() {
        let response: RegisterResponse = serde_json::from_str("{}").expect("parse");
        assert!(!response.success);
    }

    #[test]
    fn test_outcome_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Outcome::Success).unwrap(), r#""success""#);
        assert_eq!(serde_json::to_string(&Outcome::Failed).unwrap(), r#""failed""#);
        assert_eq!(serde_json::to_string(&Outcome::Error).unwrap(), r#""error""#);
    }

    #[test]
    fn test_status_report_omits_absent_fields() {
        let report = StatusReport {
            device_id: "device_host_AB12CD".to_string(),
            command_id: "cmd-1".to_string(),
            status: Outcome::Success,
            execution_time: None,
            error: None,
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("execution_time"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_outcome_from_completed() {
        assert_eq!(Outcome::from_completed(true), Outcome::Success);
        assert_eq!(Outcome::from_completed(false), Outcome::Failed);
    }
}
