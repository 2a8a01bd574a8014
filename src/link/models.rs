//! Wire messages and state snapshots for the interpretation link.

use serde::{Deserialize, Serialize};

use crate::interpreter::MotionSample;

/// Engine -> interpretation backend messages.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "sensor-data", rename_all = "camelCase")]
    SensorData {
        sensor_data: MotionSample,
        timestamp: i64,
        session_id: String,
    },
    /// Session boundary: the backend loads per-user context on start.
    #[serde(rename = "session-start", rename_all = "camelCase")]
    SessionStart {
        #[serde(skip_serializing_if = "Option::is_none")]
        wallet_address: Option<String>,
        vibe_id: String,
    },
    /// Session boundary: the backend saves per-user context on end.
    #[serde(rename = "session-end", rename_all = "camelCase")]
    SessionEnd {
        #[serde(skip_serializing_if = "Option::is_none")]
        wallet_address: Option<String>,
        vibe_id: String,
    },
}

/// Interpretation backend -> engine messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// An interpretation payload; the embedded data tolerates several
    /// encodings, see [`crate::link::payload_parser`].
    #[serde(rename = "interpretation")]
    Interpretation { data: serde_json::Value },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Observable link state, recomputed as the connection evolves.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub connected: bool,
    pub pending_response: bool,
    pub measured_latency_ema_ms: f64,
    pub reconnect_attempts: u32,
    /// Attempt budget spent; no reconnects until an explicit reset.
    pub exhausted: bool,
    /// Samples waiting in the offline ring.
    pub queued_offline: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_data_wire_format() {
        let msg = ClientMessage::SensorData {
            sensor_data: MotionSample::new(1.0, 2.0, 3.0, 1700, "accelerometer"),
            timestamp: 1700,
            session_id: "abc".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "sensor-data");
        assert_eq!(json["sessionId"], "abc");
        assert_eq!(json["sensorData"]["axisX"], 1.0);
        assert_eq!(json["sensorData"]["sourceTag"], "accelerometer");
    }

    #[test]
    fn test_session_boundary_wire_format() {
        let msg = ClientMessage::SessionStart {
            wallet_address: Some("0xabc".to_string()),
            vibe_id: "vibe-1".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "session-start");
        assert_eq!(json["walletAddress"], "0xabc");
        assert_eq!(json["vibeId"], "vibe-1");

        let msg = ClientMessage::SessionEnd {
            wallet_address: None,
            vibe_id: "vibe-1".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "session-end");
        assert!(json.get("walletAddress").is_none());
    }

    #[test]
    fn test_server_message_parses() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type": "interpretation", "data": {"x": 1}}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Interpretation { .. }));

        let msg: ServerMessage =
            serde_json::from_str(r#"{"type": "error", "message": "rate limited"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Error { .. }));
    }
}
