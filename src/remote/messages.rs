//! Remote-control wire frames
//!
//! Every frame is a JSON object tagged by `type`. Player state keeps any
//! fields it does not know about so remotes see exactly what the target
//! sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Playback state broadcast by a target device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    #[serde(rename = "videoId", default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(rename = "currentTime", default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlayerState {
    /// Non-empty video id
    pub fn video(&self) -> Option<&str> {
        self.video_id.as_deref().filter(|v| !v.is_empty())
    }
}

/// Frames a device sends to the hub
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Remote asks to control the device with this id
    Pair { device_id: String },
    Unpair,
    /// Remote command, forwarded to the target as-is
    Command {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    /// Target reports its playback state
    State(PlayerState),
}

impl ClientMessage {
    /// Parse a text frame; unknown or malformed frames yield `None`
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Frames the hub sends to a device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Paired {
        device_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<PlayerState>,
    },
    RemoteConnected {
        remote_name: String,
    },
    RemoteDisconnected,
    TargetDisconnected,
    Command {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    State(PlayerState),
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error"}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_client_frames() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"pair","device_id":"abc123def456"}"#),
            Some(ClientMessage::Pair {
                device_id: "abc123def456".to_string()
            })
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"unpair"}"#),
            Some(ClientMessage::Unpair)
        );
        assert_eq!(ClientMessage::parse(r#"{"type":"dance"}"#), None);
        assert_eq!(ClientMessage::parse("not json"), None);
    }

    #[test]
    fn test_state_keeps_unknown_fields() {
        let Some(ClientMessage::State(state)) = ClientMessage::parse(
            r#"{"type":"state","videoId":"v1","currentTime":12.5,"duration":300,"paused":true,"volume":0.5}"#,
        ) else {
            panic!("expected state frame");
        };
        assert_eq!(state.video(), Some("v1"));
        assert_eq!(state.current_time, Some(12.5));

        let out = serde_json::to_value(ServerMessage::State(state)).unwrap();
        assert_eq!(
            out,
            json!({
                "type": "state",
                "videoId": "v1",
                "currentTime": 12.5,
                "duration": 300.0,
                "paused": true,
                "volume": 0.5
            })
        );
    }

    #[test]
    fn test_command_forwarding_shape() {
        let Some(ClientMessage::Command { payload }) =
            ClientMessage::parse(r#"{"type":"command","action":"seek","time":42}"#)
        else {
            panic!("expected command frame");
        };
        let out = serde_json::to_value(ServerMessage::Command { payload }).unwrap();
        assert_eq!(out, json!({"type": "command", "action": "seek", "time": 42}));
    }

    #[test]
    fn test_server_frame_tags() {
        assert_eq!(
            serde_json::to_value(ServerMessage::TargetDisconnected).unwrap(),
            json!({"type": "target_disconnected"})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::Paired {
                device_name: "Living Room".to_string(),
                state: None
            })
            .unwrap(),
            json!({"type": "paired", "device_name": "Living Room"})
        );
    }
}
