//! Wire protocol for the relay
//!
//! Events are JSON frames of the form `{"event": "<name>", "data": {...}}`
//! with kebab-case event names and camelCase payload fields. Negotiation
//! payloads (`signal`, `candidate`) are opaque JSON values: the relay
//! forwards them without interpreting or mutating their content, and absent
//! fields are forwarded as explicit `null`s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Online/offline status of an identity, as persisted and broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Offline,
}

/// One entry of the `user-list` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: String,
    pub username: String,
    pub status: UserStatus,
}

/// Events received from a connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Initiate a call to another user
    #[serde(rename_all = "camelCase")]
    StartCall {
        call_id: String,
        target_user_id: String,
        caller_name: String,
    },

    /// Terminate a call; `targetUserId` selects the identifier-addressed
    /// variant, otherwise the paired counterpart is notified
    #[serde(rename_all = "camelCase")]
    EndCall {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<String>,
    },

    /// Relay an opaque negotiation payload (SDP or ICE candidate)
    #[serde(rename_all = "camelCase")]
    Signal {
        #[serde(default)]
        signal: Option<Value>,
        #[serde(default)]
        candidate: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<String>,
    },
}

/// Events emitted by the relay to connected clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A pairing was established; sent to both members
    #[serde(rename_all = "camelCase")]
    PairFound {
        paired_with: String,
        paired_with_id: String,
    },

    /// The paired counterpart went away
    PairDisconnected { message: String },

    /// Directory of all other known identities, sent once on connect
    UserList(Vec<UserSummary>),

    /// Another identity came online
    UserConnected {
        username: String,
        status: UserStatus,
    },

    /// Another identity went offline
    UserDisconnected {
        username: String,
        status: UserStatus,
    },

    /// A call is being placed to this client
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        call_id: String,
        caller_name: String,
        caller_id: String,
    },

    /// Acknowledgement to the caller that the call was placed
    #[serde(rename_all = "camelCase")]
    CallInitiated { call_id: String, target_id: String },

    /// The counterpart ended the call
    #[serde(rename_all = "camelCase")]
    CallEnded { call_id: String },

    /// An in-session operation failed; delivered to the originator only
    CallError { message: String },

    /// Relayed negotiation payload; `signal`/`candidate` pass through
    /// verbatim, absent fields as `null`
    #[serde(rename_all = "camelCase")]
    Signal {
        sender_id: String,
        signal: Option<Value>,
        candidate: Option<Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_call_wire_shape() {
        let frame = r#"{"event":"start-call","data":{"callId":"c1","targetUserId":"u2","callerName":"alice"}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::StartCall {
                call_id: "c1".into(),
                target_user_id: "u2".into(),
                caller_name: "alice".into(),
            }
        );
    }

    #[test]
    fn test_end_call_target_is_optional() {
        let frame = r#"{"event":"end-call","data":{"callId":"c1"}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::EndCall {
                call_id: "c1".into(),
                target_user_id: None,
            }
        );
    }

    #[test]
    fn test_signal_defaults_to_null_fields() {
        let frame = r#"{"event":"signal","data":{"candidate":{"sdpMid":"0"}}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::Signal {
                signal: None,
                candidate: Some(json!({"sdpMid": "0"})),
                target_user_id: None,
            }
        );
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let frame = r#"{"event":"start-call","data":{"callId":"c1"}}"#;
        assert!(serde_json::from_str::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let frame = r#"{"event":"make-coffee","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn test_relayed_signal_serializes_absent_fields_as_null() {
        let event = ServerEvent::Signal {
            sender_id: "u1".into(),
            signal: None,
            candidate: Some(json!({"sdpMLineIndex": 0})),
        };
        let wire: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            wire,
            json!({
                "event": "signal",
                "data": {
                    "senderId": "u1",
                    "signal": null,
                    "candidate": {"sdpMLineIndex": 0}
                }
            })
        );
    }

    #[test]
    fn test_pair_found_wire_shape() {
        let event = ServerEvent::PairFound {
            paired_with: "bob".into(),
            paired_with_id: "u2".into(),
        };
        let wire: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            wire,
            json!({
                "event": "pair-found",
                "data": {"pairedWith": "bob", "pairedWithId": "u2"}
            })
        );
    }

    #[test]
    fn test_user_list_wire_shape() {
        let event = ServerEvent::UserList(vec![UserSummary {
            user_id: "u2".into(),
            username: "bob".into(),
            status: UserStatus::Online,
        }]);
        let wire: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            wire,
            json!({
                "event": "user-list",
                "data": [{"userId": "u2", "username": "bob", "status": "online"}]
            })
        );
    }
}
