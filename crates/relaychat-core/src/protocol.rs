//! Wire protocol between relaychat clients and the relay
//!
//! Uses newline-delimited JSON (ndjson) over TCP. Calls carry a request id
//! and are answered by exactly one `Response` with the same id; chat frames
//! flow in both directions without ids once `RouteChat` has opened the chat.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Kind of a chat frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Ordinary chat text
    #[default]
    Message,
    /// Join announcement, sent once after `ChatOpened`
    Joined,
    /// Departure notice; also delivered back to its author
    Left,
}

/// One chat frame as routed through a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatFrame {
    /// Name of the authoring client
    pub sender: String,
    /// Name of the group the frame is addressed to
    pub receiver: String,
    /// Chat text (empty for control frames)
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub kind: FrameKind,
    pub sent_at: DateTime<Utc>,
}

impl ChatFrame {
    fn new(sender: &str, group: &str, message: String, kind: FrameKind) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: group.to_string(),
            message,
            kind,
            sent_at: Utc::now(),
        }
    }

    /// Create a chat text frame
    pub fn message(sender: &str, group: &str, text: impl Into<String>) -> Self {
        Self::new(sender, group, text.into(), FrameKind::Message)
    }

    /// Create a join announcement
    pub fn joined(sender: &str, group: &str) -> Self {
        Self::new(sender, group, String::new(), FrameKind::Joined)
    }

    /// Create a departure notice
    pub fn left(sender: &str, group: &str) -> Self {
        Self::new(sender, group, String::new(), FrameKind::Left)
    }

    /// Control frames are announcements, not user text
    pub fn is_control(&self) -> bool {
        self.kind != FrameKind::Message
    }

    /// Whether this is `name`'s own departure notice for `group`
    pub fn is_departure_of(&self, name: &str, group: &str) -> bool {
        self.kind == FrameKind::Left && self.sender == name && self.receiver == group
    }
}

/// A request from client to relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Call {
    Register { name: String },
    UnRegister { name: String },
    CreateGroup { client: String, group: String },
    JoinGroup { client: String, group: String },
    LeaveGroup { client: String, group: String },
    GetGroupList,
    GetClientList,
    GetGroupMembers { group: String },
    /// Open the duplex chat stream for one group
    RouteChat { client: String, group: String },
}

impl Call {
    /// The client a call acts on behalf of, if any
    pub fn acting_client(&self) -> Option<&str> {
        match self {
            Call::UnRegister { name } => Some(name),
            Call::CreateGroup { client, .. }
            | Call::JoinGroup { client, .. }
            | Call::LeaveGroup { client, .. }
            | Call::RouteChat { client, .. } => Some(client),
            Call::Register { .. }
            | Call::GetGroupList
            | Call::GetClientList
            | Call::GetGroupMembers { .. } => None,
        }
    }
}

/// Successful result of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    /// Registration acknowledgement
    Registered { connection_id: String },
    /// The call succeeded and has nothing to report
    Done,
    /// Result of `JoinGroup`; `false` when the client was already a member
    Joined { group: String, joined: bool },
    Groups { groups: Vec<String> },
    Clients { clients: Vec<String> },
    Members { group: String, members: Vec<String> },
    /// The join acknowledgement: the relay now drains this client's mailbox
    ChatOpened { group: String },
}

/// Message from client to relay (upstream)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Request { id: u64, call: Call },
    Chat { frame: ChatFrame },
}

/// Message from relay to client (downstream)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Response {
        id: u64,
        result: Result<Reply, RelayError>,
    },
    Chat {
        frame: ChatFrame,
    },
}

/// Encode a message as one JSON line (without the trailing newline)
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

/// Decode a message from a JSON line
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_frame_kind_serialization() {
        let frame = ChatFrame::left("bob", "g1");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"kind\":\"left\""));
        assert!(json.contains("\"receiver\":\"g1\""));
    }

    #[test]
    fn test_frame_deserialization_defaults() {
        let json = r#"{
            "sender": "alice",
            "receiver": "g1",
            "sent_at": "2026-01-01T00:00:00Z"
        }"#;
        let frame: ChatFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.kind, FrameKind::Message);
        assert_eq!(frame.message, "");
        assert!(!frame.is_control());
    }

    #[test]
    fn test_is_departure_of() {
        let frame = ChatFrame::left("bob", "g1");
        assert!(frame.is_departure_of("bob", "g1"));
        assert!(!frame.is_departure_of("alice", "g1"));
        assert!(!frame.is_departure_of("bob", "g2"));
        assert!(!ChatFrame::message("bob", "g1", "bye").is_departure_of("bob", "g1"));
    }

    #[test]
    fn test_request_wire_shape() {
        let msg = ClientMessage::Request {
            id: 7,
            call: Call::JoinGroup {
                client: "bob".to_string(),
                group: "g1".to_string(),
            },
        };
        let line = encode(&msg).unwrap();
        assert!(!line.ends_with('\n'));
        assert!(line.contains("\"type\":\"request\""));
        assert!(line.contains("\"method\":\"join_group\""));

        let decoded: ClientMessage = decode(&line).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_error_response_decodes() {
        let line = r#"{"type":"response","id":3,"result":{"Err":{"kind":"group_not_found","name":"g9"}}}"#;
        let decoded: ServerMessage = decode(line).unwrap();
        match decoded {
            ServerMessage::Response { id, result } => {
                assert_eq!(id, 3);
                assert_eq!(
                    result,
                    Err(RelayError::GroupNotFound {
                        name: "g9".to_string()
                    })
                );
            }
            _ => panic!("Expected Response"),
        }
    }

    #[test]
    fn test_decode_tolerates_trailing_newline() {
        let decoded: ClientMessage =
            decode("{\"type\":\"request\",\"id\":1,\"call\":{\"method\":\"get_group_list\"}}\r\n")
                .unwrap();
        assert_eq!(
            decoded,
            ClientMessage::Request {
                id: 1,
                call: Call::GetGroupList
            }
        );
    }

    #[test]
    fn test_acting_client() {
        let call = Call::RouteChat {
            client: "alice".to_string(),
            group: "g1".to_string(),
        };
        assert_eq!(call.acting_client(), Some("alice"));
        assert_eq!(Call::GetGroupList.acting_client(), None);
        assert_eq!(
            Call::Register {
                name: "x".to_string()
            }
            .acting_client(),
            None
        );
    }
}
