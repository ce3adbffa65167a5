//! The message envelope: the unit of communication between any two
//! components of the chat service.
//!
//! The JSON field names and the integer operation codes are the wire
//! contract with browser clients, so they are pinned here rather than
//! following Rust naming.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Reserved sender name for notices and replies generated by the service
/// itself rather than by a user.
pub const SYSTEM_SENDER: &str = "SYSTEM";

/// What the sender asks the routing engine to do.
///
/// Serialized as its integer code (`op` field), starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Operation {
    Chat = 1,
    Logout = 2,
    Login = 3,
    UpdateUser = 4,
    PrivateChat = 5,
    GroupChat = 6,
    CreateGroup = 7,
    ListGroups = 8,
    ListUsers = 9,
}

impl From<Operation> for u8 {
    fn from(op: Operation) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Operation {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Operation::Chat),
            2 => Ok(Operation::Logout),
            3 => Ok(Operation::Login),
            4 => Ok(Operation::UpdateUser),
            5 => Ok(Operation::PrivateChat),
            6 => Ok(Operation::GroupChat),
            7 => Ok(Operation::CreateGroup),
            8 => Ok(Operation::ListGroups),
            9 => Ok(Operation::ListUsers),
            other => Err(ProtocolError::UnknownOperation(other)),
        }
    }
}

impl Operation {
    /// The display area this operation renders into by default. A mismatched
    /// `(op, area)` pair in an inbound envelope only changes how the message
    /// is labelled, never where it is delivered.
    pub fn default_area(self) -> Area {
        match self {
            Operation::PrivateChat => Area::Private,
            Operation::GroupChat => Area::Group,
            _ => Area::Public,
        }
    }
}

/// Display-routing tag. Drives only the visible line marker, not delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Area {
    #[default]
    #[serde(rename = "public_screen")]
    Public,
    #[serde(rename = "group_chat")]
    Group,
    #[serde(rename = "private_chat")]
    Private,
}

/// A single chat protocol message.
///
/// Immutable once constructed; the routing engine stamps `timestamp` on
/// arrival and never trusts the sender's clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender display name. Non-empty for anything a client sends.
    #[serde(rename = "name")]
    pub sender: String,
    pub op: Operation,
    /// Chat text, profile JSON payload, or group name depending on `op`.
    #[serde(rename = "msg")]
    pub body: String,
    /// Recipient display name, only meaningful for `PrivateChat`.
    #[serde(default)]
    pub target: String,
    /// Group name, only meaningful for `GroupChat`.
    #[serde(default)]
    pub group: String,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub area: Area,
}

impl Envelope {
    pub fn new(sender: impl Into<String>, op: Operation, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            op,
            body: body.into(),
            target: String::new(),
            group: String::new(),
            timestamp: Utc::now().timestamp(),
            area: op.default_area(),
        }
    }

    pub fn chat(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(sender, Operation::Chat, body)
    }

    pub fn login(sender: impl Into<String>) -> Self {
        Self::new(sender, Operation::Login, "")
    }

    pub fn logout(sender: impl Into<String>) -> Self {
        Self::new(sender, Operation::Logout, "")
    }

    pub fn private(
        sender: impl Into<String>,
        target: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let mut env = Self::new(sender, Operation::PrivateChat, body);
        env.target = target.into();
        env
    }

    pub fn group(
        sender: impl Into<String>,
        group: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let mut env = Self::new(sender, Operation::GroupChat, body);
        env.group = group.into();
        env
    }

    /// A service-originated message (gateway notices, error surfacing).
    pub fn system(body: impl Into<String>) -> Self {
        Self::new(SYSTEM_SENDER, Operation::Chat, body)
    }
}

/// Mutable per-user attributes, preserved across reconnects and replaced as
/// a whole by `UpdateUser`. Arrives JSON-encoded in the envelope body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_field_names() {
        let env = Envelope::private("alice", "bob", "psst");
        let json = serde_json::to_value(&env).unwrap();

        assert_eq!(json["name"], "alice");
        assert_eq!(json["op"], 5);
        assert_eq!(json["msg"], "psst");
        assert_eq!(json["target"], "bob");
        assert_eq!(json["area"], "private_chat");
    }

    #[test]
    fn test_envelope_from_browser_frame() {
        // Minimal frame as the browser client sends it: no target/group.
        let json = r#"{"name":"alice","op":1,"msg":"hello","area":"public_screen"}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();

        assert_eq!(env.sender, "alice");
        assert_eq!(env.op, Operation::Chat);
        assert_eq!(env.body, "hello");
        assert!(env.target.is_empty());
        assert!(env.group.is_empty());
        assert_eq!(env.timestamp, 0);
    }

    #[test]
    fn test_unknown_operation_code_rejected() {
        let json = r#"{"name":"alice","op":42,"msg":""}"#;
        assert!(serde_json::from_str::<Envelope>(json).is_err());
    }

    #[test]
    fn test_operation_codes_stable() {
        // The browser hardcodes these; they must never drift.
        for (op, code) in [
            (Operation::Chat, 1u8),
            (Operation::Logout, 2),
            (Operation::Login, 3),
            (Operation::UpdateUser, 4),
            (Operation::PrivateChat, 5),
            (Operation::GroupChat, 6),
            (Operation::CreateGroup, 7),
            (Operation::ListGroups, 8),
            (Operation::ListUsers, 9),
        ] {
            assert_eq!(u8::from(op), code);
            assert_eq!(Operation::try_from(code).unwrap(), op);
        }
    }

    #[test]
    fn test_profile_partial_payload() {
        let profile: Profile = serde_json::from_str(r#"{"age":30}"#).unwrap();
        assert_eq!(profile.age, Some(30));
        assert_eq!(profile.gender, None);
    }
}
