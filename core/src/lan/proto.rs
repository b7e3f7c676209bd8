use crate::utils::misc::Typename;
use serde::{Deserialize, Serialize};

/// Periodic presence announcement. The advertised `port` is the peer's
/// listening port; its address is always taken from the datagram source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub name: String,
    pub port: u16,
    pub ts: u64,
}

/// A chat line. `to` absent means broadcast to the whole group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub text: String,
    pub ts: u64,
}

/// Announcement that the sender finished a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskComplete {
    pub from: String,
    #[serde(rename = "fromName")]
    pub from_name: String,
    #[serde(rename = "taskId")]
    pub task_id: i64,
    #[serde(rename = "taskTitle")]
    pub task_title: String,
    pub ts: u64,
}

/// One UDP datagram on the wire: a JSON object discriminated by `type`.
///
/// Deserialization is the validation boundary for untrusted network input.
/// Anything that is not one of the three known shapes with the expected
/// field types comes back as `Err`; it must never panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Packet {
    #[serde(rename = "heartbeat")]
    Heartbeat(Heartbeat),
    #[serde(rename = "chat")]
    Chat(Chat),
    #[serde(rename = "task-complete")]
    TaskComplete(TaskComplete),
}

#[derive(Debug, thiserror::Error, strum_macros::IntoStaticStr)]
pub enum Error {
    #[error("encode: {0}")]
    Encode(serde_json::Error),
    #[error("decode: {0}")]
    Decode(serde_json::Error),
}

impl Typename for Error {
    fn typename(&self) -> &'static str {
        self.into()
    }
}

impl Packet {
    /// Wire tag of this packet kind, also used as the metrics counter key.
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Heartbeat(_) => "heartbeat",
            Packet::Chat(_) => "chat",
            Packet::TaskComplete(_) => "task-complete",
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(Error::Encode)
    }

    pub fn from_json_bytes(bin: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bin).map_err(Error::Decode)
    }
}
