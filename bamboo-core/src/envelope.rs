//! The canonical message shape: `Envelope`, `Message`, `MsgType`, `PeerId`.

use serde::{Deserialize, Serialize};

/// A peer's stable address in the mesh.
///
/// A thin `String` newtype rather than a bespoke id type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    /// Borrow the id as a plain string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The kind of message an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MsgType {
    Req,
    Resp,
    Ack,
    Config,
    Hello,
    Pub,
    Subscribe,
}

/// The header of a frame.
///
/// Built exclusively through [`crate::builder::MessageBuilder`] — there are
/// no setters once built. `deny_unknown_fields` realizes the wire rule that
/// unknown header fields fail the decode rather than being ignored, and the
/// absence of `Option` on the required fields means a frame missing any of
/// them fails to deserialize at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub version: u64,
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    pub transid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destid: Option<PeerId>,
    pub sourceid: PeerId,
}

/// An envelope plus an optional opaque binary blob.
///
/// Single-use: once framed and handed to the transport, the runtime does
/// not retain it.
#[derive(Debug, Clone)]
pub struct Message {
    pub envelope: Envelope,
    pub binary: Option<bytes::Bytes>,
}

impl Message {
    /// True when `destid` is absent, i.e. this message is a broadcast.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.envelope.destid.is_none()
    }
}
