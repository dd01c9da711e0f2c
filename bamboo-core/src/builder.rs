//! Fluent constructor for [`Message`]s.
//!
//! The only way to produce a [`Message`] in this crate — there are no
//! public setters on [`Envelope`](crate::envelope::Envelope) once built, and
//! `build()` enforces the "direct REQ/CONFIG/PUB need a key" rule.

use std::collections::BTreeSet;

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::config::PROTOCOL_VERSION;
use crate::envelope::{Envelope, Message, MsgType, PeerId};
use crate::error::{BambooError, Result};

/// Topic literal carrying HELLO discovery broadcasts.
pub const HELLO_TOPIC: &str = "bamboo.hello";
/// Topic literal carrying SUBSCRIBE deltas.
pub const SUBSCRIBE_TOPIC: &str = "bamboo.subscribe";
/// Key the fast ACK is stamped with.
pub const FAST_ACK_KEY: &str = "sys.ack";

#[derive(Debug, Clone)]
pub struct MessageBuilder {
    version: u64,
    msg_type: MsgType,
    transid: String,
    key: Option<String>,
    payload: Map<String, Value>,
    destid: Option<PeerId>,
    sourceid: PeerId,
    binary: Option<Bytes>,
}

impl MessageBuilder {
    /// Start building a message from `sourceid`, with fresh defaults: a new
    /// `transid`, the current protocol version, and type REQ (overwritten by
    /// whichever per-type method is called next).
    pub fn new(sourceid: impl Into<PeerId>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type: MsgType::Req,
            transid: fresh_transid(),
            key: None,
            payload: Map::new(),
            destid: None,
            sourceid: sourceid.into(),
            binary: None,
        }
    }

    /// Override the protocol version this message is stamped with.
    #[must_use]
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn req(mut self, key: impl Into<String>, payload: Map<String, Value>) -> Self {
        self.msg_type = MsgType::Req;
        self.key = Some(key.into());
        self.payload = payload;
        self
    }

    /// Build a RESP, copying the originating transaction's `transid`.
    #[must_use]
    pub fn resp(mut self, transid: impl Into<String>, payload: Map<String, Value>, key: Option<String>) -> Self {
        self.msg_type = MsgType::Resp;
        self.transid = transid.into();
        self.key = key;
        self.payload = payload;
        self
    }

    /// Build the fast ACK for `transid`: `key="sys.ack"`, `payload={ack:transid}`.
    #[must_use]
    pub fn ack(mut self, transid: impl Into<String>) -> Self {
        let transid = transid.into();
        let mut payload = Map::new();
        payload.insert("ack".to_string(), Value::String(transid.clone()));
        self.msg_type = MsgType::Ack;
        self.key = Some(FAST_ACK_KEY.to_string());
        self.payload = payload;
        self.transid = transid;
        self
    }

    #[must_use]
    pub fn config(mut self, key: impl Into<String>, payload: Map<String, Value>, persist: bool) -> Self {
        let mut wrapped = Map::new();
        wrapped.insert("persist".to_string(), Value::Bool(persist));
        wrapped.insert("data".to_string(), Value::Object(payload));
        self.msg_type = MsgType::Config;
        self.key = Some(key.into());
        self.payload = wrapped;
        self
    }

    /// Build a HELLO carrying `{caps, keys, subs, rev, ts, noresp:true}`, all
    /// sets sorted and deduplicated.
    #[must_use]
    pub fn hello<I, J, K>(mut self, caps: I, keys: J, subs: K, rev: u64) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
        K: IntoIterator<Item = String>,
    {
        let mut payload = Map::new();
        payload.insert("caps".to_string(), sorted_array(caps));
        payload.insert("keys".to_string(), sorted_array(keys));
        payload.insert("subs".to_string(), sorted_array(subs));
        payload.insert("rev".to_string(), Value::from(rev));
        payload.insert("ts".to_string(), Value::String(now_rfc3339()));
        payload.insert("noresp".to_string(), Value::Bool(true));

        self.msg_type = MsgType::Hello;
        self.key = Some(HELLO_TOPIC.to_string());
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn pub_(mut self, topic: impl Into<String>, payload: Map<String, Value>) -> Self {
        self.msg_type = MsgType::Pub;
        self.key = Some(topic.into());
        self.payload = payload;
        self
    }

    /// Build a SUBSCRIBE carrying `{add, remove, noresp:true}`.
    #[must_use]
    pub fn subscribe<I, J>(mut self, add: I, remove: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        let mut payload = Map::new();
        payload.insert("add".to_string(), sorted_array(add));
        payload.insert("remove".to_string(), sorted_array(remove));
        payload.insert("noresp".to_string(), Value::Bool(true));

        self.msg_type = MsgType::Subscribe;
        self.key = Some(SUBSCRIBE_TOPIC.to_string());
        self.payload = payload;
        self
    }

    /// Set the destination. Absent destination means broadcast.
    #[must_use]
    pub fn to(mut self, destid: Option<PeerId>) -> Self {
        self.destid = destid;
        self
    }

    #[must_use]
    pub fn binary(mut self, data: Bytes) -> Self {
        self.binary = Some(data);
        self
    }

    /// Finish building. Fails if this is a direct (non-broadcast) REQ,
    /// CONFIG, or PUB without a non-empty key.
    pub fn build(self) -> Result<Message> {
        let is_direct = self.destid.is_some();
        let needs_key = matches!(self.msg_type, MsgType::Req | MsgType::Config | MsgType::Pub);
        let key_missing = self.key.as_deref().map_or(true, str::is_empty);

        if is_direct && needs_key && key_missing {
            return Err(BambooError::invalid_envelope(
                "direct REQ/CONFIG/PUB requires a non-empty key",
            ));
        }

        Ok(Message {
            envelope: Envelope {
                version: self.version,
                msg_type: self.msg_type,
                transid: self.transid,
                key: self.key,
                payload: self.payload,
                time: now_rfc3339(),
                destid: self.destid,
                sourceid: self.sourceid,
            },
            binary: self.binary,
        })
    }
}

fn sorted_array(items: impl IntoIterator<Item = String>) -> Value {
    let set: BTreeSet<String> = items.into_iter().collect();
    Value::Array(set.into_iter().map(Value::String).collect())
}

fn fresh_transid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
