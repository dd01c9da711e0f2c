//! The `Runtime`: wires the `bamboo-core` protocol kernel to a concrete
//! [`Transport`], exposing keyed request/response, publish/subscribe, and
//! discovery as one public surface.
//!
//! `Runtime<T>` is a cheap `Clone` handle over an `Arc<Inner<T>>` — the same
//! shape a socket handle shared between a user-facing API and a background
//! pump task would take. Cloning a `Runtime` and moving the clone into the
//! inbound-dispatch callback is how a single frame delivery reaches handler
//! code without the `Transport` needing to know anything about the protocol
//! above it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::{select, FutureExt};
use serde_json::{Map, Value};

use bamboo_core::builder::MessageBuilder;
use bamboo_core::config::RuntimeConfig;
use bamboo_core::correlation::{Correlator, RequestOutcome};
use bamboo_core::discovery::{Announce, Announcer};
use bamboo_core::envelope::{Envelope, Message, MsgType, PeerId};
use bamboo_core::error::{BambooError, Result};
use bamboo_core::keys::KeyRegistry;
use bamboo_core::subscription::SubscriptionTable;
use bamboo_core::wire;

use crate::transport::{Dest, Transport};

/// A registered REQ/CONFIG handler: given the inbound `Message`, resolves to
/// the normalized handler result (see [`normalize_handler_result`]), or
/// `Err` if the handler "throws."
type ReqHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, std::result::Result<Value, String>> + Send + Sync>;

/// A registered PUB/topic handler. Errors are logged and swallowed — PUB
/// delivery never produces a reply.
type EvtHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, std::result::Result<(), String>> + Send + Sync>;

struct Inner<T: Transport> {
    self_id: PeerId,
    transport: T,
    config: RuntimeConfig,
    keys: KeyRegistry,
    subs: SubscriptionTable,
    correlator: Correlator,
    req_handlers: DashMap<String, ReqHandler>,
    evt_handlers: DashMap<String, EvtHandler>,
    announcer: Mutex<Option<Announcer>>,
    started: AtomicBool,
}

/// The bamboo protocol runtime, generic over its [`Transport`].
///
/// Instantiable, not a singleton: multiple runtimes may coexist in one
/// process, which is exactly what the integration tests in this crate do
/// with two or more `LoopbackTransport`-backed `Runtime`s.
pub struct Runtime<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Runtime<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Transport> Runtime<T> {
    /// Build a runtime bound to `self_id`, with the given transport and
    /// config. `start()` must be called before inbound dispatch and the
    /// discovery announcer run.
    pub fn new(self_id: impl Into<PeerId>, transport: T, config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                self_id: self_id.into(),
                transport,
                config,
                keys: KeyRegistry::new(),
                subs: SubscriptionTable::new(),
                correlator: Correlator::new(),
                req_handlers: DashMap::new(),
                evt_handlers: DashMap::new(),
                announcer: Mutex::new(None),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Build a runtime with [`RuntimeConfig::default`].
    #[must_use]
    pub fn with_defaults(self_id: impl Into<PeerId>, transport: T) -> Self {
        Self::new(self_id, transport, RuntimeConfig::default())
    }

    /// This runtime's own peer id.
    #[must_use]
    pub fn self_id(&self) -> &PeerId {
        &self.inner.self_id
    }

    /// The local key/capability registry, for diagnostics and tests.
    #[must_use]
    pub fn keys(&self) -> &KeyRegistry {
        &self.inner.keys
    }

    /// The subscription tables, for diagnostics and tests.
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.inner.subs
    }

    // ---- registration -------------------------------------------------

    /// Register a handler for a served key. Adds `key` to the local key
    /// registry so `local` and the handler table stay in lockstep — there is
    /// no handler-less served key.
    pub fn on<F, Fut>(&self, key: impl Into<String>, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, String>> + Send + 'static,
    {
        let key = key.into();
        self.inner.keys.add([key.clone()]);
        self.inner.req_handlers.insert(key, Arc::new(move |msg| Box::pin(handler(msg))));
    }

    /// Register a PUB handler for `topic`. If not already locally
    /// subscribed, adds the topic and broadcasts a SUBSCRIBE delta.
    pub async fn listen<F, Fut>(&self, topic: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), String>> + Send + 'static,
    {
        let topic = topic.into();
        self.inner.evt_handlers.insert(topic.clone(), Arc::new(move |msg| Box::pin(handler(msg))));

        if self.inner.subs.add_local(&topic) {
            self.broadcast_subscribe(vec![topic], Vec::new()).await?;
        }
        Ok(())
    }

    /// Mutate the local subscription set; if anything actually changed,
    /// broadcast a single SUBSCRIBE carrying the deltas.
    pub async fn subscribe_topics(&self, add: Vec<String>, remove: Vec<String>) -> Result<()> {
        let mut changed = false;
        for topic in &add {
            changed |= self.inner.subs.add_local(topic);
        }
        for topic in &remove {
            changed |= self.inner.subs.remove_local(topic);
        }

        if changed {
            self.broadcast_subscribe(add, remove).await?;
        }
        Ok(())
    }

    /// Learn a peer's served keys without waiting on a HELLO, e.g. from
    /// out-of-band configuration.
    pub fn learn_peer_keys(&self, peer: PeerId, keys: impl IntoIterator<Item = String>) {
        self.inner.keys.learn(peer, keys, None, None, None, false);
    }

    /// Drop any peer whose `last_seen` is older than `stale_after_s`,
    /// clearing both its `KeyRegistry` entry and its declared subscriptions
    /// so a stale peer doesn't keep receiving directed PUBs forever.
    /// Returns the pruned peer ids.
    pub fn prune_stale_peers(&self, stale_after_s: f64) -> Vec<PeerId> {
        let removed = self.inner.keys.prune(stale_after_s);
        for peer in &removed {
            self.inner.subs.remove_peer(peer);
        }
        removed
    }

    // ---- outbound -------------------------------------------------------

    /// Fire-and-forget escape hatch: frame and hand `msg` to the transport,
    /// performing no correlation whatsoever.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        let frame = wire::pack_frame(msg)?;
        self.inner.transport.send(dest_of(&msg.envelope), frame).await?;
        Ok(())
    }

    /// The central outbound algorithm: sender-side key gate, optional MTU
    /// guard, ACK wait, and (for REQ) RESP wait.
    pub async fn request(&self, msg: Message) -> Result<RequestOutcome> {
        self.request_with_timeout(msg, None).await
    }

    /// Same as [`Self::request`], but `timeout_override_secs` (when given)
    /// wins over `payload.ttl_ms` for the ACK wait window without touching
    /// the message itself — the wire payload stays exactly what the caller
    /// built, never gaining a field the receiving peer wasn't handed.
    async fn request_with_timeout(&self, msg: Message, timeout_override_secs: Option<f64>) -> Result<RequestOutcome> {
        let transid = msg.envelope.transid.clone();

        let Some(dest) = msg.envelope.destid.clone() else {
            self.send(&msg).await?;
            return Ok(RequestOutcome::Sent { transid });
        };

        if let Some(key) = msg.envelope.key.as_deref() {
            if self.inner.keys.peer_is_known(&dest) && !self.inner.keys.peer_supports(&dest, key) {
                return Ok(RequestOutcome::NoKey { transid });
            }
        }

        let frame = wire::pack_frame(&msg)?;
        if let Some(mtu) = self.inner.transport.mtu() {
            if frame.len() > mtu {
                return Ok(RequestOutcome::TooLarge { transid, mtu, size: frame.len() });
            }
        }

        let is_req = matches!(msg.envelope.msg_type, MsgType::Req);
        let wait_secs = timeout_override_secs
            .unwrap_or_else(|| ack_wait_secs(&msg.envelope, self.inner.config.default_ack_wait_secs));

        let (_guard, ack_rx, resp_rx) = self.inner.correlator.register(&transid);
        self.inner.transport.send(Dest::Peer(dest), frame).await?;

        if wait_for(&ack_rx, wait_secs).await.is_none() {
            tracing::debug!(transid = %transid, "request timed out waiting for ACK");
            return Ok(RequestOutcome::Timeout { transid });
        }

        if !is_req {
            return Ok(RequestOutcome::Delivered { transid, resp: None });
        }

        let resp = wait_for(&resp_rx, wait_secs / 2.0).await;
        let resp = resp.map(|m| Value::Object(m.envelope.payload));
        Ok(RequestOutcome::Delivered { transid, resp })
    }

    /// Convenience composition of [`MessageBuilder::req`] and [`Self::request`].
    ///
    /// `timeout_s` governs only the local ACK/RESP wait; it is never written
    /// into `body`, so the wire payload the receiving peer sees is exactly
    /// what the caller passed.
    pub async fn request_peer(
        &self,
        peer: impl Into<PeerId>,
        key: impl Into<String>,
        body: Map<String, Value>,
        timeout_s: f64,
    ) -> Result<RequestOutcome> {
        let msg = MessageBuilder::new(self.inner.self_id.clone())
            .req(key, body)
            .to(Some(peer.into()))
            .build()?;
        self.request_with_timeout(msg, Some(timeout_s)).await
    }

    /// Publish fan-out: directed PUBs to every known subscriber, or a single
    /// broadcast if none are known.
    pub async fn publish(&self, topic: impl Into<String>, payload: Map<String, Value>) -> Result<usize> {
        let topic = topic.into();
        let subscribers = self.inner.subs.subscribers_of(&topic);

        if subscribers.is_empty() {
            let msg = MessageBuilder::new(self.inner.self_id.clone())
                .pub_(topic, payload)
                .build()?;
            self.send(&msg).await?;
            return Ok(0);
        }

        for peer in &subscribers {
            let msg = MessageBuilder::new(self.inner.self_id.clone())
                .pub_(topic.clone(), payload.clone())
                .to(Some(peer.clone()))
                .build()?;
            self.send(&msg).await?;
        }
        Ok(subscribers.len())
    }

    /// Broadcast one HELLO carrying the current `{caps, keys, subs, rev, ts}`.
    pub async fn announce_hello(&self) -> Result<()> {
        let msg = MessageBuilder::new(self.inner.self_id.clone())
            .hello(
                self.inner.keys.local_caps(),
                self.inner.keys.local_keys(),
                self.inner.subs.local_topics(),
                self.inner.keys.rev(),
            )
            .build()?;
        self.send(&msg).await
    }

    async fn broadcast_subscribe(&self, add: Vec<String>, remove: Vec<String>) -> Result<()> {
        let msg = MessageBuilder::new(self.inner.self_id.clone())
            .subscribe(add, remove)
            .build()?;
        self.send(&msg).await
    }

    async fn send_fast_ack(&self, transid: &str, to: PeerId) {
        match MessageBuilder::new(self.inner.self_id.clone()).ack(transid).to(Some(to)).build() {
            Ok(msg) => {
                if let Err(err) = self.send(&msg).await {
                    tracing::warn!(%err, transid, "fast ACK send failed");
                }
            }
            Err(err) => tracing::warn!(%err, transid, "failed to build fast ACK"),
        }
    }

    // ---- lifecycle ------------------------------------------------------

    /// Install the inbound dispatcher on the transport, start it, and start
    /// the discovery announcer. Idempotent: a second call is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, AtomicOrdering::SeqCst) {
            return Ok(());
        }

        let dispatch_handle = self.clone();
        self.inner.transport.on_receive(Box::new(move |source, frame| {
            let rt = dispatch_handle.clone();
            compio::runtime::spawn(async move {
                rt.dispatch(source, frame).await;
            })
            .detach();
        }));

        self.inner.transport.start().await?;

        let sink = Arc::new(self.clone());
        let announcer = Announcer::start(sink, self.inner.config.discovery_interval_secs);
        *self.inner.announcer.lock().unwrap() = Some(announcer);

        Ok(())
    }

    /// Stop the discovery announcer, then the transport. Cooperative: does
    /// not block beyond the announcer's one in-flight tick.
    pub async fn stop(&self) -> Result<()> {
        if let Some(announcer) = self.inner.announcer.lock().unwrap().take() {
            announcer.stop();
        }
        self.inner.transport.stop().await?;
        self.inner.started.store(false, AtomicOrdering::SeqCst);
        Ok(())
    }

    // ---- inbound dispatch -----------------------------------------------

    async fn dispatch(&self, _source: PeerId, frame: Bytes) {
        let message = match wire::unpack_frame(&frame) {
            Ok(m) => m,
            Err(err) => {
                tracing::debug!(%err, "dropping undecodable inbound frame");
                return;
            }
        };

        tracing::trace!(
            transid = %message.envelope.transid,
            msg_type = ?message.envelope.msg_type,
            "dispatching inbound frame"
        );

        match message.envelope.msg_type {
            MsgType::Ack => {
                let transid = message.envelope.transid.clone();
                self.inner.correlator.complete_ack(&transid, message);
            }
            MsgType::Resp => {
                let transid = message.envelope.transid.clone();
                self.inner.correlator.complete_resp(&transid, message);
            }
            MsgType::Hello => self.handle_hello(message).await,
            MsgType::Subscribe => self.handle_subscribe(message).await,
            MsgType::Pub => self.handle_pub(message).await,
            MsgType::Req if message.envelope.destid.is_some() => self.handle_direct_req(message).await,
            MsgType::Req => self.handle_broadcast(message).await,
            MsgType::Config if message.envelope.destid.is_some() => self.handle_direct_config(message).await,
            MsgType::Config => self.handle_broadcast(message).await,
        }
    }

    async fn handle_hello(&self, message: Message) {
        let peer = message.envelope.sourceid.clone();
        let payload = &message.envelope.payload;

        let keys = string_array(payload.get("keys"));
        let caps = payload.get("caps").is_some().then(|| string_array(payload.get("caps")));
        let rev = payload.get("rev").and_then(Value::as_u64);
        let ts = payload.get("ts").and_then(Value::as_f64);
        let subs = string_array(payload.get("subs"));

        self.inner.keys.learn(peer.clone(), keys, caps, rev, ts, true);
        if !subs.is_empty() {
            self.inner.subs.set_remote(peer, subs);
        }
    }

    async fn handle_subscribe(&self, message: Message) {
        let peer = message.envelope.sourceid.clone();
        let transid = message.envelope.transid.clone();
        let directed = message.envelope.destid.is_some();

        let add = string_array(message.envelope.payload.get("add"));
        let remove = string_array(message.envelope.payload.get("remove"));
        self.inner.subs.apply_remote(peer.clone(), &add, &remove);

        if directed {
            self.send_fast_ack(&transid, peer).await;
        }
    }

    async fn handle_pub(&self, message: Message) {
        let Some(key) = message.envelope.key.clone() else {
            return;
        };
        let handler = self.inner.evt_handlers.get(&key).map(|entry| entry.value().clone());
        if let Some(handler) = handler {
            if let Err(err) = handler(message).await {
                tracing::warn!(%err, topic = %key, "PUB handler failed");
            }
        }
    }

    async fn handle_direct_req(&self, message: Message) {
        let transid = message.envelope.transid.clone();
        let source = message.envelope.sourceid.clone();
        let noresp = is_noresp(&message.envelope.payload);

        let Some(key) = self.gate_local_key(&message, &transid) else {
            return;
        };

        self.send_fast_ack(&transid, source.clone()).await;

        let handler = self.inner.req_handlers.get(&key).map(|entry| entry.value().clone());
        let Some(handler) = handler else {
            return;
        };

        let result = handler(message).await;
        if noresp {
            return;
        }

        let Value::Object(resp_payload) = normalize_handler_result(result) else {
            unreachable!("normalize_handler_result always returns an object")
        };

        match MessageBuilder::new(self.inner.self_id.clone())
            .resp(transid, resp_payload, Some(key))
            .to(Some(source))
            .build()
        {
            Ok(resp_msg) => {
                if let Err(err) = self.send(&resp_msg).await {
                    tracing::warn!(%err, "failed to send RESP");
                }
            }
            Err(err) => tracing::warn!(%err, "failed to build RESP"),
        }
    }

    async fn handle_direct_config(&self, message: Message) {
        let transid = message.envelope.transid.clone();
        let source = message.envelope.sourceid.clone();

        let Some(key) = self.gate_local_key(&message, &transid) else {
            return;
        };

        self.send_fast_ack(&transid, source).await;

        if let Some(handler) = self.inner.req_handlers.get(&key).map(|entry| entry.value().clone()) {
            let _ = handler(message).await;
        }
    }

    /// Broadcast REQ/CONFIG: no ACK, no RESP, handler invoked only if the
    /// key happens to be served locally.
    async fn handle_broadcast(&self, message: Message) {
        let key = match message.envelope.key.clone() {
            Some(k) if self.inner.keys.is_local(&k) => k,
            _ => return,
        };
        if let Some(handler) = self.inner.req_handlers.get(&key).map(|entry| entry.value().clone()) {
            let _ = handler(message).await;
        }
    }

    /// Receiver-side key gate shared by direct REQ and CONFIG: drop silently
    /// unless `key` is non-empty and served locally.
    fn gate_local_key(&self, message: &Message, transid: &str) -> Option<String> {
        match message.envelope.key.as_deref() {
            Some(k) if !k.is_empty() && self.inner.keys.is_local(k) => Some(k.to_string()),
            _ => {
                tracing::debug!(transid, "dropping direct REQ/CONFIG: key not served locally");
                None
            }
        }
    }
}

#[async_trait]
impl<T: Transport> Announce for Runtime<T> {
    async fn announce(&self) {
        if let Err(err) = self.announce_hello().await {
            tracing::warn!(%err, "discovery announce failed");
        }
    }
}

fn dest_of(envelope: &Envelope) -> Dest {
    match &envelope.destid {
        Some(peer) => Dest::Peer(peer.clone()),
        None => Dest::Broadcast,
    }
}

/// `W = payload.ttl_ms / 1000` when `ttl_ms` is a numeric payload field,
/// else the runtime's configured default.
fn ack_wait_secs(envelope: &Envelope, default_secs: f64) -> f64 {
    envelope
        .payload
        .get("ttl_ms")
        .and_then(Value::as_f64)
        .map(|ms| ms / 1000.0)
        .unwrap_or(default_secs)
}

async fn wait_for(rx: &flume::Receiver<Message>, secs: f64) -> Option<Message> {
    select! {
        msg = rx.recv_async().fuse() => msg.ok(),
        () = compio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).fuse() => None,
    }
}

fn is_noresp(payload: &Map<String, Value>) -> bool {
    payload.get("noresp").and_then(Value::as_bool).unwrap_or(false)
        || payload.get("_noresp").and_then(Value::as_bool).unwrap_or(false)
}

/// Handler-result normalization: pass through a map already carrying
/// `ok`/`error`, otherwise wrap as `{ok:true,data:...}`, or
/// `{ok:false,error:...}` if the handler returned `Err`.
fn normalize_handler_result(result: std::result::Result<Value, String>) -> Value {
    match result {
        Ok(Value::Object(map)) if map.contains_key("ok") || map.contains_key("error") => Value::Object(map),
        Ok(value) => {
            let mut wrapped = Map::new();
            wrapped.insert("ok".to_string(), Value::Bool(true));
            wrapped.insert("data".to_string(), value);
            Value::Object(wrapped)
        }
        Err(message) => {
            let mut wrapped = Map::new();
            wrapped.insert("ok".to_string(), Value::Bool(false));
            wrapped.insert("error".to_string(), Value::String(message));
            Value::Object(wrapped)
        }
    }
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_wait_secs_reads_numeric_ttl_ms() {
        let envelope = Envelope {
            version: 1,
            msg_type: MsgType::Req,
            transid: "t".into(),
            key: None,
            payload: {
                let mut m = Map::new();
                m.insert("ttl_ms".to_string(), Value::from(2000));
                m
            },
            time: "now".into(),
            destid: None,
            sourceid: PeerId::from("a"),
        };
        assert_eq!(ack_wait_secs(&envelope, 8.0), 2.0);
    }

    #[test]
    fn ack_wait_secs_falls_back_to_default() {
        let envelope = Envelope {
            version: 1,
            msg_type: MsgType::Req,
            transid: "t".into(),
            key: None,
            payload: Map::new(),
            time: "now".into(),
            destid: None,
            sourceid: PeerId::from("a"),
        };
        assert_eq!(ack_wait_secs(&envelope, 8.0), 8.0);
    }

    #[test]
    fn normalize_passes_through_existing_ok_error_shape() {
        let mut map = Map::new();
        map.insert("ok".to_string(), Value::Bool(true));
        map.insert("data".to_string(), Value::from(42));
        let out = normalize_handler_result(Ok(Value::Object(map.clone())));
        assert_eq!(out, Value::Object(map));
    }

    #[test]
    fn normalize_wraps_bare_value() {
        let out = normalize_handler_result(Ok(Value::from("plain")));
        assert_eq!(out["ok"], Value::Bool(true));
        assert_eq!(out["data"], Value::from("plain"));
    }

    #[test]
    fn normalize_wraps_handler_error() {
        let out = normalize_handler_result(Err("boom".to_string()));
        assert_eq!(out["ok"], Value::Bool(false));
        assert_eq!(out["error"], Value::from("boom"));
    }

    #[test]
    fn is_noresp_checks_both_spellings() {
        let mut a = Map::new();
        a.insert("noresp".to_string(), Value::Bool(true));
        assert!(is_noresp(&a));

        let mut b = Map::new();
        b.insert("_noresp".to_string(), Value::Bool(true));
        assert!(is_noresp(&b));

        assert!(!is_noresp(&Map::new()));
    }
}
