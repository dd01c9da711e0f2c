//! Correlation core: single-slot ACK/RESP rendezvous keyed by `transid`.
//!
//! A `flume::bounded(1)` pair is created per transaction; the sender half is
//! stashed in a `DashMap` for the dispatcher to find, the receiver half is
//! held on the stack of the task awaiting it. [`PendingTransaction`] is the
//! RAII guard that removes both map entries on every exit path of
//! `Runtime::request` — return, timeout, or panic unwind — without a
//! hand-written `finally`.

use dashmap::DashMap;

use crate::envelope::Message;

/// Outcome of an outbound `request`/`request_peer` call.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// Broadcast message: fired and forgotten, no correlation performed.
    Sent { transid: String },
    /// Sender-side key gate rejected the send before anything was sent.
    NoKey { transid: String },
    /// No ACK arrived within the wait window.
    Timeout { transid: String },
    /// The framed message exceeds the transport's advertised MTU.
    TooLarge { transid: String, mtu: usize, size: usize },
    /// ACK (and, for REQ, RESP) arrived in time.
    Delivered {
        transid: String,
        resp: Option<serde_json::Value>,
    },
}

impl RequestOutcome {
    #[must_use]
    pub fn transid(&self) -> &str {
        match self {
            Self::Sent { transid }
            | Self::NoKey { transid }
            | Self::Timeout { transid }
            | Self::TooLarge { transid, .. }
            | Self::Delivered { transid, .. } => transid,
        }
    }
}

/// Owns the `ack_wait`/`resp_wait` rendezvous tables.
#[derive(Default)]
pub struct Correlator {
    ack_wait: DashMap<String, flume::Sender<Message>>,
    resp_wait: DashMap<String, flume::Sender<Message>>,
}

impl Correlator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install rendezvous slots for `transid`, returning a guard that tears
    /// them both down on drop, plus the receiver halves to await on.
    pub fn register(&self, transid: &str) -> (PendingTransaction<'_>, flume::Receiver<Message>, flume::Receiver<Message>) {
        let (ack_tx, ack_rx) = flume::bounded(1);
        let (resp_tx, resp_rx) = flume::bounded(1);

        self.ack_wait.insert(transid.to_string(), ack_tx);
        self.resp_wait.insert(transid.to_string(), resp_tx);

        (
            PendingTransaction {
                correlator: self,
                transid: transid.to_string(),
            },
            ack_rx,
            resp_rx,
        )
    }

    /// Deliver an ACK to its waiter. Returns `false` if there was no
    /// matching waiter (stale or unmatched transid) — the caller should
    /// drop the frame silently in that case.
    pub fn complete_ack(&self, transid: &str, msg: Message) -> bool {
        Self::deliver(&self.ack_wait, transid, msg)
    }

    /// Deliver a RESP to its waiter, same contract as [`Self::complete_ack`].
    pub fn complete_resp(&self, transid: &str, msg: Message) -> bool {
        Self::deliver(&self.resp_wait, transid, msg)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.ack_wait.len() + self.resp_wait.len()
    }

    fn deliver(table: &DashMap<String, flume::Sender<Message>>, transid: &str, msg: Message) -> bool {
        match table.remove(transid) {
            Some((_, tx)) => tx.try_send(msg).is_ok(),
            None => false,
        }
    }
}

/// RAII guard removing a transaction's `ack_wait`/`resp_wait` entries when
/// dropped, regardless of how the awaiting call exits.
pub struct PendingTransaction<'a> {
    correlator: &'a Correlator,
    transid: String,
}

impl Drop for PendingTransaction<'_> {
    fn drop(&mut self) {
        self.correlator.ack_wait.remove(&self.transid);
        self.correlator.resp_wait.remove(&self.transid);
    }
}
