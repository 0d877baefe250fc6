//! ---
//! hmi_section: "05-networking-telemetry-link"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Reconnecting telemetry client and subscriber routing."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::metrics::LinkMetrics;
use crate::CloseKind;

/// Lifecycle of the link as seen from outside the network task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// No supervisor is running, either not started yet or aborted.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// The session is open; sends are accepted.
    Open,
    /// The last session ended; a new attempt follows.
    Closed(CloseKind),
}

/// State shared between the network task (sole writer) and everyone else.
///
/// Only the running session flips `connected` and installs the write queue.
#[derive(Debug)]
pub struct ConnectionState {
    connected: AtomicBool,
    outbound: Mutex<Option<mpsc::Sender<Bytes>>>,
    status: watch::Sender<LinkStatus>,
    metrics: LinkMetrics,
}

impl ConnectionState {
    /// Fresh, disconnected state.
    pub fn new(metrics: LinkMetrics) -> Self {
        let (status, _) = watch::channel(LinkStatus::Idle);
        Self {
            connected: AtomicBool::new(false),
            outbound: Mutex::new(None),
            status,
            metrics,
        }
    }

    /// Returns `true` while a session is open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Current lifecycle status.
    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    /// Link metrics.
    pub fn metrics(&self) -> &LinkMetrics {
        &self.metrics
    }

    pub(crate) fn outbound(&self) -> Option<mpsc::Sender<Bytes>> {
        self.outbound.lock().clone()
    }

    pub(crate) fn mark_connecting(&self) {
        self.status.send_replace(LinkStatus::Connecting);
    }

    pub(crate) fn mark_open(&self, outbound: mpsc::Sender<Bytes>) {
        *self.outbound.lock() = Some(outbound);
        self.connected.store(true, Ordering::Release);
        self.metrics.set_connected(true);
        self.status.send_replace(LinkStatus::Open);
    }

    pub(crate) fn mark_closed(&self, kind: CloseKind) {
        self.connected.store(false, Ordering::Release);
        self.outbound.lock().take();
        self.metrics.set_connected(false);
        self.status.send_replace(LinkStatus::Closed(kind));
    }

    pub(crate) fn mark_idle(&self) {
        self.connected.store(false, Ordering::Release);
        self.outbound.lock().take();
        self.metrics.set_connected(false);
        self.status.send_replace(LinkStatus::Idle);
    }
}
