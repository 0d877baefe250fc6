//! ---
//! hmi_section: "05-networking-telemetry-link"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Reconnecting telemetry client and subscriber routing."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use std::fmt;

use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Point-in-time copy of the link counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkCounters {
    /// Connect attempts, successful or not.
    pub sessions: u64,
    /// Complete frames pulled from the receive buffer.
    pub frames_received: u64,
    /// Frames thrown away as malformed or oversized.
    pub frames_discarded: u64,
    /// Decoded messages that reached no subscriber, plus outbound messages
    /// dropped while disconnected or congested.
    pub messages_dropped: u64,
    /// Outbound frames fully written to the socket.
    pub messages_sent: u64,
    /// Whether a session is currently open.
    pub connected: bool,
}

/// Prometheus handles for link activity. Cloning shares the underlying
/// counters.
#[derive(Clone)]
pub struct LinkMetrics {
    sessions: IntCounter,
    frames_received: IntCounter,
    frames_discarded: IntCounter,
    messages_dropped: IntCounter,
    messages_sent: IntCounter,
    connected: IntGauge,
}

impl LinkMetrics {
    /// Create link metrics and register them with `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let sessions = IntCounter::with_opts(Opts::new(
            "hmi_link_sessions_total",
            "Connection attempts made by the reconnect supervisor",
        ))?;
        let frames_received = IntCounter::with_opts(Opts::new(
            "hmi_link_frames_received_total",
            "Complete frames extracted from the receive buffer",
        ))?;
        let frames_discarded = IntCounter::with_opts(Opts::new(
            "hmi_link_frames_discarded_total",
            "Frames discarded as malformed or oversized",
        ))?;
        let messages_dropped = IntCounter::with_opts(Opts::new(
            "hmi_link_messages_dropped_total",
            "Messages that reached no subscriber or could not be sent",
        ))?;
        let messages_sent = IntCounter::with_opts(Opts::new(
            "hmi_link_messages_sent_total",
            "Outbound frames written to the socket",
        ))?;
        let connected = IntGauge::with_opts(Opts::new(
            "hmi_link_connected",
            "1 while a session to the telemetry server is open",
        ))?;

        registry.register(Box::new(sessions.clone()))?;
        registry.register(Box::new(frames_received.clone()))?;
        registry.register(Box::new(frames_discarded.clone()))?;
        registry.register(Box::new(messages_dropped.clone()))?;
        registry.register(Box::new(messages_sent.clone()))?;
        registry.register(Box::new(connected.clone()))?;

        Ok(Self {
            sessions,
            frames_received,
            frames_discarded,
            messages_dropped,
            messages_sent,
            connected,
        })
    }

    pub(crate) fn observe_session(&self) {
        self.sessions.inc();
    }

    pub(crate) fn observe_frame_received(&self) {
        self.frames_received.inc();
    }

    pub(crate) fn observe_frame_discarded(&self) {
        self.frames_discarded.inc();
    }

    pub(crate) fn observe_message_dropped(&self) {
        self.messages_dropped.inc();
    }

    pub(crate) fn observe_message_sent(&self) {
        self.messages_sent.inc();
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.set(i64::from(connected));
    }

    /// Current counter values.
    pub fn snapshot(&self) -> LinkCounters {
        LinkCounters {
            sessions: self.sessions.get(),
            frames_received: self.frames_received.get(),
            frames_discarded: self.frames_discarded.get(),
            messages_dropped: self.messages_dropped.get(),
            messages_sent: self.messages_sent.get(),
            connected: self.connected.get() > 0,
        }
    }
}

impl Default for LinkMetrics {
    /// Metrics registered with a private registry, for callers that do not
    /// export them.
    fn default() -> Self {
        Self::register(&Registry::new()).expect("static metric definitions are valid")
    }
}

impl fmt::Debug for LinkMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LinkMetrics").field(&self.snapshot()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_exported_and_snapshotted() {
        let registry = Registry::new();
        let metrics = LinkMetrics::register(&registry).expect("register metrics");
        metrics.observe_session();
        metrics.observe_frame_received();
        metrics.observe_frame_received();
        metrics.observe_frame_discarded();
        metrics.observe_message_dropped();
        metrics.observe_message_sent();
        metrics.set_connected(true);

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot,
            LinkCounters {
                sessions: 1,
                frames_received: 2,
                frames_discarded: 1,
                messages_dropped: 1,
                messages_sent: 1,
                connected: true,
            }
        );

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "hmi_link_frames_received_total"));
    }

    #[test]
    fn double_registration_fails() {
        let registry = Registry::new();
        LinkMetrics::register(&registry).expect("first");
        assert!(LinkMetrics::register(&registry).is_err());
    }

    #[test]
    fn clones_share_counters() {
        let metrics = LinkMetrics::default();
        let other = metrics.clone();
        other.observe_session();
        assert_eq!(metrics.snapshot().sessions, 1);
    }
}
