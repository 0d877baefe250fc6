//! ---
//! hmi_section: "05-networking-telemetry-link"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Reconnecting telemetry client and subscriber routing."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use std::sync::Arc;

use hmi_link_msg::{encode, DeviceControl, EncodeError, MessageKind};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::state::ConnectionState;

/// What happened to an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Queued for the open session's socket.
    Queued,
    /// No session is open; the message was dropped.
    Disconnected,
    /// The write queue is full; the message was dropped.
    Backpressure,
}

/// Best-effort outbound path. Cheap to clone; usable from any thread.
///
/// Messages are never buffered across reconnects: anything sent while the
/// link is down is dropped.
#[derive(Debug, Clone)]
pub struct LinkSender {
    state: Arc<ConnectionState>,
}

impl LinkSender {
    pub(crate) fn new(state: Arc<ConnectionState>) -> Self {
        Self { state }
    }

    /// Returns `true` while a session is open.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Encode and queue a message for the server.
    ///
    /// Only encoding problems are errors. A dropped message is reported
    /// through [`SendStatus`].
    pub fn send<T>(&self, kind: &MessageKind, body: &T) -> Result<SendStatus, EncodeError>
    where
        T: Serialize + ?Sized,
    {
        let Some(outbound) = self.state.outbound().filter(|_| self.state.is_connected()) else {
            debug!(kind = %kind, "link down; outbound message dropped");
            self.state.metrics().observe_message_dropped();
            return Ok(SendStatus::Disconnected);
        };

        let frame = encode(kind, body)?;
        match outbound.try_send(frame) {
            Ok(()) => Ok(SendStatus::Queued),
            Err(TrySendError::Full(_)) => {
                debug!(kind = %kind, "write queue full; outbound message dropped");
                self.state.metrics().observe_message_dropped();
                Ok(SendStatus::Backpressure)
            }
            Err(TrySendError::Closed(_)) => {
                debug!(kind = %kind, "session closing; outbound message dropped");
                self.state.metrics().observe_message_dropped();
                Ok(SendStatus::Disconnected)
            }
        }
    }

    /// Send a `device_control` command.
    pub fn send_control(&self, command: &DeviceControl) -> Result<SendStatus, EncodeError> {
        self.send(&MessageKind::DeviceControl, command)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::metrics::LinkMetrics;
    use crate::CloseKind;

    fn sender() -> (LinkSender, Arc<ConnectionState>) {
        let state = Arc::new(ConnectionState::new(LinkMetrics::default()));
        (LinkSender::new(state.clone()), state)
    }

    #[test]
    fn disconnected_send_is_a_silent_drop() {
        let (sender, state) = sender();
        let status = sender
            .send(&MessageKind::DeviceControl, &json!({"device-sn": "fan"}))
            .expect("no error while disconnected");
        assert_eq!(status, SendStatus::Disconnected);
        assert_eq!(state.metrics().snapshot().messages_dropped, 1);
    }

    #[test]
    fn disconnected_send_skips_encoding() {
        let (sender, _) = sender();
        let status = sender
            .send(&MessageKind::from("bad|kind"), &json!({}))
            .expect("not encoded while disconnected");
        assert_eq!(status, SendStatus::Disconnected);
    }

    #[test]
    fn open_session_receives_encoded_frame() {
        let (sender, state) = sender();
        let (tx, mut rx) = mpsc::channel::<Bytes>(4);
        state.mark_open(tx);

        let command = DeviceControl::set_fan_speed("fan-3", hmi_link_msg::FanSpeed::Low);
        assert_eq!(sender.send_control(&command).expect("send"), SendStatus::Queued);
        let frame = rx.try_recv().expect("frame queued");
        assert_eq!(frame.last(), Some(&hmi_link_msg::TERMINATOR));
        let decoded = hmi_link_msg::decode(&frame[..frame.len() - 1]).expect("decode");
        assert_eq!(decoded.kind, MessageKind::DeviceControl);
        assert_eq!(
            decoded.body,
            json!({"device-sn": "fan-3", "operation": "set-wind-pump-speed", "fan-speed": 1})
        );
    }

    #[test]
    fn full_queue_reports_backpressure() {
        let (sender, state) = sender();
        let (tx, _rx) = mpsc::channel::<Bytes>(1);
        state.mark_open(tx);
        let body = json!({"device-sn": "fan"});
        assert_eq!(
            sender.send(&MessageKind::DeviceControl, &body).expect("send"),
            SendStatus::Queued
        );
        assert_eq!(
            sender.send(&MessageKind::DeviceControl, &body).expect("send"),
            SendStatus::Backpressure
        );
    }

    #[test]
    fn closed_session_drops_again() {
        let (sender, state) = sender();
        let (tx, _rx) = mpsc::channel::<Bytes>(1);
        state.mark_open(tx);
        assert!(sender.is_connected());
        state.mark_closed(CloseKind::PeerClosed);
        assert!(!sender.is_connected());
        assert_eq!(
            sender.send(&MessageKind::DeviceControl, &json!({})).expect("send"),
            SendStatus::Disconnected
        );
    }

    #[test]
    fn invalid_kind_is_an_error_when_connected() {
        let (sender, state) = sender();
        let (tx, _rx) = mpsc::channel::<Bytes>(1);
        state.mark_open(tx);
        assert!(matches!(
            sender.send(&MessageKind::from("bad|kind"), &json!({})),
            Err(EncodeError::InvalidHeaderField(_))
        ));
    }
}
