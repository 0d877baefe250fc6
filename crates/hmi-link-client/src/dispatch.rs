//! ---
//! hmi_section: "05-networking-telemetry-link"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Reconnecting telemetry client and subscriber routing."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use hmi_link_msg::{Frame, MessageKind, AGGREGATE_DEVICE_ID};
use tracing::{debug, warn};

use crate::registry::{DeliveryError, DeviceRegistry, Notification};

/// Where a decoded frame ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the subscriber registered for the device.
    Delivered {
        /// Routing key.
        device_id: String,
    },
    /// Handed to the aggregate statistics subscriber.
    Aggregate,
    /// Not a telemetry notification; nothing to route.
    Ignored {
        /// Message type that was skipped.
        kind: MessageKind,
    },
    /// The body carries no usable device identifier.
    MissingDeviceIdentifier,
    /// Nobody is registered under the identifier.
    UnknownDevice {
        /// Routing key.
        device_id: String,
    },
    /// The subscriber refused the notification.
    Undeliverable {
        /// Routing key.
        device_id: String,
        /// Why delivery failed.
        error: DeliveryError,
    },
}

impl DispatchOutcome {
    /// Returns `true` if a subscriber accepted the message.
    pub fn is_delivered(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Delivered { .. } | DispatchOutcome::Aggregate
        )
    }

    /// Returns `true` for telemetry that was expected to reach someone but
    /// did not.
    pub fn is_dropped(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::MissingDeviceIdentifier
                | DispatchOutcome::UnknownDevice { .. }
                | DispatchOutcome::Undeliverable { .. }
        )
    }
}

/// Routes decoded frames to subscribers by device identifier.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: DeviceRegistry,
}

impl Dispatcher {
    /// Dispatcher reading from `registry`.
    pub fn new(registry: DeviceRegistry) -> Self {
        Self { registry }
    }

    /// Registry this dispatcher routes through.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Route one frame. Never fails; the outcome says what happened.
    pub fn dispatch(&self, frame: Frame) -> DispatchOutcome {
        if frame.kind != MessageKind::NotifyToFrontend {
            debug!(kind = %frame.kind, "ignoring non-notification message");
            return DispatchOutcome::Ignored { kind: frame.kind };
        }

        let Some(device_id) = frame.device_id().map(str::to_owned) else {
            warn!(sequence = %frame.sequence, "notification without device-sn dropped");
            return DispatchOutcome::MissingDeviceIdentifier;
        };

        let aggregate = device_id == AGGREGATE_DEVICE_ID;
        let subscriber = if aggregate {
            self.registry.aggregate()
        } else {
            self.registry.lookup(&device_id)
        };
        let Some(subscriber) = subscriber else {
            debug!(device = %device_id, "no subscriber for device");
            return DispatchOutcome::UnknownDevice { device_id };
        };

        let notification = Notification {
            device_id: device_id.clone(),
            sequence: frame.sequence,
            body: frame.body,
        };
        match subscriber.deliver(notification) {
            Ok(()) if aggregate => DispatchOutcome::Aggregate,
            Ok(()) => DispatchOutcome::Delivered { device_id },
            Err(error) => {
                warn!(device = %device_id, %error, "subscriber refused notification");
                DispatchOutcome::Undeliverable { device_id, error }
            }
        }
    }
}
