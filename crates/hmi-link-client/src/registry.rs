//! ---
//! hmi_section: "05-networking-telemetry-link"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Reconnecting telemetry client and subscriber routing."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
//! Device identifier to subscriber mapping.
//!
//! The registry is written by the presentation layer (items created, deleted
//! or renamed) and read by the network task for every frame, so all access
//! goes through one lock. Lookups clone the subscriber handle and release the
//! lock before delivery; a subscriber may therefore touch the registry from
//! inside its own callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hmi_link_msg::AGGREGATE_DEVICE_ID;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

/// Decoded telemetry handed to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Routing key the message carried.
    pub device_id: String,
    /// Sequence token from the frame header.
    pub sequence: String,
    /// Full JSON body, routing key included.
    pub body: JsonValue,
}

impl Notification {
    /// Deserialize the body into a typed payload view.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }

    /// Returns `true` when addressed to the aggregate statistics subscriber.
    pub fn is_aggregate(&self) -> bool {
        self.device_id == AGGREGATE_DEVICE_ID
    }
}

/// Reasons a subscriber could not accept a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The subscriber's queue is full; this notification is dropped.
    #[error("subscriber queue is full")]
    Full,
    /// The consuming side has gone away.
    #[error("subscriber is closed")]
    Closed,
}

/// Receiver of telemetry for one device (or for the aggregate statistics).
///
/// Delivery happens on the network task. Implementations must not block;
/// hand the notification off and return.
pub trait Subscriber: Send + Sync {
    /// Accept one notification.
    fn deliver(&self, notification: Notification) -> Result<(), DeliveryError>;
}

impl<F> Subscriber for F
where
    F: Fn(Notification) + Send + Sync,
{
    fn deliver(&self, notification: Notification) -> Result<(), DeliveryError> {
        self(notification);
        Ok(())
    }
}

/// Subscriber that forwards into a bounded queue drained by the consumer.
///
/// A full queue drops the notification instead of stalling the network read.
/// Notifications for one subscriber stay in arrival order.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSubscriber {
    /// Create a subscriber and the receiving end of its queue.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Wrap an existing sender; several devices may share one queue.
    pub fn from_sender(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, notification: Notification) -> Result<(), DeliveryError> {
        self.tx.try_send(notification).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Identity of one registration; survives renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Registry mutations that were refused. A refused call leaves the registry
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Device identifiers must be non-empty.
    #[error("device identifier must not be empty")]
    EmptyIdentifier,
    /// The identifier is reserved for the aggregate statistics subscriber.
    #[error("device identifier {0:?} is reserved")]
    Reserved(String),
    /// Another registration already owns the identifier.
    #[error("device identifier {0:?} is already registered")]
    Duplicate(String),
    /// No registration exists under the identifier.
    #[error("device identifier {0:?} is not registered")]
    UnknownDevice(String),
}

struct Entry {
    id: SubscriberId,
    subscriber: Arc<dyn Subscriber>,
}

#[derive(Default)]
struct RegistryInner {
    devices: HashMap<String, Entry>,
    aggregate: Option<Arc<dyn Subscriber>>,
    next_id: u64,
}

/// Shared device registry. Cloning yields another handle to the same map.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("DeviceRegistry")
            .field("devices", &inner.devices.len())
            .field("aggregate", &inner.aggregate.is_some())
            .finish()
    }
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber under a fresh device identifier.
    pub fn subscribe<S>(
        &self,
        device_id: impl Into<String>,
        subscriber: S,
    ) -> Result<SubscriberId, RegistryError>
    where
        S: Subscriber + 'static,
    {
        let device_id = device_id.into();
        check_identifier(&device_id)?;
        let mut inner = self.inner.write();
        if inner.devices.contains_key(&device_id) {
            return Err(RegistryError::Duplicate(device_id));
        }
        inner.next_id += 1;
        let id = SubscriberId(inner.next_id);
        inner.devices.insert(
            device_id.clone(),
            Entry {
                id,
                subscriber: Arc::new(subscriber),
            },
        );
        tracing::debug!(device = %device_id, subscriber = %id, "device subscribed");
        Ok(id)
    }

    /// Remove the registration for `device_id`, if any.
    pub fn unsubscribe(&self, device_id: &str) -> Option<SubscriberId> {
        let removed = self.inner.write().devices.remove(device_id).map(|e| e.id);
        if let Some(id) = removed {
            tracing::debug!(device = %device_id, subscriber = %id, "device unsubscribed");
        }
        removed
    }

    /// Move a registration to a new identifier.
    ///
    /// Renaming to the current identifier is a no-op. A new identifier owned
    /// by another registration is refused and nothing changes.
    pub fn rename(&self, old_id: &str, new_id: impl Into<String>) -> Result<(), RegistryError> {
        let new_id = new_id.into();
        check_identifier(&new_id)?;
        let mut inner = self.inner.write();
        if !inner.devices.contains_key(old_id) {
            return Err(RegistryError::UnknownDevice(old_id.to_owned()));
        }
        if old_id == new_id {
            return Ok(());
        }
        if inner.devices.contains_key(&new_id) {
            return Err(RegistryError::Duplicate(new_id));
        }
        if let Some(entry) = inner.devices.remove(old_id) {
            tracing::debug!(from = %old_id, to = %new_id, subscriber = %entry.id, "device renamed");
            inner.devices.insert(new_id, entry);
        }
        Ok(())
    }

    /// Drop every device registration. The aggregate subscriber stays.
    pub fn clear(&self) {
        self.inner.write().devices.clear();
    }

    /// Install the aggregate statistics subscriber, replacing any previous one.
    pub fn set_aggregate<S>(&self, subscriber: S)
    where
        S: Subscriber + 'static,
    {
        self.inner.write().aggregate = Some(Arc::new(subscriber));
    }

    /// Remove the aggregate statistics subscriber.
    pub fn clear_aggregate(&self) -> bool {
        self.inner.write().aggregate.take().is_some()
    }

    /// Returns `true` if `device_id` is registered.
    pub fn contains(&self, device_id: &str) -> bool {
        self.inner.read().devices.contains_key(device_id)
    }

    /// Registration id for `device_id`.
    pub fn subscriber_id(&self, device_id: &str) -> Option<SubscriberId> {
        self.inner.read().devices.get(device_id).map(|e| e.id)
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.inner.read().devices.len()
    }

    /// Returns `true` when no device is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().devices.is_empty()
    }

    /// Registered identifiers, sorted.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.read().devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn lookup(&self, device_id: &str) -> Option<Arc<dyn Subscriber>> {
        self.inner
            .read()
            .devices
            .get(device_id)
            .map(|e| e.subscriber.clone())
    }

    pub(crate) fn aggregate(&self) -> Option<Arc<dyn Subscriber>> {
        self.inner.read().aggregate.clone()
    }
}

fn check_identifier(device_id: &str) -> Result<(), RegistryError> {
    if device_id.is_empty() {
        return Err(RegistryError::EmptyIdentifier);
    }
    if device_id == AGGREGATE_DEVICE_ID {
        return Err(RegistryError::Reserved(device_id.to_owned()));
    }
    Ok(())
}
