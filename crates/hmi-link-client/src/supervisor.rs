//! ---
//! hmi_section: "05-networking-telemetry-link"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Reconnecting telemetry client and subscriber routing."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
//! Background task that keeps a session to the telemetry server alive.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, LinkConfig};
use crate::dispatch::Dispatcher;
use crate::metrics::LinkMetrics;
use crate::registry::DeviceRegistry;
use crate::sender::LinkSender;
use crate::session::ConnectionSession;
use crate::state::{ConnectionState, LinkStatus};
use crate::CloseReason;

/// Runs connection sessions back to back, forever.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    config: LinkConfig,
    dispatcher: Dispatcher,
    state: Arc<ConnectionState>,
}

impl ReconnectSupervisor {
    /// Supervisor routing inbound telemetry through `registry`.
    ///
    /// Fails when `config` does not pass [`LinkConfig::validate`].
    pub fn new(
        config: LinkConfig,
        registry: DeviceRegistry,
        metrics: LinkMetrics,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            dispatcher: Dispatcher::new(registry),
            state: Arc::new(ConnectionState::new(metrics)),
        })
    }

    /// Outbound handle sharing this supervisor's connection state.
    pub fn sender(&self) -> LinkSender {
        LinkSender::new(self.state.clone())
    }

    /// Shared connection state.
    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    /// Connect, serve, and reconnect without end.
    ///
    /// Every session outcome, including a panic raised by a subscriber
    /// callback, is logged and followed by another attempt after
    /// `retry_delay`.
    pub async fn run(&self) {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let session = ConnectionSession::new(&self.config, &self.dispatcher, &self.state);
            let reason = match AssertUnwindSafe(session.run()).catch_unwind().await {
                Ok(reason) => reason,
                Err(payload) => {
                    let reason = CloseReason::Panicked(panic_message(payload.as_ref()));
                    self.state.mark_closed(reason.kind());
                    reason
                }
            };
            self.log_close(attempt, &reason);
            self.pause().await;
        }
    }

    /// Move the supervisor onto the tokio runtime.
    pub fn spawn(self) -> LinkHandle {
        let state = self.state.clone();
        let task = tokio::spawn(async move { self.run().await });
        LinkHandle { state, task }
    }

    fn log_close(&self, attempt: u64, reason: &CloseReason) {
        let server = self.config.server;
        match reason {
            CloseReason::ConnectRefused(err) => {
                debug!(%server, attempt, error = %err, "connect failed; retrying");
            }
            CloseReason::PeerClosed => {
                info!(%server, attempt, "session ended by server; reconnecting");
            }
            CloseReason::Io(err) => {
                warn!(%server, attempt, error = %err, "session failed; reconnecting");
            }
            CloseReason::Panicked(message) => {
                error!(%server, attempt, panic = %message, "session panicked; reconnecting");
            }
        }
    }

    async fn pause(&self) {
        if self.config.retry_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Handle to a spawned [`ReconnectSupervisor`].
///
/// Dropping the handle leaves the link running.
#[derive(Debug)]
pub struct LinkHandle {
    state: Arc<ConnectionState>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    /// Outbound handle for this link.
    pub fn sender(&self) -> LinkSender {
        LinkSender::new(self.state.clone())
    }

    /// Returns `true` while a session is open.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> LinkStatus {
        self.state.status()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<LinkStatus> {
        self.state.subscribe_status()
    }

    /// Link metrics.
    pub fn metrics(&self) -> &LinkMetrics {
        self.state.metrics()
    }

    /// Wait until a session is open. Returns `false` if `limit` elapses first.
    pub async fn wait_connected(&self, limit: Duration) -> bool {
        self.wait_for(limit, |status| *status == LinkStatus::Open).await
    }

    /// Wait until `predicate` holds for the status. Returns `false` if `limit`
    /// elapses first.
    pub async fn wait_for<F>(&self, limit: Duration, predicate: F) -> bool
    where
        F: FnMut(&LinkStatus) -> bool,
    {
        let mut status = self.state.subscribe_status();
        let reached = matches!(
            tokio::time::timeout(limit, status.wait_for(predicate)).await,
            Ok(Ok(_))
        );
        reached
    }

    /// Stop the background task and wait for it to go away. The link reads
    /// as disconnected and [`LinkStatus::Idle`] afterwards.
    pub async fn abort(self) {
        self.task.abort();
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                error!(error = %err, "link task ended abnormally");
            }
        }
        self.state.mark_idle();
    }
}
