//! ---
//! hmi_section: "05-networking-telemetry-link"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Reconnecting telemetry client and subscriber routing."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
//! One TCP connection attempt, from connect to close.
//!
//! ```text
//! Connecting ──connect ok──▶ Open ──eof / io error──▶ Closed
//!      └──────connect failed──────────────────────────▶ Closed
//! ```
//!
//! While open, the session is the only reader and the only writer of the
//! socket. Reads feed the [`ReceiveBuffer`]; every complete frame is decoded
//! and dispatched before the next read. Outbound frames arrive through a
//! bounded channel and are written between reads.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use hmi_link_msg::{decode, Extracted, ReceiveBuffer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::dispatch::Dispatcher;
use crate::state::ConnectionState;
use crate::CloseReason;

enum SessionEvent {
    Read(io::Result<Option<usize>>),
    Outbound(Bytes),
}

/// A single connection attempt and its read loop.
pub struct ConnectionSession<'a> {
    config: &'a LinkConfig,
    dispatcher: &'a Dispatcher,
    state: &'a ConnectionState,
}

impl<'a> ConnectionSession<'a> {
    /// Prepare a session; nothing happens until [`run`](Self::run).
    pub fn new(
        config: &'a LinkConfig,
        dispatcher: &'a Dispatcher,
        state: &'a ConnectionState,
    ) -> Self {
        Self {
            config,
            dispatcher,
            state,
        }
    }

    /// Connect, serve the connection until it ends, and report why it ended.
    ///
    /// The shared state is back to disconnected when this returns.
    pub async fn run(&self) -> CloseReason {
        self.state.mark_connecting();
        self.state.metrics().observe_session();

        let stream = match TcpStream::connect(self.config.server).await {
            Ok(stream) => stream,
            Err(err) => {
                let reason = CloseReason::ConnectRefused(err);
                self.state.mark_closed(reason.kind());
                return reason;
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "unable to disable nagle");
        }
        info!(peer = %self.config.server, "connected to telemetry server");

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_capacity);
        self.state.mark_open(outbound_tx);
        let reason = self.serve(stream, outbound_rx).await;
        self.state.mark_closed(reason.kind());
        reason
    }

    async fn serve(&self, stream: TcpStream, mut outbound: mpsc::Receiver<Bytes>) -> CloseReason {
        let (mut reader, mut writer) = stream.into_split();
        let mut buffer = ReceiveBuffer::new(self.config.max_frame_len);
        let mut chunk = vec![0u8; self.config.read_chunk];

        loop {
            let event = tokio::select! {
                read = read_chunk(&mut reader, &mut chunk, self.config.read_timeout) => {
                    SessionEvent::Read(read)
                }
                Some(frame) = outbound.recv() => SessionEvent::Outbound(frame),
            };

            match event {
                SessionEvent::Read(Ok(None)) => continue,
                SessionEvent::Read(Ok(Some(0))) => {
                    info!(peer = %self.config.server, "server closed connection");
                    return CloseReason::PeerClosed;
                }
                SessionEvent::Read(Ok(Some(n))) => {
                    buffer.append(&chunk[..n]);
                    self.drain(&mut buffer);
                }
                SessionEvent::Read(Err(err)) => {
                    warn!(peer = %self.config.server, error = %err, "read failed");
                    return CloseReason::Io(err);
                }
                SessionEvent::Outbound(frame) => {
                    if let Err(err) = writer.write_all(&frame).await {
                        warn!(peer = %self.config.server, error = %err, "write failed");
                        return CloseReason::Io(err);
                    }
                    self.state.metrics().observe_message_sent();
                    debug!(bytes = frame.len(), "frame written");
                }
            }
        }
    }

    fn drain(&self, buffer: &mut ReceiveBuffer) {
        let metrics = self.state.metrics();
        while let Some(item) = buffer.next_frame() {
            match item {
                Extracted::Frame(payload) => {
                    metrics.observe_frame_received();
                    match decode(&payload) {
                        Ok(frame) => {
                            if self.dispatcher.dispatch(frame).is_dropped() {
                                metrics.observe_message_dropped();
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, bytes = payload.len(), "discarding undecodable frame");
                            metrics.observe_frame_discarded();
                        }
                    }
                }
                Extracted::Overflow { discarded } => {
                    warn!(
                        bytes = discarded,
                        limit = self.config.max_frame_len,
                        "discarding oversized frame"
                    );
                    metrics.observe_frame_discarded();
                }
            }
        }
    }
}

/// One socket read. `Ok(None)` means the read timed out and should simply be
/// retried.
async fn read_chunk<R>(
    reader: &mut R,
    chunk: &mut [u8],
    timeout: Option<Duration>,
) -> io::Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, reader.read(chunk)).await {
            Ok(read) => read.map(Some),
            Err(_elapsed) => Ok(None),
        },
        None => reader.read(chunk).await.map(Some),
    }
}
