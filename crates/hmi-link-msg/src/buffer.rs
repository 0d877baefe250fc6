//! ---
//! hmi_section: "02-messaging-wire-protocol"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Wire protocol helpers for the telemetry link."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
//! Terminator-delimited reassembly of the inbound byte stream.
//!
//! TCP reads land at arbitrary offsets, so one read may carry several frames,
//! a frame tail, or only part of a frame. [`ReceiveBuffer`] accumulates reads
//! and yields complete frame payloads in arrival order, keeping any trailing
//! partial frame for the next read.
//!
//! The buffer is bounded: once more than `max_frame_len` bytes accumulate
//! without a terminator, they are thrown away and input is skipped up to the
//! next terminator so a single runaway frame cannot exhaust memory.

use bytes::{Buf, Bytes, BytesMut};

use crate::TERMINATOR;

/// Default upper bound for a single frame payload (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Item produced by [`ReceiveBuffer::next_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    /// Complete frame payload without its terminator.
    Frame(Bytes),
    /// A frame exceeded the size limit and was dropped.
    Overflow {
        /// Number of bytes thrown away when the overflow was detected.
        discarded: usize,
    },
}

/// Accumulator splitting a byte stream into terminator-delimited frames.
#[derive(Debug)]
pub struct ReceiveBuffer {
    buf: BytesMut,
    max_frame_len: usize,
    discarding: bool,
    /// Prefix of `buf` already known to hold no terminator.
    scanned: usize,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl ReceiveBuffer {
    /// Create a buffer that rejects frames longer than `max_frame_len` bytes.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_len,
            discarding: false,
            scanned: 0,
        }
    }

    /// Append bytes freshly read from the transport.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently held for an incomplete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` while the tail of an oversized frame is being skipped.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Pop the next complete frame, if the accumulator holds one.
    ///
    /// Bytes searched by an earlier call are not searched again, so a frame
    /// trickling in over many reads costs time linear in its length.
    pub fn next_frame(&mut self) -> Option<Extracted> {
        loop {
            let found = self.buf[self.scanned..]
                .iter()
                .position(|b| *b == TERMINATOR)
                .map(|offset| self.scanned + offset);
            match found {
                Some(end) if self.discarding => {
                    self.buf.advance(end + 1);
                    self.scanned = 0;
                    self.discarding = false;
                }
                Some(end) => {
                    let payload = self.buf.split_to(end).freeze();
                    self.buf.advance(1);
                    self.scanned = 0;
                    if payload.len() > self.max_frame_len {
                        return Some(Extracted::Overflow {
                            discarded: payload.len(),
                        });
                    }
                    return Some(Extracted::Frame(payload));
                }
                None if self.discarding => {
                    self.buf.clear();
                    self.scanned = 0;
                    return None;
                }
                None if self.buf.len() > self.max_frame_len => {
                    let discarded = self.buf.len();
                    self.buf.clear();
                    self.scanned = 0;
                    self.discarding = true;
                    return Some(Extracted::Overflow { discarded });
                }
                None => {
                    self.scanned = self.buf.len();
                    return None;
                }
            }
        }
    }

    /// Drain every complete frame currently buffered, in FIFO order.
    pub fn extract_frames(&mut self) -> Vec<Extracted> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }
}
