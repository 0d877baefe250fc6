//! ---
//! hmi_section: "02-messaging-wire-protocol"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Wire protocol helpers for the telemetry link."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
//! Wire protocol for the HMI telemetry link.
//!
//! A frame on the wire looks like
//!
//! ```text
//! BF01|notify-to-frontend|0|1695899578730990${"device-sn":"aaaa0001","CO":0.05}\x04
//! ```
//!
//! The header is four `|`-separated ASCII fields, `$` separates header and
//! JSON body, and a single `0x04` byte terminates the frame. This crate does no
//! I/O; the client crate owns sockets.
#![warn(missing_docs)]

pub mod buffer;
pub mod frame;
pub mod kind;
pub mod payload;
pub mod sequence;

/// Protocol revision tag written into every outbound header.
pub const PROTOCOL_VERSION: &str = "BF01";

/// Separator between header fields.
pub const FIELD_DELIMITER: u8 = b'|';

/// Separator between the header and the JSON body.
pub const BODY_SEPARATOR: u8 = b'$';

/// Byte terminating every frame. Never valid inside a header, and JSON
/// encoders escape it inside string values.
pub const TERMINATOR: u8 = 0x04;

/// Resend flag written on outbound frames. Reserved by the protocol.
pub const RESEND_FLAG_NONE: u32 = 0;

/// Errors raised while decoding a single frame payload.
///
/// A decode failure only ever affects the frame it was raised for.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not valid UTF-8 text.
    #[error("frame is not valid text: {0}")]
    NotText(#[from] std::str::Utf8Error),
    /// The payload has no `$` separator between header and body.
    #[error("malformed frame: missing header/body separator")]
    MalformedFrame,
    /// The header does not split into exactly four fields.
    #[error("malformed header: expected 4 fields, found {fields}")]
    MalformedHeader {
        /// Number of fields found in the header.
        fields: usize,
    },
    /// The resend flag is not an unsigned integer.
    #[error("malformed header: resend flag {0:?} is not an integer")]
    InvalidResendFlag(String),
    /// The body is not valid JSON.
    #[error("invalid body: {0}")]
    InvalidBody(#[source] serde_json::Error),
}

/// Errors raised while encoding an outbound frame.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// A header field (usually the message type) would corrupt the header.
    #[error("{0:?} is not a valid header field")]
    InvalidHeaderField(String),
    /// The body could not be serialised to JSON.
    #[error("body serialization failed: {0}")]
    Body(#[from] serde_json::Error),
}

pub use buffer::{Extracted, ReceiveBuffer, DEFAULT_MAX_FRAME_LEN};
pub use frame::{decode, encode, Frame};
pub use kind::MessageKind;
pub use payload::{
    AggregateStats, DeviceControl, FanSpeed, GasReading, InvalidFanSpeed, TemperatureReading,
    WaterFlow, WaterLevel, WindSpeed,
};
pub use sequence::SequenceTokens;

/// Body field carrying the device identifier used for routing.
pub const DEVICE_ID_FIELD: &str = "device-sn";

/// Reserved device identifier addressing the aggregate statistics subscriber.
pub const AGGREGATE_DEVICE_ID: &str = "stats";
