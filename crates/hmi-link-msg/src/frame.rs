//! ---
//! hmi_section: "02-messaging-wire-protocol"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Wire protocol helpers for the telemetry link."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::sequence::SequenceTokens;
use crate::{
    DecodeError, EncodeError, MessageKind, BODY_SEPARATOR, DEVICE_ID_FIELD, FIELD_DELIMITER,
    PROTOCOL_VERSION, RESEND_FLAG_NONE, TERMINATOR,
};

const HEADER_FIELDS: usize = 4;

/// One decoded application message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Protocol revision tag from the header. Carried, never validated.
    pub version: String,
    /// Message type.
    pub kind: MessageKind,
    /// Reserved resend flag; always zero in current traffic.
    pub resend: u32,
    /// Per-message token. Carried only; the receiver neither dedupes nor
    /// orders by it.
    pub sequence: String,
    /// JSON body.
    pub body: JsonValue,
}

impl Frame {
    /// Build an outbound frame with the current protocol tag and a fresh
    /// sequence token.
    pub fn new(kind: MessageKind, body: JsonValue) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_owned(),
            kind,
            resend: RESEND_FLAG_NONE,
            sequence: SequenceTokens::global().next_token(),
            body,
        }
    }

    /// Device identifier carried in the body, if present and non-empty.
    pub fn device_id(&self) -> Option<&str> {
        self.body
            .get(DEVICE_ID_FIELD)
            .and_then(JsonValue::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Serialise every field of this frame, terminator included.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        write_frame(
            &self.version,
            self.kind.as_str(),
            self.resend,
            &self.sequence,
            &self.body,
        )
    }
}

/// Encode an outbound message: header with the current protocol tag, a zero
/// resend flag and a fresh sequence token, then the JSON body and terminator.
pub fn encode<T>(kind: &MessageKind, body: &T) -> Result<Bytes, EncodeError>
where
    T: Serialize + ?Sized,
{
    let sequence = SequenceTokens::global().next_token();
    write_frame(
        PROTOCOL_VERSION,
        kind.as_str(),
        RESEND_FLAG_NONE,
        &sequence,
        body,
    )
}

/// Decode one frame payload (terminator already stripped).
///
/// Unknown message types decode successfully as
/// [`MessageKind::Unrecognized`]; classification is left to the caller.
pub fn decode(payload: &[u8]) -> Result<Frame, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    let (header, body) = text
        .split_once(char::from(BODY_SEPARATOR))
        .ok_or(DecodeError::MalformedFrame)?;

    let fields: Vec<&str> = header.split(char::from(FIELD_DELIMITER)).collect();
    let [version, kind, resend, sequence] = fields[..] else {
        return Err(DecodeError::MalformedHeader {
            fields: fields.len(),
        });
    };
    let resend = resend
        .parse::<u32>()
        .map_err(|_| DecodeError::InvalidResendFlag(resend.to_owned()))?;
    let body = serde_json::from_str(body).map_err(DecodeError::InvalidBody)?;

    Ok(Frame {
        version: version.to_owned(),
        kind: MessageKind::from(kind),
        resend,
        sequence: sequence.to_owned(),
        body,
    })
}

fn write_frame<T>(
    version: &str,
    kind: &str,
    resend: u32,
    sequence: &str,
    body: &T,
) -> Result<Bytes, EncodeError>
where
    T: Serialize + ?Sized,
{
    for field in [version, kind, sequence] {
        check_header_field(field)?;
    }

    let resend = resend.to_string();
    let mut buf = BytesMut::with_capacity(
        version.len() + kind.len() + resend.len() + sequence.len() + HEADER_FIELDS + 64,
    );
    for (index, field) in [version, kind, resend.as_str(), sequence]
        .into_iter()
        .enumerate()
    {
        if index > 0 {
            buf.put_u8(FIELD_DELIMITER);
        }
        buf.put_slice(field.as_bytes());
    }
    buf.put_u8(BODY_SEPARATOR);

    // serde_json escapes every control character inside strings, so the
    // terminator can never appear in the body.
    let mut writer = buf.writer();
    serde_json::to_writer(&mut writer, body)?;
    let mut buf = writer.into_inner();
    buf.put_u8(TERMINATOR);
    Ok(buf.freeze())
}

fn check_header_field(field: &str) -> Result<(), EncodeError> {
    let valid = !field.is_empty()
        && field.bytes().all(|b| {
            b.is_ascii_graphic() && b != FIELD_DELIMITER && b != BODY_SEPARATOR
        });
    if valid {
        Ok(())
    } else {
        Err(EncodeError::InvalidHeaderField(field.to_owned()))
    }
}
