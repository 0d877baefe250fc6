//! ---
//! hmi_section: "02-messaging-wire-protocol"
//! hmi_subsection: "module"
//! hmi_type: "source"
//! hmi_scope: "code"
//! hmi_description: "Wire protocol helpers for the telemetry link."
//! hmi_version: "v0.0.0-prealpha"
//! hmi_owner: "tbd"
//! ---
use hmi_link_msg::{
    decode, encode, AggregateStats, DecodeError, DeviceControl, Extracted, FanSpeed,
    MessageKind, ReceiveBuffer, TERMINATOR,
};
use serde_json::json;

fn decode_all(buffer: &mut ReceiveBuffer) -> Vec<Result<hmi_link_msg::Frame, DecodeError>> {
    buffer
        .extract_frames()
        .into_iter()
        .filter_map(|item| match item {
            Extracted::Frame(payload) => Some(decode(&payload)),
            Extracted::Overflow { .. } => None,
        })
        .collect()
}

#[test]
fn malformed_frame_does_not_poison_its_neighbours() -> anyhow::Result<()> {
    let mut wire = Vec::new();
    wire.extend_from_slice(&encode(
        &MessageKind::NotifyToFrontend,
        &json!({"device-sn": "tank-1", "water-amount": 40.0}),
    )?);
    wire.extend_from_slice(b"garbage without separator");
    wire.push(TERMINATOR);
    wire.extend_from_slice(b"BF01|notify-to-frontend|0|1${broken json");
    wire.push(TERMINATOR);
    wire.extend_from_slice(&encode(
        &MessageKind::NotifyToFrontend,
        &json!({"device-sn": "stats", "coal-1": [1.0], "coal-2": [2.0], "w-used": [], "e-used": [3.0]}),
    )?);

    for chunk_len in [1, 3, 7, 64, wire.len()] {
        let mut buffer = ReceiveBuffer::default();
        let mut results = Vec::new();
        for chunk in wire.chunks(chunk_len) {
            buffer.append(chunk);
            results.extend(decode_all(&mut buffer));
        }
        assert_eq!(results.len(), 4, "chunk length {chunk_len}");
        assert_eq!(
            results[0].as_ref().expect("first frame").device_id(),
            Some("tank-1")
        );
        assert!(matches!(results[1], Err(DecodeError::MalformedFrame)));
        assert!(matches!(results[2], Err(DecodeError::InvalidBody(_))));
        let stats = results[3].as_ref().expect("last frame");
        let parsed: AggregateStats = serde_json::from_value(stats.body.clone())?;
        assert_eq!(parsed.energy_used, vec![3.0]);
        assert_eq!(buffer.pending(), 0);
    }
    Ok(())
}

#[test]
fn control_command_survives_the_wire() -> anyhow::Result<()> {
    let command = DeviceControl::set_fan_speed("fan-12", FanSpeed::High);
    let bytes = encode(&MessageKind::DeviceControl, &command)?;

    let mut buffer = ReceiveBuffer::default();
    buffer.append(&bytes);
    let frames = decode_all(&mut buffer);
    assert_eq!(frames.len(), 1);
    let frame = frames.into_iter().next().expect("one frame")?;
    assert_eq!(frame.kind, MessageKind::DeviceControl);
    let back: DeviceControl = serde_json::from_value(frame.body)?;
    assert_eq!(back, command);
    Ok(())
}
