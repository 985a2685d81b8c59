//! Messages between the audio and main threads.
//!
//! Every message on a communication ring is a `{u32 kind, u32 size}` header
//! followed by exactly `size` bytes of body, all native-endian. Writers use
//! ring transactions so a header is never visible without its body.

use crate::mapper::Urid;
use crate::ring::{RingError, RingWriter};
use crate::types::RunState;

/// Message kinds on the communication rings.
pub mod kind {
    pub const NO_MESSAGE: u32 = 0;
    /// Body: `{u32 port_index, f32 value}`.
    pub const CONTROL_PORT_CHANGE: u32 = 1;
    /// Body: `{u32 port_index, u32 atom_size, u32 atom_type, u8 body[atom_size]}`.
    pub const EVENT_TRANSFER: u32 = 2;
    /// Body: `{u32 frames}`.
    pub const LATENCY_CHANGE: u32 = 3;
    /// Empty body.
    pub const STATE_REQUEST: u32 = 4;
    /// Body: `{u32 state}`.
    pub const RUN_STATE_CHANGE: u32 = 5;
}

/// The fixed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub kind: u32,
    pub size: u32,
}

/// Size of the encoded header in bytes.
pub const HEADER_SIZE: u32 = 8;

impl MessageHeader {
    pub fn to_bytes(self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&self.kind.to_ne_bytes());
        bytes[4..].copy_from_slice(&self.size.to_ne_bytes());
        bytes
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            kind: u32::from_ne_bytes(bytes[..4].try_into().unwrap()),
            size: u32::from_ne_bytes(bytes[4..].try_into().unwrap()),
        }
    }
}

/// Write a message in two parts, atomically from the reader's view.
pub fn write_split_message(
    target: &mut RingWriter,
    header: &[u8],
    body: &[u8],
) -> Result<(), RingError> {
    let mut tx = target.begin_write();
    target.amend_write(&mut tx, header)?;
    target.amend_write(&mut tx, body)?;
    target.commit_write(tx);
    Ok(())
}

/// Write a control port change using the default (0) protocol.
pub fn write_control(
    target: &mut RingWriter,
    port_index: u32,
    value: f32,
) -> Result<(), RingError> {
    let mut msg = [0u8; 16];
    msg[..8].copy_from_slice(
        &MessageHeader {
            kind: kind::CONTROL_PORT_CHANGE,
            size: 8,
        }
        .to_bytes(),
    );
    msg[8..12].copy_from_slice(&port_index.to_ne_bytes());
    msg[12..].copy_from_slice(&value.to_ne_bytes());
    target.write(&msg)
}

/// Write a port event using the atom:eventTransfer protocol.
///
/// `protocol` is part of the port-event contract and carried for symmetry
/// with the UI write path; the ring encoding does not store it.
pub fn write_event(
    target: &mut RingWriter,
    port_index: u32,
    protocol: u32,
    ty: Urid,
    body: &[u8],
) -> Result<(), RingError> {
    let _ = protocol;

    let mut header = [0u8; 20];
    header[..8].copy_from_slice(
        &MessageHeader {
            kind: kind::EVENT_TRANSFER,
            size: 12 + body.len() as u32,
        }
        .to_bytes(),
    );
    header[8..12].copy_from_slice(&port_index.to_ne_bytes());
    header[12..16].copy_from_slice(&(body.len() as u32).to_ne_bytes());
    header[16..20].copy_from_slice(&ty.to_ne_bytes());
    write_split_message(target, &header, body)
}

/// Notify the UI of a plugin latency change.
pub fn write_latency(target: &mut RingWriter, frames: u32) -> Result<(), RingError> {
    let mut msg = [0u8; 12];
    msg[..8].copy_from_slice(
        &MessageHeader {
            kind: kind::LATENCY_CHANGE,
            size: 4,
        }
        .to_bytes(),
    );
    msg[8..].copy_from_slice(&frames.to_ne_bytes());
    target.write(&msg)
}

/// Ask the process thread to inject a patch:Get next cycle.
pub fn write_state_request(target: &mut RingWriter) -> Result<(), RingError> {
    target.write(
        &MessageHeader {
            kind: kind::STATE_REQUEST,
            size: 0,
        }
        .to_bytes(),
    )
}

/// Ask the process thread to change its run state.
pub fn write_run_state(target: &mut RingWriter, state: RunState) -> Result<(), RingError> {
    let mut msg = [0u8; 12];
    msg[..8].copy_from_slice(
        &MessageHeader {
            kind: kind::RUN_STATE_CHANGE,
            size: 4,
        }
        .to_bytes(),
    );
    msg[8..].copy_from_slice(&state.to_wire().to_ne_bytes());
    target.write(&msg)
}

/// Decode a CONTROL_PORT_CHANGE body.
pub fn parse_control(body: &[u8]) -> Option<(u32, f32)> {
    if body.len() != 8 {
        return None;
    }
    Some((
        u32::from_ne_bytes(body[..4].try_into().unwrap()),
        f32::from_ne_bytes(body[4..].try_into().unwrap()),
    ))
}

/// Decode an EVENT_TRANSFER body into `(port_index, atom_type, atom_body)`.
pub fn parse_event_transfer(body: &[u8]) -> Option<(u32, Urid, &[u8])> {
    if body.len() < 12 {
        return None;
    }
    let port_index = u32::from_ne_bytes(body[..4].try_into().unwrap());
    let size = u32::from_ne_bytes(body[4..8].try_into().unwrap()) as usize;
    let ty = u32::from_ne_bytes(body[8..12].try_into().unwrap());
    let atom_body = body.get(12..12 + size)?;
    if 12 + size != body.len() {
        return None;
    }
    Some((port_index, ty, atom_body))
}

/// Decode a LATENCY_CHANGE body.
pub fn parse_latency(body: &[u8]) -> Option<u32> {
    Some(u32::from_ne_bytes(body.get(..4)?.try_into().ok()?))
}

/// Decode a RUN_STATE_CHANGE body.
pub fn parse_run_state(body: &[u8]) -> Option<RunState> {
    RunState::from_wire(u32::from_ne_bytes(body.get(..4)?.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring;

    #[test]
    fn control_change_is_byte_exact() {
        let (mut tx, mut rx) = ring::new(64);
        write_control(&mut tx, 5, 0.75).unwrap();

        let mut header = [0u8; 8];
        rx.read(&mut header).unwrap();
        let header = MessageHeader::from_bytes(header);
        assert_eq!(header.kind, kind::CONTROL_PORT_CHANGE);
        assert_eq!(header.size, 8);

        let mut body = [0u8; 8];
        rx.read(&mut body).unwrap();
        assert_eq!(parse_control(&body), Some((5, 0.75)));
    }

    #[test]
    fn event_transfer_round_trips() {
        let (mut tx, mut rx) = ring::new(256);
        let atom_body = [1u8, 2, 3, 4, 5];
        write_event(&mut tx, 9, 0, 42, &atom_body).unwrap();

        let mut header = [0u8; 8];
        rx.read(&mut header).unwrap();
        let header = MessageHeader::from_bytes(header);
        assert_eq!(header.kind, kind::EVENT_TRANSFER);
        assert_eq!(header.size, 12 + 5);

        let mut body = vec![0u8; header.size as usize];
        rx.read(&mut body).unwrap();
        let (port, ty, parsed) = parse_event_transfer(&body).unwrap();
        assert_eq!((port, ty), (9, 42));
        assert_eq!(parsed, &atom_body);
    }

    #[test]
    fn state_messages_round_trip() {
        let (mut tx, mut rx) = ring::new(64);
        write_state_request(&mut tx).unwrap();
        write_run_state(&mut tx, RunState::Paused).unwrap();
        write_latency(&mut tx, 512).unwrap();

        let mut header = [0u8; 8];
        rx.read(&mut header).unwrap();
        assert_eq!(
            MessageHeader::from_bytes(header),
            MessageHeader {
                kind: kind::STATE_REQUEST,
                size: 0
            }
        );

        rx.read(&mut header).unwrap();
        let header2 = MessageHeader::from_bytes(header);
        assert_eq!(header2.kind, kind::RUN_STATE_CHANGE);
        let mut body = [0u8; 4];
        rx.read(&mut body).unwrap();
        assert_eq!(parse_run_state(&body), Some(RunState::Paused));

        rx.read(&mut header).unwrap();
        let header3 = MessageHeader::from_bytes(header);
        assert_eq!(header3.kind, kind::LATENCY_CHANGE);
        rx.read(&mut body).unwrap();
        assert_eq!(parse_latency(&body), Some(512));
    }

    #[test]
    fn overflowing_event_leaves_ring_clean() {
        let (mut tx, rx) = ring::new(32);
        let big = [0u8; 64];
        assert!(write_event(&mut tx, 0, 0, 1, &big).is_err());
        assert_eq!(rx.read_space(), 0);
    }
}
