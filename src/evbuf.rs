//! Fixed-capacity atom event buffers for plugin event ports.
//!
//! An [`Evbuf`] owns the memory connected to an event (atom sequence) port:
//! a sequence atom header, a sequence body header, then time-stamped events,
//! everything 8-byte aligned. Input buffers are reset to an empty sequence
//! each cycle and filled by the host; output buffers are reset to a chunk
//! atom whose size advertises the writable capacity, per the LV2 convention,
//! and rewritten by the plugin during `run()`.

use std::os::raw::c_void;

use crate::atom::pad_size;
use crate::mapper::Urid;

/// Atom header (8) plus sequence body header (8).
const SEQ_HEADER: u32 = 16;

/// Event header: `i64` frame time plus the event's atom header.
const EVENT_HEADER: u32 = 16;

pub struct Evbuf {
    /// Backing storage, `u64`-aligned. First 16 bytes are the sequence
    /// headers, the rest is event contents.
    buf: Box<[u64]>,
    /// Bytes available for event contents.
    capacity: u32,
    atom_chunk: Urid,
    atom_sequence: Urid,
}

/// One event read out of a buffer.
#[derive(Debug, Clone, Copy)]
pub struct EventRef<'a> {
    pub frames: u32,
    pub subframes: u32,
    pub ty: Urid,
    pub body: &'a [u8],
}

impl Evbuf {
    /// Allocate a buffer with `capacity` bytes of event contents.
    pub fn new(capacity: u32, atom_chunk: Urid, atom_sequence: Urid) -> Self {
        let words = ((SEQ_HEADER + capacity) as usize + 7) / 8;
        let mut evbuf = Self {
            buf: vec![0u64; words].into_boxed_slice(),
            capacity,
            atom_chunk,
            atom_sequence,
        };
        evbuf.reset(true);
        evbuf
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.buf.as_ptr() as *const u8, self.buf.len() * 8) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(self.buf.as_mut_ptr() as *mut u8, self.buf.len() * 8)
        }
    }

    fn read_u32(&self, at: usize) -> u32 {
        u32::from_ne_bytes(self.bytes()[at..at + 4].try_into().unwrap())
    }

    fn write_u32(&mut self, at: usize, value: u32) {
        self.bytes_mut()[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }

    /// The buffer to connect to the plugin port. Stable for the lifetime of
    /// the evbuf.
    pub fn as_ptr(&mut self) -> *mut c_void {
        self.buf.as_mut_ptr() as *mut c_void
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Prepare for a cycle: an empty sequence for input ports, a capacity
    /// marker chunk for output ports.
    pub fn reset(&mut self, input: bool) {
        if input {
            self.write_u32(0, 8);
            let ty = self.atom_sequence;
            self.write_u32(4, ty);
        } else {
            let size = self.capacity;
            self.write_u32(0, size);
            let ty = self.atom_chunk;
            self.write_u32(4, ty);
        }
        self.write_u32(8, 0); // unit: frames
        self.write_u32(12, 0); // pad
    }

    /// Bytes of event contents currently stored.
    pub fn len(&self) -> u32 {
        if self.read_u32(4) == self.atom_sequence {
            self.read_u32(0).saturating_sub(8)
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an event. Returns false when the event does not fit or the
    /// buffer is not currently a sequence.
    ///
    /// `subframes` is carried for interface compatibility; atom sequences
    /// store whole-frame times only.
    pub fn write(
        &mut self,
        frames: u32,
        subframes: u32,
        ty: Urid,
        data: &[u8],
    ) -> bool {
        let _ = subframes;
        if self.read_u32(4) != self.atom_sequence {
            return false;
        }

        let used = pad_size(self.len());
        let needed = EVENT_HEADER + pad_size(data.len() as u32);
        if self.capacity.saturating_sub(used) < needed {
            return false;
        }

        let at = (SEQ_HEADER + used) as usize;
        let time = (frames as i64).to_ne_bytes();
        self.bytes_mut()[at..at + 8].copy_from_slice(&time);
        self.write_u32(at + 8, data.len() as u32);
        self.write_u32(at + 12, ty);
        self.bytes_mut()[at + 16..at + 16 + data.len()].copy_from_slice(data);

        let size = self.read_u32(0) + needed;
        self.write_u32(0, size);
        true
    }

    /// Iterate the stored events in time order.
    pub fn iter(&self) -> EvbufIter<'_> {
        EvbufIter {
            evbuf: self,
            offset: 0,
        }
    }
}

pub struct EvbufIter<'a> {
    evbuf: &'a Evbuf,
    offset: u32,
}

impl<'a> Iterator for EvbufIter<'a> {
    type Item = EventRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let evbuf: &'a Evbuf = self.evbuf;
        if self.offset >= evbuf.len() {
            return None;
        }

        let at = (SEQ_HEADER + self.offset) as usize;
        let bytes = evbuf.bytes();
        let frames = i64::from_ne_bytes(bytes[at..at + 8].try_into().unwrap());
        let size = evbuf.read_u32(at + 8);
        let ty = evbuf.read_u32(at + 12);
        let body = bytes.get(at + 16..at + 16 + size as usize)?;

        self.offset += EVENT_HEADER + pad_size(size);
        Some(EventRef {
            frames: frames as u32,
            subframes: 0,
            ty,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: Urid = 1;
    const SEQUENCE: Urid = 2;
    const MIDI: Urid = 3;

    #[test]
    fn starts_empty_and_round_trips_events() {
        let mut evbuf = Evbuf::new(256, CHUNK, SEQUENCE);
        assert!(evbuf.is_empty());

        assert!(evbuf.write(0, 0, MIDI, &[0x90, 0x40, 0x7f]));
        assert!(evbuf.write(17, 0, MIDI, &[0x80, 0x40, 0x00]));

        let events: Vec<(u32, Urid, Vec<u8>)> = evbuf
            .iter()
            .map(|ev| (ev.frames, ev.ty, ev.body.to_vec()))
            .collect();
        assert_eq!(
            events,
            vec![
                (0, MIDI, vec![0x90, 0x40, 0x7f]),
                (17, MIDI, vec![0x80, 0x40, 0x00]),
            ]
        );
    }

    #[test]
    fn reset_clears_input_and_marks_output_capacity() {
        let mut evbuf = Evbuf::new(128, CHUNK, SEQUENCE);
        assert!(evbuf.write(0, 0, MIDI, &[1, 2, 3]));
        assert!(!evbuf.is_empty());

        evbuf.reset(true);
        assert!(evbuf.is_empty());
        assert_eq!(evbuf.iter().count(), 0);

        evbuf.reset(false);
        // Output buffers advertise their capacity as a chunk; nothing can be
        // appended by the host until the plugin rewrites the sequence.
        assert_eq!(evbuf.len(), 0);
        assert!(!evbuf.write(0, 0, MIDI, &[1]));
    }

    #[test]
    fn rejects_events_beyond_capacity() {
        let mut evbuf = Evbuf::new(40, CHUNK, SEQUENCE);

        // 16 bytes of event header + 8 padded body = 24, twice is 48 > 40
        assert!(evbuf.write(0, 0, MIDI, &[0u8; 8]));
        assert!(!evbuf.write(1, 0, MIDI, &[0u8; 8]));

        // The first event is intact
        assert_eq!(evbuf.iter().count(), 1);
    }

    #[test]
    fn events_are_eight_byte_aligned() {
        let mut evbuf = Evbuf::new(256, CHUNK, SEQUENCE);
        assert!(evbuf.write(1, 0, MIDI, &[1, 2, 3]));
        assert!(evbuf.write(2, 0, MIDI, &[4]));

        // 3-byte body padded to 8: second event starts at offset 24
        assert_eq!(evbuf.len(), 24 + 16 + 8);
        let frames: Vec<u32> = evbuf.iter().map(|ev| ev.frames).collect();
        assert_eq!(frames, vec![1, 2]);
    }
}
