//! Byte-level LV2 atom support.
//!
//! Atoms are the typed values exchanged with the plugin: a `{size, type}`
//! header followed by `size` bytes of body, with everything aligned to eight
//! bytes. The full serializer lives outside the host core; this module
//! provides only what the core itself needs: parsing atoms and atom objects
//! out of byte buffers, and a small [`Forge`] for building the handful of
//! messages the host originates (patch:Get, patch:Set, time:Position).
//!
//! All layout is native-endian, matching what a plugin built for this machine
//! expects through its port buffers.

use std::fmt;

use crate::mapper::Urid;
use crate::urids::Urids;

/// Alignment of every atom, in bytes.
pub const ALIGN: usize = 8;

/// Size of the `{u32 size, u32 type}` atom header.
pub const HEADER_SIZE: usize = 8;

/// Round `size` up to the next multiple of the atom alignment.
pub fn pad_size(size: u32) -> u32 {
    (size + 7) & !7
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgeError {
    /// The output buffer is too small for the value being written.
    Overflow,
}

impl fmt::Display for ForgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForgeError::Overflow => f.write_str("forge buffer overflow"),
        }
    }
}

impl std::error::Error for ForgeError {}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_ne_bytes(
        bytes.get(at..at + 4)?.try_into().ok()?,
    ))
}

/// A borrowed view of one atom inside a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtomRef<'a> {
    pub ty: Urid,
    pub body: &'a [u8],
}

impl<'a> AtomRef<'a> {
    /// Parse an atom from the start of `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        let size = read_u32(bytes, 0)? as usize;
        let ty = read_u32(bytes, 4)?;
        let body = bytes.get(HEADER_SIZE..HEADER_SIZE + size)?;
        Some(Self { ty, body })
    }

    pub fn size(&self) -> u32 {
        self.body.len() as u32
    }

    /// Header plus body, without trailing padding.
    pub fn total_size(&self) -> u32 {
        HEADER_SIZE as u32 + self.size()
    }

    pub fn body_u32(&self) -> Option<u32> {
        read_u32(self.body, 0)
    }

    pub fn body_i32(&self) -> Option<i32> {
        Some(i32::from_ne_bytes(self.body.get(0..4)?.try_into().ok()?))
    }

    pub fn body_i64(&self) -> Option<i64> {
        Some(i64::from_ne_bytes(self.body.get(0..8)?.try_into().ok()?))
    }

    pub fn body_f32(&self) -> Option<f32> {
        Some(f32::from_ne_bytes(self.body.get(0..4)?.try_into().ok()?))
    }

    pub fn body_f64(&self) -> Option<f64> {
        Some(f64::from_ne_bytes(self.body.get(0..8)?.try_into().ok()?))
    }

    /// View this atom as an object, if it has the object type and a sound
    /// object header.
    pub fn as_object(&self, urids: &Urids) -> Option<ObjectRef<'a>> {
        if self.ty != urids.atom_object {
            return None;
        }
        ObjectRef::from_body(self.body)
    }
}

/// A borrowed view of an atom object: `{id, otype}` followed by properties.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectRef<'a> {
    pub id: u32,
    pub otype: Urid,
    props: &'a [u8],
}

impl<'a> ObjectRef<'a> {
    /// Interpret an object *body* (the bytes after the atom header).
    pub fn from_body(body: &'a [u8]) -> Option<Self> {
        Some(Self {
            id: read_u32(body, 0)?,
            otype: read_u32(body, 4)?,
            props: body.get(8..)?,
        })
    }

    /// Iterate the object's `(key, value)` properties in order.
    pub fn properties(&self) -> PropertyIter<'a> {
        PropertyIter {
            bytes: self.props,
            at: 0,
        }
    }

    /// The value of the first property with `key`, if present.
    pub fn get(&self, key: Urid) -> Option<AtomRef<'a>> {
        self.properties().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

/// Iterator over `{u32 key, u32 context, atom}` properties of an object.
pub struct PropertyIter<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Iterator for PropertyIter<'a> {
    type Item = (Urid, AtomRef<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let key = read_u32(self.bytes, self.at)?;
        let _context = read_u32(self.bytes, self.at + 4)?;
        let value = AtomRef::parse(&self.bytes[self.at + 8..])?;

        // Key/context header plus the padded value atom
        self.at += 8 + pad_size(value.total_size()) as usize;
        Some((key, value))
    }
}

/// An in-progress object; closed by [`Forge::end_object`], which patches the
/// atom size written at `start`.
#[derive(Debug)]
#[must_use]
pub struct ForgeFrame {
    start: usize,
}

/// A minimal atom writer over a caller-supplied buffer.
pub struct Forge<'a> {
    buf: &'a mut [u8],
    offset: usize,
    urids: Urids,
}

impl<'a> Forge<'a> {
    pub fn new(buf: &'a mut [u8], urids: &Urids) -> Self {
        Self {
            buf,
            offset: 0,
            urids: *urids,
        }
    }

    /// Bytes written so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The written prefix of the buffer.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.offset]
    }

    fn push(&mut self, bytes: &[u8]) -> Result<(), ForgeError> {
        let end = self.offset + bytes.len();
        if end > self.buf.len() {
            return Err(ForgeError::Overflow);
        }
        self.buf[self.offset..end].copy_from_slice(bytes);
        self.offset = end;
        Ok(())
    }

    fn pad(&mut self) -> Result<(), ForgeError> {
        while self.offset % ALIGN != 0 {
            self.push(&[0])?;
        }
        Ok(())
    }

    /// Write a complete atom: header, body, trailing padding.
    pub fn write_atom(&mut self, ty: Urid, body: &[u8]) -> Result<(), ForgeError> {
        self.push(&(body.len() as u32).to_ne_bytes())?;
        self.push(&ty.to_ne_bytes())?;
        self.push(body)?;
        self.pad()
    }

    pub fn write_int(&mut self, value: i32) -> Result<(), ForgeError> {
        self.write_atom(self.urids.atom_int, &value.to_ne_bytes())
    }

    pub fn write_long(&mut self, value: i64) -> Result<(), ForgeError> {
        self.write_atom(self.urids.atom_long, &value.to_ne_bytes())
    }

    pub fn write_float(&mut self, value: f32) -> Result<(), ForgeError> {
        self.write_atom(self.urids.atom_float, &value.to_ne_bytes())
    }

    pub fn write_double(&mut self, value: f64) -> Result<(), ForgeError> {
        self.write_atom(self.urids.atom_double, &value.to_ne_bytes())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), ForgeError> {
        self.write_atom(self.urids.atom_bool, &(value as i32).to_ne_bytes())
    }

    pub fn write_urid(&mut self, value: Urid) -> Result<(), ForgeError> {
        self.write_atom(self.urids.atom_urid, &value.to_ne_bytes())
    }

    /// Write a string atom. The stored body includes the terminating NUL.
    pub fn write_string(&mut self, value: &str) -> Result<(), ForgeError> {
        self.write_terminated(self.urids.atom_string, value)
    }

    /// Write a path atom. The stored body includes the terminating NUL.
    pub fn write_path(&mut self, value: &str) -> Result<(), ForgeError> {
        self.write_terminated(self.urids.atom_path, value)
    }

    fn write_terminated(&mut self, ty: Urid, value: &str) -> Result<(), ForgeError> {
        self.push(&(value.len() as u32 + 1).to_ne_bytes())?;
        self.push(&ty.to_ne_bytes())?;
        self.push(value.as_bytes())?;
        self.push(&[0])?;
        self.pad()
    }

    /// Open an object atom with the given object type.
    pub fn begin_object(&mut self, otype: Urid) -> Result<ForgeFrame, ForgeError> {
        let start = self.offset;
        self.push(&8u32.to_ne_bytes())?; // body size so far: just {id, otype}
        self.push(&self.urids.atom_object.to_ne_bytes())?;
        self.push(&0u32.to_ne_bytes())?; // id
        self.push(&otype.to_ne_bytes())?;
        Ok(ForgeFrame { start })
    }

    /// Write a property key inside an open object. The next atom written is
    /// the property's value.
    pub fn key(&mut self, key: Urid) -> Result<(), ForgeError> {
        self.push(&key.to_ne_bytes())?;
        self.push(&0u32.to_ne_bytes()) // context
    }

    /// Close an object, fixing up its size header.
    pub fn end_object(&mut self, frame: ForgeFrame) {
        let size = (self.offset - frame.start - HEADER_SIZE) as u32;
        self.buf[frame.start..frame.start + 4].copy_from_slice(&size.to_ne_bytes());
    }
}

/// Build the 16-byte `patch:Get` object the process thread injects on a
/// state request.
pub fn patch_get_atom(urids: &Urids) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let mut forge = Forge::new(&mut buf, urids);
    let frame = forge.begin_object(urids.patch_get).expect("fits");
    forge.end_object(frame);
    buf
}

/// Forge a `patch:Set` object assigning `(ty, body)` to `property`. Returns
/// the number of bytes written.
pub fn forge_patch_set(
    buf: &mut [u8],
    urids: &Urids,
    property: Urid,
    ty: Urid,
    body: &[u8],
) -> Result<usize, ForgeError> {
    let mut forge = Forge::new(buf, urids);
    let frame = forge.begin_object(urids.patch_set)?;
    forge.key(urids.patch_property)?;
    forge.write_urid(property)?;
    forge.key(urids.patch_value)?;
    forge.write_atom(ty, body)?;
    forge.end_object(frame);
    Ok(forge.offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::Mapper;

    fn urids() -> Urids {
        Urids::new(&Mapper::new())
    }

    #[test]
    fn primitives_are_padded_to_eight() {
        let urids = urids();
        let mut buf = [0u8; 64];
        let mut forge = Forge::new(&mut buf, &urids);

        forge.write_int(7).unwrap();
        assert_eq!(forge.offset(), 16);
        forge.write_long(-1).unwrap();
        assert_eq!(forge.offset(), 32);
        forge.write_string("abc").unwrap();
        assert_eq!(forge.offset(), 48); // 8 header + 4 body-with-nul, padded

        let atom = AtomRef::parse(forge.bytes()).unwrap();
        assert_eq!(atom.ty, urids.atom_int);
        assert_eq!(atom.body_i32(), Some(7));
    }

    #[test]
    fn patch_set_round_trips() {
        let urids = urids();
        let property = 99u32;
        let value = 0.25f32;

        let mut buf = [0u8; 128];
        let len =
            forge_patch_set(&mut buf, &urids, property, urids.atom_float, &value.to_ne_bytes())
                .unwrap();

        let atom = AtomRef::parse(&buf[..len]).unwrap();
        assert_eq!(atom.total_size() as usize, len);
        let obj = atom.as_object(&urids).unwrap();
        assert_eq!(obj.otype, urids.patch_set);

        let prop = obj.get(urids.patch_property).unwrap();
        assert_eq!(prop.ty, urids.atom_urid);
        assert_eq!(prop.body_u32(), Some(property));

        let val = obj.get(urids.patch_value).unwrap();
        assert_eq!(val.ty, urids.atom_float);
        assert_eq!(val.body_f32(), Some(value));

        let keys: Vec<u32> = obj.properties().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![urids.patch_property, urids.patch_value]);
    }

    #[test]
    fn patch_get_is_an_empty_object() {
        let urids = urids();
        let bytes = patch_get_atom(&urids);

        let atom = AtomRef::parse(&bytes).unwrap();
        assert_eq!(atom.size(), 8);
        let obj = atom.as_object(&urids).unwrap();
        assert_eq!(obj.otype, urids.patch_get);
        assert_eq!(obj.properties().count(), 0);
    }

    #[test]
    fn overflow_is_reported() {
        let urids = urids();
        let mut buf = [0u8; 12];
        let mut forge = Forge::new(&mut buf, &urids);
        assert_eq!(forge.write_long(1), Err(ForgeError::Overflow));
    }
}
