//! Accessors for LV2 patch messages.
//!
//! Plugins report property changes as patch:Set (one property) or patch:Put
//! (an object of properties) atoms on their event outputs; these pure
//! parsers pull the pieces out for the UI update path.

use std::fmt;

use crate::atom::{AtomRef, ObjectRef};
use crate::mapper::Urid;
use crate::urids::Urids;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchError {
    /// patch:Set message with no property.
    NoProperty,
    /// patch:Set property is not a URID.
    PropertyNotUrid,
    /// patch:Set message with no value.
    NoValue,
    /// patch:Put message with no body.
    NoBody,
    /// patch:Put body is not an object.
    BodyNotObject,
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            PatchError::NoProperty => "patch:Set message with no property",
            PatchError::PropertyNotUrid => "patch:Set property is not a URID",
            PatchError::NoValue => "patch:Set message with no value",
            PatchError::NoBody => "patch:Put message with no body",
            PatchError::BodyNotObject => "patch:Put body is not an object",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for PatchError {}

/// Get the property URID and value from a patch:Set object.
pub fn patch_set_get<'a>(
    urids: &Urids,
    obj: &ObjectRef<'a>,
) -> Result<(Urid, AtomRef<'a>), PatchError> {
    let property = obj
        .get(urids.patch_property)
        .ok_or(PatchError::NoProperty)?;
    if property.ty != urids.atom_urid {
        return Err(PatchError::PropertyNotUrid);
    }
    let key = property.body_u32().ok_or(PatchError::PropertyNotUrid)?;

    let value = obj.get(urids.patch_value).ok_or(PatchError::NoValue)?;
    Ok((key, value))
}

/// Get the body object from a patch:Put object.
pub fn patch_put_get<'a>(
    urids: &Urids,
    obj: &ObjectRef<'a>,
) -> Result<ObjectRef<'a>, PatchError> {
    let body = obj.get(urids.patch_body).ok_or(PatchError::NoBody)?;
    body.as_object(urids).ok_or(PatchError::BodyNotObject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{forge_patch_set, AtomRef, Forge};
    use crate::mapper::Mapper;

    fn urids() -> Urids {
        Urids::new(&Mapper::new())
    }

    #[test]
    fn set_accessor_extracts_property_and_value() {
        let urids = urids();
        let mut buf = [0u8; 128];
        let len = forge_patch_set(&mut buf, &urids, 77, urids.atom_int, &9i32.to_ne_bytes())
            .unwrap();

        let atom = AtomRef::parse(&buf[..len]).unwrap();
        let obj = atom.as_object(&urids).unwrap();
        let (key, value) = patch_set_get(&urids, &obj).unwrap();
        assert_eq!(key, 77);
        assert_eq!(value.ty, urids.atom_int);
        assert_eq!(value.body_i32(), Some(9));
    }

    #[test]
    fn set_accessor_rejects_non_urid_property() {
        let urids = urids();
        let mut buf = [0u8; 128];
        let mut forge = Forge::new(&mut buf, &urids);
        let frame = forge.begin_object(urids.patch_set).unwrap();
        forge.key(urids.patch_property).unwrap();
        forge.write_int(77).unwrap(); // wrong type
        forge.end_object(frame);
        let len = forge.offset();

        let atom = AtomRef::parse(&buf[..len]).unwrap();
        let obj = atom.as_object(&urids).unwrap();
        assert_eq!(
            patch_set_get(&urids, &obj),
            Err(PatchError::PropertyNotUrid)
        );
    }

    #[test]
    fn put_accessor_returns_the_body_object() {
        let urids = urids();
        let mut inner = [0u8; 64];
        let inner_len = {
            let mut forge = Forge::new(&mut inner, &urids);
            let frame = forge.begin_object(0).unwrap();
            forge.key(55).unwrap();
            forge.write_float(1.5).unwrap();
            forge.end_object(frame);
            forge.offset()
        };

        let mut buf = [0u8; 128];
        let len = {
            let mut forge = Forge::new(&mut buf, &urids);
            let frame = forge.begin_object(urids.patch_put).unwrap();
            forge.key(urids.patch_body).unwrap();
            // Re-emit the inner object as a raw atom
            let inner_atom = AtomRef::parse(&inner[..inner_len]).unwrap();
            forge.write_atom(inner_atom.ty, inner_atom.body).unwrap();
            forge.end_object(frame);
            forge.offset()
        };

        let atom = AtomRef::parse(&buf[..len]).unwrap();
        let obj = atom.as_object(&urids).unwrap();
        let body = patch_put_get(&urids, &obj).unwrap();

        let props: Vec<(u32, f32)> = body
            .properties()
            .map(|(k, v)| (k, v.body_f32().unwrap()))
            .collect();
        assert_eq!(props, vec![(55, 1.5)]);
    }

    #[test]
    fn put_accessor_rejects_missing_body() {
        let urids = urids();
        let mut buf = [0u8; 64];
        let len = {
            let mut forge = Forge::new(&mut buf, &urids);
            let frame = forge.begin_object(urids.patch_put).unwrap();
            forge.end_object(frame);
            forge.offset()
        };

        let atom = AtomRef::parse(&buf[..len]).unwrap();
        let obj = atom.as_object(&urids).unwrap();
        assert_eq!(patch_put_get(&urids, &obj), Err(PatchError::NoBody));
    }
}
