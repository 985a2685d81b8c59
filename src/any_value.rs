//! A compact variant for carrying one typed control value.
//!
//! Frontends and the state machinery pass control and property values around
//! as an [`AnyValue`]: a value type URID plus the raw body bytes. Bodies up
//! to one machine word are stored inline; larger bodies (strings, paths) go
//! to the heap. The all-zero value is the null value.

use crate::mapper::Urid;
use crate::urids::Urids;

const INLINE: usize = std::mem::size_of::<usize>();

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Inline { len: u8, bytes: [u8; INLINE] },
    Heap(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnyValue {
    ty: Urid,
    body: Body,
}

impl Default for AnyValue {
    fn default() -> Self {
        Self {
            ty: 0,
            body: Body::Inline {
                len: 0,
                bytes: [0; INLINE],
            },
        }
    }
}

impl AnyValue {
    /// The null value.
    pub fn null() -> Self {
        Self::default()
    }

    pub fn new(ty: Urid, body: &[u8]) -> Self {
        let mut value = Self::default();
        value.set(ty, body);
        value
    }

    pub fn from_float(urids: &Urids, value: f32) -> Self {
        Self::new(urids.atom_float, &value.to_ne_bytes())
    }

    pub fn from_int(urids: &Urids, value: i32) -> Self {
        Self::new(urids.atom_int, &value.to_ne_bytes())
    }

    pub fn from_string(urids: &Urids, value: &str) -> Self {
        let mut body = value.as_bytes().to_vec();
        body.push(0);
        Self::new(urids.atom_string, &body)
    }

    pub fn is_null(&self) -> bool {
        self.ty == 0 && self.size() == 0
    }

    pub fn ty(&self) -> Urid {
        self.ty
    }

    pub fn size(&self) -> u32 {
        match &self.body {
            Body::Inline { len, .. } => *len as u32,
            Body::Heap(vec) => vec.len() as u32,
        }
    }

    /// The raw value body.
    pub fn data(&self) -> &[u8] {
        match &self.body {
            Body::Inline { len, bytes } => &bytes[..*len as usize],
            Body::Heap(vec) => vec,
        }
    }

    /// Replace the stored value, reusing the heap allocation when one is
    /// already large enough.
    pub fn set(&mut self, ty: Urid, body: &[u8]) {
        self.ty = ty;
        if body.len() <= INLINE {
            let mut bytes = [0u8; INLINE];
            bytes[..body.len()].copy_from_slice(body);
            self.body = Body::Inline {
                len: body.len() as u8,
                bytes,
            };
        } else if let Body::Heap(vec) = &mut self.body {
            vec.clear();
            vec.extend_from_slice(body);
        } else {
            self.body = Body::Heap(body.to_vec());
        }
    }

    /// Reset to the null value, releasing any heap storage.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Interpret a numeric or boolean value as a double, defaulting to zero.
    pub fn number(&self, urids: &Urids) -> f64 {
        let data = self.data();
        if self.ty == urids.atom_float && data.len() >= 4 {
            f32::from_ne_bytes(data[..4].try_into().unwrap()) as f64
        } else if self.ty == urids.atom_double && data.len() >= 8 {
            f64::from_ne_bytes(data[..8].try_into().unwrap())
        } else if (self.ty == urids.atom_int || self.ty == urids.atom_bool) && data.len() >= 4 {
            i32::from_ne_bytes(data[..4].try_into().unwrap()) as f64
        } else if self.ty == urids.atom_long && data.len() >= 8 {
            i64::from_ne_bytes(data[..8].try_into().unwrap()) as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::Mapper;

    fn urids() -> Urids {
        Urids::new(&Mapper::new())
    }

    #[test]
    fn small_values_stay_inline() {
        let urids = urids();
        let value = AnyValue::from_float(&urids, 1.5);
        assert_eq!(value.size(), 4);
        assert_eq!(value.data(), &1.5f32.to_ne_bytes());
        assert_eq!(value.number(&urids), 1.5);
        assert!(matches!(value.body, Body::Inline { .. }));
    }

    #[test]
    fn large_values_go_to_the_heap_and_grow() {
        let urids = urids();
        let mut value = AnyValue::from_string(&urids, "a rather long path");
        assert!(matches!(value.body, Body::Heap(_)));
        assert_eq!(value.data().last(), Some(&0u8));

        value.set(urids.atom_string, b"an even longer path than before\0");
        assert_eq!(value.size(), 32);
        assert_eq!(value.ty(), urids.atom_string);
    }

    #[test]
    fn null_round_trip() {
        let urids = urids();
        let mut value = AnyValue::from_int(&urids, 42);
        assert_eq!(value.number(&urids), 42.0);
        assert!(!value.is_null());

        value.reset();
        assert!(value.is_null());
        assert_eq!(value.data(), &[] as &[u8]);
        assert_eq!(value.number(&urids), 0.0);
    }
}
