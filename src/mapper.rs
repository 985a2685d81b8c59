//! Thread-safe URI↔URID mapping.
//!
//! Wraps the [`Symap`] interner in a lock so the map can be handed to the
//! plugin, the UI, and the state machinery at once. The lock is only
//! contended when a new URI is seen, which happens at startup and state-load
//! time, not in the audio path.

use parking_lot::Mutex;

use crate::symap::Symap;

/// A URI mapped to a 32-bit integer. Zero is never a valid URID.
pub type Urid = u32;

#[derive(Default)]
pub struct Mapper {
    symap: Mutex<Symap>,
}

impl Mapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `uri`, interning it on first use.
    pub fn map(&self, uri: &str) -> Urid {
        self.symap.lock().map(uri)
    }

    /// Return the URID for `uri` if it has already been mapped.
    pub fn try_map(&self, uri: &str) -> Option<Urid> {
        match self.symap.lock().try_map(uri) {
            0 => None,
            id => Some(id),
        }
    }

    /// Return the URI for `urid`, or `None` for unknown ids.
    pub fn unmap(&self, urid: Urid) -> Option<String> {
        self.symap.lock().unmap(urid).map(str::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn mapping_is_stable_across_threads() {
        let mapper = Arc::new(Mapper::new());
        let a = mapper.map("urn:roost:a");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mapper = mapper.clone();
                std::thread::spawn(move || mapper.map("urn:roost:a"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), a);
        }

        assert_eq!(mapper.unmap(a).as_deref(), Some("urn:roost:a"));
        assert_eq!(mapper.try_map("urn:roost:b"), None);
    }
}
