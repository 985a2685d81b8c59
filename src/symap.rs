//! A basic symbol map (string interner).
//!
//! Mapped symbols get sequential non-zero ids in insertion order, so reverse
//! lookup is a direct index. Forward lookup goes through a separate index
//! sorted by symbol, so already-mapped symbols are found in O(lg n). Mapping
//! a new symbol shifts the sorted index, which is fine for the usage here: a
//! bounded vocabulary of URIs, most of which are mapped at startup.

/// An interned symbol id. Zero is never a valid id.
pub type SymapId = u32;

#[derive(Default)]
pub struct Symap {
    /// `symbols[i]` is the symbol with id `i + 1`.
    symbols: Vec<Box<str>>,
    /// Ids ordered by their symbol string.
    index: Vec<SymapId>,
}

impl Symap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Position of `sym` in the sorted index, or the insertion point.
    fn search(&self, sym: &str) -> Result<usize, usize> {
        self.index
            .binary_search_by(|id| self.symbols[(*id - 1) as usize].as_ref().cmp(sym))
    }

    /// Return the id of `sym` if it is already mapped, or zero.
    pub fn try_map(&self, sym: &str) -> SymapId {
        match self.search(sym) {
            Ok(pos) => self.index[pos],
            Err(_) => 0,
        }
    }

    /// Return the id of `sym`, mapping it first if necessary.
    pub fn map(&mut self, sym: &str) -> SymapId {
        match self.search(sym) {
            Ok(pos) => self.index[pos],
            Err(pos) => {
                let id = (self.symbols.len() + 1) as SymapId;
                self.symbols.push(sym.into());
                self.index.insert(pos, id);
                id
            }
        }
    }

    /// Return the symbol for `id`, or `None` for zero or unknown ids.
    pub fn unmap(&self, id: SymapId) -> Option<&str> {
        if id == 0 {
            return None;
        }
        self.symbols.get((id - 1) as usize).map(|s| s.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_map_is_zero_until_mapped() {
        let mut map = Symap::new();
        assert_eq!(map.try_map("hello"), 0);

        let id = map.map("hello");
        assert_ne!(id, 0);
        assert_eq!(map.try_map("hello"), id);
        assert_eq!(map.unmap(id), Some("hello"));
        assert_eq!(map.unmap(0), None);
        assert_eq!(map.unmap(id + 1), None);
    }

    #[test]
    fn map_is_idempotent() {
        let mut map = Symap::new();
        let syms = ["hello", "bonjour", "goodbye", "aloha", "salut"];

        let ids: Vec<SymapId> = syms.iter().map(|s| map.map(s)).collect();
        for (sym, id) in syms.iter().zip(&ids) {
            assert_eq!(map.map(sym), *id);
            assert_eq!(map.unmap(*id), Some(*sym));
        }

        // Ids are dense, insertion-ordered, and non-zero
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(map.len(), 5);
    }
}
