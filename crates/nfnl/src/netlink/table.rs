//! Fixed-size attribute table indexed by attribute type.
//!
//! Packet notifications carry a small, closed set of attribute types. The
//! table keeps one borrowed slot per type so that a receive loop can decode
//! every datagram without touching the heap.
//!
//! Every [`AttrTable::decode`] starts by clearing all slots: only
//! attributes present in the message just decoded are ever visible.

use tracing::trace;

use super::attr::AttrIter;
use super::error::Result;

/// Attribute slots for types `0..N`, borrowing from the decoded buffer.
#[derive(Debug, Clone)]
pub struct AttrTable<'a, const N: usize> {
    slots: [Option<&'a [u8]>; N],
}

impl<const N: usize> Default for AttrTable<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> AttrTable<'a, N> {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self { slots: [None; N] }
    }

    /// Decode an attribute list into a fresh table.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut table = Self::new();
        table.decode(data)?;
        Ok(table)
    }

    /// Replace the table contents with the attributes in `data`.
    ///
    /// The nested flag is masked off before indexing. A repeated type keeps
    /// the last value; types `>= N` are skipped. On error the table is left
    /// empty.
    pub fn decode(&mut self, data: &'a [u8]) -> Result<()> {
        self.clear();
        for attr in AttrIter::new(data) {
            let (hdr, value) = match attr {
                Ok(a) => a,
                Err(e) => {
                    self.clear();
                    return Err(e);
                }
            };
            match self.slots.get_mut(hdr.kind() as usize) {
                Some(slot) => *slot = Some(value),
                None => trace!(kind = hdr.kind(), max = N, "skipping unknown attribute"),
            }
        }
        Ok(())
    }

    /// Value of attribute `kind`, if it was present in the last decode.
    pub fn get(&self, kind: u16) -> Option<&'a [u8]> {
        self.slots.get(kind as usize).copied().flatten()
    }

    /// Whether attribute `kind` was present in the last decode.
    pub fn contains(&self, kind: u16) -> bool {
        self.get(kind).is_some()
    }

    /// Empty every slot.
    pub fn clear(&mut self) {
        self.slots = [None; N];
    }

    /// Iterate over the present attributes as `(type, value)`.
    pub fn present(&self) -> impl Iterator<Item = (u16, &'a [u8])> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(kind, slot)| slot.map(|v| (kind as u16, v)))
    }
}
