//! Page-table collaborator. The region table needs only entry-level
//! access to an address space: whether a virtual page has a mapping, and
//! which physical page backs it. [`SparsePageTable`] is the map-backed
//! implementation used by hosted callers and tests; real hardware tables
//! would implement the same trait over their walk routine.

use crate::addr::{pg_round_down, PhysAddr, VirtAddr};
use bitflags::bitflags;
use std::collections::BTreeMap;

bitflags! {
    /// Page-table entry permissions.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PteFlags: u8 {
        /// Readable.
        const R = 1 << 1;
        /// Writable.
        const W = 1 << 2;
        /// Executable.
        const X = 1 << 3;
        /// User-accessible.
        const U = 1 << 4;
    }
}

/// One installed mapping. Presence implies the validity bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pte {
    pub pa: PhysAddr,
    pub flags: PteFlags,
}

/// Entry-level view of one process's address space. Addresses are rounded
/// down to their page.
pub trait PageTable {
    /// The mapping covering `va`, if one is installed.
    fn entry(&self, va: VirtAddr) -> Option<Pte>;
    /// Install a mapping for `va`'s page. Remapping a live page is fatal.
    fn map(&mut self, va: VirtAddr, pa: PhysAddr, flags: PteFlags);
    /// Remove and return the mapping covering `va`, if one is installed.
    fn unmap(&mut self, va: VirtAddr) -> Option<Pte>;
}

/// Address space over simulated addresses, entries stored sparsely.
#[derive(Default)]
pub struct SparsePageTable {
    entries: BTreeMap<usize, Pte>,
}

impl SparsePageTable {
    pub fn new() -> SparsePageTable {
        SparsePageTable {
            entries: BTreeMap::new(),
        }
    }

    /// Number of installed entries.
    pub fn mapped_pages(&self) -> usize {
        self.entries.len()
    }
}

impl PageTable for SparsePageTable {
    fn entry(&self, va: VirtAddr) -> Option<Pte> {
        self.entries.get(&pg_round_down(va.0)).copied()
    }

    fn map(&mut self, va: VirtAddr, pa: PhysAddr, flags: PteFlags) {
        let page = pg_round_down(va.0);
        if self.entries.insert(page, Pte { pa, flags }).is_some() {
            panic!("mappages: remap");
        }
    }

    fn unmap(&mut self, va: VirtAddr) -> Option<Pte> {
        self.entries.remove(&pg_round_down(va.0))
    }
}
