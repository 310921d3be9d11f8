//! Address newtypes shared by the allocator, the page table, and the
//! region table. Both spaces are modeled: a `PhysAddr` names a page frame
//! owned by the allocator, not host memory.

use crate::param::PGSIZE;
use core::fmt;

/// A physical address inside the allocator-managed range.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub usize);

/// A virtual address in a process address space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub usize);

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

/// Round up to the next page boundary.
pub const fn pg_round_up(addr: usize) -> usize {
    (addr + PGSIZE - 1) & !(PGSIZE - 1)
}

/// Round down to the current page boundary.
pub const fn pg_round_down(addr: usize) -> usize {
    addr & !(PGSIZE - 1)
}

/// Whether `addr` sits on a page boundary.
pub const fn pg_aligned(addr: usize) -> bool {
    addr % PGSIZE == 0
}
