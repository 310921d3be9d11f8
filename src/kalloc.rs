//! Physical memory allocator, for user processes, page-table pages, and
//! mapped-file backing. Allocates whole 4096-byte pages from per-core
//! free stacks, so the hot path takes only the local core's lock; a core
//! whose stack runs dry steals from the others.
//!
//! Freed pages and fresh allocations are filled with distinct junk
//! patterns, so a dangling reference reads garbage that is recognizably
//! garbage.

use crate::{
    addr::{pg_round_up, PhysAddr},
    cpu,
    param::{NCPU, PGSIZE},
    sync::SpinLock,
};
use core::cell::UnsafeCell;
use core::ops::Range;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{debug, info};

/// Pattern filling freed pages.
pub const FREE_JUNK: u8 = 0x01;
/// Pattern filling freshly allocated pages.
pub const ALLOC_JUNK: u8 = 0x05;

/// One page of backing storage.
#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; PGSIZE]>);

// Frames are plain byte storage. Exclusive access is tracked by the free
// state and the owning caller, not by the type system.
unsafe impl Send for Frame {}
unsafe impl Sync for Frame {}

/// All physical pages, owned by the allocator, handed out by address.
pub struct PageAllocator {
    base: usize,
    limit: usize,
    frames: Box<[Frame]>,
    /// True while the frame sits on a free stack.
    freed: Box<[AtomicBool]>,
    /// Per-core free stacks of frame indexes.
    kmem: [SpinLock<Vec<usize>>; NCPU],
}

impl PageAllocator {
    /// Build an allocator over `range` and free every full page in it,
    /// all onto the calling core's stack. The start is rounded up to a
    /// page boundary; a range without one full page is a configuration
    /// error.
    pub fn new(range: Range<usize>) -> PageAllocator {
        let base = pg_round_up(range.start);
        let npages = range.end.saturating_sub(base) / PGSIZE;
        if npages == 0 {
            panic!("kinit: empty page range");
        }

        let allocator = PageAllocator {
            base,
            limit: base + npages * PGSIZE,
            frames: (0..npages)
                .map(|_| Frame(UnsafeCell::new([0; PGSIZE])))
                .collect(),
            freed: (0..npages).map(|_| AtomicBool::new(false)).collect(),
            kmem: core::array::from_fn(|_| SpinLock::new(Vec::with_capacity(npages))),
        };
        let mut pa = allocator.base;
        while pa + PGSIZE <= allocator.limit {
            allocator.free(PhysAddr(pa));
            pa += PGSIZE;
        }
        info!("kalloc: {} pages at {:#x}", npages, base);
        allocator
    }

    /// Pages under management.
    pub fn page_count(&self) -> usize {
        self.frames.len()
    }

    fn frame_index(&self, pa: PhysAddr) -> Option<usize> {
        if pa.0 % PGSIZE != 0 || pa.0 < self.base || pa.0 >= self.limit {
            return None;
        }
        Some((pa.0 - self.base) / PGSIZE)
    }

    /// Return the page at `pa` to the calling core's free stack. The page
    /// must have come from `alloc` (or be part of the initial range).
    pub fn free(&self, pa: PhysAddr) {
        let Some(idx) = self.frame_index(pa) else {
            panic!("kfree");
        };
        if self.freed[idx].swap(true, Ordering::Relaxed) {
            panic!("kfree: double free");
        }
        // Fill with junk while this caller still owns the page.
        unsafe { (*self.frames[idx].0.get()).fill(FREE_JUNK) };
        self.kmem[cpu::id()].lock().push(idx);
    }

    /// Take one page, from the calling core's stack when possible,
    /// stealing from another core otherwise. Returns `None` only when
    /// every core's stack is empty. The contents are junk; callers must
    /// initialize before use.
    pub fn alloc(&self) -> Option<PhysAddr> {
        let core = cpu::id();
        let idx = self.pop(core).or_else(|| self.steal(core))?;
        if !self.freed[idx].swap(false, Ordering::Relaxed) {
            panic!("kalloc: corrupt free list");
        }
        unsafe { (*self.frames[idx].0.get()).fill(ALLOC_JUNK) };
        Some(PhysAddr(self.base + idx * PGSIZE))
    }

    fn pop(&self, core: usize) -> Option<usize> {
        self.kmem[core].lock().pop()
    }

    /// Visit every other core's stack in a fixed order, one lock at a
    /// time, and take the first available page.
    fn steal(&self, thief: usize) -> Option<usize> {
        for victim in 0..NCPU {
            if victim == thief {
                continue;
            }
            if let Some(idx) = self.kmem[victim].lock().pop() {
                debug!("kalloc: core {} stole a page from core {}", thief, victim);
                return Some(idx);
            }
        }
        None
    }

    /// Shared view of a page's bytes, standing in for the direct map.
    ///
    /// # Safety
    /// The caller must own `pa` (allocated, not freed) and ensure no
    /// concurrent mutable access to the page.
    pub unsafe fn page(&self, pa: PhysAddr) -> &[u8; PGSIZE] {
        let Some(idx) = self.frame_index(pa) else {
            panic!("kalloc: bad page address");
        };
        &*self.frames[idx].0.get()
    }

    /// Exclusive view of a page's bytes.
    ///
    /// # Safety
    /// As [`PageAllocator::page`], plus exclusivity of this view.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn page_mut(&self, pa: PhysAddr) -> &mut [u8; PGSIZE] {
        let Some(idx) = self.frame_index(pa) else {
            panic!("kalloc: bad page address");
        };
        &mut *self.frames[idx].0.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 0x8000_0000;

    fn pool(pages: usize) -> PageAllocator {
        PageAllocator::new(BASE..BASE + pages * PGSIZE)
    }

    #[test]
    fn start_rounds_up_to_a_page() {
        let kmem = PageAllocator::new(BASE + 1..BASE + 3 * PGSIZE);
        assert_eq!(kmem.page_count(), 2);
        let mut got = vec![kmem.alloc().unwrap(), kmem.alloc().unwrap()];
        got.sort();
        assert_eq!(got, vec![PhysAddr(BASE + PGSIZE), PhysAddr(BASE + 2 * PGSIZE)]);
        assert_eq!(kmem.alloc(), None);
    }

    #[test]
    #[should_panic(expected = "kinit: empty page range")]
    fn rejects_a_range_without_a_full_page() {
        PageAllocator::new(BASE + 1..BASE + PGSIZE);
    }

    #[test]
    fn allocations_are_junk_filled_and_aligned() {
        let kmem = pool(4);
        let pa = kmem.alloc().unwrap();
        assert_eq!(pa.0 % PGSIZE, 0);
        // Single-threaded: this view has no concurrent writer.
        assert!(unsafe { kmem.page(pa) }.iter().all(|&b| b == ALLOC_JUNK));

        unsafe { kmem.page_mut(pa) }.fill(0x77);
        kmem.free(pa);
        assert!(unsafe { kmem.page(pa) }.iter().all(|&b| b == FREE_JUNK));
    }

    #[test]
    fn exhausts_then_replenishes() {
        let kmem = pool(8);
        let mut held: Vec<PhysAddr> = (0..8).map(|_| kmem.alloc().unwrap()).collect();
        held.sort();
        held.dedup();
        assert_eq!(held.len(), 8);
        assert_eq!(kmem.alloc(), None);

        for pa in held.drain(..) {
            kmem.free(pa);
        }
        assert_eq!((0..8).filter_map(|_| kmem.alloc()).count(), 8);
        assert_eq!(kmem.alloc(), None);
    }

    #[test]
    #[should_panic(expected = "kfree: double free")]
    fn double_free_panics() {
        let kmem = pool(2);
        let pa = kmem.alloc().unwrap();
        kmem.free(pa);
        kmem.free(pa);
    }

    #[test]
    #[should_panic(expected = "kfree")]
    fn unaligned_free_panics() {
        let kmem = pool(2);
        kmem.free(PhysAddr(BASE + 8));
    }

    #[test]
    #[should_panic(expected = "kfree")]
    fn foreign_address_free_panics() {
        let kmem = pool(2);
        kmem.free(PhysAddr(BASE + 4 * PGSIZE));
    }
}
