//! Memory-mapped file regions. Each process owns a fixed table of VMAs:
//! mapping claims a slot and an address range, unmapping writes shared
//! changes back and returns pages to the allocator. No page is touched at
//! map time; population happens on fault, where the handler allocates a
//! page, fills it from the backing file, and installs an entry honoring
//! the region's protection.
//!
//! The table belongs to a single process and is mutated only by its own
//! execution context, which `&mut self` makes structural.

use crate::{
    addr::{pg_aligned, pg_round_up, VirtAddr},
    file::MappedFile,
    kalloc::PageAllocator,
    pagetable::PageTable,
    param::{MMAPTOP, NVMA, PGSIZE},
};
use arrayvec::ArrayVec;
use bitflags::bitflags;
use core::fmt;
use log::{debug, warn};
use std::sync::Arc;

bitflags! {
    /// Access protection for a mapped region.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Prot: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const EXEC = 0x4;
    }
}

bitflags! {
    /// Region sharing semantics.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// Write-back to the file at unmap time.
        const SHARED = 0x1;
        /// Changes stay private to the process.
        const PRIVATE = 0x2;
    }
}

/// Why a map request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// Zero length, or longer than the reservation.
    BadLength,
    /// Shared write mapping of a read-only file.
    Permission,
    /// Every VMA slot is in use.
    NoSlot,
    /// No gap fits between the heap break and the reservation.
    NoPlacement,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MapError::BadLength => "unmappable length",
            MapError::Permission => "shared write mapping of a read-only file",
            MapError::NoSlot => "no free vma slot",
            MapError::NoPlacement => "no usable address range",
        })
    }
}

impl std::error::Error for MapError {}

/// Why an unmap request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnmapError {
    /// Misaligned address, or a length or end no region can have.
    BadRange,
    /// No single region contains the range.
    NotMapped,
    /// The range would punch a hole through the middle of a region.
    Split,
}

impl fmt::Display for UnmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnmapError::BadRange => "malformed range",
            UnmapError::NotMapped => "range not contained in one mapping",
            UnmapError::Split => "interior unmap would split a mapping",
        })
    }
}

impl std::error::Error for UnmapError {}

/// One mapped region.
pub struct Vma {
    start: VirtAddr,
    size: usize,
    prot: Prot,
    flags: MapFlags,
    file: Arc<dyn MappedFile>,
    /// Offset of `start` within the file: zero at map time, advanced by
    /// prefix unmaps so the surviving pages keep their file bytes.
    offset: usize,
}

impl Vma {
    pub fn start(&self) -> VirtAddr {
        self.start
    }

    /// Region size in bytes, always a page multiple.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn prot(&self) -> Prot {
        self.prot
    }

    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The backing file. The region holds its own reference, so the
    /// mapping survives the descriptor that created it.
    pub fn file(&self) -> &Arc<dyn MappedFile> {
        &self.file
    }

    fn end(&self) -> usize {
        self.start.0 + self.size
    }
}

/// Per-process table of mapped regions.
pub struct VmaTable {
    /// Heap break at table creation; placement never goes at or below it.
    brk: VirtAddr,
    vmas: ArrayVec<Vma, NVMA>,
}

impl VmaTable {
    pub fn new(brk: VirtAddr) -> VmaTable {
        VmaTable {
            brk,
            vmas: ArrayVec::new(),
        }
    }

    /// Map `len` bytes of `file` somewhere above the heap. Mirrors the
    /// syscall surface: `hint` and `offset` exist but only zero is
    /// implemented, and passing anything else is a caller bug. On success
    /// the region's pages are untouched; the fault path populates them.
    pub fn map(
        &mut self,
        pt: &impl PageTable,
        hint: usize,
        len: usize,
        prot: Prot,
        flags: MapFlags,
        file: &Arc<dyn MappedFile>,
        offset: usize,
    ) -> Result<VirtAddr, MapError> {
        if hint != 0 {
            panic!("mmap: address hint unsupported");
        }
        if offset != 0 {
            panic!("mmap: file offset unsupported");
        }
        // The reservation bounds every length, which also keeps the
        // page rounding from overflowing.
        if len == 0 || len > MMAPTOP {
            return Err(MapError::BadLength);
        }
        if flags.contains(MapFlags::SHARED) && prot.contains(Prot::WRITE) && !file.writable() {
            return Err(MapError::Permission);
        }
        if self.vmas.is_full() {
            warn!("mmap: out of vma slots");
            return Err(MapError::NoSlot);
        }

        let size = pg_round_up(len);
        let Some(start) = self.place(pt, size) else {
            warn!("mmap: no usable address range for {:#x} bytes", size);
            return Err(MapError::NoPlacement);
        };
        debug!(
            "mmap: {:#x}..{:#x} prot {:?} flags {:?}",
            start.0,
            start.0 + size,
            prot,
            flags
        );
        self.vmas.push(Vma {
            start,
            size,
            prot,
            flags,
            file: Arc::clone(file),
            offset: 0,
        });
        Ok(start)
    }

    /// Release `[addr, addr + len)`, which must cover a whole region or
    /// one of its ends. Shared changes are written back before teardown,
    /// then every resident page goes back to the allocator.
    pub fn unmap(
        &mut self,
        pt: &mut impl PageTable,
        kmem: &PageAllocator,
        addr: VirtAddr,
        len: usize,
    ) -> Result<(), UnmapError> {
        if !pg_aligned(addr.0) || len == 0 || len > MMAPTOP {
            return Err(UnmapError::BadRange);
        }
        let size = pg_round_up(len);
        // A range whose end wraps the address space sits inside no region.
        let Some(end) = addr.0.checked_add(size) else {
            return Err(UnmapError::BadRange);
        };
        let idx = self
            .vmas
            .iter()
            .position(|v| v.start.0 <= addr.0 && end <= v.end())
            .ok_or(UnmapError::NotMapped)?;

        let is_prefix = addr.0 == self.vmas[idx].start.0;
        let is_suffix = end == self.vmas[idx].end();
        if !is_prefix && !is_suffix {
            return Err(UnmapError::Split);
        }
        debug!("munmap: {:#x}..{:#x}", addr.0, end);

        let vma = &self.vmas[idx];
        if vma.flags.contains(MapFlags::SHARED) && vma.prot.contains(Prot::WRITE) {
            Self::write_back(vma, pt, kmem, addr.0, end);
        }

        let mut va = addr.0;
        while va < end {
            if let Some(pte) = pt.unmap(VirtAddr(va)) {
                kmem.free(pte.pa);
            }
            va += PGSIZE;
        }

        if is_prefix && is_suffix {
            // Whole region gone; this drops the file reference.
            self.vmas.swap_remove(idx);
        } else {
            let vma = &mut self.vmas[idx];
            if is_prefix {
                vma.start = VirtAddr(vma.start.0 + size);
                vma.offset += size;
            }
            vma.size -= size;
        }
        Ok(())
    }

    /// Release every live region as a full-range unmap would, write-back
    /// included. Process teardown calls this before the address space is
    /// destroyed.
    pub fn teardown(&mut self, pt: &mut impl PageTable, kmem: &PageAllocator) {
        while let Some(vma) = self.vmas.last() {
            let (start, size) = (vma.start, vma.size);
            if self.unmap(pt, kmem, start, size).is_err() {
                panic!("munmap: teardown failed");
            }
        }
    }

    /// The region containing `va`. This is the fault path's entry point.
    pub fn lookup(&self, va: VirtAddr) -> Option<&Vma> {
        self.vmas.iter().find(|v| v.start.0 <= va.0 && va.0 < v.end())
    }

    /// Live regions, in no particular order.
    pub fn regions(&self) -> impl Iterator<Item = &Vma> {
        self.vmas.iter()
    }

    /// Walk candidates downward from the reservation until a gap of
    /// `size` bytes clears every region and every installed page-table
    /// entry, stopping at the heap break.
    fn place(&self, pt: &impl PageTable, size: usize) -> Option<VirtAddr> {
        if size > MMAPTOP {
            return None;
        }
        let mut candidate = MMAPTOP - size;
        while candidate > self.brk.0 {
            if self.fits(pt, candidate, size) {
                return Some(VirtAddr(candidate));
            }
            candidate -= PGSIZE;
        }
        None
    }

    fn fits(&self, pt: &impl PageTable, start: usize, size: usize) -> bool {
        let end = start + size;
        if self.vmas.iter().any(|v| start < v.end() && v.start.0 < end) {
            return false;
        }
        (start..end)
            .step_by(PGSIZE)
            .all(|va| pt.entry(VirtAddr(va)).is_none())
    }

    /// Flush `[start, end)` to the backing file, one positioned write per
    /// run of resident pages. Pages never faulted in have no contents to
    /// flush.
    fn write_back(
        vma: &Vma,
        pt: &impl PageTable,
        kmem: &PageAllocator,
        start: usize,
        end: usize,
    ) {
        let mut run: Vec<u8> = Vec::new();
        let mut run_off = 0;
        let mut va = start;
        while va < end {
            match pt.entry(VirtAddr(va)) {
                Some(pte) => {
                    if run.is_empty() {
                        run_off = vma.offset + (va - vma.start.0);
                    }
                    // The owning process holds the only view of these
                    // pages until they are freed below.
                    run.extend_from_slice(unsafe { kmem.page(pte.pa) });
                }
                None => {
                    if !run.is_empty() {
                        vma.file.write_at(run_off, &run);
                        run.clear();
                    }
                }
            }
            va += PGSIZE;
        }
        if !run.is_empty() {
            vma.file.write_at(run_off, &run);
        }
    }
}
