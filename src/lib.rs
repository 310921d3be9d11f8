//! Resource management core of a small teaching kernel, hosted: the disk
//! block cache, the physical page allocator, and per-process mapped-file
//! regions. Cores are modeled by binding threads with [`cpu::bind`],
//! devices and backing files are trait objects ([`disk::BlockDevice`],
//! [`file::MappedFile`]), and physical memory is the allocator's own
//! frame pool addressed through [`PhysAddr`].
//!
//! Invariant violations that a kernel could not survive (double free,
//! releasing an unheld buffer, cache pool exhaustion) panic; resource
//! shortages a caller can act on come back as `Result`s.

pub mod addr;
pub mod bio;
pub mod cpu;
pub mod disk;
pub mod file;
pub mod kalloc;
pub mod pagetable;
pub mod param;
pub mod sync;
pub mod vma;

pub use addr::{PhysAddr, VirtAddr};
pub use bio::{Buf, BufPin, BufferCache};
pub use disk::{BlockData, BlockDevice, Direction, RamDisk};
pub use file::{MappedFile, MemFile};
pub use kalloc::PageAllocator;
pub use pagetable::{PageTable, Pte, PteFlags, SparsePageTable};
pub use vma::{MapError, MapFlags, Prot, UnmapError, Vma, VmaTable};
