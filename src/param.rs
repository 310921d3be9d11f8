/// Maximum number of CPUs
pub const NCPU: usize = 8;
/// Device number of file system root disk
pub const ROOTDEV: u32 = 1;
/// Max num of blocks any FS op writes
pub const MAXOPBLOCKS: usize = 10;
/// Buffer slots per block cache bucket
pub const NBUF: usize = MAXOPBLOCKS * 3;
/// Number of block cache hash buckets
pub const NBUCKET: usize = 17;
/// Block size in bytes
pub const BSIZE: usize = 1024;
/// Size of file system in blocks
pub const FSSIZE: usize = 2000;
/// Bytes per page
pub const PGSIZE: usize = 4096;
/// One beyond the highest usable virtual address. One bit less than the
/// max allowed by Sv39, to avoid sign-extended addresses.
pub const MAXVA: usize = 1 << (9 + 9 + 9 + 12 - 1);
/// Trampoline page, at the highest address in every address space
pub const TRAMPOLINE: usize = MAXVA - PGSIZE;
/// Per-process trap frame, just below the trampoline
pub const TRAPFRAME: usize = TRAMPOLINE - PGSIZE;
/// Highest address available to mapped-region placement
pub const MMAPTOP: usize = TRAPFRAME;
/// Maximum memory-mapped regions per process
pub const NVMA: usize = 16;
