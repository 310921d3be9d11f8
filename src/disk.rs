//! Block device interface and the ram-backed device used by tests and
//! demos. Transfers are synchronous: the call returns once the payload
//! has moved, so callers block for the duration of the I/O.

use crate::param::{BSIZE, FSSIZE};
use crate::sync::SpinLock;
use std::sync::Arc;

/// One block's payload.
pub type BlockData = [u8; BSIZE];

/// Transfer direction, from memory's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// A device that moves one block at a time. Device numbers let one
/// implementation serve several disks. There is no error return; a
/// device that cannot complete a transfer has no recovery path here.
pub trait BlockDevice: Send + Sync {
    fn transfer(&self, dev: u32, blockno: u32, data: &mut BlockData, dir: Direction);
}

impl<D: BlockDevice + ?Sized> BlockDevice for Arc<D> {
    fn transfer(&self, dev: u32, blockno: u32, data: &mut BlockData, dir: Direction) {
        (**self).transfer(dev, blockno, data, dir)
    }
}

/// Memory-backed disk holding `FSSIZE` blocks, all device numbers alias
/// the same storage.
pub struct RamDisk {
    blocks: SpinLock<Vec<BlockData>>,
}

impl RamDisk {
    pub fn new() -> RamDisk {
        RamDisk {
            blocks: SpinLock::new(vec![[0; BSIZE]; FSSIZE]),
        }
    }
}

impl Default for RamDisk {
    fn default() -> RamDisk {
        RamDisk::new()
    }
}

impl BlockDevice for RamDisk {
    fn transfer(&self, _dev: u32, blockno: u32, data: &mut BlockData, dir: Direction) {
        if blockno as usize >= FSSIZE {
            panic!("ramdisk: blockno too big");
        }
        let mut blocks = self.blocks.lock();
        match dir {
            Direction::Read => *data = blocks[blockno as usize],
            Direction::Write => blocks[blockno as usize] = *data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_block() {
        let disk = RamDisk::new();
        let mut data = [0xabu8; BSIZE];
        disk.transfer(0, 7, &mut data, Direction::Write);

        let mut readback = [0u8; BSIZE];
        disk.transfer(0, 7, &mut readback, Direction::Read);
        assert_eq!(readback, [0xabu8; BSIZE]);

        disk.transfer(0, 8, &mut readback, Direction::Read);
        assert_eq!(readback, [0u8; BSIZE]);
    }

    #[test]
    #[should_panic(expected = "ramdisk: blockno too big")]
    fn rejects_out_of_range_block() {
        let disk = RamDisk::new();
        let mut data = [0u8; BSIZE];
        disk.transfer(0, FSSIZE as u32, &mut data, Direction::Read);
    }
}
