//! Buffer cache.
//!
//! The buffer cache holds cached copies of disk block contents. Caching
//! disk blocks in memory reduces the number of disk reads and also
//! provides a synchronization point for disk blocks used by multiple
//! processes.
//!
//! Buffers are hashed by block number into `NBUCKET` buckets, each with
//! its own fixed pool of `NBUF` slots, so traffic on different buckets
//! never contends. Each bucket's spin guard covers identity, reference
//! counts, and recency only and is never held while blocking; each
//! buffer's sleep lock covers the payload and is held across device I/O.
//!
//! Interface:
//! - To get a buffer for a particular disk block, call [`BufferCache::read`].
//! - After changing buffer data, call [`Buf::write`] to write it to disk.
//! - When done with the buffer, drop it; the reference is released on
//!   every exit path.
//! - To keep a block resident without holding its lock, take a
//!   [`Buf::pin`] and drop it when done.

use crate::{
    disk::{BlockData, BlockDevice, Direction},
    param::{BSIZE, NBUCKET, NBUF},
    sync::{SleepLock, SleepLockGuard, SpinLock},
};
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use log::{debug, trace};
use std::collections::HashMap;

/// Slot residency. `Cached(0)` is a retained identity with no holders,
/// the only state eviction may claim besides `Free`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Free,
    Cached(u32),
}

/// Per-slot metadata, guarded by the bucket control lock.
struct BufSlot {
    dev: u32,
    blockno: u32,
    state: SlotState,
    /// Release stamp; smaller is older. Slots never released keep 0 and
    /// are reclaimed first.
    stamp: u64,
}

/// Payload side of a slot, outside the control lock.
struct BufInner {
    /// True once the payload holds the block's bytes. Cleared at claim
    /// time, when no holder can exist; set under the content lock.
    valid: AtomicBool,
    data: SleepLock<BlockData>,
}

struct BucketCtrl {
    slots: [BufSlot; NBUF],
    /// Identity -> slot index for resident blocks.
    index: HashMap<(u32, u32), usize>,
    /// Source for release stamps.
    tick: u64,
}

struct Bucket {
    ctrl: SpinLock<BucketCtrl>,
    bufs: [BufInner; NBUF],
}

impl BucketCtrl {
    /// Recycle the least recently used holder-free slot for a new
    /// identity. Exhaustion means the pool is undersized for the
    /// workload, which is a configuration bug.
    fn claim(&mut self, dev: u32, blockno: u32) -> usize {
        let mut victim: Option<(usize, u64)> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if !matches!(slot.state, SlotState::Free | SlotState::Cached(0)) {
                continue;
            }
            if victim.map_or(true, |(_, stamp)| slot.stamp < stamp) {
                victim = Some((i, slot.stamp));
            }
        }
        let Some((i, _)) = victim else {
            panic!("bget: no buffers");
        };
        let slot = &mut self.slots[i];
        if slot.state == SlotState::Cached(0) {
            trace!("bcache: evict ({}, {})", slot.dev, slot.blockno);
            self.index.remove(&(slot.dev, slot.blockno));
        }
        slot.dev = dev;
        slot.blockno = blockno;
        slot.state = SlotState::Cached(1);
        self.index.insert((dev, blockno), i);
        i
    }

    /// Add a holder to an indexed slot. Zero holders is fine here; that
    /// is any resident block between uses.
    fn hold(&mut self, slot: usize) {
        let s = &mut self.slots[slot];
        s.state = match s.state {
            SlotState::Cached(n) => SlotState::Cached(n + 1),
            SlotState::Free => panic!("bget: stale index"),
        };
    }

    /// Add a holder on behalf of a pin, which requires the caller to
    /// already hold the buffer.
    fn bump(&mut self, slot: usize) {
        let s = &mut self.slots[slot];
        s.state = match s.state {
            SlotState::Cached(n) if n > 0 => SlotState::Cached(n + 1),
            _ => panic!("bpin: buffer not held"),
        };
    }

    /// Drop a guard's holder; the last one out stamps the slot as the
    /// most recently used.
    fn put(&mut self, slot: usize) {
        let s = &mut self.slots[slot];
        s.state = match s.state {
            SlotState::Cached(1) => {
                self.tick += 1;
                s.stamp = self.tick;
                SlotState::Cached(0)
            }
            SlotState::Cached(n) if n > 1 => SlotState::Cached(n - 1),
            _ => panic!("brelse: buffer not held"),
        };
    }

    /// Drop a pin's holder. Unlike `put`, recency is untouched.
    fn unpin(&mut self, slot: usize) {
        let s = &mut self.slots[slot];
        s.state = match s.state {
            SlotState::Cached(n) if n > 0 => SlotState::Cached(n - 1),
            _ => panic!("bunpin: buffer not held"),
        };
    }
}

/// Fixed pool of block buffers shared by all users of one device stack.
pub struct BufferCache<D> {
    device: D,
    buckets: Box<[Bucket]>,
}

impl<D: BlockDevice> BufferCache<D> {
    pub fn new(device: D) -> BufferCache<D> {
        let buckets = (0..NBUCKET)
            .map(|_| Bucket {
                ctrl: SpinLock::new(BucketCtrl {
                    slots: core::array::from_fn(|_| BufSlot {
                        dev: 0,
                        blockno: 0,
                        state: SlotState::Free,
                        stamp: 0,
                    }),
                    index: HashMap::new(),
                    tick: 0,
                }),
                bufs: core::array::from_fn(|_| BufInner {
                    valid: AtomicBool::new(false),
                    data: SleepLock::new([0; BSIZE]),
                }),
            })
            .collect();
        debug!("bcache: {} buckets of {} buffers", NBUCKET, NBUF);
        BufferCache { device, buckets }
    }

    /// The underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    fn bucket_of(blockno: u32) -> usize {
        blockno as usize % NBUCKET
    }

    /// Look up the buffer for a block, claiming a slot if it is absent,
    /// and take its content lock. The payload may be stale; most callers
    /// want [`BufferCache::read`].
    pub fn acquire(&self, dev: u32, blockno: u32) -> Buf<'_, D> {
        let bi = Self::bucket_of(blockno);
        let bucket = &self.buckets[bi];

        let mut ctrl = bucket.ctrl.lock();
        let slot = match ctrl.index.get(&(dev, blockno)) {
            Some(&slot) => {
                ctrl.hold(slot);
                slot
            }
            None => {
                let slot = ctrl.claim(dev, blockno);
                bucket.bufs[slot].valid.store(false, Ordering::Relaxed);
                slot
            }
        };
        drop(ctrl);

        // Blocking happens here, after the bucket guard is gone. Two
        // requests for the same block serialize on this lock alone.
        let data = bucket.bufs[slot].data.lock();
        Buf {
            cache: self,
            bucket: bi,
            slot,
            dev,
            blockno,
            data: Some(data),
        }
    }

    /// Return a locked buffer with the contents of a block, reading it
    /// from the device if no valid copy is cached.
    pub fn read(&self, dev: u32, blockno: u32) -> Buf<'_, D> {
        let mut buf = self.acquire(dev, blockno);
        let inner = &self.buckets[buf.bucket].bufs[buf.slot];
        if !inner.valid.load(Ordering::Relaxed) {
            self.device
                .transfer(dev, blockno, buf.payload_mut(), Direction::Read);
            inner.valid.store(true, Ordering::Relaxed);
        }
        buf
    }
}

/// An exclusively held block buffer. Deref targets the payload. Dropping
/// the guard releases the content lock, then the holder reference; at
/// zero holders the slot becomes the bucket's most recently used.
pub struct Buf<'a, D> {
    cache: &'a BufferCache<D>,
    bucket: usize,
    slot: usize,
    dev: u32,
    blockno: u32,
    data: Option<SleepLockGuard<'a, BlockData>>,
}

impl<'a, D> Buf<'a, D> {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    fn payload(&self) -> &BlockData {
        match self.data.as_deref() {
            Some(data) => data,
            // Present from construction until drop.
            None => unreachable!(),
        }
    }

    fn payload_mut(&mut self) -> &mut BlockData {
        match self.data.as_deref_mut() {
            Some(data) => data,
            None => unreachable!(),
        }
    }

    /// Keep the block resident after this guard goes away, without
    /// holding the content lock.
    pub fn pin(&self) -> BufPin<'a, D> {
        let mut ctrl = self.cache.buckets[self.bucket].ctrl.lock();
        ctrl.bump(self.slot);
        BufPin {
            cache: self.cache,
            bucket: self.bucket,
            slot: self.slot,
        }
    }
}

impl<'a, D: BlockDevice> Buf<'a, D> {
    /// Write the buffer's contents to the device.
    pub fn write(&mut self) {
        let Some(data) = self.data.as_deref_mut() else {
            unreachable!()
        };
        self.cache
            .device
            .transfer(self.dev, self.blockno, data, Direction::Write);
    }
}

impl<D> Deref for Buf<'_, D> {
    type Target = BlockData;

    fn deref(&self) -> &BlockData {
        self.payload()
    }
}

impl<D> DerefMut for Buf<'_, D> {
    fn deref_mut(&mut self) -> &mut BlockData {
        self.payload_mut()
    }
}

impl<D> Drop for Buf<'_, D> {
    fn drop(&mut self) {
        // Content lock first, then the holder reference, so a waiter
        // never finds the slot recycled under a lock it just won.
        self.data.take();
        let mut ctrl = self.cache.buckets[self.bucket].ctrl.lock();
        ctrl.put(self.slot);
    }
}

/// A residency reference without content access. Dropping it releases
/// the reference.
pub struct BufPin<'a, D> {
    cache: &'a BufferCache<D>,
    bucket: usize,
    slot: usize,
}

impl<D> Drop for BufPin<'_, D> {
    fn drop(&mut self) {
        let mut ctrl = self.cache.buckets[self.bucket].ctrl.lock();
        ctrl.unpin(self.slot);
    }
}
