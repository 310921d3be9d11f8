//! Cross-thread behavior of the block cache: bucket sharing, same-block
//! serialization, write-through, and pool exhaustion.

use kcore::param::{NBUCKET, NBUF, ROOTDEV};
use kcore::{BufferCache, RamDisk};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn blocks_sharing_a_bucket_are_held_together() {
    let cache = BufferCache::new(RamDisk::new());

    // Both hash to bucket zero; neither waits on the other.
    let mut low = cache.read(ROOTDEV, 0);
    let mut high = cache.read(ROOTDEV, NBUCKET as u32);
    low[0] = 0xaa;
    high[0] = 0xbb;
    assert_eq!(low[0], 0xaa);
    assert_eq!(high[0], 0xbb);
}

#[test]
fn a_second_holder_waits_for_release() {
    let cache = Arc::new(BufferCache::new(RamDisk::new()));
    let released = Arc::new(AtomicBool::new(false));
    let start = Arc::new(Barrier::new(2));

    let first = cache.read(ROOTDEV, 5);
    let waiter = {
        let cache = Arc::clone(&cache);
        let released = Arc::clone(&released);
        let start = Arc::clone(&start);
        thread::spawn(move || {
            start.wait();
            let buf = cache.read(ROOTDEV, 5);
            assert!(
                released.load(Ordering::Relaxed),
                "buffer handed out while still held"
            );
            assert_eq!(buf.blockno(), 5);
        })
    };

    start.wait();
    // Give the waiter time to block on the buffer before letting go.
    thread::sleep(Duration::from_millis(20));
    released.store(true, Ordering::Relaxed);
    drop(first);
    waiter.join().unwrap();
}

#[test]
fn contended_updates_are_never_lost() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;
    let cache = Arc::new(BufferCache::new(RamDisk::new()));
    let start = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..ROUNDS {
                    let mut buf = cache.read(ROOTDEV, 9);
                    let mut word = [0u8; 8];
                    word.copy_from_slice(&buf[..8]);
                    let count = u64::from_le_bytes(word) + 1;
                    buf[..8].copy_from_slice(&count.to_le_bytes());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let buf = cache.read(ROOTDEV, 9);
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[..8]);
    assert_eq!(u64::from_le_bytes(word), (THREADS * ROUNDS) as u64);
}

#[test]
fn every_bucket_works_in_parallel() {
    let cache = Arc::new(BufferCache::new(RamDisk::new()));
    let start = Arc::new(Barrier::new(NBUCKET));

    let workers: Vec<_> = (0..NBUCKET as u32)
        .map(|blockno| {
            let cache = Arc::clone(&cache);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                let mut buf = cache.read(ROOTDEV, blockno);
                buf.fill(blockno as u8);
                buf.write();
                drop(buf);
                let buf = cache.read(ROOTDEV, blockno);
                assert!(buf.iter().all(|&b| b == blockno as u8));
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn written_blocks_survive_a_cache_teardown() {
    let disk = Arc::new(RamDisk::new());
    {
        let cache = BufferCache::new(Arc::clone(&disk));
        let mut buf = cache.read(ROOTDEV, 42);
        buf[..4].copy_from_slice(b"sky\n");
        buf.write();
    }

    // A fresh cache over the same device sees the write.
    let cache = BufferCache::new(disk);
    let buf = cache.read(ROOTDEV, 42);
    assert_eq!(&buf[..4], b"sky\n");
}

#[test]
#[should_panic(expected = "bget: no buffers")]
fn a_bucket_full_of_held_buffers_is_fatal() {
    let cache = BufferCache::new(RamDisk::new());
    // Pin down every slot in bucket zero with live references.
    let held: Vec<_> = (0..NBUF as u32)
        .map(|i| cache.acquire(ROOTDEV, i * NBUCKET as u32))
        .collect();
    assert_eq!(held.len(), NBUF);
    let _ = cache.acquire(ROOTDEV, NBUF as u32 * NBUCKET as u32);
}
