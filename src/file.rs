//! Backing-file collaborator. A mapped region keeps its own reference to
//! the file it maps, so the mapping outlives descriptor closure; cloning
//! the `Arc` is the mapping's filedup.

use crate::sync::SpinLock;

/// A file that mapped regions populate from and write back to.
pub trait MappedFile: Send + Sync {
    /// Whether positioned writes are permitted.
    fn writable(&self) -> bool;
    /// Read up to `buf.len()` bytes at `offset`; returns the byte count,
    /// short only at end of file.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize;
    /// Write all of `buf` at `offset`, extending the file if needed.
    /// Callers check `writable` first; writing a read-only file is fatal.
    fn write_at(&self, offset: usize, buf: &[u8]);
}

/// In-memory file.
pub struct MemFile {
    data: SpinLock<Vec<u8>>,
    writable: bool,
}

impl MemFile {
    pub fn new(writable: bool, contents: &[u8]) -> MemFile {
        MemFile {
            data: SpinLock::new(contents.to_vec()),
            writable,
        }
    }

    /// Copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl MappedFile for MemFile {
    fn writable(&self) -> bool {
        self.writable
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    fn write_at(&self, offset: usize, buf: &[u8]) {
        if !self.writable {
            panic!("filewrite: read-only file");
        }
        let mut data = self.data.lock();
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_short_at_end_of_file() {
        let file = MemFile::new(false, b"0123456789");
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(0, &mut buf), 8);
        assert_eq!(&buf, b"01234567");
        assert_eq!(file.read_at(6, &mut buf), 4);
        assert_eq!(&buf[..4], b"6789");
        assert_eq!(file.read_at(10, &mut buf), 0);
    }

    #[test]
    fn writes_extend_the_file() {
        let file = MemFile::new(true, b"abc");
        file.write_at(2, b"xyz");
        assert_eq!(file.contents(), b"abxyz");
    }

    #[test]
    #[should_panic(expected = "filewrite: read-only file")]
    fn read_only_write_panics() {
        let file = MemFile::new(false, b"abc");
        file.write_at(0, b"x");
    }
}
