//! A lock-free byte ring for a single writer and a single reader.
//!
//! This is the transport underneath all plugin↔UI and worker communication.
//! Both ends are realtime-safe: there are no locks and no allocation after
//! construction, and each operation performs exactly one acquire load of the
//! peer's head and (when it advances) one release store of its own.
//!
//! Plain [`RingWriter::write`] publishes a message atomically from the
//! reader's point of view. For messages built from a fixed header and a
//! variable body, a write *transaction* ([`RingWriter::begin_write`] /
//! [`amend_write`][RingWriter::amend_write] /
//! [`commit_write`][RingWriter::commit_write]) lets the parts be copied in
//! separately while the reader sees nothing until the commit.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Error type for ring operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Not enough free space to write the requested bytes.
    Overflow,
    /// Not enough readable data to satisfy a read, peek, or skip.
    Underrun,
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::Overflow => f.write_str("ring overflow"),
            RingError::Underrun => f.write_str("ring underrun"),
        }
    }
}

impl std::error::Error for RingError {}

/// A pending multi-part write.
///
/// Holds the writer's view of both heads at the start of the transaction.
/// Amends advance only the transaction's write head; the shared head (and
/// therefore the reader) is untouched until [`RingWriter::commit_write`].
/// An abandoned transaction needs no cleanup: the bytes it copied sit in the
/// free region and are overwritten by later writes.
#[derive(Debug, Clone, Copy)]
pub struct RingTransaction {
    read_head: u32,
    write_head: u32,
}

struct Shared {
    buf: UnsafeCell<Box<[u8]>>,
    write_head: AtomicU32,
    read_head: AtomicU32,
    size: u32,
    size_mask: u32,
}

// The buffer is shared raw between exactly one writer and one reader; the
// head indices partition it into disjoint readable and writable regions, and
// every crossing of the partition is ordered by an acquire/release pair.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    fn read_space_internal(&self, r: u32, w: u32) -> u32 {
        w.wrapping_sub(r) & self.size_mask
    }

    fn write_space_internal(&self, r: u32, w: u32) -> u32 {
        r.wrapping_sub(w).wrapping_sub(1) & self.size_mask
    }

    /// Copy `src` into the buffer at `w`, wrapping if needed. The region must
    /// already be known to be free.
    unsafe fn copy_in(&self, w: u32, src: &[u8]) -> u32 {
        let base = (*self.buf.get()).as_mut_ptr();
        let end = w as usize + src.len();
        if end <= self.size as usize {
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(w as usize), src.len());
            (end as u32) & self.size_mask
        } else {
            let first = self.size as usize - w as usize;
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(w as usize), first);
            std::ptr::copy_nonoverlapping(src.as_ptr().add(first), base, src.len() - first);
            (src.len() - first) as u32
        }
    }

    /// Copy out of the buffer at `r`, wrapping if needed. The region must
    /// already be known to be readable.
    unsafe fn copy_out(&self, r: u32, dst: &mut [u8]) {
        let base = (*self.buf.get()).as_ptr();
        let end = r as usize + dst.len();
        if end <= self.size as usize {
            std::ptr::copy_nonoverlapping(base.add(r as usize), dst.as_mut_ptr(), dst.len());
        } else {
            let first = self.size as usize - r as usize;
            std::ptr::copy_nonoverlapping(base.add(r as usize), dst.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first), dst.len() - first);
        }
    }

    fn mlock(&self) {
        #[cfg(unix)]
        unsafe {
            let buf = &*self.buf.get();
            // Best effort: a failure here means possible page faults under
            // memory pressure, not incorrect behavior.
            let _ = libc::mlock(buf.as_ptr() as *const libc::c_void, buf.len());
        }
    }
}

/// The write half of a ring. Owned by exactly one thread at a time.
pub struct RingWriter {
    ring: Arc<Shared>,
}

/// The read half of a ring. Owned by exactly one thread at a time.
pub struct RingReader {
    ring: Arc<Shared>,
}

/// Create a new ring with at least `size` bytes of capacity.
///
/// The actual capacity is `size` rounded up to a power of two, minus the one
/// byte reserved to distinguish full from empty.
pub fn new(size: u32) -> (RingWriter, RingReader) {
    let size = size.clamp(2, 1 << 31).next_power_of_two();
    let shared = Arc::new(Shared {
        buf: UnsafeCell::new(vec![0u8; size as usize].into_boxed_slice()),
        write_head: AtomicU32::new(0),
        read_head: AtomicU32::new(0),
        size,
        size_mask: size - 1,
    });
    (
        RingWriter {
            ring: shared.clone(),
        },
        RingReader { ring: shared },
    )
}

impl RingWriter {
    /// Total write space when the ring is empty.
    pub fn capacity(&self) -> u32 {
        self.ring.size - 1
    }

    /// Lock the ring buffer into physical memory (best effort).
    pub fn mlock(&self) {
        self.ring.mlock();
    }

    /// Number of bytes that can currently be written.
    pub fn write_space(&self) -> u32 {
        let r = self.ring.read_head.load(Ordering::Acquire);
        let w = self.ring.write_head.load(Ordering::Relaxed);
        self.ring.write_space_internal(r, w)
    }

    /// Write `src` as one atomic unit.
    pub fn write(&mut self, src: &[u8]) -> Result<(), RingError> {
        let mut tx = self.begin_write();
        self.amend_write(&mut tx, src)?;
        self.commit_write(tx);
        Ok(())
    }

    /// Start a multi-part write. The returned transaction is initially empty
    /// and should be committed (or abandoned) promptly.
    pub fn begin_write(&mut self) -> RingTransaction {
        RingTransaction {
            read_head: self.ring.read_head.load(Ordering::Acquire),
            write_head: self.ring.write_head.load(Ordering::Relaxed),
        }
    }

    /// Append `src` to a pending transaction.
    ///
    /// On overflow the transaction is dead and must not be committed; no
    /// cleanup is required.
    pub fn amend_write(&mut self, tx: &mut RingTransaction, src: &[u8]) -> Result<(), RingError> {
        if (self
            .ring
            .write_space_internal(tx.read_head, tx.write_head) as usize)
            < src.len()
        {
            return Err(RingError::Overflow);
        }

        tx.write_head = unsafe { self.ring.copy_in(tx.write_head, src) };
        Ok(())
    }

    /// Publish a transaction, making everything amended so far visible to the
    /// reader in one step.
    pub fn commit_write(&mut self, tx: RingTransaction) {
        self.ring
            .write_head
            .store(tx.write_head, Ordering::Release);
    }
}

impl RingReader {
    /// Total write space when the ring is empty.
    pub fn capacity(&self) -> u32 {
        self.ring.size - 1
    }

    /// Number of bytes that can currently be read.
    pub fn read_space(&self) -> u32 {
        let w = self.ring.write_head.load(Ordering::Acquire);
        let r = self.ring.read_head.load(Ordering::Relaxed);
        self.ring.read_space_internal(r, w)
    }

    /// Fill `dst` from the ring without advancing the read head.
    pub fn peek(&self, dst: &mut [u8]) -> Result<(), RingError> {
        let w = self.ring.write_head.load(Ordering::Acquire);
        let r = self.ring.read_head.load(Ordering::Relaxed);
        if (self.ring.read_space_internal(r, w) as usize) < dst.len() {
            return Err(RingError::Underrun);
        }

        unsafe { self.ring.copy_out(r, dst) };
        Ok(())
    }

    /// Fill `dst` from the ring and advance the read head.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<(), RingError> {
        self.peek(dst)?;
        let r = self.ring.read_head.load(Ordering::Relaxed);
        self.ring
            .read_head
            .store((r + dst.len() as u32) & self.ring.size_mask, Ordering::Release);
        Ok(())
    }

    /// Advance the read head without copying.
    pub fn skip(&mut self, size: u32) -> Result<(), RingError> {
        let w = self.ring.write_head.load(Ordering::Acquire);
        let r = self.ring.read_head.load(Ordering::Relaxed);
        if self.ring.read_space_internal(r, w) < size {
            return Err(RingError::Underrun);
        }

        self.ring
            .read_head
            .store((r + size) & self.ring.size_mask, Ordering::Release);
        Ok(())
    }
}
