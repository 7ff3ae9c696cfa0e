//! Send-buffer arena.
//!
//! This module is the ONLY place in the workspace where unsafe memory
//! manipulation is allowed. All invariants are enforced here so the rest of
//! the system stays 100% safe.
//!
//! The protocol: a manager owns the current slab and vends at most one open
//! chunk at a time (enforced by the mutable borrow). The producer writes into
//! the reservation, then closes the chunk, which freezes it into an immutable
//! [`SendChunk`] and advances the slab offset by the bytes actually written.
//! A closed chunk is cheap to clone and may sit in any number of session send
//! queues; its bytes stay valid until the last clone drops, even after the
//! manager has moved on to fresh slabs.

#![allow(unsafe_code)]

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::fmt;
use std::io;
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::debug;

/// Default size of one slab.
pub const DEFAULT_SLAB_SIZE: usize = 4096;

/// Cache-line alignment to avoid false sharing between chunks.
const SLAB_ALIGN: usize = 64;

/// A pinned, zero-initialized allocation shared by the chunks carved from it.
///
/// Invariants:
/// - Memory is allocated once and never moved.
/// - Freed only when the last `Arc<Slab>` drops.
/// - Disjoint chunk ranges: the manager hands out monotonically increasing,
///   non-overlapping reservations, and only the single open chunk writes.
struct Slab {
    ptr: NonNull<u8>,
    cap: usize,
}

// SAFETY: the slab is plain memory; range disjointness is enforced by the
// manager, and closed ranges are only ever read.
unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

impl Slab {
    fn alloc(cap: usize) -> Arc<Self> {
        assert!(cap > 0, "slab must be non-empty");
        let layout = Layout::from_size_align(cap, SLAB_ALIGN).expect("slab layout");
        // SAFETY: layout has non-zero size; zeroed memory keeps every byte of
        // the slab initialized so chunks can expose plain slices.
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        Arc::new(Self { ptr, cap })
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        // SAFETY: allocated in `Slab::alloc` with the identical layout.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.cap, SLAB_ALIGN);
            dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

/// Slab allocator for outbound packets.
///
/// Not thread-safe: one manager per producing context. Concurrent
/// producers each hold their own manager.
pub struct SendBufferManager {
    current: Option<Arc<Slab>>,
    offset: usize,
    slab_size: usize,
}

impl SendBufferManager {
    #[must_use]
    pub fn new(slab_size: usize) -> Self {
        assert!(slab_size > 0, "slab size must be non-zero");
        Self {
            current: None,
            offset: 0,
            slab_size,
        }
    }

    fn free(&self) -> usize {
        self.current.as_ref().map_or(0, |slab| slab.cap - self.offset)
    }

    /// Reserve `size` bytes in the current slab, allocating a fresh slab
    /// first when the current one has less free space than requested.
    ///
    /// The returned chunk borrows the manager, so a second `open` before
    /// `close` is rejected at compile time.
    pub fn open(&mut self, size: usize) -> OpenChunk<'_> {
        assert!(size > 0, "cannot reserve an empty chunk");
        if self.current.is_none() || self.free() < size {
            let cap = self.slab_size.max(size);
            self.current = Some(Slab::alloc(cap));
            self.offset = 0;
            debug!(bytes = cap, "allocated send slab");
        }
        let base = self.offset;
        OpenChunk {
            base,
            reserved: size,
            written: 0,
            manager: self,
        }
    }
}

impl Default for SendBufferManager {
    fn default() -> Self {
        Self::new(DEFAULT_SLAB_SIZE)
    }
}

/// An in-progress reservation in the current slab.
///
/// Dropping an unclosed chunk releases the reservation without advancing the
/// slab offset; the bytes are simply reused by the next `open`.
pub struct OpenChunk<'a> {
    base: usize,
    reserved: usize,
    written: usize,
    manager: &'a mut SendBufferManager,
}

impl OpenChunk<'_> {
    fn slab(&self) -> &Arc<Slab> {
        self.manager
            .current
            .as_ref()
            .expect("open chunk without a backing slab")
    }

    #[inline]
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    #[inline]
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.reserved - self.written
    }

    /// Writable tail of the reservation.
    pub fn unwritten_mut(&mut self) -> &mut [u8] {
        let slab = self.manager
            .current
            .as_ref()
            .expect("open chunk without a backing slab");
        let start = self.base + self.written;
        debug_assert!(start + self.remaining() <= slab.cap);
        // SAFETY: the range [base, base + reserved) is exclusively ours while
        // this chunk is open, lies inside the slab, and is initialized
        // (slabs are zeroed at allocation).
        unsafe {
            std::slice::from_raw_parts_mut(slab.ptr.as_ptr().add(start), self.reserved - self.written)
        }
    }

    /// Commit `n` bytes written into the reservation.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the remaining reservation.
    pub fn on_written(&mut self, n: usize) {
        assert!(n <= self.remaining(), "write past chunk reservation");
        self.written += n;
    }

    /// Copy `src` into the reservation and commit it.
    pub fn put_slice(&mut self, src: &[u8]) {
        self.unwritten_mut()[..src.len()].copy_from_slice(src);
        self.on_written(src.len());
    }

    /// Freeze into an immutable, shareable chunk. The slab offset advances by
    /// the bytes written, not by the reservation, so a chunk that framed less
    /// than its envelope only pays for what it wrote.
    #[must_use]
    pub fn close(self) -> SendChunk {
        let slab = self.slab().clone();
        self.manager.offset = self.base + self.written;
        SendChunk {
            slab,
            base: self.base,
            len: self.written,
        }
    }
}

impl io::Write for OpenChunk<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() > self.remaining() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "chunk reservation overflow",
            ));
        }
        self.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A closed, immutable, reference-counted byte slice representing exactly one
/// framed outbound packet. Cloning shares the underlying slab.
#[derive(Clone)]
pub struct SendChunk {
    slab: Arc<Slab>,
    base: usize,
    len: usize,
}

impl SendChunk {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The frozen packet bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the range was initialized before close and is never
        // written again; the Arc pins the slab.
        unsafe { std::slice::from_raw_parts(self.slab.ptr.as_ptr().add(self.base), self.len) }
    }
}

impl fmt::Debug for SendChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendChunk")
            .field("len", &self.len)
            .finish()
    }
}
