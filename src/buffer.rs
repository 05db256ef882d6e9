//! Endpoint memory buffers
//!
//! A `Buffer` is the raw view of memory that a descriptor points the
//! SIE at. It carries no lifetime; the public API ties buffers to the
//! driver's lifetime before they're reduced to a `Buffer`.

use core::ptr::NonNull;

#[derive(Clone, Copy)]
pub struct Buffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl Buffer {
    /// A buffer without memory, for zero-length transactions.
    pub const fn empty() -> Self {
        Buffer {
            ptr: NonNull::dangling(),
            len: 0,
        }
    }

    /// A buffer that the SIE only reads from.
    pub fn from_slice(data: &[u8]) -> Self {
        Buffer {
            ptr: NonNull::from(data).cast(),
            len: data.len(),
        }
    }

    /// A buffer that the SIE may write into.
    pub fn from_mut_slice(data: &mut [u8]) -> Self {
        let len = data.len();
        Buffer {
            ptr: NonNull::from(data).cast(),
            len,
        }
    }

    /// # Safety
    ///
    /// `ptr` must point to an allocation of at least `len` bytes that
    /// outlives every use of the buffer.
    pub const unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        Buffer { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to the byte at `offset`.
    ///
    /// `offset` may equal the length, which produces a one-past-the-end
    /// pointer for an empty transaction.
    pub fn as_ptr_at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.len);
        self.ptr.as_ptr().wrapping_add(offset)
    }

    /// Shrink the buffer to at most `len` bytes.
    pub fn truncate(self, len: usize) -> Self {
        Buffer {
            ptr: self.ptr,
            len: self.len.min(len),
        }
    }

    /// Copy `data` into the buffer
    ///
    /// Returns the number of bytes written, which is constrained by
    /// the buffer's length.
    pub fn volatile_write(&self, data: &[u8]) -> usize {
        let size = self.len.min(data.len());
        data.iter()
            .take(size)
            .fold(self.ptr.as_ptr(), |dst, src| unsafe {
                dst.write_volatile(*src);
                dst.add(1)
            });
        size
    }

    /// Copy the buffer's content into `data`
    ///
    /// Returns the number of bytes read.
    pub fn volatile_read(&self, data: &mut [u8]) -> usize {
        let size = self.len.min(data.len());
        data.iter_mut()
            .take(size)
            .fold(self.ptr.as_ptr(), |src, dst| unsafe {
                *dst = src.read_volatile();
                src.add(1)
            });
        size
    }

    /// View the first `len` bytes.
    ///
    /// # Safety
    ///
    /// The SIE must not own any descriptor that points into the buffer,
    /// and the memory must be valid for `'b`.
    pub unsafe fn as_slice<'b>(&self, len: usize) -> &'b [u8] {
        core::slice::from_raw_parts(self.ptr.as_ptr(), self.len.min(len))
    }
}
