//! Static driver memory
//!
//! The SIE reads descriptors and buffers through DMA, so the memory
//! can't move once the driver is running. Users allocate an
//! `EndpointState` in a `static` and hand it to the driver.

#![allow(clippy::declare_interior_mutable_const)] // Usage is legit in this module.

use core::{
    cell::UnsafeCell,
    ptr::NonNull,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{bdt::Bdt, buffer::Buffer, EP0_BUFFER_SIZE};

/// An endpoint 0 landing / staging buffer.
#[repr(align(4))]
struct Scratch(UnsafeCell<[u8; EP0_BUFFER_SIZE]>);

impl Scratch {
    const fn new() -> Self {
        Scratch(UnsafeCell::new([0; EP0_BUFFER_SIZE]))
    }

    /// Safety: caller must be the only user of this memory.
    unsafe fn buffer(&self) -> Buffer {
        Buffer::from_raw(NonNull::new_unchecked(self.0.get().cast()), EP0_BUFFER_SIZE)
    }
}

/// Driver state associated with endpoints.
///
/// Each USB driver needs an `EndpointState`. Allocate a `static` object
/// and supply it to your driver constructor. Make sure that states are
/// not shared across USB instances; otherwise, the driver constructor
/// panics.
///
/// The state holds the buffer descriptor table, and the two endpoint 0
/// scratch buffers (one for RX, one for TX).
///
/// ```
/// use kinetis_usbd::EndpointState;
///
/// static EP_STATE: EndpointState = EndpointState::new();
/// ```
pub struct EndpointState {
    bdt: Bdt,
    scratch: [Scratch; 2],
    taken: AtomicBool,
}

unsafe impl Sync for EndpointState {}

impl Default for EndpointState {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointState {
    pub const fn new() -> Self {
        const SCRATCH: Scratch = Scratch::new();
        Self {
            bdt: Bdt::new(),
            scratch: [SCRATCH; 2],
            taken: AtomicBool::new(false),
        }
    }

    /// Acquire the memory.
    ///
    /// Returns `None` if the memory was already taken.
    pub(crate) fn take(&self) -> Option<Resources<'_>> {
        let taken = self.taken.swap(true, Ordering::SeqCst);
        // Safety: the atomic swap guarantees that we only hand out
        // the scratch buffers once.
        (!taken).then(|| unsafe {
            Resources {
                bdt: &self.bdt,
                scratch: [self.scratch[0].buffer(), self.scratch[1].buffer()],
            }
        })
    }
}

/// Memory taken from an [`EndpointState`].
pub(crate) struct Resources<'a> {
    pub bdt: &'a Bdt,
    pub scratch: [Buffer; 2],
}
