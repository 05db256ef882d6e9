//! Buffer descriptors (BD)
//!
//! The module implements a RAL-compatible interface for working
//! with the descriptors shared between software and the serial
//! interface engine (SIE). A descriptor is owned by the SIE from the
//! moment software sets `OWN`, until the SIE clears it after the
//! transaction. Software never touches an owned descriptor.

#![allow(non_snake_case, non_upper_case_globals)]

use core::cell::UnsafeCell;

use crate::ral;

/// Volatile cell that conforms to the RAL's register API
#[repr(transparent)]
pub struct VCell<T>(UnsafeCell<T>);

impl<T> VCell<T> {
    pub const fn new(val: T) -> Self {
        VCell(UnsafeCell::new(val))
    }
}

impl<T: Copy> VCell<T> {
    pub fn read(&self) -> T {
        unsafe { self.0.get().read_volatile() }
    }
    pub fn write(&self, val: T) {
        unsafe { self.0.get().write_volatile(val) }
    }
}

#[repr(C)]
pub struct Bd {
    pub CONTROL: VCell<u32>,
    pub ADDRESS: VCell<*mut u8>,
}

#[cfg(target_pointer_width = "32")]
const _: [(); 1] = [(); (core::mem::size_of::<Bd>() == 8) as usize];

/// DATA0 / DATA1 toggle
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum Data01 {
    Data0 = 0,
    Data1 = 1,
}

impl Data01 {
    pub fn flip(self) -> Self {
        match self {
            Data01::Data0 => Data01::Data1,
            Data01::Data1 => Data01::Data0,
        }
    }
}

/// Token PID written back by the SIE
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum Pid {
    Timeout = 0,
    Out = 1,
    Ack = 2,
    Data0 = 3,
    In = 9,
    Nak = 10,
    Data1 = 11,
    Setup = 13,
    Stall = 14,
    DataError = 15,
}

impl Pid {
    pub fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits {
            0 => Pid::Timeout,
            1 => Pid::Out,
            2 => Pid::Ack,
            3 => Pid::Data0,
            9 => Pid::In,
            10 => Pid::Nak,
            11 => Pid::Data1,
            13 => Pid::Setup,
            14 => Pid::Stall,
            15 => Pid::DataError,
            _ => return None,
        })
    }
}

/// Ensures the buffer address lands in memory before ownership moves
/// to the SIE.
fn barrier() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m::asm::dmb();
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}

impl Bd {
    pub const fn new() -> Self {
        Bd {
            CONTROL: VCell::new(0),
            ADDRESS: VCell::new(core::ptr::null_mut()),
        }
    }

    /// Return the descriptor to software, forgetting the buffer.
    pub fn reset(&self) {
        self.CONTROL.write(0);
        self.ADDRESS.write(core::ptr::null_mut());
    }

    /// Indicates if the SIE owns the descriptor.
    pub fn is_owned(&self) -> bool {
        ral::read_reg!(crate::bd, self, CONTROL, OWN == 1)
    }

    /// Hand `len` bytes at `ptr` to the SIE, expecting (or sending) `data01`.
    ///
    /// Data toggle synchronization is always enabled.
    pub fn arm(&self, ptr: *mut u8, len: usize, data01: Data01) {
        self.ADDRESS.write(ptr);
        barrier();
        ral::write_reg!(
            crate::bd,
            self,
            CONTROL,
            BC: len as u32,
            DTS: 1,
            DATA01: data01 as u32,
            OWN: 1
        );
    }

    /// Number of bytes moved by the last transaction.
    pub fn byte_count(&self) -> usize {
        ral::read_reg!(crate::bd, self, CONTROL, BC) as usize
    }

    /// The token that completed this descriptor.
    ///
    /// Only meaningful once the SIE released the descriptor.
    pub fn token(&self) -> Option<Pid> {
        Pid::from_bits(ral::read_reg!(crate::bd, self, CONTROL, TOK_PID))
    }

    #[cfg(test)]
    pub fn data01(&self) -> Data01 {
        if ral::read_reg!(crate::bd, self, CONTROL, DATA01 == 1) {
            Data01::Data1
        } else {
            Data01::Data0
        }
    }

    pub fn address(&self) -> *mut u8 {
        self.ADDRESS.read()
    }

    /// Act like the SIE finishing a transaction on this descriptor.
    #[cfg(test)]
    pub fn complete(&self, pid: Pid, len: usize) {
        ral::modify_reg!(crate::bd, self, CONTROL, OWN: 0, TOK_PID: pid as u32, BC: len as u32);
    }
}

#[allow(dead_code)]
pub mod CONTROL {
    pub mod BDT_STALL {
        pub const offset: u32 = 2;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    /// Data toggle synchronization
    pub mod DTS {
        pub const offset: u32 = 3;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod NINC {
        pub const offset: u32 = 4;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod KEEP {
        pub const offset: u32 = 5;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod DATA01 {
        pub const offset: u32 = 6;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod OWN {
        pub const offset: u32 = 7;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    /// Written back by the SIE, overlapping `BDT_STALL`, `DTS`, `NINC`
    /// and `KEEP`.
    pub mod TOK_PID {
        pub const offset: u32 = 2;
        pub const mask: u32 = 0xF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod BC {
        pub const offset: u32 = 16;
        pub const mask: u32 = 0x3FF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}
