//! Register access layer for the USB-FS controller
//!
//! Definitions follow the RAL conventions (a register block of
//! `RWRegister`s, plus field modules with `offset` and `mask`), so the
//! `ral-registers` macros work on them just as they do for a generated
//! RAL. All controller registers are 8 bits wide, placed on a 4 byte
//! stride.

pub use ral_registers::{modify_reg, read_reg, write_reg, RORegister, RWRegister};

use crate::Peripherals;

#[allow(non_snake_case, non_upper_case_globals, dead_code)]
pub mod usb {
    use super::{RORegister, RWRegister};
    use core::ops::Deref;

    #[repr(C)]
    pub struct RegisterBlock {
        pub PERID: RORegister<u8>,
        _reserved0: [u8; 3],
        pub IDCOMP: RORegister<u8>,
        _reserved1: [u8; 3],
        pub REV: RORegister<u8>,
        _reserved2: [u8; 3],
        pub ADDINFO: RORegister<u8>,
        _reserved3: [u8; 3],
        pub OTGISTAT: RWRegister<u8>,
        _reserved4: [u8; 3],
        pub OTGICR: RWRegister<u8>,
        _reserved5: [u8; 3],
        pub OTGSTAT: RWRegister<u8>,
        _reserved6: [u8; 3],
        pub OTGCTL: RWRegister<u8>,
        _reserved7: [u8; 3 + 0x60],
        pub ISTAT: RWRegister<u8>,
        _reserved8: [u8; 3],
        pub INTEN: RWRegister<u8>,
        _reserved9: [u8; 3],
        pub ERRSTAT: RWRegister<u8>,
        _reserved10: [u8; 3],
        pub ERREN: RWRegister<u8>,
        _reserved11: [u8; 3],
        pub STAT: RORegister<u8>,
        _reserved12: [u8; 3],
        pub CTL: RWRegister<u8>,
        _reserved13: [u8; 3],
        pub ADDR: RWRegister<u8>,
        _reserved14: [u8; 3],
        pub BDTPAGE1: RWRegister<u8>,
        _reserved15: [u8; 3],
        pub FRMNUML: RORegister<u8>,
        _reserved16: [u8; 3],
        pub FRMNUMH: RORegister<u8>,
        _reserved17: [u8; 3],
        pub TOKEN: RWRegister<u8>,
        _reserved18: [u8; 3],
        pub SOFTHLD: RWRegister<u8>,
        _reserved19: [u8; 3],
        pub BDTPAGE2: RWRegister<u8>,
        _reserved20: [u8; 3],
        pub BDTPAGE3: RWRegister<u8>,
        _reserved21: [u8; 3 + 8],
        pub ENDPOINTS: [EndpointRegister; 16],
        pub USBCTRL: RWRegister<u8>,
        _reserved22: [u8; 3],
        pub OBSERVE: RORegister<u8>,
        _reserved23: [u8; 3],
        pub CONTROL: RWRegister<u8>,
        _reserved24: [u8; 3],
        pub USBTRC0: RWRegister<u8>,
        _reserved25: [u8; 3],
    }

    const _: [(); 1] = [(); (core::mem::size_of::<RegisterBlock>() == 0x110) as usize];

    /// The RAL API requires us to treat each endpoint control register
    /// as unique. Wrapping one register lets us index the array and
    /// still use the macros, like `modify_reg!(usb, &usb.ENDPOINTS[n], ENDPT, ...)`.
    #[repr(C)]
    pub struct EndpointRegister {
        pub ENDPT: RWRegister<u8>,
        _reserved: [u8; 3],
    }

    /// A handle to the USB-FS register block.
    #[derive(Clone, Copy)]
    pub struct Instance {
        ptr: *const RegisterBlock,
    }

    impl Instance {
        /// # Safety
        ///
        /// `ptr` must point to a USB-FS register block that's valid for the
        /// lifetime of the instance, and that no one else is using.
        pub const unsafe fn new(ptr: *const RegisterBlock) -> Self {
            Instance { ptr }
        }
    }

    impl Deref for Instance {
        type Target = RegisterBlock;
        fn deref(&self) -> &RegisterBlock {
            unsafe { &*self.ptr }
        }
    }

    unsafe impl Send for Instance {}

    pub mod STAT {
        pub mod ODD {
            pub const offset: u8 = 2;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod TX {
            pub const offset: u8 = 3;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod ENDP {
            pub const offset: u8 = 4;
            pub const mask: u8 = 0xF << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod CTL {
        /// USB enable (device mode)
        pub mod USBENSOFEN {
            pub const offset: u8 = 0;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        /// Reset all ping-pong pointers to the even buffers
        pub mod ODDRST {
            pub const offset: u8 = 1;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod HOSTMODEEN {
            pub const offset: u8 = 3;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        /// Set by the SIE when a SETUP token is received. Token
        /// processing is suspended until software clears it.
        pub mod TXSUSPENDTOKENBUSY {
            pub const offset: u8 = 5;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod ADDR {
        pub mod ADDR {
            pub const offset: u8 = 0;
            pub const mask: u8 = 0x7F << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod LSEN {
            pub const offset: u8 = 7;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod BDTPAGE1 {
        /// Bits 15..9 of the BDT base address
        pub mod BDTBA {
            pub const offset: u8 = 1;
            pub const mask: u8 = 0x7F << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod ENDPT {
        pub mod EPHSHK {
            pub const offset: u8 = 0;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod EPSTALL {
            pub const offset: u8 = 1;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod EPTXEN {
            pub const offset: u8 = 2;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod EPRXEN {
            pub const offset: u8 = 3;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod EPCTLDIS {
            pub const offset: u8 = 4;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod USBCTRL {
        /// Weak pull-downs on D+ and D-
        pub mod PDE {
            pub const offset: u8 = 6;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod SUSP {
            pub const offset: u8 = 7;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod CONTROL {
        /// D+ pull-up when not in OTG mode
        pub mod DPPULLUPNONOTG {
            pub const offset: u8 = 4;
            pub const mask: u8 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }
}

/// Acquire the register block described by `peripherals`.
pub fn instance<P: Peripherals>(peripherals: &P) -> usb::Instance {
    // Safety: Peripherals implementors guarantee that the address
    // is a valid, owned USB-FS register block.
    unsafe { usb::Instance::new(peripherals.usb().cast()) }
}
