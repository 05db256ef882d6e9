//! The buffer descriptor table (BDT)
//!
//! Four descriptors per endpoint: (RX, TX) x (even, odd). The table's
//! index is the same encoding the SIE reports through `STAT`, so a
//! completed transaction resolves back to its descriptor by shifting
//! out the two reserved bits.

#![allow(clippy::declare_interior_mutable_const)] // Usage is legit in this module.

use crate::{bd::Bd, ral};

/// Number of endpoints addressable by the controller.
pub const ENDPOINT_COUNT: usize = 16;
/// Descriptors in a complete table.
pub const BD_COUNT: usize = ENDPOINT_COUNT * 4;

/// Transfer direction, from the device's point of view.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Rx = 0,
    Tx = 1,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Rx => Direction::Tx,
            Direction::Tx => Direction::Rx,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PingPong {
    Even = 0,
    Odd = 1,
}

impl PingPong {
    pub fn flip(self) -> Self {
        match self {
            PingPong::Even => PingPong::Odd,
            PingPong::Odd => PingPong::Even,
        }
    }
}

/// Produces an index into the BDT.
pub const fn index(endpoint: usize, direction: Direction, pingpong: PingPong) -> usize {
    endpoint * 4 + direction as usize * 2 + pingpong as usize
}

/// A captured `STAT` register value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Stat(u8);

impl Stat {
    pub const fn new(raw: u8) -> Self {
        Stat(raw)
    }

    #[cfg(test)]
    pub fn from_parts(endpoint: usize, direction: Direction, pingpong: PingPong) -> Self {
        use ral::usb::STAT::{ENDP, ODD, TX};
        Stat(
            (((endpoint as u8) << ENDP::offset) & ENDP::mask)
                | ((direction as u8) << TX::offset)
                | ((pingpong as u8) << ODD::offset),
        )
    }

    pub fn endpoint(self) -> usize {
        use ral::usb::STAT::ENDP;
        ((self.0 & ENDP::mask) >> ENDP::offset) as usize
    }

    #[cfg(test)]
    pub fn direction(self) -> Direction {
        use ral::usb::STAT::TX;
        if self.0 & TX::mask != 0 {
            Direction::Tx
        } else {
            Direction::Rx
        }
    }

    pub fn pingpong(self) -> PingPong {
        use ral::usb::STAT::ODD;
        if self.0 & ODD::mask != 0 {
            PingPong::Odd
        } else {
            PingPong::Even
        }
    }

    /// The BDT index of the completed descriptor.
    pub fn index(self) -> usize {
        (self.0 >> 2) as usize
    }

    #[cfg(any(test, feature = "defmt-03"))]
    pub fn raw(self) -> u8 {
        self.0
    }
}

/// The complete table, as the SIE expects it in memory.
///
/// The hardware only takes bits 31..9 of the base address.
#[repr(C, align(512))]
pub struct Bdt([Bd; BD_COUNT]);

impl Bdt {
    pub const fn new() -> Self {
        const BD: Bd = Bd::new();
        Bdt([BD; BD_COUNT])
    }

    pub fn get(&self, endpoint: usize, direction: Direction, pingpong: PingPong) -> &Bd {
        &self.0[index(endpoint, direction, pingpong)]
    }

    /// Find the descriptor that the SIE just completed.
    pub fn resolve(&self, stat: Stat) -> &Bd {
        &self.0[stat.index()]
    }

    pub fn as_ptr(&self) -> *const Bd {
        self.0.as_ptr()
    }
}
