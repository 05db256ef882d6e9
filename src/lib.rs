//! A USB full-speed device driver for Kinetis-style USB-FS controllers
//!
//! `kinetis-usbd` drives the endpoint 0 control pipe of a USB-FS
//! controller that uses a buffer descriptor table (BDT) with ping-pong
//! buffers. It answers the standard device requests, and hands
//! descriptors and class / vendor requests to a [`ControlHandler`]. A
//! class layer, like a DFU implementation, uses [`Ep0`] to move the data
//! stages of its requests.
//!
//! To interface the library, you must define a safe implementation of
//! [`Peripherals`]. See the peripherals documentation for more
//! information.
//!
//! # Example
//!
//! ```no_run
//! use kinetis_usbd::{ControlHandler, Driver, EndpointState, Peripherals};
//!
//! struct Usb0;
//! unsafe impl Peripherals for Usb0 {
//!     fn usb(&self) -> *const () {
//!         0x4007_2000 as *const ()
//!     }
//! }
//!
//! static DEVICE: [u8; 18] = [
//!     18, 1, 0x00, 0x02, 0, 0, 0, 64,
//!     0xc9, 0x1d, 0x05, 0x00, 0x00, 0x01, 0, 0, 0, 1,
//! ];
//!
//! struct Descriptors;
//! impl ControlHandler<'static> for Descriptors {
//!     fn descriptor(&mut self, ty: u8, _: u8, _: u16) -> Option<&'static [u8]> {
//!         (ty == 1).then_some(&DEVICE[..])
//!     }
//! }
//!
//! static EP_STATE: EndpointState = EndpointState::new();
//!
//! let mut driver = Driver::new(Usb0, &EP_STATE);
//! driver.initialize();
//! driver.attach();
//! let mut handler = Descriptors;
//! loop {
//!     driver.poll(&mut handler);
//! }
//! ```

#![no_std]

#[cfg(feature = "defmt-03")]
extern crate defmt_03 as defmt;

#[macro_use]
mod log;

mod bd;
mod bdt;
mod buffer;
mod class;
mod control;
mod device;
mod driver;
mod ep0;
mod pipe;
mod ral;
mod request;
mod standard;
mod state;

#[cfg(test)]
mod sim;

pub use class::{ControlHandler, Reply};
pub use control::Stage;
pub use device::DeviceState;
pub use driver::Driver;
pub use ep0::Ep0;
pub use pipe::Completion;
pub use request::SetupPacket;
pub use state::EndpointState;

/// Size of each endpoint 0 scratch buffer, and the largest endpoint 0
/// max packet size.
pub const EP0_BUFFER_SIZE: usize = 64;

/// A type that owns the USB-FS register block
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that owns the
/// USB-FS register block. The pointer returned by [`usb()`](Peripherals::usb)
/// is assumed to be valid, and will be cast to a register definition.
///
/// # Example
///
/// ```
/// use kinetis_usbd::Peripherals;
///
/// /// Owns USB0 on a K20.
/// struct Usb0 {
///     _private: (),
/// }
///
/// unsafe impl Peripherals for Usb0 {
///     fn usb(&self) -> *const () {
///         0x4007_2000 as *const ()
///     }
/// }
///
/// let usb0 = Usb0 { _private: () };
/// assert_eq!(usb0.usb(), 0x4007_2000 as *const ());
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the USB-FS registers
    fn usb(&self) -> *const ();
}
