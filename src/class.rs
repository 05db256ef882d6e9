//! The seam between the driver and the layers above it

use crate::{device::DeviceState, ep0::Ep0, request::SetupPacket};
use usb_device::UsbError;

/// How a request handler answered a SETUP packet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reply {
    /// Nothing to send or receive. The driver moves straight to the
    /// status stage.
    Status,
    /// The handler queued a data stage on endpoint 0.
    Data,
}

/// Descriptor tables and class / vendor requests
///
/// The driver answers the standard device requests itself. It asks the
/// handler for descriptor contents, and forwards every non-standard
/// request to [`control()`](ControlHandler::control).
///
/// Returning an error from a handler method stalls endpoint 0. The
/// stall clears when the host sends its next SETUP.
///
/// The lifetime `'a` is the lifetime of the driver. Memory handed to
/// endpoint 0, like descriptors or receive buffers, must outlive it.
pub trait ControlHandler<'a> {
    /// Locate a descriptor for GET_DESCRIPTOR.
    ///
    /// `language_id` is only meaningful for string descriptors. Return
    /// `None` if there's no such descriptor. The driver sends no more
    /// than the host requested.
    fn descriptor(&mut self, descriptor_type: u8, index: u8, language_id: u16)
        -> Option<&'a [u8]>;

    /// Handle a class, vendor, or reserved request.
    ///
    /// If the request has a data stage, queue it on `ep0` and answer
    /// [`Reply::Data`]. The default implementation rejects every request.
    fn control(
        &mut self,
        ep0: &mut Ep0<'a>,
        setup: &SetupPacket,
        state: DeviceState,
    ) -> Result<Reply, UsbError> {
        let _ = (ep0, setup, state);
        Err(UsbError::Unsupported)
    }

    /// Called after SET_CONFIGURATION selected `configuration`.
    fn configured(&mut self, configuration: u8) {
        let _ = configuration;
    }

    /// Called after a USB bus reset.
    fn reset(&mut self) {}
}
