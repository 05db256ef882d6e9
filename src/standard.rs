//! Standard device requests
//!
//! The driver answers chapter 9 requests itself. Remote wakeup and
//! self-power aren't supported, and only alternate setting 0 exists.

use crate::{
    class::{ControlHandler, Reply},
    device::Device,
    ep0::Ep0,
    request::SetupPacket,
};
use usb_device::{
    control::{Request, RequestType},
    UsbError,
};

/// Answer `setup`, or forward it to the handler.
///
/// Returns an error if endpoint 0 should stall. The device state only
/// changes for accepted requests.
pub(crate) fn dispatch<'a, H: ControlHandler<'a>>(
    ep0: &mut Ep0<'a>,
    device: &mut Device,
    handler: &mut H,
    setup: &SetupPacket,
) -> Result<Reply, UsbError> {
    if setup.request_type != RequestType::Standard {
        return handler.control(ep0, setup, device.state());
    }

    match setup.request {
        Request::GET_STATUS => reply(ep0, setup, &[0, 0]),
        // Features are accepted, but have no effect.
        Request::CLEAR_FEATURE | Request::SET_FEATURE => Ok(Reply::Status),
        Request::SET_ADDRESS => {
            device.set_address(setup.value as u8);
            Ok(Reply::Status)
        }
        Request::GET_DESCRIPTOR => {
            let (descriptor_type, index) = setup.descriptor_type_index();
            let descriptor = handler
                .descriptor(descriptor_type, index, setup.index)
                .ok_or(UsbError::Unsupported)?;
            ep0.send(descriptor, setup.length.into(), None)?;
            Ok(Reply::Data)
        }
        Request::GET_CONFIGURATION => reply(ep0, setup, &[device.configuration()]),
        Request::SET_CONFIGURATION => {
            let configuration = setup.value as u8;
            device.set_configuration(configuration);
            handler.configured(configuration);
            Ok(Reply::Status)
        }
        Request::GET_INTERFACE => reply(ep0, setup, &[0]),
        // No alternate settings
        Request::SET_INTERFACE => Err(UsbError::Unsupported),
        _ => Err(UsbError::Unsupported),
    }
}

/// Send a short reply, no longer than the host asked for.
///
/// Without a data stage, the host only sees the status stage.
fn reply(ep0: &mut Ep0<'_>, setup: &SetupPacket, data: &[u8]) -> Result<Reply, UsbError> {
    let len = data.len().min(setup.length.into());
    if len == 0 {
        return Ok(Reply::Status);
    }
    ep0.send_small(&data[..len])?;
    Ok(Reply::Data)
}
