//! SETUP packet decoding

use usb_device::{
    control::{Recipient, RequestType},
    UsbDirection,
};

/// A decoded control request.
///
/// Valid until the next SETUP packet arrives.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SetupPacket {
    pub direction: UsbDirection,
    pub request_type: RequestType,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Decode the eight bytes of a SETUP packet.
    pub fn parse(raw: [u8; 8]) -> Self {
        let bm_request_type = raw[0];
        let recipient = match bm_request_type & 0x1F {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        };
        let request_type = match (bm_request_type >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        };
        let direction = if bm_request_type & 0x80 != 0 {
            UsbDirection::In
        } else {
            UsbDirection::Out
        };
        SetupPacket {
            direction,
            request_type,
            recipient,
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    /// For GET_DESCRIPTOR, the (descriptor type, descriptor index) in `value`.
    pub fn descriptor_type_index(&self) -> (u8, u8) {
        ((self.value >> 8) as u8, self.value as u8)
    }
}
