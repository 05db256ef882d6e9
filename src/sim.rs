//! A host and SIE that talk to the driver through its memory
//!
//! The register block is ordinary memory. The host emulation moves
//! bytes through descriptors the way the SIE does: it only uses a
//! descriptor that software handed over, writes back the token and byte
//! count, clears `OWN`, then raises `TOKDNE` with the matching `STAT`.

extern crate std;

use std::{boxed::Box, vec::Vec};

use crate::{
    bd::{Data01, Pid},
    bdt::{Direction, PingPong, Stat},
    buffer::Buffer,
    driver::Interrupts,
    ral::{self, usb::RegisterBlock},
    ControlHandler, Driver, EndpointState, Peripherals,
};
use core::ptr::NonNull;
use usb_device::bus::PollResult;

/// Offset of `STAT`, which software can't write.
const STAT_OFFSET: usize = 0x90;

struct TestPeripherals(*const RegisterBlock);

unsafe impl Peripherals for TestPeripherals {
    fn usb(&self) -> *const () {
        self.0.cast()
    }
}

/// One IN data packet, as the host saw it.
#[derive(Debug, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub data01: Data01,
}

pub struct Host<'a, H> {
    regs: &'static RegisterBlock,
    /// The SIE's ping-pong pointers for endpoint 0.
    rx: PingPong,
    tx: PingPong,
    pub driver: Driver<'a>,
    pub handler: H,
}

impl<'a, H: ControlHandler<'a>> Host<'a, H> {
    /// Create and initialize a driver, without resetting the bus.
    pub fn new(state: &'a EndpointState, handler: H) -> Self {
        // Safety: all-zero is a valid register block.
        let regs: &'static RegisterBlock = Box::leak(Box::new(unsafe { core::mem::zeroed() }));
        let mut driver = Driver::new(TestPeripherals(regs), state);
        driver.initialize();
        Host {
            regs,
            rx: PingPong::Even,
            tx: PingPong::Even,
            driver,
            handler,
        }
    }

    pub fn regs(&self) -> &'static RegisterBlock {
        self.regs
    }

    /// Signal `flags`, and let the driver poll once.
    pub fn interrupt(&mut self, flags: Interrupts) -> PollResult {
        // ISTAT is write-1-to-clear on hardware. Here, it's plain memory,
        // so restore it after the driver is done.
        ral::write_reg!(ral::usb, self.regs, ISTAT, flags.bits());
        let result = self.driver.poll(&mut self.handler);
        ral::write_reg!(ral::usb, self.regs, ISTAT, 0);
        result
    }

    pub fn reset(&mut self) -> PollResult {
        self.rx = PingPong::Even;
        self.tx = PingPong::Even;
        self.interrupt(Interrupts::USBRST)
    }

    fn token_done(&mut self, stat: Stat) -> PollResult {
        // Safety: STAT is in the register block, and it's only
        // read by the driver.
        unsafe {
            let base = self.regs as *const RegisterBlock as *mut u8;
            base.add(STAT_OFFSET).write_volatile(stat.raw());
        }
        self.interrupt(Interrupts::TOKDNE)
    }

    /// Indicates if endpoint 0 answers with a STALL handshake.
    pub fn stalled(&self) -> bool {
        ral::read_reg!(ral::usb, &self.regs.ENDPOINTS[0], ENDPT, EPSTALL == 1)
    }

    /// The address the device answers to.
    pub fn address(&self) -> u8 {
        ral::read_reg!(ral::usb, self.regs, ADDR, ADDR)
    }

    /// Send a SETUP packet that's `len` bytes long.
    pub fn setup_with_len(&mut self, raw: [u8; 8], len: usize) -> PollResult {
        // A SETUP clears the stall.
        ral::modify_reg!(ral::usb, &self.regs.ENDPOINTS[0], ENDPT, EPSTALL: 0);

        let bd = self.driver.ep0.bdt().get(0, Direction::Rx, self.rx);
        assert!(bd.is_owned(), "No RX descriptor for SETUP");
        assert!(bd.byte_count() >= 8);
        let address = NonNull::new(bd.address()).expect("RX descriptor without a buffer");
        unsafe { Buffer::from_raw(address, 8) }.volatile_write(&raw);
        bd.complete(Pid::Setup, len);
        ral::modify_reg!(ral::usb, self.regs, CTL, TXSUSPENDTOKENBUSY: 1);

        let stat = Stat::from_parts(0, Direction::Rx, self.rx);
        self.rx = self.rx.flip();
        self.token_done(stat)
    }

    pub fn setup(&mut self, raw: [u8; 8]) -> PollResult {
        self.setup_with_len(raw, 8)
    }

    /// Ask for an IN packet. Returns `None` if the device NAKs or stalls.
    pub fn host_in(&mut self) -> Option<Packet> {
        if self.stalled() {
            return None;
        }
        let bd = self.driver.ep0.bdt().get(0, Direction::Tx, self.tx);
        if !bd.is_owned() {
            return None;
        }
        let len = bd.byte_count();
        let data = if len == 0 {
            Vec::new()
        } else {
            unsafe { core::slice::from_raw_parts(bd.address(), len) }.to_vec()
        };
        let data01 = bd.data01();
        bd.complete(Pid::In, len);

        let stat = Stat::from_parts(0, Direction::Tx, self.tx);
        self.tx = self.tx.flip();
        self.token_done(stat);
        Some(Packet { data, data01 })
    }

    /// Send an OUT packet. Returns the toggle that the device expected,
    /// or `None` if the device NAKs or stalls.
    pub fn host_out(&mut self, data: &[u8]) -> Option<Data01> {
        if self.stalled() {
            return None;
        }
        let bd = self.driver.ep0.bdt().get(0, Direction::Rx, self.rx);
        if !bd.is_owned() {
            return None;
        }
        assert!(data.len() <= bd.byte_count(), "Device would see babble");
        if let Some(address) = NonNull::new(bd.address()) {
            unsafe { Buffer::from_raw(address, data.len()) }.volatile_write(data);
        }
        let data01 = bd.data01();
        bd.complete(Pid::Out, data.len());

        let stat = Stat::from_parts(0, Direction::Rx, self.rx);
        self.rx = self.rx.flip();
        self.token_done(stat);
        Some(data01)
    }

    fn max_packet_size(&self) -> usize {
        self.driver.ep0.max_packet_size()
    }

    /// Run a device-to-host control transfer.
    ///
    /// Returns `None` if the device stalled the request.
    pub fn control_in(&mut self, setup: [u8; 8]) -> Option<Vec<u8>> {
        let requested = usize::from(u16::from_le_bytes([setup[6], setup[7]]));
        self.setup(setup);
        if self.stalled() {
            return None;
        }

        let mps = self.max_packet_size();
        let mut data = Vec::new();
        let mut expected = Data01::Data1;
        loop {
            let packet = self.host_in().expect("Device NAK'd the data stage");
            assert_eq!(packet.data01, expected);
            expected = expected.flip();
            data.extend_from_slice(&packet.data);
            if packet.data.len() < mps || data.len() >= requested {
                break;
            }
        }

        assert_eq!(self.host_out(&[]), Some(Data01::Data1));
        Some(data)
    }

    /// Run a host-to-device control transfer.
    ///
    /// Returns `false` if the device stalled the request.
    pub fn control_out(&mut self, setup: [u8; 8], data: &[u8]) -> bool {
        self.setup(setup);
        if self.stalled() {
            return false;
        }

        let mut expected = Data01::Data1;
        for chunk in data.chunks(self.max_packet_size()) {
            assert_eq!(self.host_out(chunk), Some(expected));
            expected = expected.flip();
        }

        let status = self.host_in().expect("Device NAK'd the status stage");
        assert!(status.data.is_empty());
        assert_eq!(status.data01, Data01::Data1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{Host, Vec};
    use crate::{
        bd::Data01,
        bdt::{Direction, PingPong},
        driver::Interrupts,
        ral, Completion, ControlHandler, DeviceState, Ep0, EndpointState, Reply, SetupPacket,
        Stage,
    };
    use core::cell::{Cell, RefCell};
    use usb_device::{
        bus::PollResult,
        control::{Request, RequestType},
        UsbError,
    };

    static DEVICE: [u8; 18] = [
        18, 1, 0x00, 0x02, 0, 0, 0, 8, 0xc9, 0x1d, 0x05, 0x00, 0x00, 0x01, 1, 2, 0, 1,
    ];

    static CONFIGURATION: [u8; 64] = {
        let mut configuration = [0; 64];
        configuration[0] = 9;
        configuration[1] = 2;
        configuration[2] = 64;
        configuration[4] = 1;
        configuration[5] = 1;
        configuration[7] = 0x80;
        configuration[8] = 50;
        configuration
    };

    const fn get_descriptor(descriptor_type: u8, index: u8, length: u16) -> [u8; 8] {
        let length = length.to_le_bytes();
        [0x80, Request::GET_DESCRIPTOR, index, descriptor_type, 0, 0, length[0], length[1]]
    }

    const fn set_address(address: u8) -> [u8; 8] {
        [0x00, Request::SET_ADDRESS, address, 0, 0, 0, 0, 0]
    }

    const fn set_configuration(value: u8) -> [u8; 8] {
        [0x00, Request::SET_CONFIGURATION, value, 0, 0, 0, 0, 0]
    }

    const GET_CONFIGURATION: [u8; 8] = [0x80, Request::GET_CONFIGURATION, 0, 0, 0, 0, 1, 0];
    const GET_STATUS: [u8; 8] = [0x80, Request::GET_STATUS, 0, 0, 0, 0, 2, 0];
    const GET_INTERFACE: [u8; 8] = [0x81, Request::GET_INTERFACE, 0, 0, 0, 0, 1, 0];
    const SET_INTERFACE: [u8; 8] = [0x01, Request::SET_INTERFACE, 1, 0, 0, 0, 0, 0];

    const DFU_DNLOAD: u8 = 1;

    const fn dfu_dnload(length: u16) -> [u8; 8] {
        let length = length.to_le_bytes();
        [0x21, DFU_DNLOAD, 0, 0, 0, 0, length[0], length[1]]
    }

    /// Answers descriptors, and rejects every class request.
    #[derive(Default)]
    struct Descriptors {
        configured: Option<u8>,
        resets: usize,
    }

    impl<'a> ControlHandler<'a> for Descriptors {
        fn descriptor(&mut self, descriptor_type: u8, index: u8, _: u16) -> Option<&'a [u8]> {
            match (descriptor_type, index) {
                (1, 0) => Some(&DEVICE),
                (2, 0) => Some(&CONFIGURATION),
                _ => None,
            }
        }
        fn configured(&mut self, configuration: u8) {
            self.configured = Some(configuration);
        }
        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    /// Receives one DFU download into its buffer.
    struct Download<'a> {
        buffer: Option<&'a mut [u8]>,
        on_done: Option<Completion<'a>>,
    }

    impl<'a> ControlHandler<'a> for Download<'a> {
        fn descriptor(&mut self, _: u8, _: u8, _: u16) -> Option<&'a [u8]> {
            None
        }
        fn control(
            &mut self,
            ep0: &mut Ep0<'a>,
            setup: &SetupPacket,
            _: DeviceState,
        ) -> Result<Reply, UsbError> {
            if setup.request_type != RequestType::Class || setup.request != DFU_DNLOAD {
                return Err(UsbError::Unsupported);
            }
            let buffer = self.buffer.take().ok_or(UsbError::WouldBlock)?;
            let len = usize::from(setup.length).min(buffer.len());
            ep0.receive(&mut buffer[..len], self.on_done.take())?;
            Ok(Reply::Data)
        }
    }

    /// Answers one vendor IN request from borrowed memory.
    struct Upload<'a> {
        data: &'a [u8],
        on_done: Option<Completion<'a>>,
    }

    impl<'a> ControlHandler<'a> for Upload<'a> {
        fn descriptor(&mut self, _: u8, _: u8, _: u16) -> Option<&'a [u8]> {
            None
        }
        fn control(
            &mut self,
            ep0: &mut Ep0<'a>,
            setup: &SetupPacket,
            _: DeviceState,
        ) -> Result<Reply, UsbError> {
            if setup.request_type != RequestType::Vendor {
                return Err(UsbError::Unsupported);
            }
            ep0.send(self.data, setup.length.into(), self.on_done.take())?;
            Ok(Reply::Data)
        }
    }

    #[test]
    fn initialize() {
        let state = EndpointState::new();
        let host = Host::new(&state, Descriptors::default());
        let regs = host.regs();
        let bdt = host.driver.ep0.bdt().as_ptr() as usize;
        assert_eq!(
            ral::read_reg!(ral::usb, regs, BDTPAGE1),
            (((bdt >> 9) & 0x7F) as u8) << 1
        );
        assert_eq!(ral::read_reg!(ral::usb, regs, BDTPAGE2), (bdt >> 16) as u8);
        assert_eq!(ral::read_reg!(ral::usb, regs, BDTPAGE3), (bdt >> 24) as u8);
        assert!(ral::read_reg!(ral::usb, regs, CTL, USBENSOFEN == 1));
        assert_eq!(ral::read_reg!(ral::usb, regs, INTEN), 0);
        assert_eq!(host.driver.state(), DeviceState::Disabled);
    }

    #[test]
    #[should_panic(expected = "Endpoint state already assigned")]
    fn state_assigned_once() {
        let state = EndpointState::new();
        let _first = Host::new(&state, Descriptors::default());
        let _second = Host::new(&state, Descriptors::default());
    }

    #[test]
    fn interrupts() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.driver.set_interrupts(true);
        assert_eq!(
            ral::read_reg!(ral::usb, host.regs(), INTEN),
            (Interrupts::USBRST
                | Interrupts::ERROR
                | Interrupts::TOKDNE
                | Interrupts::SLEEP
                | Interrupts::RESUME
                | Interrupts::STALL)
                .bits()
        );
        assert_eq!(ral::read_reg!(ral::usb, host.regs(), ERREN), 0xBF);
        host.driver.set_interrupts(false);
        assert_eq!(ral::read_reg!(ral::usb, host.regs(), INTEN), 0);

        assert!(matches!(host.interrupt(Interrupts::SLEEP), PollResult::Suspend));
        assert!(matches!(host.interrupt(Interrupts::RESUME), PollResult::Resume));
        assert!(matches!(host.interrupt(Interrupts::SOFTOK), PollResult::None));

        host.driver.attach();
        assert!(ral::read_reg!(ral::usb, host.regs(), CONTROL, DPPULLUPNONOTG == 1));
        host.driver.detach();
        assert!(ral::read_reg!(ral::usb, host.regs(), CONTROL, DPPULLUPNONOTG == 0));
    }

    #[test]
    fn bus_reset() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        ral::write_reg!(ral::usb, host.regs(), ADDR, 0x55);
        ral::write_reg!(ral::usb, &host.regs().ENDPOINTS[2], ENDPT, 0x0F);

        assert!(matches!(host.reset(), PollResult::Reset));
        assert_eq!(host.handler.resets, 1);
        assert_eq!(host.driver.state(), DeviceState::Default);
        assert_eq!(host.driver.stage(), Stage::Idle);
        assert_eq!(host.address(), 0);
        assert_eq!(ral::read_reg!(ral::usb, &host.regs().ENDPOINTS[0], ENDPT), 0x0D);
        assert_eq!(ral::read_reg!(ral::usb, &host.regs().ENDPOINTS[2], ENDPT), 0);
        assert!(ral::read_reg!(ral::usb, host.regs(), CTL, ODDRST == 0));

        // Ready for a SETUP in the even slot
        let bd = host.driver.ep0.bdt().get(0, Direction::Rx, PingPong::Even);
        assert!(bd.is_owned());
        assert_eq!(bd.byte_count(), 64);
        assert_eq!(bd.data01(), Data01::Data0);
    }

    #[test]
    fn get_device_descriptor_in_chunks() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.driver.set_ep0_max_packet_size(8);
        host.reset();

        let setup = get_descriptor(1, 0, 64);
        assert!(matches!(
            host.setup(setup),
            PollResult::Data { ep_setup: 1, .. }
        ));
        assert_eq!(host.driver.stage(), Stage::Data);

        let mut lengths = Vec::new();
        let mut data = Vec::new();
        let mut expected = Data01::Data1;
        while let Some(packet) = host.host_in() {
            assert_eq!(packet.data01, expected);
            expected = expected.flip();
            lengths.push(packet.data.len());
            data.extend_from_slice(&packet.data);
        }
        assert_eq!(lengths, [8, 8, 2]);
        assert_eq!(data, DEVICE);
        assert_eq!(host.driver.stage(), Stage::Status);

        assert_eq!(host.host_out(&[]), Some(Data01::Data1));
        assert_eq!(host.driver.stage(), Stage::Idle);

        // And again, through the ping-pong slots we're in now
        assert_eq!(host.control_in(setup).unwrap(), DEVICE);
    }

    #[test]
    fn get_descriptor_capped_at_requested() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();
        assert_eq!(host.control_in(get_descriptor(1, 0, 8)).unwrap(), &DEVICE[..8]);
        assert_eq!(host.control_in(get_descriptor(1, 0, 255)).unwrap(), DEVICE);
    }

    #[test]
    fn zero_length_packet_terminates_short_transfer() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();

        host.setup(get_descriptor(2, 0, 255));
        let first = host.host_in().unwrap();
        assert_eq!(first.data, CONFIGURATION);
        let zlp = host.host_in().unwrap();
        assert!(zlp.data.is_empty());
        assert_eq!(zlp.data01, Data01::Data0);
        // Data stage is over
        assert!(host.host_in().is_none());
        assert_eq!(host.host_out(&[]), Some(Data01::Data1));
        assert_eq!(host.driver.stage(), Stage::Idle);
    }

    #[test]
    fn no_zero_length_packet_when_exact() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();

        host.setup(get_descriptor(2, 0, 64));
        assert_eq!(host.host_in().unwrap().data, CONFIGURATION);
        assert!(host.host_in().is_none());
        assert_eq!(host.driver.stage(), Stage::Status);
        assert_eq!(host.host_out(&[]), Some(Data01::Data1));
    }

    #[test]
    fn unknown_descriptor_stalls() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();
        assert!(host.control_in(get_descriptor(3, 0, 255)).is_none());
        assert!(host.stalled());
        // The next SETUP recovers
        assert_eq!(host.control_in(get_descriptor(1, 0, 18)).unwrap(), DEVICE);
    }

    #[test]
    fn address_commits_after_status() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();

        host.setup(set_address(42));
        assert_eq!(host.driver.state(), DeviceState::SettingAddress);
        assert_eq!(host.driver.stage(), Stage::Status);
        assert_eq!(host.address(), 0);
        assert!(ral::read_reg!(ral::usb, host.regs(), CTL, TXSUSPENDTOKENBUSY == 0));

        let status = host.host_in().unwrap();
        assert!(status.data.is_empty());
        assert_eq!(status.data01, Data01::Data1);
        assert_eq!(host.address(), 42);
        assert_eq!(host.driver.address(), 42);
        assert_eq!(host.driver.state(), DeviceState::Address);
        assert_eq!(host.driver.stage(), Stage::Idle);

        // Changes only once
        assert_eq!(host.control_in(get_descriptor(1, 0, 18)).unwrap(), DEVICE);
        assert_eq!(host.address(), 42);
    }

    #[test]
    fn address_is_seven_bits() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();
        assert!(host.control_out(set_address(0xFF), &[]));
        assert_eq!(host.address(), 0x7F);
    }

    #[test]
    fn configuration_round_trip() {
        for value in [0u8, 1, 255] {
            let state = EndpointState::new();
            let mut host = Host::new(&state, Descriptors::default());
            host.reset();
            assert!(host.control_out(set_address(3), &[]));

            assert!(host.control_out(set_configuration(value), &[]));
            assert_eq!(host.driver.state(), DeviceState::Configured);
            assert_eq!(host.driver.configuration(), value);
            assert_eq!(host.handler.configured, Some(value));
            assert_eq!(host.control_in(GET_CONFIGURATION).unwrap(), [value]);
        }
    }

    #[test]
    fn status_and_interface_queries() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();
        assert_eq!(host.control_in(GET_STATUS).unwrap(), [0, 0]);
        assert_eq!(host.control_in(GET_INTERFACE).unwrap(), [0]);
        assert_eq!(host.control_in(GET_CONFIGURATION).unwrap(), [0]);
    }

    #[test]
    fn features_are_accepted() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();
        // DEVICE_REMOTE_WAKEUP, then ENDPOINT_HALT on EP1 IN
        assert!(host.control_out([0x00, Request::SET_FEATURE, 1, 0, 0, 0, 0, 0], &[]));
        assert!(host.control_out([0x02, Request::CLEAR_FEATURE, 0, 0, 0x81, 0, 0, 0], &[]));
        assert_eq!(host.driver.state(), DeviceState::Default);
    }

    #[test]
    fn set_interface_is_rejected() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();
        assert!(host.control_out(set_configuration(1), &[]));

        assert!(!host.control_out(SET_INTERFACE, &[]));
        assert!(host.stalled());
        assert_eq!(host.driver.state(), DeviceState::Configured);
        assert_eq!(host.driver.configuration(), 1);
        assert_eq!(host.driver.stage(), Stage::Idle);

        // The host saw the stall
        host.interrupt(Interrupts::STALL);
        assert!(!host.stalled());
        assert_eq!(host.control_in(GET_CONFIGURATION).unwrap(), [1]);
    }

    #[test]
    fn non_standard_requests_are_rejected() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();
        assert!(host.control_out(set_address(9), &[]));

        assert!(!host.control_out(dfu_dnload(0), &[]));
        assert!(host.stalled());
        assert!(host.control_in([0xC0, 0x33, 0, 0, 0, 0, 4, 0]).is_none());
        assert!(host.control_in([0xE0, 0x00, 0, 0, 0, 0, 4, 0]).is_none());
        assert_eq!(host.driver.state(), DeviceState::Address);
        assert_eq!(host.address(), 9);
    }

    #[test]
    fn short_setup_is_rejected() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();
        host.setup_with_len(set_address(5), 4);
        assert!(host.stalled());
        assert_eq!(host.driver.state(), DeviceState::Default);
        assert!(host.control_out(set_address(5), &[]));
        assert_eq!(host.address(), 5);
    }

    #[test]
    fn class_download() {
        let received = RefCell::new(Vec::new());
        let calls = Cell::new(0);
        let mut on_done = |data: &[u8], len: usize| {
            assert_eq!(data.len(), len);
            received.borrow_mut().extend_from_slice(data);
            calls.set(calls.get() + 1);
        };
        let mut memory = [0u8; 256];
        let state = EndpointState::new();
        let mut host = Host::new(
            &state,
            Download {
                buffer: Some(&mut memory),
                on_done: Some(&mut on_done),
            },
        );
        host.reset();

        let firmware: Vec<u8> = (0..200u8).collect();
        assert!(host.control_out(dfu_dnload(200), &firmware));
        assert_eq!(calls.get(), 1);
        assert_eq!(*received.borrow(), firmware);
        assert_eq!(host.driver.stage(), Stage::Idle);
    }

    #[test]
    fn class_upload_completion() {
        let calls = Cell::new(0);
        let mut on_done = |data: &[u8], residual: usize| {
            assert_eq!(data.len(), 100);
            assert_eq!(residual, 0);
            calls.set(calls.get() + 1);
        };
        let data: Vec<u8> = (0..100u8).rev().collect();
        let state = EndpointState::new();
        let mut host = Host::new(
            &state,
            Upload {
                data: &data,
                on_done: Some(&mut on_done),
            },
        );
        host.reset();

        host.setup([0xC0, 0x01, 0, 0, 0, 0, 0, 1]);
        assert_eq!(host.host_in().unwrap().data, &data[..64]);
        assert_eq!(calls.get(), 0);
        assert_eq!(host.host_in().unwrap().data, &data[64..]);
        assert_eq!(calls.get(), 1);
        assert_eq!(host.host_out(&[]), Some(Data01::Data1));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn setup_preempts_data_stage() {
        let called = Cell::new(false);
        let mut on_done = |_: &[u8], _: usize| called.set(true);
        let mut memory = [0u8; 100];
        let state = EndpointState::new();
        let mut host = Host::new(
            &state,
            Download {
                buffer: Some(&mut memory),
                on_done: Some(&mut on_done),
            },
        );
        host.reset();

        host.setup(dfu_dnload(100));
        assert_eq!(host.host_out(&[0xAA; 64]), Some(Data01::Data1));
        assert_eq!(host.driver.stage(), Stage::Data);

        // The host gives up, and starts over
        host.setup(GET_STATUS);
        assert_eq!(host.driver.stage(), Stage::Data);
        let reply = host.host_in().unwrap();
        assert_eq!(reply.data, [0, 0]);
        assert_eq!(reply.data01, Data01::Data1);
        assert_eq!(host.host_out(&[]), Some(Data01::Data1));
        assert_eq!(host.driver.stage(), Stage::Idle);
        assert!(!called.get());

        assert_eq!(host.control_in(GET_INTERFACE).unwrap(), [0]);
        assert!(!called.get());
    }

    #[test]
    fn setup_preempts_status_stage() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();

        host.setup(GET_CONFIGURATION);
        assert_eq!(host.host_in().unwrap().data, [0]);
        assert_eq!(host.driver.stage(), Stage::Status);

        // No status stage, just another request
        host.setup(set_address(7));
        assert_eq!(host.driver.stage(), Stage::Status);
        assert_eq!(host.driver.state(), DeviceState::SettingAddress);
        assert!(host.host_in().unwrap().data.is_empty());
        assert_eq!(host.address(), 7);
    }

    #[test]
    fn setup_preempts_in_data_stage() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.driver.set_ep0_max_packet_size(8);
        host.reset();

        host.setup(get_descriptor(1, 0, 64));
        assert_eq!(host.host_in().unwrap().data, &DEVICE[..8]);
        assert_eq!(host.driver.stage(), Stage::Data);

        // The host gives up on the descriptor
        host.setup(GET_STATUS);
        assert_eq!(host.driver.stage(), Stage::Data);
        let reply = host.host_in().unwrap();
        assert_eq!(reply.data, [0, 0]);
        assert_eq!(reply.data01, Data01::Data1);
        assert_eq!(host.host_out(&[]), Some(Data01::Data1));
        assert_eq!(host.driver.stage(), Stage::Idle);

        assert_eq!(host.control_in(get_descriptor(1, 0, 18)).unwrap(), DEVICE);
    }

    #[test]
    fn setup_preempts_in_status_stage() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();

        host.setup(set_address(7));
        assert_eq!(host.driver.state(), DeviceState::SettingAddress);

        // No status stage, so the address never takes effect
        host.setup(GET_STATUS);
        assert_eq!(host.driver.state(), DeviceState::Default);
        assert_eq!(host.driver.address(), 0);
        assert_eq!(host.host_in().unwrap().data, [0, 0]);
        assert_eq!(host.host_out(&[]), Some(Data01::Data1));
        assert_eq!(host.driver.stage(), Stage::Idle);
        assert_eq!(host.address(), 0);

        assert!(host.control_out(set_address(7), &[]));
        assert_eq!(host.address(), 7);
        assert_eq!(host.driver.state(), DeviceState::Address);
    }

    #[test]
    fn early_status_ends_in_data_stage() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.driver.set_ep0_max_packet_size(8);
        host.reset();

        host.setup(get_descriptor(1, 0, 64));
        assert_eq!(host.host_in().unwrap().data, &DEVICE[..8]);
        // The host has what it needs, and moves on to the status stage
        assert_eq!(host.host_out(&[]), Some(Data01::Data1));
        assert_eq!(host.driver.stage(), Stage::Idle);
        assert!(host.host_in().is_none());

        assert_eq!(host.control_in(get_descriptor(1, 0, 18)).unwrap(), DEVICE);
    }

    #[test]
    fn out_during_in_status_is_ignored() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();

        host.setup(set_address(7));
        assert_eq!(host.host_out(&[]), Some(Data01::Data0));
        assert_eq!(host.driver.stage(), Stage::Status);
        assert_eq!(host.address(), 0);

        let status = host.host_in().unwrap();
        assert!(status.data.is_empty());
        assert_eq!(host.address(), 7);
        assert_eq!(host.control_in(GET_STATUS).unwrap(), [0, 0]);
    }

    #[test]
    fn replies_capped_at_requested() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();

        let get_status = |length: u8| [0x80, Request::GET_STATUS, 0, 0, 0, 0, length, 0];
        assert_eq!(host.control_in(get_status(1)).unwrap(), [0]);
        assert_eq!(host.control_in(get_status(64)).unwrap(), [0, 0]);
        // Without a data stage, the status stage is IN
        assert!(host.control_out(get_status(0), &[]));
        assert!(host.control_out([0x80, Request::GET_CONFIGURATION, 0, 0, 0, 0, 0, 0], &[]));
        assert_eq!(host.control_in(GET_INTERFACE).unwrap(), [0]);
    }

    #[test]
    fn reset_cancels_transfers() {
        let called = Cell::new(false);
        let mut on_done = |_: &[u8], _: usize| called.set(true);
        let mut memory = [0u8; 128];
        let state = EndpointState::new();
        let mut host = Host::new(
            &state,
            Download {
                buffer: Some(&mut memory),
                on_done: Some(&mut on_done),
            },
        );
        host.reset();
        host.setup(dfu_dnload(128));
        host.host_out(&[0; 64]);

        assert!(matches!(host.reset(), PollResult::Reset));
        assert!(!called.get());
        assert_eq!(host.driver.stage(), Stage::Idle);
        assert_eq!(host.driver.state(), DeviceState::Default);
        let bd = host.driver.ep0.bdt().get(0, Direction::Rx, PingPong::Even);
        assert!(bd.is_owned());
        assert_eq!(bd.data01(), Data01::Data0);
        assert!(!host.driver.ep0.bdt().get(0, Direction::Rx, PingPong::Odd).is_owned());
    }

    #[test]
    fn byte_transfer_api() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();

        assert_eq!(
            host.driver.send_small(&[0; 65]),
            Err(UsbError::BufferOverflow)
        );
        assert_eq!(host.driver.send_small(&[1, 2, 3]), Ok(3));
        assert_eq!(host.driver.send_small(&[4]), Err(UsbError::WouldBlock));

        host.driver.stall(3);
        assert!(ral::read_reg!(ral::usb, &host.regs().ENDPOINTS[3], ENDPT, EPSTALL == 1));
        host.driver.stall(16);
        host.driver.stall(0);
        assert!(host.stalled());
    }

    #[test]
    fn ep0_max_packet_size() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.driver.set_ep0_max_packet_size(16);
        assert_eq!(host.driver.ep0().max_packet_size(), 16);
        host.driver.set_ep0_max_packet_size(12);
        assert_eq!(host.driver.ep0().max_packet_size(), 64);
    }

    #[test]
    fn errors_are_cleared() {
        let state = EndpointState::new();
        let mut host = Host::new(&state, Descriptors::default());
        host.reset();
        ral::write_reg!(ral::usb, host.regs(), ERRSTAT, 0x21);
        assert!(matches!(host.interrupt(Interrupts::ERROR), PollResult::None));
        // Write-1-to-clear, so the driver writes back what it saw
        assert_eq!(ral::read_reg!(ral::usb, host.regs(), ERRSTAT), 0x21);
        // Control transfers carry on
        assert_eq!(host.control_in(GET_STATUS).unwrap(), [0, 0]);
    }
}
