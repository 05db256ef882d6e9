//! USB-FS device driver
//!
//! The driver owns the register block and endpoint 0. It handles the
//! controller's interrupt sources, and turns endpoint 0 transaction
//! events into control transfers (see the `control` module).

use crate::{
    bdt::{Stat, ENDPOINT_COUNT},
    class::ControlHandler,
    control::Stage,
    device::{Device, DeviceState},
    ep0::Ep0,
    pipe::Completion,
    ral,
    state::EndpointState,
    EP0_BUFFER_SIZE,
};
use usb_device::{bus::PollResult, UsbError};

bitflags::bitflags! {
    /// Interrupt status and enable bits (`ISTAT`, `INTEN`)
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct Interrupts: u8 {
        const USBRST = 1 << 0;
        const ERROR = 1 << 1;
        const SOFTOK = 1 << 2;
        const TOKDNE = 1 << 3;
        const SLEEP = 1 << 4;
        const RESUME = 1 << 5;
        const ATTACH = 1 << 6;
        const STALL = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Error status and enable bits (`ERRSTAT`, `ERREN`)
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct Errors: u8 {
        const PIDERR = 1 << 0;
        const CRC5EOF = 1 << 1;
        const CRC16 = 1 << 2;
        const DFN8 = 1 << 3;
        const BTOERR = 1 << 4;
        const DMAERR = 1 << 5;
        const BTSERR = 1 << 7;
    }
}

/// Keep this in sync with the poll() behaviors.
const ENABLED_INTERRUPTS: Interrupts = Interrupts::USBRST
    .union(Interrupts::ERROR)
    .union(Interrupts::TOKDNE)
    .union(Interrupts::SLEEP)
    .union(Interrupts::RESUME)
    .union(Interrupts::STALL);

/// A USB device driver
///
/// After you allocate a `Driver` with [`new()`](Driver::new), you must
///
/// - call [`initialize()`](Driver::initialize) once
/// - call [`attach()`](Driver::attach) to signal the host
///
/// Then, call [`poll()`](Driver::poll) from the USB interrupt, or in
/// a loop. The first bus reset prepares endpoint 0 for SETUP packets.
pub struct Driver<'a> {
    pub(crate) usb: ral::usb::Instance,
    pub(crate) ep0: Ep0<'a>,
    pub(crate) device: Device,
    pub(crate) stage: Stage,
}

impl<'a> Driver<'a> {
    /// Create a new `Driver`
    ///
    /// Creation does nothing except for assign memory to the driver.
    /// After creating the driver, call [`initialize()`](Driver::initialize).
    ///
    /// # Panics
    ///
    /// Panics if the endpoint state has already been assigned to another
    /// USB driver.
    pub fn new<P: crate::Peripherals>(peripherals: P, state: &'a EndpointState) -> Self {
        let usb = ral::instance(&peripherals);
        let resources = state.take().expect("Endpoint state already assigned");
        Driver {
            usb,
            ep0: Ep0::new(usb, resources),
            device: Device::new(),
            stage: Stage::Idle,
        }
    }

    /// Initialize the USB core registers
    ///
    /// Assumes that the USB clock is enabled. Interrupts are left
    /// disabled; see [`set_interrupts()`](Driver::set_interrupts).
    ///
    /// You **must** call this once, before attaching.
    pub fn initialize(&mut self) {
        let bdt = self.ep0.bdt().as_ptr() as usize;
        ral::write_reg!(ral::usb, self.usb, BDTPAGE1, BDTBA: ((bdt >> 9) & 0x7F) as u8);
        ral::write_reg!(ral::usb, self.usb, BDTPAGE2, (bdt >> 16) as u8);
        ral::write_reg!(ral::usb, self.usb, BDTPAGE3, (bdt >> 24) as u8);

        ral::write_reg!(ral::usb, self.usb, ERRSTAT, Errors::all().bits());
        ral::write_reg!(ral::usb, self.usb, ISTAT, Interrupts::all().bits());

        ral::write_reg!(ral::usb, self.usb, USBCTRL, SUSP: 0, PDE: 0);
        ral::write_reg!(ral::usb, self.usb, CTL, USBENSOFEN: 1, HOSTMODEEN: 0);
        ral::write_reg!(ral::usb, self.usb, INTEN, 0);
        ral::write_reg!(ral::usb, self.usb, ERREN, 0);
    }

    /// Enable (`true`) or disable (`false`) USB interrupts
    pub fn set_interrupts(&mut self, interrupts: bool) {
        if interrupts {
            ral::write_reg!(ral::usb, self.usb, ERREN, Errors::all().bits());
            ral::write_reg!(ral::usb, self.usb, INTEN, ENABLED_INTERRUPTS.bits());
        } else {
            ral::write_reg!(ral::usb, self.usb, INTEN, 0);
            ral::write_reg!(ral::usb, self.usb, ERREN, 0);
        }
    }

    /// Enable the D+ pull-up, so that the host sees a full-speed device.
    pub fn attach(&mut self) {
        ral::modify_reg!(ral::usb, self.usb, CONTROL, DPPULLUPNONOTG: 1);
    }

    /// Disable the D+ pull-up.
    pub fn detach(&mut self) {
        ral::modify_reg!(ral::usb, self.usb, CONTROL, DPPULLUPNONOTG: 0);
    }

    /// Configure the endpoint 0 max packet size
    ///
    /// Accepts 8, 16, 32, or 64. Anything else selects 64. The value
    /// must match the device descriptor's `bMaxPacketSize0`.
    pub fn set_ep0_max_packet_size(&mut self, max_packet_size: usize) {
        let max_packet_size = match max_packet_size {
            8 | 16 | 32 | 64 => max_packet_size,
            _ => EP0_BUFFER_SIZE,
        };
        self.ep0.set_max_packet_size(max_packet_size);
    }

    /// Reset the device after the host signaled a bus reset
    ///
    /// [`poll()`](Driver::poll) calls this when it observes the reset.
    pub fn bus_reset(&mut self) {
        ral::modify_reg!(ral::usb, self.usb, CTL, ODDRST: 1);
        self.ep0.reset();

        ral::write_reg!(ral::usb, self.usb, ERRSTAT, Errors::all().bits());
        ral::write_reg!(ral::usb, self.usb, ISTAT, Interrupts::all().bits());
        ral::write_reg!(ral::usb, self.usb, ADDR, ADDR: 0, LSEN: 0);

        ral::write_reg!(
            ral::usb,
            &self.usb.ENDPOINTS[0],
            ENDPT,
            EPHSHK: 1,
            EPTXEN: 1,
            EPRXEN: 1,
            EPCTLDIS: 0
        );
        for endpoint in &self.usb.ENDPOINTS[1..] {
            ral::write_reg!(ral::usb, endpoint, ENDPT, 0);
        }

        self.device.reset();
        self.stage = Stage::Idle;
        self.ep0.prepare_setup();

        ral::write_reg!(ral::usb, self.usb, CTL, USBENSOFEN: 1);
        debug!("RESET");
    }

    /// Handle the next USB event
    ///
    /// Call this from the USB interrupt handler, or in a loop. Each call
    /// handles at most one transaction. Endpoint 0 events are consumed
    /// by the driver; the returned `Data` masks report what happened.
    pub fn poll<H: ControlHandler<'a>>(&mut self, handler: &mut H) -> PollResult {
        let istat = Interrupts::from_bits_truncate(ral::read_reg!(ral::usb, self.usb, ISTAT));

        if istat.contains(Interrupts::USBRST) {
            self.bus_reset();
            handler.reset();
            return PollResult::Reset;
        }

        if istat.contains(Interrupts::ERROR) {
            let errstat = ral::read_reg!(ral::usb, self.usb, ERRSTAT);
            warn!("ERRSTAT {=u8:#x}", errstat);
            ral::write_reg!(ral::usb, self.usb, ERRSTAT, errstat);
            ral::write_reg!(ral::usb, self.usb, ISTAT, Interrupts::ERROR.bits());
        }

        if istat.contains(Interrupts::STALL) {
            // The host saw the stall. Endpoint 0 recovers on the next SETUP.
            ral::modify_reg!(ral::usb, &self.usb.ENDPOINTS[0], ENDPT, EPSTALL: 0);
            ral::write_reg!(ral::usb, self.usb, ISTAT, Interrupts::STALL.bits());
        }

        if istat.contains(Interrupts::TOKDNE) {
            let stat = Stat::new(ral::read_reg!(ral::usb, self.usb, STAT));
            let result = if stat.endpoint() == 0 {
                self.on_ep0_token(stat, handler)
            } else {
                warn!("Token on unsupported endpoint {=usize}", stat.endpoint());
                PollResult::None
            };
            ral::write_reg!(ral::usb, self.usb, ISTAT, Interrupts::TOKDNE.bits());
            return result;
        }

        if istat.contains(Interrupts::SLEEP) {
            ral::write_reg!(ral::usb, self.usb, ISTAT, Interrupts::SLEEP.bits());
            return PollResult::Suspend;
        }

        if istat.contains(Interrupts::RESUME) {
            ral::write_reg!(ral::usb, self.usb, ISTAT, Interrupts::RESUME.bits());
            return PollResult::Resume;
        }

        PollResult::None
    }

    /// Access endpoint 0.
    pub fn ep0(&mut self) -> &mut Ep0<'a> {
        &mut self.ep0
    }

    /// Queue an endpoint 0 TX transfer. See [`Ep0::send`].
    pub fn send(
        &mut self,
        data: &'a [u8],
        requested: usize,
        on_done: Option<Completion<'a>>,
    ) -> Result<usize, UsbError> {
        self.ep0.send(data, requested, on_done)
    }

    /// Copy, then send, a small endpoint 0 reply. See [`Ep0::send_small`].
    pub fn send_small(&mut self, data: &[u8]) -> Result<usize, UsbError> {
        self.ep0.send_small(data)
    }

    /// Queue an endpoint 0 RX transfer. See [`Ep0::receive`].
    pub fn receive(
        &mut self,
        buffer: &'a mut [u8],
        on_done: Option<Completion<'a>>,
    ) -> Result<usize, UsbError> {
        self.ep0.receive(buffer, on_done)
    }

    /// Stall `endpoint`
    ///
    /// Does nothing if the endpoint doesn't exist. An endpoint 0 stall
    /// clears when the next SETUP packet arrives.
    pub fn stall(&mut self, endpoint: usize) {
        if endpoint < ENDPOINT_COUNT {
            ral::modify_reg!(ral::usb, &self.usb.ENDPOINTS[endpoint], ENDPT, EPSTALL: 1);
        }
    }

    /// The device state.
    pub fn state(&self) -> DeviceState {
        self.device.state()
    }

    /// The configuration value selected by the host.
    ///
    /// Zero until the host sends SET_CONFIGURATION.
    pub fn configuration(&self) -> u8 {
        self.device.configuration()
    }

    /// The device address.
    ///
    /// While the state is `SettingAddress`, this is the pending address.
    pub fn address(&self) -> u8 {
        self.device.address()
    }

    /// The endpoint 0 control transfer stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }
}
