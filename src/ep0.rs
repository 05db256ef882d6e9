//! Endpoint 0 byte-transfer API
//!
//! `Ep0` owns the two endpoint 0 transfer engines, and the scratch
//! buffers used for SETUP packets, status stages, and small replies.
//! While TX is busy, RX stays armed, so that the host can always
//! deliver its next SETUP.

use crate::{
    bd::Data01,
    bdt::{Bdt, Direction},
    buffer::Buffer,
    pipe::{Completion, Pipe},
    ral,
    state::Resources,
    EP0_BUFFER_SIZE,
};
use usb_device::UsbError;

/// Endpoint 0 of a [`Driver`](crate::Driver)
///
/// Handlers receive `Ep0` to queue the data stage of a control
/// transfer. Only one transfer per direction may be in flight. A new
/// SETUP packet cancels whatever is in flight, without calling its
/// completion.
pub struct Ep0<'a> {
    usb: ral::usb::Instance,
    bdt: &'a Bdt,
    /// RX landing, and TX staging.
    scratch: [Buffer; 2],
    pub(crate) rx: Pipe<'a>,
    pub(crate) tx: Pipe<'a>,
}

impl<'a> Ep0<'a> {
    pub(crate) fn new(usb: ral::usb::Instance, resources: Resources<'a>) -> Self {
        Ep0 {
            usb,
            bdt: resources.bdt,
            scratch: resources.scratch,
            rx: Pipe::new(0, Direction::Rx),
            tx: Pipe::new(0, Direction::Tx),
        }
    }

    pub(crate) fn bdt(&self) -> &'a Bdt {
        self.bdt
    }

    /// Send `data` to the host, no more than `requested` bytes.
    ///
    /// `requested` is usually the SETUP packet's length. If the transfer
    /// is shorter than `requested`, and it's a multiple of the max packet
    /// size, the driver terminates it with a zero-length packet.
    ///
    /// Returns the number of bytes that will be sent. Returns
    /// `WouldBlock` if the hardware still owns the next TX descriptor.
    pub fn send(
        &mut self,
        data: &'a [u8],
        requested: usize,
        on_done: Option<Completion<'a>>,
    ) -> Result<usize, UsbError> {
        self.tx
            .begin_tx(self.bdt, Buffer::from_slice(data), requested, on_done)
    }

    /// Copy `data` into a scratch buffer, and send it.
    ///
    /// Use this for replies composed on the stack. Returns `BufferOverflow`
    /// if `data` is larger than [`EP0_BUFFER_SIZE`].
    pub fn send_small(&mut self, data: &[u8]) -> Result<usize, UsbError> {
        if data.len() > EP0_BUFFER_SIZE {
            return Err(UsbError::BufferOverflow);
        }
        if self.tx.is_busy(self.bdt) {
            return Err(UsbError::WouldBlock);
        }
        let scratch = self.scratch[1].truncate(data.len());
        scratch.volatile_write(data);
        self.tx.begin_tx(self.bdt, scratch, data.len(), None)
    }

    /// Receive up to `buffer.len()` bytes from the host.
    ///
    /// The transfer finishes on a short packet, or when the buffer is full.
    /// Returns the requested length.
    pub fn receive(
        &mut self,
        buffer: &'a mut [u8],
        on_done: Option<Completion<'a>>,
    ) -> Result<usize, UsbError> {
        self.rx
            .begin_rx(self.bdt, Buffer::from_mut_slice(buffer), on_done)
    }

    /// Stall endpoint 0.
    ///
    /// The stall clears when the next SETUP packet arrives.
    pub fn stall(&mut self) {
        ral::modify_reg!(ral::usb, &self.usb.ENDPOINTS[0], ENDPT, EPSTALL: 1);
    }

    /// The max packet size of endpoint 0.
    pub fn max_packet_size(&self) -> usize {
        self.tx.max_packet_size()
    }

    pub(crate) fn set_max_packet_size(&mut self, max_packet_size: usize) {
        self.rx.set_max_packet_size(max_packet_size);
        self.tx.set_max_packet_size(max_packet_size);
    }

    /// RX may land a SETUP while TX still sends a staged reply, so
    /// the two never share a buffer.
    fn rx_scratch(&self) -> Buffer {
        self.scratch[0]
    }

    /// Drop everything in flight, in both directions.
    pub(crate) fn cancel(&mut self) {
        self.rx.cancel(self.bdt);
        self.tx.cancel(self.bdt);
    }

    /// Forget all transfers, and return to the even ping-pong slots.
    pub(crate) fn reset(&mut self) {
        self.rx.reset(self.bdt);
        self.tx.reset(self.bdt);
    }

    /// Arm the empty status stage in `direction`.
    ///
    /// The status stage is always DATA1. An OUT status lands in a
    /// scratch buffer, so that a SETUP can pre-empt it. An IN status
    /// also arms RX for the next SETUP.
    pub(crate) fn status(&mut self, direction: Direction) -> Result<usize, UsbError> {
        match direction {
            Direction::Tx => {
                self.tx.set_data01(Data01::Data1);
                let len = self.tx.begin_tx(self.bdt, Buffer::empty(), 0, None)?;
                self.prepare_setup();
                Ok(len)
            }
            // Armed early, during the IN data stage.
            Direction::Rx if self.rx.is_active() => Ok(0),
            Direction::Rx => {
                self.rx.set_data01(Data01::Data1);
                let scratch = self.rx_scratch();
                self.rx.begin_rx(self.bdt, scratch, None)
            }
        }
    }

    /// Drop the IN transfer, keeping RX as it is.
    pub(crate) fn cancel_tx(&mut self) {
        self.tx.cancel(self.bdt);
    }

    /// Wait for the next SETUP packet, unless RX is already waiting.
    pub(crate) fn prepare_setup(&mut self) {
        if self.rx.is_active() {
            return;
        }
        self.rx.set_data01(Data01::Data0);
        let scratch = self.rx_scratch();
        if self.rx.begin_rx(self.bdt, scratch, None).is_err() {
            warn!("EP0 SETUP receive is still armed");
        }
    }
}
