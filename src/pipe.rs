//! Chunked transfer engines
//!
//! A `Pipe` moves one transfer through one direction of an endpoint.
//! It splits the caller's buffer into max-packet-size transactions,
//! arms one descriptor at a time, and advances when the SIE reports
//! that the transaction completed. The pipe tracks the ping-pong slot
//! and DATA0/1 toggle that the *next* transaction uses.

use crate::{
    bd::{Bd, Data01},
    bdt::{Bdt, Direction, PingPong},
    buffer::Buffer,
    EP0_BUFFER_SIZE,
};
use core::sync::atomic::{compiler_fence, Ordering};
use usb_device::UsbError;

/// Called once when a transfer finishes.
///
/// For received data, the callback sees the received bytes and their
/// count. For sent data, the callback sees the sent bytes, and a zero
/// residual length.
///
/// A transfer that's cancelled never calls its completion.
pub type Completion<'a> = &'a mut dyn FnMut(&[u8], usize);

/// The outcome of advancing a pipe
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Progress {
    /// Another transaction is armed.
    Pending,
    /// The transfer is complete.
    Finished,
}

pub(crate) struct Pipe<'a> {
    endpoint: usize,
    direction: Direction,
    pingpong: PingPong,
    data01: Data01,
    max_packet_size: usize,
    buffer: Buffer,
    /// Bytes moved so far.
    position: usize,
    /// Bytes left to move. For TX, bytes not yet armed.
    remaining: usize,
    /// A trailing zero-length packet is still owed.
    zlp: bool,
    active: bool,
    on_done: Option<Completion<'a>>,
}

impl<'a> Pipe<'a> {
    pub const fn new(endpoint: usize, direction: Direction) -> Self {
        Pipe {
            endpoint,
            direction,
            pingpong: PingPong::Even,
            data01: Data01::Data0,
            max_packet_size: EP0_BUFFER_SIZE,
            buffer: Buffer::empty(),
            position: 0,
            remaining: 0,
            zlp: false,
            active: false,
            on_done: None,
        }
    }

    fn bd<'b>(&self, bdt: &'b Bdt, pingpong: PingPong) -> &'b Bd {
        bdt.get(self.endpoint, self.direction, pingpong)
    }

    pub fn pingpong(&self) -> PingPong {
        self.pingpong
    }

    pub fn set_pingpong(&mut self, pingpong: PingPong) {
        self.pingpong = pingpong;
    }

    #[cfg(test)]
    pub fn data01(&self) -> Data01 {
        self.data01
    }

    pub fn set_data01(&mut self, data01: Data01) {
        self.data01 = data01;
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn set_max_packet_size(&mut self, max_packet_size: usize) {
        self.max_packet_size = max_packet_size;
    }

    /// Indicates if a transfer is in progress.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Indicates if the pipe can't take a new transfer.
    ///
    /// That's the case while a transfer is in progress, or while the SIE
    /// still owns the slot we'd arm next.
    pub fn is_busy(&self, bdt: &Bdt) -> bool {
        self.active || self.bd(bdt, self.pingpong).is_owned()
    }

    /// Start sending `buffer`, capped at the host's `requested` length.
    ///
    /// Returns the effective length of the transfer. If that length is a
    /// multiple of the max packet size, but less than what the host asked
    /// for, the transfer ends with a zero-length packet.
    pub fn begin_tx(
        &mut self,
        bdt: &Bdt,
        buffer: Buffer,
        requested: usize,
        on_done: Option<Completion<'a>>,
    ) -> Result<usize, UsbError> {
        debug_assert_eq!(self.direction, Direction::Tx);
        if self.is_busy(bdt) {
            return Err(UsbError::WouldBlock);
        }

        let len = buffer.len().min(requested);
        self.buffer = buffer.truncate(len);
        self.position = 0;
        self.remaining = len;
        self.zlp = len != 0 && len % self.max_packet_size == 0 && len < requested;
        self.on_done = on_done;
        self.active = true;

        self.queue_tx(bdt);
        Ok(len)
    }

    fn queue_tx(&mut self, bdt: &Bdt) {
        let len = self.remaining.min(self.max_packet_size);
        self.bd(bdt, self.pingpong)
            .arm(self.buffer.as_ptr_at(self.position), len, self.data01);
        self.pingpong = self.pingpong.flip();
        self.position += len;
        self.remaining -= len;
    }

    /// Handle a completed IN transaction.
    pub fn advance_tx(&mut self, bdt: &Bdt) -> Progress {
        self.data01 = self.data01.flip();
        if self.remaining > 0 {
            self.queue_tx(bdt);
            Progress::Pending
        } else if self.zlp {
            self.zlp = false;
            self.queue_tx(bdt);
            Progress::Pending
        } else {
            self.finish(0);
            Progress::Finished
        }
    }

    /// Start receiving into `buffer`.
    ///
    /// Returns the requested length, which is the buffer's length.
    pub fn begin_rx(
        &mut self,
        bdt: &Bdt,
        buffer: Buffer,
        on_done: Option<Completion<'a>>,
    ) -> Result<usize, UsbError> {
        debug_assert_eq!(self.direction, Direction::Rx);
        if self.is_busy(bdt) {
            return Err(UsbError::WouldBlock);
        }

        self.buffer = buffer;
        self.position = 0;
        self.remaining = buffer.len();
        self.zlp = false;
        self.on_done = on_done;
        self.active = true;

        self.queue_rx(bdt);
        Ok(buffer.len())
    }

    fn queue_rx(&mut self, bdt: &Bdt) {
        let len = self.remaining.min(self.max_packet_size);
        self.bd(bdt, self.pingpong)
            .arm(self.buffer.as_ptr_at(self.position), len, self.data01);
    }

    /// Handle a completed OUT transaction on the `completed` descriptor.
    ///
    /// The transfer ends on a short packet, or once the buffer is full.
    pub fn advance_rx(&mut self, bdt: &Bdt, completed: &Bd) -> Progress {
        self.data01 = self.data01.flip();
        self.pingpong = self.pingpong.flip();

        let received = completed.byte_count().min(self.remaining);
        self.position += received;
        self.remaining -= received;

        if received < self.max_packet_size || self.remaining == 0 {
            self.finish(self.position);
            Progress::Finished
        } else {
            self.queue_rx(bdt);
            Progress::Pending
        }
    }

    fn finish(&mut self, len: usize) {
        self.active = false;
        if let Some(on_done) = self.on_done.take() {
            compiler_fence(Ordering::Acquire);
            // Safety: the SIE released the last descriptor, and no other
            // descriptor points into this buffer.
            let data = unsafe { self.buffer.as_slice(self.position) };
            on_done(data, len);
        }
    }

    /// Abandon the transfer, without calling its completion.
    ///
    /// Both descriptors return to software. For TX, the ping-pong slot
    /// rewinds past any transaction that the SIE never consumed, so
    /// that software stays in step with the SIE.
    pub fn cancel(&mut self, bdt: &Bdt) {
        if self.direction == Direction::Tx {
            let last = self.pingpong.flip();
            if self.bd(bdt, last).is_owned() {
                self.pingpong = last;
            }
        }
        self.bd(bdt, PingPong::Even).reset();
        self.bd(bdt, PingPong::Odd).reset();

        self.buffer = Buffer::empty();
        self.position = 0;
        self.remaining = 0;
        self.zlp = false;
        self.active = false;
        self.on_done = None;
    }

    /// Cancel, and return to the even slot, expecting DATA0.
    pub fn reset(&mut self, bdt: &Bdt) {
        self.cancel(bdt);
        self.pingpong = PingPong::Even;
        self.data01 = Data01::Data0;
    }
}
