//! Endpoint 0 control transfers
//!
//! A control transfer is a SETUP transaction (always DATA0), zero or
//! more DATA transactions (starting at DATA1), and a STATUS
//! transaction in the opposite direction (always DATA1):
//!
//! ```text
//! host-to-device:  SETUP(0)  [OUT(1) OUT(0) ...]  IN(1)
//! device-to-host:  SETUP(0)   IN(1)  IN(0)  ...   OUT(1)
//! no data stage:   SETUP(0)                       IN(1)
//! ```
//!
//! A SETUP always restarts the sequence, no matter the stage. An
//! address from SET_ADDRESS takes effect only after the status stage,
//! since the device must finish that transfer at its previous address.
//! If a SETUP replaces that status stage, the address is dropped.
//!
//! The host may end an IN data stage early by starting the OUT status
//! stage. RX is armed for that status from the start of the data stage.

use crate::{
    bd::{Data01, Pid},
    bdt::{Direction, Stat},
    buffer::Buffer,
    class::{ControlHandler, Reply},
    pipe::Progress,
    ral,
    request::SetupPacket,
    standard, Driver,
};
use core::ptr::NonNull;
use usb_device::{bus::PollResult, UsbDirection, UsbError};

/// Endpoint 0 control transfer stage
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Stage {
    /// Waiting for a SETUP packet.
    Idle,
    /// Moving the data stage.
    Data,
    /// Waiting for the status stage.
    Status,
}

impl<'a> Driver<'a> {
    /// Handle a completed endpoint 0 transaction.
    pub(crate) fn on_ep0_token<H: ControlHandler<'a>>(
        &mut self,
        stat: Stat,
        handler: &mut H,
    ) -> PollResult {
        let bdt = self.ep0.bdt();
        let bd = bdt.resolve(stat);
        match bd.token() {
            Some(Pid::Setup) => {
                self.on_setup(stat, handler);
                PollResult::Data {
                    ep_out: 0,
                    ep_in_complete: 0,
                    ep_setup: 1,
                }
            }
            Some(Pid::In) => {
                if !self.ep0.tx.is_active() {
                    trace!("EP0 IN without a transfer");
                } else if self.ep0.tx.advance_tx(bdt) == Progress::Finished {
                    self.stage_complete(Direction::Tx);
                }
                PollResult::Data {
                    ep_out: 0,
                    ep_in_complete: 1,
                    ep_setup: 0,
                }
            }
            Some(Pid::Out) => {
                if !self.ep0.rx.is_active() {
                    trace!("EP0 OUT without a transfer");
                } else if self.ep0.rx.advance_rx(bdt, bd) == Progress::Finished {
                    self.rx_complete();
                }
                PollResult::Data {
                    ep_out: 1,
                    ep_in_complete: 0,
                    ep_setup: 0,
                }
            }
            _ => {
                trace!("EP0 STAT {=u8:#x} ignored", stat.raw());
                PollResult::None
            }
        }
    }

    fn on_setup<H: ControlHandler<'a>>(&mut self, stat: Stat, handler: &mut H) {
        let bd = self.ep0.bdt().resolve(stat);
        let setup = read_setup(bd.address(), bd.byte_count());

        // Anything in flight belongs to a transfer that the host abandoned.
        self.ep0.cancel();
        self.ep0.rx.set_pingpong(stat.pingpong().flip());
        self.ep0.rx.set_data01(Data01::Data1);
        self.ep0.tx.set_data01(Data01::Data1);
        self.device.abandon_address();
        self.stage = Stage::Idle;

        let reply = setup.and_then(|setup| {
            trace!(
                "SETUP {=u8} {=u16:#x} {=u16} {=u16}",
                setup.request,
                setup.value,
                setup.index,
                setup.length
            );
            standard::dispatch(&mut self.ep0, &mut self.device, handler, &setup)
                .map(|reply| (setup, reply))
        });

        match reply {
            Ok((_, Reply::Data)) => {
                self.stage = Stage::Data;
                if self.ep0.tx.is_active() && self.ep0.status(Direction::Rx).is_err() {
                    warn!("EP0 status stage is still armed");
                }
            }
            Ok((setup, Reply::Status)) => {
                self.stage = Stage::Status;
                let direction = if setup.direction == UsbDirection::In && setup.length > 0 {
                    Direction::Rx
                } else {
                    Direction::Tx
                };
                if self.ep0.status(direction).is_err() {
                    warn!("EP0 status stage is still armed");
                }
            }
            Err(_) => {
                warn!("EP0 request rejected");
                self.ep0.cancel();
                self.ep0.stall();
                self.ep0.prepare_setup();
            }
        }

        // The SIE suspends token processing after every SETUP.
        ral::modify_reg!(ral::usb, self.usb, CTL, TXSUSPENDTOKENBUSY: 0);
    }

    /// An RX transfer finished.
    fn rx_complete(&mut self) {
        match self.stage {
            // The host skipped the rest of the IN data stage.
            Stage::Data if self.ep0.tx.is_active() => {
                self.ep0.cancel_tx();
                self.stage = Stage::Status;
                self.stage_complete(Direction::Rx);
            }
            // Not the status stage, which is IN. Keep waiting for a SETUP.
            Stage::Status if self.ep0.tx.is_active() => {
                trace!("EP0 OUT during IN status");
                self.ep0.prepare_setup();
            }
            _ => self.stage_complete(Direction::Rx),
        }
    }

    /// A data or status stage finished in `direction`.
    fn stage_complete(&mut self, direction: Direction) {
        match self.stage {
            Stage::Data => {
                self.stage = Stage::Status;
                if self.ep0.status(direction.opposite()).is_err() {
                    warn!("EP0 status stage is still armed");
                }
            }
            Stage::Status | Stage::Idle => {
                self.stage = Stage::Idle;
                if let Some(address) = self.device.commit_address() {
                    ral::write_reg!(ral::usb, self.usb, ADDR, ADDR: address);
                    debug!("ADDRESS {=u8}", address);
                }
                self.ep0.prepare_setup();
            }
        }
    }
}

/// Copy the SETUP packet out of the descriptor's buffer.
fn read_setup(address: *mut u8, len: usize) -> Result<SetupPacket, UsbError> {
    let address = NonNull::new(address).ok_or(UsbError::ParseError)?;
    if len < 8 {
        return Err(UsbError::ParseError);
    }
    let mut raw = [0; 8];
    // Safety: the SIE just wrote at least eight bytes there, and
    // released the descriptor.
    unsafe { Buffer::from_raw(address, 8) }.volatile_read(&mut raw);
    Ok(SetupPacket::parse(raw))
}
