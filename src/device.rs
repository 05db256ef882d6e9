//! Device configuration state

/// USB device state, as seen through endpoint 0.
///
/// The driver starts `Disabled`, and every bus reset returns the device
/// to `Default`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeviceState {
    /// No bus reset observed yet.
    Disabled,
    /// Reset, answering at address 0.
    Default,
    /// A SET_ADDRESS request is accepted, but its status stage isn't
    /// complete. The device still answers at its previous address.
    SettingAddress,
    /// Answering at a non-default address.
    Address,
    /// The host selected a configuration.
    Configured,
}

pub(crate) struct Device {
    state: DeviceState,
    address: u8,
    configuration: u8,
    /// Address from SET_ADDRESS, and the state to restore if the
    /// transfer never completes.
    pending: Option<(u8, DeviceState)>,
}

impl Device {
    pub const fn new() -> Self {
        Device {
            state: DeviceState::Disabled,
            address: 0,
            configuration: 0,
            pending: None,
        }
    }

    pub fn reset(&mut self) {
        self.state = DeviceState::Default;
        self.address = 0;
        self.configuration = 0;
        self.pending = None;
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// The device address, or the pending address while `SettingAddress`.
    pub fn address(&self) -> u8 {
        self.pending.map_or(self.address, |(address, _)| address)
    }

    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    /// Remember the address until the status stage completes.
    pub fn set_address(&mut self, address: u8) {
        self.abandon_address();
        self.pending = Some((address & 0x7F, self.state));
        self.state = DeviceState::SettingAddress;
    }

    /// Returns the address to program, if one is pending.
    pub fn commit_address(&mut self) -> Option<u8> {
        let (address, _) = self.pending.take()?;
        self.address = address;
        self.state = DeviceState::Address;
        Some(address)
    }

    /// Forget a pending address, since its transfer never completed.
    pub fn abandon_address(&mut self) {
        if let Some((_, previous)) = self.pending.take() {
            self.state = previous;
        }
    }

    pub fn set_configuration(&mut self, configuration: u8) {
        self.configuration = configuration;
        self.state = DeviceState::Configured;
    }
}
