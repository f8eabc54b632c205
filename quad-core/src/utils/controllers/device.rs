//! A named device bound to one address on a shared bus.

use super::bus::{BusError, BusHandle, SharedBus};

pub struct Device<B> {
    bus: SharedBus<B>,
    address: u8,
    name: &'static str,
}

impl<B: BusHandle> Device<B> {
    pub fn new(
        bus: SharedBus<B>,
        address: u8,
        name: &'static str,
    ) -> Self {
        Device { bus, address, name }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `f` against this device with the bus held exclusively.
    pub fn transaction<T, F>(
        &self,
        f: F,
    ) -> Result<T, BusError<B::Error>>
    where
        F: FnOnce(&mut B) -> Result<T, BusError<B::Error>>,
    {
        self.bus.transaction(self.address, f)
    }
}
