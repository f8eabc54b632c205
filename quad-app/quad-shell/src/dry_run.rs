use std::convert::Infallible;

use quad_core::utils::controllers::bus::{BusError, BusHandle, MAX_ADDRESS};
use tracing::trace;

/// Bus that logs traffic instead of touching hardware. Reads return zero.
#[derive(Default)]
pub struct LoggingBus {
    selected: u8,
}

impl BusHandle for LoggingBus {
    type Error = Infallible;

    fn select(
        &mut self,
        address: u8,
    ) -> Result<(), BusError<Infallible>> {
        if address > MAX_ADDRESS {
            return Err(BusError::Select(address));
        }
        self.selected = address;
        Ok(())
    }

    fn read_register(
        &mut self,
        register: u8,
    ) -> Result<u8, BusError<Infallible>> {
        trace!("0x{:02X}: read  [0x{:02X}]", self.selected, register);
        Ok(0)
    }

    fn write_register(
        &mut self,
        register: u8,
        value: u8,
    ) -> Result<(), BusError<Infallible>> {
        trace!("0x{:02X}: write [0x{:02X}] = 0x{:02X}", self.selected, register, value);
        Ok(())
    }

    fn write_byte(
        &mut self,
        value: u8,
    ) -> Result<(), BusError<Infallible>> {
        trace!("0x{:02X}: write 0x{:02X}", self.selected, value);
        Ok(())
    }

    fn probe(&mut self) -> Result<(), BusError<Infallible>> {
        trace!("0x{:02X}: probe", self.selected);
        Ok(())
    }
}
