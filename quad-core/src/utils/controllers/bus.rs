//! Shared I2C bus access for every device on the quadcopter.
//!
//! The Linux I2C interface is address-stateful: selecting a slave address
//! persists until the next selection. `BusHandle` models that contract and
//! `SharedBus` turns "select, then talk" into one critical section that all
//! devices and control loops go through.

use core::fmt;
use std::sync::{Arc, Mutex};

use embedded_hal::i2c::I2c;

/// Highest valid 7-bit device address.
pub const MAX_ADDRESS: u8 = 0x7F;

/// Errors raised by the bus layer.
///
/// Every variant is fatal to the caller's sequence: none of them is retried.
#[derive(Debug)]
pub enum BusError<E: fmt::Debug> {
    /// Address selection failed at the transport level.
    Select(u8),
    /// A register access was attempted before any address was selected.
    NotSelected,
    /// The underlying transport reported an error.
    Transport(E),
    /// Another thread panicked while holding the bus.
    Poisoned,
}

impl<E: fmt::Debug> fmt::Display for BusError<E> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            BusError::Select(addr) => write!(f, "failed to select I2C device 0x{:02X}", addr),
            BusError::NotSelected => write!(f, "register access without a selected device"),
            BusError::Transport(e) => write!(f, "I2C transport error: {:?}", e),
            BusError::Poisoned => write!(f, "I2C bus lock poisoned"),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for BusError<E> {}

/// Address-stateful register access to one physical bus.
pub trait BusHandle {
    type Error: fmt::Debug;

    /// Make `address` the target of every following operation.
    fn select(
        &mut self,
        address: u8,
    ) -> Result<(), BusError<Self::Error>>;

    /// Read one register of the selected device.
    fn read_register(
        &mut self,
        register: u8,
    ) -> Result<u8, BusError<Self::Error>>;

    /// Write one register of the selected device.
    fn write_register(
        &mut self,
        register: u8,
        value: u8,
    ) -> Result<(), BusError<Self::Error>>;

    /// Write a bare byte (no register prefix) to the selected device.
    fn write_byte(
        &mut self,
        value: u8,
    ) -> Result<(), BusError<Self::Error>>;

    /// Address the selected device without transferring any data.
    fn probe(&mut self) -> Result<(), BusError<Self::Error>>;
}

/// `BusHandle` over any `embedded-hal` I2C implementation.
///
/// The selected address is remembered here and attached to every transfer.
pub struct HalBus<I2C> {
    i2c: I2C,
    selected: Option<u8>,
}

impl<I2C> HalBus<I2C> {
    pub fn new(i2c: I2C) -> Self {
        HalBus { i2c, selected: None }
    }

    /// Currently selected address, if any.
    pub fn selected(&self) -> Option<u8> {
        self.selected
    }

    fn target<E: fmt::Debug>(&self) -> Result<u8, BusError<E>> {
        self.selected.ok_or(BusError::NotSelected)
    }
}

impl<I2C> BusHandle for HalBus<I2C>
where
    I2C: I2c,
{
    type Error = I2C::Error;

    fn select(
        &mut self,
        address: u8,
    ) -> Result<(), BusError<Self::Error>> {
        if address > MAX_ADDRESS {
            self.selected = None;
            return Err(BusError::Select(address));
        }
        self.selected = Some(address);
        Ok(())
    }

    fn read_register(
        &mut self,
        register: u8,
    ) -> Result<u8, BusError<Self::Error>> {
        let addr = self.target()?;
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(addr, &[register], &mut buf)
            .map_err(BusError::Transport)?;
        Ok(buf[0])
    }

    fn write_register(
        &mut self,
        register: u8,
        value: u8,
    ) -> Result<(), BusError<Self::Error>> {
        let addr = self.target()?;
        self.i2c
            .write(addr, &[register, value])
            .map_err(BusError::Transport)
    }

    fn write_byte(
        &mut self,
        value: u8,
    ) -> Result<(), BusError<Self::Error>> {
        let addr = self.target()?;
        self.i2c.write(addr, &[value]).map_err(BusError::Transport)
    }

    fn probe(&mut self) -> Result<(), BusError<Self::Error>> {
        let addr = self.target()?;
        self.i2c.write(addr, &[]).map_err(BusError::Transport)
    }
}

/// The one bus context shared by every device and control loop.
///
/// Cloning is cheap and every clone guards the same bus.
pub struct SharedBus<B> {
    inner: Arc<Mutex<B>>,
}

impl<B> Clone for SharedBus<B> {
    fn clone(&self) -> Self {
        SharedBus {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BusHandle> SharedBus<B> {
    pub fn new(bus: B) -> Self {
        SharedBus {
            inner: Arc::new(Mutex::new(bus)),
        }
    }

    /// Select `address` and run `f` while holding the bus exclusively.
    ///
    /// The lock is released only after the last dependent operation in `f`.
    pub fn transaction<T, F>(
        &self,
        address: u8,
        f: F,
    ) -> Result<T, BusError<B::Error>>
    where
        F: FnOnce(&mut B) -> Result<T, BusError<B::Error>>,
    {
        let mut bus = self.inner.lock().map_err(|_| BusError::Poisoned)?;
        bus.select(address)?;
        f(&mut bus)
    }

    /// Probe every 7-bit address with an empty write and return responders.
    pub fn scan(&self) -> Vec<u8> {
        let mut found = Vec::new();
        for addr in 0x03..0x78 {
            if self.transaction(addr, |bus| bus.probe()).is_ok() {
                tracing::info!("I2C device found at 0x{:02X}", addr);
                found.push(addr);
            }
        }
        found
    }
}
