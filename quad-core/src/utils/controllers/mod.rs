//! Module Exports
//!
//! - `bus`: the shared, address-stateful I2C bus context.
//! - `device`: a named device bound to one address.
//! - `esc`: Afro ESC driver and its control loop.
//! - `registry`: motor id → ESC handle table.

pub mod bus;
pub mod device;
pub mod esc;
pub mod registry;

use core::fmt;
use std::thread;

use embedded_hal::delay::DelayNs;

use crate::utils::sensors::{Adxl345, Adxl345Config, Itg3200, Itg3200Config};

pub use bus::{BusError, BusHandle, HalBus, SharedBus};
pub use esc::{Delay, Esc, EscCommand, EscHandle, Phase, Speed, ValidationError};
pub use registry::{EscRegistry, MotorId};

/// Errors raised while registering a motor.
#[derive(Debug)]
pub enum RegistryError {
    Duplicate(MotorId),
    Spawn(std::io::Error),
}

impl fmt::Display for RegistryError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            RegistryError::Duplicate(id) => write!(f, "motor {} already registered", id),
            RegistryError::Spawn(e) => write!(f, "failed to start control loop: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Owns the bus context and the ESC registry; hands out devices bound to it.
pub struct Quadcopter<B> {
    bus: SharedBus<B>,
    registry: EscRegistry,
    loops: Vec<thread::JoinHandle<()>>,
}

impl<B> Quadcopter<B>
where
    B: BusHandle + Send + 'static,
{
    pub fn new(bus: B) -> Self {
        Quadcopter {
            bus: SharedBus::new(bus),
            registry: EscRegistry::new(),
            loops: Vec::new(),
        }
    }

    pub fn bus(&self) -> SharedBus<B> {
        self.bus.clone()
    }

    pub fn registry(&self) -> &EscRegistry {
        &self.registry
    }

    pub fn accelerometer(
        &self,
        config: Option<Adxl345Config>,
    ) -> Adxl345<B> {
        Adxl345::new(self.bus(), None, config)
    }

    pub fn gyroscope(
        &self,
        config: Option<Itg3200Config>,
    ) -> Itg3200<B> {
        Itg3200::new(self.bus(), None, config)
    }

    /// Register motor `id` and start its control loop on a dedicated thread.
    ///
    /// A bus error inside the loop is fatal: it is logged and the process exits.
    pub fn register_motor<D>(
        &mut self,
        id: MotorId,
        delay_ms: Option<Delay>,
        mut delay: D,
    ) -> Result<EscHandle, RegistryError>
    where
        D: DelayNs + Send + 'static,
    {
        if self.registry.contains(id) {
            return Err(RegistryError::Duplicate(id));
        }

        let (esc, handle) = Esc::new(self.bus(), id.address(), delay_ms);
        let loop_thread = thread::Builder::new()
            .name(format!("esc-{:02x}", id.address()))
            .spawn(move || match esc.run(&mut delay) {
                Err(e) => {
                    tracing::error!(error = %e, "ESC control loop failed");
                    std::process::exit(1);
                }
                Ok(never) => match never {},
            })
            .map_err(RegistryError::Spawn)?;

        tracing::info!("Starting ESC with ID: {}", id);
        self.registry.insert(id, handle.clone());
        self.loops.push(loop_thread);
        Ok(handle)
    }

    /// Number of running control loops.
    pub fn running_loops(&self) -> usize {
        self.loops.iter().filter(|h| !h.is_finished()).count()
    }
}
