//! Afro ESC motor controllers on the shared I2C bus.
//!
//! Each ESC is driven by its own control loop ([`Esc::run`]), the only code
//! that ever writes to that ESC's address. Everything else talks to the loop
//! through an [`EscHandle`], which queues [`EscCommand`]s that the loop applies
//! at the top of its next cycle.

use core::{
    convert::Infallible,
    fmt,
    sync::atomic::{AtomicU32, AtomicU8, Ordering},
};
use std::{sync::Arc, thread, time::Duration};

use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, TrySendError},
};
use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};

use super::{
    bus::{BusError, BusHandle, SharedBus},
    device::Device,
};

/// Address of motor 0; motor `n` answers at `MOTOR_BASE + n`.
pub const MOTOR_BASE: u8 = 0x29;
pub const MAX_MOTORS: u8 = 4;
/// Exclusive upper bound of the throttle value.
pub const MAX_SPEED: u8 = 240;
/// Throttle held right after arming.
pub const MIN_SPEED: u8 = 1;
pub const MIN_DELAY: u8 = 1;
pub const DEFAULT_DELAY: u8 = 10;
pub const MAX_DELAY: u8 = 100;

/// Zero-throttle writes needed to arm the ESC.
pub const ARM_PULSES: u16 = 0xFFF;
pub const ARM_PULSE_US: u32 = 10;
pub const RAMP_STEP: u8 = 5;
pub const RAMP_PERIOD_MS: u32 = 100;

const COMMAND_DEPTH: usize = 16;
/// Back-off between send attempts on a full queue.
pub const SEND_RETRY_US: u64 = 500;

type CommandChannel = Channel<CriticalSectionRawMutex, EscCommand, COMMAND_DEPTH>;

/// Rejected command input. Reported to the issuer only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    UnknownMotor(u32),
    SpeedOutOfRange(u32),
    DelayOutOfRange(u32),
}

impl fmt::Display for ValidationError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ValidationError::UnknownMotor(id) => write!(f, "unknown motor id {}", id),
            ValidationError::SpeedOutOfRange(v) => {
                write!(f, "speed {} outside 1..{}", v, MAX_SPEED)
            }
            ValidationError::DelayOutOfRange(v) => {
                write!(f, "delay {} outside {}<d<={}", v, MIN_DELAY, MAX_DELAY)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Target throttle, `MIN_SPEED..MAX_SPEED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Speed(u8);

impl Speed {
    pub fn new(value: u32) -> Result<Self, ValidationError> {
        if (u32::from(MIN_SPEED)..u32::from(MAX_SPEED)).contains(&value) {
            Ok(Speed(value as u8))
        } else {
            Err(ValidationError::SpeedOutOfRange(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// Control loop period in milliseconds, `MIN_DELAY < d <= MAX_DELAY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Delay(u8);

impl Delay {
    pub fn new(value: u32) -> Result<Self, ValidationError> {
        if value > u32::from(MIN_DELAY) && value <= u32::from(MAX_DELAY) {
            Ok(Delay(value as u8))
        } else {
            Err(ValidationError::DelayOutOfRange(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u32> for Speed {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Speed::new(value)
    }
}

impl From<Speed> for u32 {
    fn from(speed: Speed) -> u32 {
        u32::from(speed.0)
    }
}

impl TryFrom<u32> for Delay {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Delay::new(value)
    }
}

impl From<Delay> for u32 {
    fn from(delay: Delay) -> u32 {
        u32::from(delay.0)
    }
}

/// Messages accepted by an ESC control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscCommand {
    /// Run the arming sequence.
    Arm,
    Speed(Speed),
    Delay(Delay),
    /// Ramp the throttle down to zero.
    SlowStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Uninitialized = 0,
    Idle = 1,
    Running = 2,
    RampingDown = 3,
}

impl Phase {
    fn from_u8(v: u8) -> Phase {
        match v {
            1 => Phase::Idle,
            2 => Phase::Running,
            3 => Phase::RampingDown,
            _ => Phase::Uninitialized,
        }
    }
}

/// Last state published by a control loop.
///
/// Only the loop stores into the speed, delay and phase fields; each field is
/// a single atomic so readers never see a half-written value.
#[derive(Debug)]
pub struct EscStatus {
    speed: AtomicU8,
    delay: AtomicU8,
    phase: AtomicU8,
    sent: AtomicU32,
    applied: AtomicU32,
}

impl EscStatus {
    fn new(delay: u8) -> Self {
        EscStatus {
            speed: AtomicU8::new(0),
            delay: AtomicU8::new(delay),
            phase: AtomicU8::new(Phase::Uninitialized as u8),
            sent: AtomicU32::new(0),
            applied: AtomicU32::new(0),
        }
    }

    pub fn speed(&self) -> u8 {
        self.speed.load(Ordering::Acquire)
    }

    pub fn delay(&self) -> u8 {
        self.delay.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Every queued command has been applied and published.
    pub fn is_settled(&self) -> bool {
        self.applied.load(Ordering::Acquire) >= self.sent.load(Ordering::Acquire)
    }

    /// Settled with the throttle at zero.
    pub fn is_at_rest(&self) -> bool {
        self.is_settled() && self.speed() == 0
    }
}

/// Cloneable sender side of one ESC control loop.
#[derive(Clone)]
pub struct EscHandle {
    address: u8,
    commands: Arc<CommandChannel>,
    status: Arc<EscStatus>,
}

impl fmt::Debug for EscHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("EscHandle")
            .field("address", &self.address)
            .field("status", &self.status)
            .finish()
    }
}

impl EscHandle {
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn status(&self) -> &EscStatus {
        &self.status
    }

    /// Queue `cmd`.
    ///
    /// Blocks while the loop's queue is full, retrying every
    /// `SEND_RETRY_US`. A busy loop (arming takes ~40 ms of pulses) therefore
    /// stalls the caller without spinning.
    pub fn send(
        &self,
        cmd: EscCommand,
    ) {
        self.status.sent.fetch_add(1, Ordering::AcqRel);
        let mut pending = cmd;
        while let Err(TrySendError::Full(back)) = self.commands.try_send(pending) {
            pending = back;
            thread::sleep(Duration::from_micros(SEND_RETRY_US));
        }
    }

    pub fn arm(&self) {
        self.send(EscCommand::Arm)
    }

    pub fn set_speed(
        &self,
        speed: Speed,
    ) {
        self.send(EscCommand::Speed(speed))
    }

    pub fn set_delay(
        &self,
        delay: Delay,
    ) {
        self.send(EscCommand::Delay(delay))
    }

    pub fn slow_stop(&self) {
        self.send(EscCommand::SlowStop)
    }
}

/// One ramp-down step: `step` less, floored at zero.
pub fn ramp_step(
    speed: u8,
    step: u8,
) -> u8 {
    speed.saturating_sub(step)
}

/// Successive throttle values of a ramp-down from `speed` to zero.
///
/// # Example
/// ```rust
/// use quad_core::utils::controllers::esc::ramp_down;
/// let steps: Vec<u8> = ramp_down(12, 5).collect();
/// assert_eq!(steps, [7, 2, 0]);
/// ```
pub fn ramp_down(
    speed: u8,
    step: u8,
) -> impl Iterator<Item = u8> {
    core::iter::successors(Some(speed), move |&s| {
        if s == 0 || step == 0 {
            None
        } else {
            Some(ramp_step(s, step))
        }
    })
    .skip(1)
}

/// Driver and control loop state for one Afro ESC.
pub struct Esc<B> {
    device: Device<B>,
    speed: u8,
    delay: u8,
    phase: Phase,
    written: Option<u8>,
    ramp_elapsed_ms: u32,
    applied: u32,
    commands: Arc<CommandChannel>,
    status: Arc<EscStatus>,
}

impl<B: BusHandle> Esc<B> {
    /// Create the loop state for the ESC at `address` and its command handle.
    pub fn new(
        bus: SharedBus<B>,
        address: u8,
        delay: Option<Delay>,
    ) -> (Self, EscHandle) {
        let delay = delay.map(Delay::get).unwrap_or(DEFAULT_DELAY);
        let commands = Arc::new(CommandChannel::new());
        let status = Arc::new(EscStatus::new(delay));
        let handle = EscHandle {
            address,
            commands: Arc::clone(&commands),
            status: Arc::clone(&status),
        };
        let esc = Esc {
            device: Device::new(bus, address, "AfroESC"),
            speed: 0,
            delay,
            phase: Phase::Uninitialized,
            written: None,
            ramp_elapsed_ms: 0,
            applied: 0,
            commands,
            status,
        };
        (esc, handle)
    }

    pub fn address(&self) -> u8 {
        self.device.address()
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn delay(&self) -> u8 {
        self.delay
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Arm the ESC with a burst of zero-throttle writes, then idle at `MIN_SPEED`.
    pub fn init<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<(), BusError<B::Error>> {
        tracing::info!(address = self.address(), "Arming ESC");
        for _ in 0..ARM_PULSES {
            self.device.transaction(|bus| bus.write_byte(0x00))?;
            delay.delay_us(ARM_PULSE_US);
        }
        self.written = Some(0);
        self.speed = MIN_SPEED;
        self.phase = Phase::Idle;
        self.publish();
        Ok(())
    }

    /// Apply one command. Called only from the loop thread.
    pub fn apply<D: DelayNs>(
        &mut self,
        cmd: EscCommand,
        delay: &mut D,
    ) -> Result<(), BusError<B::Error>> {
        match cmd {
            EscCommand::Arm => self.init(delay)?,
            EscCommand::Speed(speed) => {
                if self.phase == Phase::Uninitialized {
                    tracing::warn!(address = self.address(), "ESC not armed, speed ignored");
                } else {
                    self.speed = speed.get();
                    self.phase = Phase::Running;
                }
            }
            EscCommand::Delay(d) => self.delay = d.get(),
            EscCommand::SlowStop => {
                if self.phase != Phase::Uninitialized && self.speed > 0 {
                    self.phase = Phase::RampingDown;
                    // first step is taken on the next cycle
                    self.ramp_elapsed_ms = RAMP_PERIOD_MS;
                }
            }
        }
        self.applied = self.applied.wrapping_add(1);
        Ok(())
    }

    /// One control cycle: drain commands, advance the ramp, write, sleep.
    pub fn cycle<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> Result<(), BusError<B::Error>> {
        while let Ok(cmd) = self.commands.try_receive() {
            self.apply(cmd, delay)?;
        }

        if self.phase == Phase::RampingDown {
            while self.ramp_elapsed_ms >= RAMP_PERIOD_MS && self.speed > 0 {
                self.ramp_elapsed_ms -= RAMP_PERIOD_MS;
                self.speed = ramp_step(self.speed, RAMP_STEP);
            }
            if self.speed == 0 {
                self.phase = Phase::Idle;
                self.ramp_elapsed_ms = 0;
            }
        }

        if self.phase != Phase::Uninitialized {
            let speed = self.speed;
            self.device.transaction(|bus| bus.write_byte(speed))?;
            if self.written != Some(speed) {
                tracing::info!(address = self.address(), speed, "Setting ESC speed");
                self.written = Some(speed);
            }
        }
        self.publish();

        delay.delay_ms(u32::from(self.delay));
        if self.phase == Phase::RampingDown {
            self.ramp_elapsed_ms += u32::from(self.delay);
        }
        Ok(())
    }

    /// Drive the ESC for the rest of its life. Returns only on a bus error.
    pub fn run<D: DelayNs>(
        mut self,
        delay: &mut D,
    ) -> Result<Infallible, BusError<B::Error>> {
        loop {
            self.cycle(delay)?;
        }
    }

    fn publish(&self) {
        self.status.speed.store(self.speed, Ordering::Release);
        self.status.delay.store(self.delay, Ordering::Release);
        self.status.phase.store(self.phase as u8, Ordering::Release);
        // stored last: a reader that sees the count also sees the state it covers
        self.status.applied.store(self.applied, Ordering::Release);
    }
}
