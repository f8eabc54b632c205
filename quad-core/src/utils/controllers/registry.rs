//! Motor id → ESC lookup table, filled once at startup.

use core::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::esc::{EscHandle, ValidationError, MAX_MOTORS, MOTOR_BASE};

/// Index of a motor slot, `0..MAX_MOTORS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct MotorId(u8);

impl MotorId {
    pub fn new(index: u8) -> Result<Self, ValidationError> {
        if index < MAX_MOTORS {
            Ok(MotorId(index))
        } else {
            Err(ValidationError::UnknownMotor(u32::from(index)))
        }
    }

    /// Accept either a motor index or the motor's bus address.
    pub fn from_raw(raw: u32) -> Result<Self, ValidationError> {
        let base = u32::from(MOTOR_BASE);
        let slots = u32::from(MAX_MOTORS);
        if raw < slots {
            Ok(MotorId(raw as u8))
        } else if (base..base + slots).contains(&raw) {
            Ok(MotorId((raw - base) as u8))
        } else {
            Err(ValidationError::UnknownMotor(raw))
        }
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn address(self) -> u8 {
        MOTOR_BASE + self.0
    }
}

impl TryFrom<u32> for MotorId {
    type Error = ValidationError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        MotorId::from_raw(raw)
    }
}

impl From<MotorId> for u32 {
    fn from(id: MotorId) -> u32 {
        u32::from(id.0)
    }
}

impl fmt::Display for MotorId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.0, self.address())
    }
}

#[derive(Debug, Default)]
pub struct EscRegistry {
    motors: HashMap<MotorId, EscHandle>,
}

impl EscRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `id` was already registered; the first handle wins.
    pub fn insert(
        &mut self,
        id: MotorId,
        handle: EscHandle,
    ) -> bool {
        if self.motors.contains_key(&id) {
            return false;
        }
        self.motors.insert(id, handle);
        true
    }

    pub fn get(
        &self,
        id: MotorId,
    ) -> Result<&EscHandle, ValidationError> {
        self.motors
            .get(&id)
            .ok_or(ValidationError::UnknownMotor(u32::from(id.index())))
    }

    /// Resolve an index or address typed by the operator.
    pub fn resolve(
        &self,
        raw: u32,
    ) -> Result<(MotorId, &EscHandle), ValidationError> {
        let id = MotorId::from_raw(raw)?;
        self.motors
            .get(&id)
            .map(|h| (id, h))
            .ok_or(ValidationError::UnknownMotor(raw))
    }

    pub fn contains(
        &self,
        id: MotorId,
    ) -> bool {
        self.motors.contains_key(&id)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<MotorId> {
        let mut ids: Vec<MotorId> = self.motors.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn handles(&self) -> impl Iterator<Item = &EscHandle> {
        self.motors.values()
    }

    pub fn len(&self) -> usize {
        self.motors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motors.is_empty()
    }
}
