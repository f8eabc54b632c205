#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use quad_core::utils::controllers::bus::{BusError, BusHandle, MAX_ADDRESS};
use quad_core::utils::sensors::adxl345::{ADXL345_ADDRESS, REG_DATA_X_L, REG_DATA_Z_H, REG_OFFSET_X};

/// One operation seen by the simulated bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Select(u8),
    Read { addr: u8, reg: u8 },
    WriteReg { addr: u8, reg: u8, value: u8 },
    WriteByte { addr: u8, value: u8 },
    Probe(u8),
}

/// Register-file bus with a simulated ADXL345 offset path.
///
/// Clones share the register files and the operation log, so a test can keep
/// one clone as an observer after moving another into a `SharedBus`.
#[derive(Clone, Default)]
pub struct SimBus {
    selected: Option<u8>,
    regs: Arc<Mutex<HashMap<u8, [u8; 256]>>>,
    ops: Arc<Mutex<Vec<Op>>>,
    accel_bias: Arc<Mutex<[i16; 3]>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw accelerometer output before the hardware offsets are applied.
    pub fn set_accel_bias(
        &self,
        x: i16,
        y: i16,
        z: i16,
    ) {
        *self.accel_bias.lock().unwrap() = [x, y, z];
    }

    /// Preload a big-endian 16-bit word at `reg`/`reg + 1`.
    pub fn set_word(
        &self,
        addr: u8,
        reg: u8,
        word: u16,
    ) {
        let [h, l] = word.to_be_bytes();
        let mut regs = self.regs.lock().unwrap();
        let file = regs.entry(addr).or_insert([0; 256]);
        file[reg as usize] = h;
        file[reg as usize + 1] = l;
    }

    pub fn register(
        &self,
        addr: u8,
        reg: u8,
    ) -> u8 {
        self.regs
            .lock()
            .unwrap()
            .get(&addr)
            .map(|f| f[reg as usize])
            .unwrap_or(0)
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    /// Values written with bare byte writes to `addr`.
    pub fn byte_writes(
        &self,
        addr: u8,
    ) -> Vec<u8> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::WriteByte { addr: a, value } if a == addr => Some(value),
                _ => None,
            })
            .collect()
    }

    fn record(
        &self,
        op: Op,
    ) {
        self.ops.lock().unwrap().push(op);
    }

    fn accel_data(
        &self,
        reg: u8,
    ) -> u8 {
        let axis = ((reg - REG_DATA_X_L) / 2) as usize;
        let offset = self.register(ADXL345_ADDRESS, REG_OFFSET_X + axis as u8) as i8;
        let bias = self.accel_bias.lock().unwrap()[axis];
        let value = bias.wrapping_add(i16::from(offset) * 4);
        let [h, l] = value.to_be_bytes();
        if (reg - REG_DATA_X_L) % 2 == 0 { l } else { h }
    }
}

impl BusHandle for SimBus {
    type Error = Infallible;

    fn select(
        &mut self,
        address: u8,
    ) -> Result<(), BusError<Infallible>> {
        if address > MAX_ADDRESS {
            return Err(BusError::Select(address));
        }
        self.selected = Some(address);
        self.record(Op::Select(address));
        Ok(())
    }

    fn read_register(
        &mut self,
        reg: u8,
    ) -> Result<u8, BusError<Infallible>> {
        let addr = self.selected.ok_or(BusError::NotSelected)?;
        self.record(Op::Read { addr, reg });
        if addr == ADXL345_ADDRESS && (REG_DATA_X_L..=REG_DATA_Z_H).contains(&reg) {
            return Ok(self.accel_data(reg));
        }
        Ok(self.register(addr, reg))
    }

    fn write_register(
        &mut self,
        reg: u8,
        value: u8,
    ) -> Result<(), BusError<Infallible>> {
        let addr = self.selected.ok_or(BusError::NotSelected)?;
        self.record(Op::WriteReg { addr, reg, value });
        self.regs.lock().unwrap().entry(addr).or_insert([0; 256])[reg as usize] = value;
        Ok(())
    }

    fn write_byte(
        &mut self,
        value: u8,
    ) -> Result<(), BusError<Infallible>> {
        let addr = self.selected.ok_or(BusError::NotSelected)?;
        self.record(Op::WriteByte { addr, value });
        Ok(())
    }

    fn probe(&mut self) -> Result<(), BusError<Infallible>> {
        let addr = self.selected.ok_or(BusError::NotSelected)?;
        self.record(Op::Probe(addr));
        Ok(())
    }
}

/// Delay that really sleeps, for tests with live control loops.
pub struct SleepDelay;

impl DelayNs for SleepDelay {
    fn delay_ns(
        &mut self,
        ns: u32,
    ) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}
