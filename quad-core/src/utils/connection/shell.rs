//! Command Shell Module
//!
//! Reads operator commands line by line, validates them against the ESC
//! registry and forwards them to the motor control loops. Commands are plain
//! words (`speed 1 120`, `speed all 80`, `inc -5`) or tagged JSON objects
//! (`{"cmd":"speed","motor":1,"value":120}`). Rejections are written back to
//! the issuer and never reach a control loop.

use core::fmt;
use std::io::{self, BufRead, Write};

use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};

use crate::utils::controllers::{
    esc::{Delay, Speed, ValidationError},
    registry::EscRegistry,
};

/// Poll period while waiting for motors to stop (ms).
pub const REST_POLL_MS: u32 = 10;

/// Operator commands, tagged with `"cmd"` in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ShellCommand {
    /// Arm a motor.
    Start { motor: u32 },
    /// Arm every registered motor.
    StartAll,
    /// Set a motor's target speed.
    Speed { motor: u32, value: u32 },
    /// Set every motor's target speed.
    SpeedAll { value: u32 },
    /// Shift every motor's current speed by `delta`.
    #[serde(rename = "inc")]
    Increment { delta: i32 },
    /// Set a motor's control loop period (ms).
    Delay { motor: u32, value: u32 },
    /// Ramp every motor down and terminate.
    Exit,
}

/// What the caller should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// The line is not a known command.
    Parse(String),
    Validation(ValidationError),
}

impl From<ValidationError> for ShellError {
    fn from(e: ValidationError) -> Self {
        ShellError::Validation(e)
    }
}

impl fmt::Display for ShellError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ShellError::Parse(msg) => write!(f, "{}", msg),
            ShellError::Validation(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ShellError {}

/// Parse a decimal or `0x`-prefixed hexadecimal number.
fn parse_number(token: &str) -> Result<u32, ShellError> {
    let parsed = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => token.parse::<u32>(),
    };
    parsed.map_err(|_| ShellError::Parse(format!("invalid number '{}'", token)))
}

fn parse_delta(token: &str) -> Result<i32, ShellError> {
    token
        .parse::<i32>()
        .map_err(|_| ShellError::Parse(format!("invalid increment '{}'", token)))
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ShellCommand>, ShellError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line.starts_with('{') {
        return serde_json::from_str(line)
            .map(Some)
            .map_err(|e| ShellError::Parse(format!("invalid command format: {}", e)));
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    let cmd = match tokens.as_slice() {
        ["start", "all"] => ShellCommand::StartAll,
        ["speed", "all", value] => ShellCommand::SpeedAll {
            value: parse_number(value)?,
        },
        ["inc", delta] => ShellCommand::Increment {
            delta: parse_delta(delta)?,
        },
        ["start", motor] => ShellCommand::Start {
            motor: parse_number(motor)?,
        },
        ["speed", motor, value] => ShellCommand::Speed {
            motor: parse_number(motor)?,
            value: parse_number(value)?,
        },
        ["delay", motor, value] => ShellCommand::Delay {
            motor: parse_number(motor)?,
            value: parse_number(value)?,
        },
        ["exit"] => ShellCommand::Exit,
        _ => {
            return Err(ShellError::Parse(format!(
                "usage: start <motor|all> | speed <motor|all> <1-239> | inc <delta> | delay <motor> <2-100> | exit (got '{}')",
                line
            )))
        }
    };
    Ok(Some(cmd))
}

/// Validates commands and stages them into the motor control loops.
pub struct CommandShell<'a, D> {
    registry: &'a EscRegistry,
    delay: D,
}

impl<'a, D: DelayNs> CommandShell<'a, D> {
    pub fn new(
        registry: &'a EscRegistry,
        delay: D,
    ) -> Self {
        CommandShell { registry, delay }
    }

    /// Execute one command. Invalid input leaves every loop untouched.
    pub fn execute(
        &mut self,
        cmd: ShellCommand,
    ) -> Result<Outcome, ValidationError> {
        match cmd {
            ShellCommand::Start { motor } => {
                let (id, esc) = self.registry.resolve(motor)?;
                tracing::info!("Starting motor {}", id);
                esc.arm();
            }
            ShellCommand::Speed { motor, value } => {
                let (id, esc) = self.registry.resolve(motor)?;
                let speed = Speed::new(value)?;
                tracing::debug!("Setting motor {} speed to {}", id, value);
                esc.set_speed(speed);
            }
            ShellCommand::StartAll => {
                tracing::info!("Starting all motors");
                for esc in self.registry.handles() {
                    esc.arm();
                }
            }
            ShellCommand::SpeedAll { value } => {
                let speed = Speed::new(value)?;
                tracing::debug!("Setting all motor speeds to {}", value);
                for esc in self.registry.handles() {
                    esc.set_speed(speed);
                }
            }
            ShellCommand::Increment { delta } => {
                // every target is checked before any loop sees a command
                let targets = self
                    .registry
                    .handles()
                    .map(|esc| {
                        let target = i64::from(esc.status().speed()) + i64::from(delta);
                        let raw = u32::try_from(target).unwrap_or(0);
                        Speed::new(raw).map(|speed| (esc, speed))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                tracing::debug!("Shifting all motor speeds by {}", delta);
                for (esc, speed) in targets {
                    esc.set_speed(speed);
                }
            }
            ShellCommand::Delay { motor, value } => {
                let (id, esc) = self.registry.resolve(motor)?;
                let delay = Delay::new(value)?;
                tracing::debug!("Setting motor {} delay to {}", id, value);
                esc.set_delay(delay);
            }
            ShellCommand::Exit => {
                self.stop_all();
                return Ok(Outcome::Exit);
            }
        }
        Ok(Outcome::Continue)
    }

    /// Ramp every registered motor down and wait until all of them are at rest.
    pub fn stop_all(&mut self) {
        for esc in self.registry.handles() {
            esc.slow_stop();
        }
        while !self.registry.handles().all(|esc| esc.status().is_at_rest()) {
            self.delay.delay_ms(REST_POLL_MS);
        }
        tracing::info!("All motors stopped");
    }

    /// Serve commands from `input` until `exit` or end of input.
    ///
    /// Replies and rejections go to `output`, the issuer's side of the stream.
    pub fn serve<R, W>(
        &mut self,
        input: R,
        mut output: W,
    ) -> io::Result<Outcome>
    where
        R: BufRead,
        W: Write,
    {
        for line in input.lines() {
            let line = line?;
            let reply = match parse_line(&line) {
                Ok(None) => continue,
                Ok(Some(cmd)) => match self.execute(cmd) {
                    Ok(Outcome::Exit) => {
                        writeln!(output, "ok")?;
                        return Ok(Outcome::Exit);
                    }
                    Ok(Outcome::Continue) => String::from("ok"),
                    Err(e) => {
                        tracing::warn!(error = %e, "Rejected command");
                        format!("error: {}", e)
                    }
                },
                Err(e) => format!("error: {}", e),
            };
            writeln!(output, "{}", reply)?;
            output.flush()?;
        }
        Ok(Outcome::Continue)
    }
}
