//! Module Exports
//!
//! This file exports the operator command interface.
//!
//! # Modules
//! - `shell`: Parses, validates and dispatches motor commands.

/// Module for the line-oriented motor command shell.
pub mod shell;
