//! Interactive device sessions
//!
//! The engine talks to devices exclusively through the [`DeviceLink`] trait;
//! [`Connection`] is the production implementation (PTY child process, expect
//! dialogue, vendor prompt tracking). Tests drive the engine with scripted
//! links instead.

pub mod connection;
pub mod expect;
pub mod prompts;

use std::time::Duration;

pub use connection::Connection;
pub use expect::SYSTEM_TIMEOUT;

use crate::error::ErrorCode;

/// Result of transmitting one command: whatever the device printed (already
/// scrubbed), plus the failure code when the exchange went wrong. Output is
/// returned even on failure — callers record it either way.
#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    pub output: String,
    pub error: Option<ErrorCode>,
}

/// The seam between the task engine and a live device session.
pub trait DeviceLink {
    /// Send a command, wait up to `timeout` for the prompt to come back.
    /// `prompt_change_allowed` permits the device to land on a different
    /// prompt than the one it showed before the command.
    fn send(&mut self, command: &str, timeout: Duration, prompt_change_allowed: bool)
        -> SendOutcome;

    /// Name of the last observed prompt (e.g. `cisco-priv`).
    fn prompt_name(&self) -> &str;

    /// Vendor of the last observed prompt (e.g. `cisco`).
    fn vendor(&self) -> &str;

    /// Tear the session down.
    fn close(&mut self);
}
