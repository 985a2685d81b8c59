//! The audio/MIDI backend interface.
//!
//! A backend owns the system connection and the realtime thread. At
//! activation it takes ownership of the [`Process`] state, drives
//! [`Process::run_cycle`] from its audio callback with a [`CycleIo`] view of
//! its buffers, and hands the process state back at deactivation.
//!
//! [`CycleIo`]: crate::process::CycleIo

use std::fmt;

use crate::port::ProcessPort;
use crate::process::Process;
use crate::settings::Settings;
use crate::sync::ExitFlag;

pub mod dummy;
#[cfg(feature = "jack")]
pub mod jack;

#[derive(Debug)]
pub enum BackendError {
    /// The system connection could not be opened (or the requested name was
    /// taken and exact naming was requested).
    Open(String),
    /// Activation was requested before a successful open.
    NotOpen,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Open(msg) => write!(f, "failed to open audio system: {msg}"),
            BackendError::NotOpen => f.write_str("backend is not open"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Interface that must be implemented by audio/MIDI backends.
pub trait Backend {
    /// Open the audio/MIDI system under `name`, filling in the sample rate
    /// and buffer sizes. `done` is raised if the system shuts down.
    fn open(
        &mut self,
        settings: &mut Settings,
        done: ExitFlag,
        name: &str,
        exact_name: bool,
    ) -> Result<(), BackendError>;

    /// Close the audio/MIDI system. Counterpart to `open`.
    fn close(&mut self);

    /// Expose a port to the system, if its type calls for one.
    fn activate_port(&mut self, port: &ProcessPort);

    /// Take ownership of the process state and start processing audio.
    fn activate(&mut self, process: Process) -> Result<(), BackendError>;

    /// Stop processing and hand the process state back.
    fn deactivate(&mut self) -> Option<Process>;

    /// Recompute system latencies after a plugin latency change.
    fn recompute_latencies(&mut self);
}
