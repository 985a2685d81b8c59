//! A backend that runs the process cycle but moves no audio.
//!
//! Used when no audio system is available (or compiled in), and by tests
//! that need a driver with deterministic pacing. Audio ports get private
//! buffers, MIDI and transport do nothing, and a thread ticks the cycle at
//! roughly the configured block rate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::port::{PortFlow, PortType, ProcessPort};
use crate::process::{CycleIo, Process};
use crate::settings::Settings;
use crate::sync::ExitFlag;

use super::{Backend, BackendError};

/// Private per-port audio buffers standing in for a real system.
struct DummyIo {
    audio: HashMap<u32, Vec<f32>>,
}

impl CycleIo for DummyIo {
    fn audio_buffer(&mut self, port_index: u32, _nframes: u32) -> Option<*mut f32> {
        self.audio
            .get_mut(&port_index)
            .map(|buf| buf.as_mut_ptr())
    }

    fn for_each_midi_in(
        &mut self,
        _port_index: u32,
        _nframes: u32,
        _sink: &mut dyn FnMut(u32, &[u8]),
    ) {
    }

    fn clear_midi_out(&mut self, _port_index: u32, _nframes: u32) {}

    fn write_midi_out(&mut self, _port_index: u32, _nframes: u32, _frame: u32, _data: &[u8]) {}
}

#[derive(Default)]
pub struct DummyBackend {
    open: bool,
    block_length: u32,
    sample_rate: f32,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Process>>,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for DummyBackend {
    fn open(
        &mut self,
        settings: &mut Settings,
        _done: ExitFlag,
        name: &str,
        _exact_name: bool,
    ) -> Result<(), BackendError> {
        settings.block_length = 512;
        settings.midi_buf_size = 4096;
        self.block_length = settings.block_length;
        self.sample_rate = settings.sample_rate;
        self.open = true;
        log::info!("Dummy backend:  {name} (no audio)");
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn activate_port(&mut self, _port: &ProcessPort) {}

    fn activate(&mut self, process: Process) -> Result<(), BackendError> {
        if !self.open {
            return Err(BackendError::NotOpen);
        }

        let audio: HashMap<u32, Vec<f32>> = process
            .ports()
            .iter()
            .filter(|p| {
                matches!(p.ty, PortType::Audio | PortType::Cv)
                    && p.flow != PortFlow::Unknown
            })
            .map(|p| (p.index, vec![0.0f32; self.block_length as usize]))
            .collect();

        let block_length = self.block_length;
        let period = Duration::from_secs_f64(f64::from(block_length) / f64::from(self.sample_rate));
        let stop = self.stop.clone();

        let thread = std::thread::Builder::new()
            .name(String::from("dummy-audio"))
            .spawn(move || {
                let mut process = process;
                let mut io = DummyIo { audio };
                while !stop.load(Ordering::Relaxed) {
                    let _ = process.run_cycle(block_length, &mut io);
                    std::thread::sleep(period);
                }
                process
            })
            .expect("Could not spawn dummy audio thread");

        self.thread = Some(thread);
        Ok(())
    }

    fn deactivate(&mut self) -> Option<Process> {
        let thread = self.thread.take()?;
        self.stop.store(true, Ordering::Relaxed);
        let process = thread.join().ok();
        self.stop.store(false, Ordering::Relaxed);
        process
    }

    fn recompute_latencies(&mut self) {}
}
