//! The realtime process cycle.
//!
//! [`Process`] owns everything the audio thread touches: the plugin
//! instance, both communication rings, the worker handles, the port array,
//! and the controls buffer. The backend driver calls [`Process::run_cycle`]
//! once per block with a [`CycleIo`] view of its buffers; nothing in the
//! cycle allocates, locks, or performs I/O.

use std::os::raw::c_void;
use std::sync::Arc;

use crate::atom;
use crate::comm::{self, kind, MessageHeader, HEADER_SIZE};
use crate::controls::ControlsBuf;
use crate::plugin::{PluginInstance, RunContext};
use crate::port::{PortFlow, PortType, ProcessPort};
use crate::ring::{RingReader, RingWriter};
use crate::sync::Semaphore;
use crate::types::RunState;
use crate::urids::Urids;
use crate::worker::{WorkerResponses, WorkerSched};

/// Maximum supported latency in frames (2^24, so all integers are exact).
const MAX_LATENCY: f32 = 16_777_216.0;

/// Errors while draining the ui→plugin ring. The cycle that hits one
/// silences its outputs and discards the rest of the stream to resynchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// Failed to read a message header.
    BadHeader,
    /// Failed to read a control value.
    BadControlValue,
    /// Failed to read or address an event.
    BadEvent,
    /// Failed to read a run state change.
    BadStateChange,
    /// Unknown message type.
    BadMessageType,
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ProcessError::BadHeader => "failed to read header from UI ring",
            ProcessError::BadControlValue => "failed to read control value from UI ring",
            ProcessError::BadEvent => "failed to read event from UI ring",
            ProcessError::BadStateChange => "failed to read run state change from UI ring",
            ProcessError::BadMessageType => "unknown message type received from UI ring",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ProcessError {}

/// Bar/beat/tempo details of a transport position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbt {
    pub bar: i64,
    /// Beat within the bar, fractional.
    pub bar_beat: f32,
    pub beat_unit: i32,
    pub beats_per_bar: f32,
    pub beats_per_minute: f32,
}

/// The backend's transport position for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportInfo {
    pub frame: u64,
    pub rolling: bool,
    pub bbt: Option<Bbt>,
}

/// The backend's buffers for one cycle.
///
/// `audio_buffer` pointers must stay valid until the cycle returns; the
/// plugin holds them across `run()`.
pub trait CycleIo {
    /// The system buffer of an audio or CV port, or `None` if the port is
    /// not connected to the system.
    fn audio_buffer(&mut self, port_index: u32, nframes: u32) -> Option<*mut f32>;

    /// Feed every system MIDI input event of this cycle to `sink` as
    /// `(frame, bytes)`.
    fn for_each_midi_in(
        &mut self,
        port_index: u32,
        nframes: u32,
        sink: &mut dyn FnMut(u32, &[u8]),
    );

    /// Clear a system MIDI output buffer.
    fn clear_midi_out(&mut self, port_index: u32, nframes: u32);

    /// Append one event to a system MIDI output buffer.
    fn write_midi_out(&mut self, port_index: u32, nframes: u32, frame: u32, data: &[u8]);

    /// The transport position, if the backend has one.
    fn transport(&mut self, nframes: u32) -> Option<TransportInfo> {
        let _ = nframes;
        None
    }
}

/// Transport state tracked across cycles.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Position {
    pub frame: u64,
    pub bpm: f32,
    pub rolling: bool,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            frame: 0,
            bpm: 120.0,
            rolling: false,
        }
    }
}

/// State accessed in the process thread.
pub struct Process {
    pub(crate) instance: Box<dyn PluginInstance>,
    pub(crate) ui_to_plugin: RingReader,
    pub(crate) plugin_to_ui: RingWriter,
    /// Realtime schedule handle of the normal worker. Boxed so the address
    /// handed to the plugin's schedule feature stays stable.
    pub(crate) sched: Option<Box<WorkerSched>>,
    pub(crate) worker_responses: Option<WorkerResponses>,
    pub(crate) state_worker_responses: Option<WorkerResponses>,
    pub(crate) ports: Vec<ProcessPort>,
    pub(crate) controls_buf: Arc<ControlsBuf>,
    pub(crate) urids: Urids,
    /// Precomputed patch:Get atom injected on a state request.
    get_msg: [u8; 16],
    /// Receive scratch sized to the largest admissible message at activate.
    pub(crate) process_msg: Box<[u8]>,
    /// Posted when the thread enters the paused state.
    paused: Arc<Semaphore>,
    run_state: RunState,
    pub(crate) control_in: Option<u32>,
    pending_frames: u32,
    update_frames: u32,
    plugin_latency: u32,
    position: Position,
    transport_changed: bool,
    pos_buf: [u8; 256],
    pos_len: usize,
    /// A state request arrived; inject a patch:Get at the next plugin run.
    pending_state_request: bool,
    has_ui: bool,
}

impl Process {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance: Box<dyn PluginInstance>,
        ports: Vec<ProcessPort>,
        controls_buf: Arc<ControlsBuf>,
        ui_to_plugin: RingReader,
        plugin_to_ui: RingWriter,
        paused: Arc<Semaphore>,
        urids: Urids,
        update_frames: u32,
    ) -> Self {
        let control_in = ports
            .iter()
            .find(|p| p.is_primary)
            .map(|p| p.index);

        Self {
            instance,
            ui_to_plugin,
            plugin_to_ui,
            sched: None,
            worker_responses: None,
            state_worker_responses: None,
            ports,
            controls_buf,
            urids,
            get_msg: atom::patch_get_atom(&urids),
            process_msg: vec![0u8; 1024].into_boxed_slice(),
            paused,
            run_state: RunState::Paused,
            control_in,
            pending_frames: 0,
            update_frames,
            plugin_latency: 0,
            position: Position::default(),
            transport_changed: false,
            pos_buf: [0u8; 256],
            pos_len: 0,
            pending_state_request: false,
            has_ui: false,
        }
    }

    pub fn set_workers(
        &mut self,
        sched: Option<Box<WorkerSched>>,
        responses: Option<WorkerResponses>,
        state_responses: Option<WorkerResponses>,
    ) {
        self.sched = sched;
        self.worker_responses = responses;
        self.state_worker_responses = state_responses;
    }

    pub fn set_has_ui(&mut self, has_ui: bool) {
        self.has_ui = has_ui;
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Set the run state directly. Only valid while the backend is not
    /// running the cycle; running transitions go through the ring.
    pub fn set_run_state(&mut self, state: RunState) {
        self.run_state = state;
    }

    pub fn plugin_latency(&self) -> u32 {
        self.plugin_latency
    }

    pub fn controls_buf(&self) -> &Arc<ControlsBuf> {
        &self.controls_buf
    }

    pub fn ports(&self) -> &[ProcessPort] {
        &self.ports
    }

    pub fn instance_mut(&mut self) -> &mut dyn PluginInstance {
        &mut *self.instance
    }

    /// Raw handle to the boxed instance. The address is stable while the
    /// process state exists, even as it moves between host and backend.
    pub(crate) fn instance_ptr(&mut self) -> *mut dyn PluginInstance {
        let instance: &mut dyn PluginInstance = &mut *self.instance;
        instance as *mut dyn PluginInstance
    }

    /// Run the plugin for a block of frames: apply pending UI messages, run
    /// the instance, deliver worker replies, and emit output changes.
    ///
    /// Returns whether output value updates were sent to the UI this cycle.
    pub fn run_cycle(
        &mut self,
        nframes: u32,
        io: &mut dyn CycleIo,
    ) -> Result<bool, ProcessError> {
        // If execution is paused, emit silence, but keep applying UI
        // messages so control writes and resume requests are not lost.
        if self.run_state == RunState::Paused {
            self.silence(nframes, io);
            self.apply_ui_events(nframes)?;
            return Ok(false);
        }

        self.update_transport(nframes, io);
        self.pre_process_ports(nframes, io);

        if let Err(err) = self.apply_ui_events(nframes) {
            // Discard the rest of the stream so framing recovers, and keep
            // this cycle silent.
            let leftover = self.ui_to_plugin.read_space();
            let _ = self.ui_to_plugin.skip(leftover);
            self.silence(nframes, io);
            log::error!("Dropped UI messages: {err}");
            return Err(err);
        }

        // The pause may have arrived in the drain above
        if self.run_state == RunState::Paused {
            self.silence(nframes, io);
            return Ok(false);
        }

        let mut ctx = RunContext::new(self.sched.as_deref_mut());
        self.instance.run(nframes, &mut ctx);

        // Process any worker replies and end the cycle
        if let Some(worker) = &mut self.state_worker_responses {
            worker.emit_responses();
        }
        if let Some(worker) = &mut self.worker_responses {
            worker.emit_responses();
            worker.end_run();
        }

        // Check if it's time to send updates to the UI
        self.pending_frames += nframes;
        let send_updates = self.update_frames != 0 && self.pending_frames >= self.update_frames;
        if send_updates {
            self.pending_frames = 0;
        }

        self.post_process_ports(nframes, send_updates, io);
        Ok(send_updates)
    }

    /// Read and apply everything pending on the ui→plugin ring.
    fn apply_ui_events(&mut self, nframes: u32) -> Result<(), ProcessError> {
        let space = self.ui_to_plugin.read_space() as usize;
        let mut consumed = 0usize;
        let mut header_buf = [0u8; 8];

        while consumed < space {
            if self.ui_to_plugin.read(&mut header_buf).is_err() {
                return Err(ProcessError::BadHeader);
            }
            let header = MessageHeader::from_bytes(header_buf);
            consumed += (HEADER_SIZE + header.size) as usize;

            match header.kind {
                kind::CONTROL_PORT_CHANGE => {
                    let mut body = [0u8; 8];
                    if header.size != 8 || self.ui_to_plugin.read(&mut body).is_err() {
                        return Err(ProcessError::BadControlValue);
                    }
                    let (port_index, value) =
                        comm::parse_control(&body).ok_or(ProcessError::BadControlValue)?;
                    if port_index as usize >= self.ports.len() {
                        return Err(ProcessError::BadControlValue);
                    }
                    self.controls_buf.set(port_index, value);
                }

                kind::EVENT_TRANSFER => {
                    let size = header.size as usize;
                    if size > self.process_msg.len()
                        || self.ui_to_plugin.read(&mut self.process_msg[..size]).is_err()
                    {
                        return Err(ProcessError::BadEvent);
                    }
                    let (port_index, ty, body) =
                        comm::parse_event_transfer(&self.process_msg[..size])
                            .ok_or(ProcessError::BadEvent)?;
                    let port = self
                        .ports
                        .get_mut(port_index as usize)
                        .ok_or(ProcessError::BadEvent)?;
                    if let Some(evbuf) = &mut port.evbuf {
                        evbuf.write(nframes, 0, ty, body);
                    }
                }

                kind::STATE_REQUEST => {
                    // Injected at the next plugin run, so the request also
                    // survives a paused cycle's buffer reset
                    self.pending_state_request = true;
                }

                kind::RUN_STATE_CHANGE => {
                    let mut body = [0u8; 4];
                    if header.size != 4 || self.ui_to_plugin.read(&mut body).is_err() {
                        return Err(ProcessError::BadStateChange);
                    }
                    let state =
                        comm::parse_run_state(&body).ok_or(ProcessError::BadStateChange)?;
                    self.run_state = state;
                    if state == RunState::Paused {
                        self.paused.post();
                    }
                }

                _ => return Err(ProcessError::BadMessageType),
            }
        }

        Ok(())
    }

    /// Query the backend transport and forge a position atom on change.
    fn update_transport(&mut self, nframes: u32, io: &mut dyn CycleIo) {
        self.pos_len = 0;
        self.transport_changed = false;

        let Some(info) = io.transport(nframes) else {
            return;
        };

        let bpm = info.bbt.map(|b| b.beats_per_minute);
        let changed = info.rolling != self.position.rolling
            || info.frame != self.position.frame
            || bpm.map_or(false, |b| b != self.position.bpm);

        // Update to the values expected at the start of the next cycle
        self.position.frame = if info.rolling {
            info.frame + u64::from(nframes)
        } else {
            info.frame
        };
        if let Some(bpm) = bpm {
            self.position.bpm = bpm;
        }
        self.position.rolling = info.rolling;
        self.transport_changed = changed && info.bbt.is_some();

        if changed {
            let urids = self.urids;
            let mut forge = atom::Forge::new(&mut self.pos_buf, &urids);
            let ok = (|| {
                let frame = forge.begin_object(urids.time_position)?;
                forge.key(urids.time_frame)?;
                forge.write_long(info.frame as i64)?;
                forge.key(urids.time_speed)?;
                forge.write_float(if info.rolling { 1.0 } else { 0.0 })?;
                if let Some(bbt) = info.bbt {
                    forge.key(urids.time_bar_beat)?;
                    forge.write_float(bbt.bar_beat)?;
                    forge.key(urids.time_bar)?;
                    forge.write_long(bbt.bar)?;
                    forge.key(urids.time_beat_unit)?;
                    forge.write_int(bbt.beat_unit)?;
                    forge.key(urids.time_beats_per_bar)?;
                    forge.write_float(bbt.beats_per_bar)?;
                    forge.key(urids.time_beats_per_minute)?;
                    forge.write_float(bbt.beats_per_minute)?;
                }
                forge.end_object(frame);
                Ok::<(), atom::ForgeError>(())
            })();
            if ok.is_ok() {
                self.pos_len = forge.offset();
            }
        }
    }

    /// Prepare every port for the plugin run.
    fn pre_process_ports(&mut self, nframes: u32, io: &mut dyn CycleIo) {
        let urids = self.urids;
        let pos_len = self.pos_len;
        let transport_changed = self.transport_changed;
        let bpm = self.position.bpm;

        for i in 0..self.ports.len() {
            let port = &mut self.ports[i];
            let index = port.index;

            if matches!(port.ty, PortType::Audio | PortType::Cv) && port.has_sys_port {
                // Connect the plugin directly to the system buffer
                if let Some(buf) = io.audio_buffer(index, nframes) {
                    unsafe { self.instance.connect_port(index, buf as *mut c_void) };
                }
            } else if port.ty == PortType::Event && port.flow == PortFlow::Input {
                let supports_pos = port.supports_pos;
                let is_primary = port.is_primary;
                let has_sys = port.has_sys_port;
                let Some(evbuf) = port.evbuf.as_mut() else {
                    continue;
                };
                evbuf.reset(true);

                if supports_pos && pos_len > 0 {
                    if let Some(pos) = atom::AtomRef::parse(&self.pos_buf[..pos_len]) {
                        evbuf.write(0, 0, pos.ty, pos.body);
                    }
                }

                if is_primary && self.pending_state_request {
                    let get_body: [u8; 8] = self.get_msg[8..16].try_into().unwrap();
                    evbuf.write(0, 0, urids.atom_object, &get_body);
                    self.pending_state_request = false;
                }

                if has_sys {
                    io.for_each_midi_in(index, nframes, &mut |frame, data| {
                        evbuf.write(frame, 0, urids.midi_event, data);
                    });
                }
            } else if port.ty == PortType::Event {
                // Clear event output for the plugin to write to
                if let Some(evbuf) = port.evbuf.as_mut() {
                    evbuf.reset(false);
                }
            } else if port.ty == PortType::Control
                && port.flow == PortFlow::Input
                && port.is_bpm
                && transport_changed
            {
                self.controls_buf.set(index, bpm);
                let _ = comm::write_control(&mut self.plugin_to_ui, index, bpm);
            }
        }
    }

    /// Deliver MIDI output and UI events after the plugin run.
    fn post_process_ports(&mut self, nframes: u32, send_updates: bool, io: &mut dyn CycleIo) {
        for i in 0..self.ports.len() {
            let port = &self.ports[i];
            if port.flow != PortFlow::Output {
                continue;
            }
            let index = port.index;

            if port.ty == PortType::Control && port.reports_latency {
                // Latency in frames from the control output, truncated
                let value = self.controls_buf.get(index);
                let frames = if (0.0..=MAX_LATENCY).contains(&value) {
                    value as u32
                } else {
                    0
                };

                if self.plugin_latency != frames {
                    self.plugin_latency = frames;
                    let _ = comm::write_latency(&mut self.plugin_to_ui, frames);
                }
            } else if port.ty == PortType::Event {
                let has_midi_out = port.has_sys_port;
                if has_midi_out {
                    io.clear_midi_out(index, nframes);
                }

                if let Some(evbuf) = &port.evbuf {
                    for ev in evbuf.iter() {
                        if has_midi_out && ev.ty == self.urids.midi_event {
                            io.write_midi_out(index, nframes, ev.frames, ev.body);
                        }
                        if self.has_ui {
                            let _ = comm::write_event(
                                &mut self.plugin_to_ui,
                                index,
                                self.urids.atom_event_transfer,
                                ev.ty,
                                ev.body,
                            );
                        }
                    }
                }
            } else if send_updates && port.ty == PortType::Control {
                let _ = comm::write_control(
                    &mut self.plugin_to_ui,
                    index,
                    self.controls_buf.get(index),
                );
            }
        }
    }

    /// Zero every system audio output and clear every MIDI output.
    fn silence(&mut self, nframes: u32, io: &mut dyn CycleIo) {
        for port in &self.ports {
            if port.flow != PortFlow::Output || !port.has_sys_port {
                continue;
            }
            match port.ty {
                PortType::Audio | PortType::Cv => {
                    if let Some(buf) = io.audio_buffer(port.index, nframes) {
                        let frames =
                            unsafe { std::slice::from_raw_parts_mut(buf, nframes as usize) };
                        frames.fill(0.0);
                    }
                }
                PortType::Event => io.clear_midi_out(port.index, nframes),
                _ => {}
            }
        }
    }
}
