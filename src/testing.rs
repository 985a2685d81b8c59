//! Scripted doubles for the plugin boundary, used by the process, state,
//! and host tests. The mock instance behaves like a plugin binary: it only
//! sees the buffers it was connected to, and reads and writes them through
//! raw pointers exactly as a loaded shared library would.

use std::collections::HashMap;
use std::os::raw::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::any_value::AnyValue;
use crate::atom::pad_size;
use crate::controls::ControlsBuf;
use crate::mapper::{Mapper, Urid};
use crate::plugin::{
    HostFeatures, OpenError, PluginData, PluginInstance, PluginState, PortData, PresetRecord,
    RunContext, SaveTarget, World,
};
use crate::port::{PortFlow, PortType};
use crate::process::Process;
use crate::process::{CycleIo, TransportInfo};
use crate::ring::{self, RingReader, RingWriter};
use crate::settings::Settings;
use crate::setup;
use crate::state::StateError;
use crate::sync::Semaphore;
use crate::urids::Urids;
use crate::worker::{WorkExecutor, WorkerError, WorkerSched};

/// What the mock plugin does during each `run()`.
#[derive(Default)]
pub struct MockScript {
    /// Value written to every audio output sample.
    pub audio_fill: f32,
    /// `(port, value)` written to a control output each run.
    pub latency: Option<(u32, f32)>,
    /// `(port, type, body)` events appended to event outputs each run.
    pub emit_events: Vec<(u32, Urid, Vec<u8>)>,
    /// Work scheduled during the next run, then cleared.
    pub schedule_on_run: Vec<Vec<u8>>,
}

/// One observed `run()` call.
pub struct RunRecord {
    pub nframes: u32,
    /// Control input values seen through the connected buffers.
    pub controls: HashMap<u32, f32>,
    /// Events found in the primary control input, as `(type, body)`.
    pub primary_events: Vec<(Urid, Vec<u8>)>,
}

#[derive(Default)]
pub struct MockShared {
    pub connections: HashMap<u32, *mut c_void>,
    pub runs: Vec<RunRecord>,
    pub script: MockScript,
    /// Plugin-internal state properties.
    pub props: Vec<(Urid, AnyValue)>,
    /// Payloads handed to `work()`.
    pub works: Vec<Vec<u8>>,
    /// Payloads delivered back through `work_response()`.
    pub responses: Vec<Vec<u8>>,
    pub end_runs: usize,
    pub active: bool,
}

// The raw pointers are only dereferenced while the owning process state is
// alive and on the thread running the cycle.
unsafe impl Send for MockShared {}

fn read_f32(ptr: *const c_void) -> f32 {
    unsafe { (ptr as *const f32).read() }
}

fn write_f32(ptr: *mut c_void, value: f32) {
    unsafe { (ptr as *mut f32).write(value) }
}

/// Parse the events out of a connected sequence buffer.
fn read_seq(ptr: *const c_void) -> Vec<(Urid, Vec<u8>)> {
    let base = ptr as *const u8;
    let atom_size = unsafe { (base as *const u32).read() };
    let mut events = Vec::new();
    let mut offset = 0u32;
    let contents = atom_size.saturating_sub(8);
    while offset < contents {
        unsafe {
            let ev = base.add(16 + offset as usize);
            let size = (ev.add(8) as *const u32).read();
            let ty = (ev.add(12) as *const u32).read();
            let body = std::slice::from_raw_parts(ev.add(16), size as usize).to_vec();
            events.push((ty, body));
            offset += 16 + pad_size(size);
        }
    }
    events
}

/// Append an event to a connected output buffer, initializing the sequence
/// header the way a plugin's forge would.
fn seq_append(ptr: *mut c_void, sequence_urid: Urid, ty: Urid, body: &[u8]) {
    let base = ptr as *mut u8;
    unsafe {
        let current_ty = (base.add(4) as *const u32).read();
        if current_ty != sequence_urid {
            (base as *mut u32).write(8);
            (base.add(4) as *mut u32).write(sequence_urid);
            (base.add(8) as *mut u32).write(0);
            (base.add(12) as *mut u32).write(0);
        }

        let atom_size = (base as *const u32).read();
        let at = 16 + pad_size(atom_size - 8) as usize;
        (base.add(at) as *mut i64).write(0);
        (base.add(at + 8) as *mut u32).write(body.len() as u32);
        (base.add(at + 12) as *mut u32).write(ty);
        std::ptr::copy_nonoverlapping(body.as_ptr(), base.add(at + 16), body.len());
        (base as *mut u32).write(atom_size - 8 + 16 + pad_size(body.len() as u32) + 8);
    }
}

/// The mock's worker extension: echoes work input back as its response.
pub struct MockExec {
    shared: Arc<Mutex<MockShared>>,
}

impl WorkExecutor for MockExec {
    fn work(
        &self,
        respond: &mut dyn FnMut(&[u8]) -> Result<(), WorkerError>,
        data: &[u8],
    ) -> Result<(), WorkerError> {
        self.shared.lock().works.push(data.to_vec());
        respond(data)
    }

    fn work_response(&self, data: &[u8]) -> Result<(), WorkerError> {
        self.shared.lock().responses.push(data.to_vec());
        Ok(())
    }

    fn end_run(&self) {
        self.shared.lock().end_runs += 1;
    }
}

pub struct MockInstance {
    pub shared: Arc<Mutex<MockShared>>,
    plugin: PluginData,
    urids: Urids,
    exec: Arc<MockExec>,
}

impl MockInstance {
    pub fn new(plugin: PluginData, urids: Urids, shared: Arc<Mutex<MockShared>>) -> Self {
        let exec = Arc::new(MockExec {
            shared: shared.clone(),
        });
        Self {
            shared,
            plugin,
            urids,
            exec,
        }
    }

    fn primary_port(&self) -> Option<u32> {
        self.plugin
            .ports
            .iter()
            .position(|p| {
                p.ty == PortType::Event && p.flow == PortFlow::Input && p.designation_control
            })
            .map(|i| i as u32)
    }
}

impl PluginInstance for MockInstance {
    fn activate(&mut self) {
        self.shared.lock().active = true;
    }

    fn deactivate(&mut self) {
        self.shared.lock().active = false;
    }

    unsafe fn connect_port(&mut self, index: u32, buffer: *mut c_void) {
        self.shared.lock().connections.insert(index, buffer);
    }

    fn run(&mut self, nframes: u32, ctx: &mut RunContext) {
        let primary = self.primary_port();
        let to_schedule;
        {
            let mut shared = self.shared.lock();

            let mut record = RunRecord {
                nframes,
                controls: HashMap::new(),
                primary_events: Vec::new(),
            };

            for (i, port) in self.plugin.ports.iter().enumerate() {
                let index = i as u32;
                let Some(&ptr) = shared.connections.get(&index) else {
                    continue;
                };
                if ptr.is_null() {
                    continue;
                }

                if port.ty == PortType::Control && port.flow == PortFlow::Input {
                    record.controls.insert(index, read_f32(ptr));
                } else if port.ty == PortType::Audio && port.flow == PortFlow::Output {
                    let fill = shared.script.audio_fill;
                    let buf =
                        unsafe { std::slice::from_raw_parts_mut(ptr as *mut f32, nframes as usize) };
                    buf.fill(fill);
                } else if Some(index) == primary {
                    record.primary_events = read_seq(ptr);
                }
            }

            if let Some((port, value)) = shared.script.latency {
                if let Some(&ptr) = shared.connections.get(&port) {
                    write_f32(ptr, value);
                }
            }

            let emits = shared.script.emit_events.clone();
            for (port, ty, body) in &emits {
                if let Some(&ptr) = shared.connections.get(port) {
                    seq_append(ptr, self.urids.atom_sequence, *ty, body);
                }
            }

            to_schedule = std::mem::take(&mut shared.script.schedule_on_run);
            shared.runs.push(record);
        }

        // Outside the lock: the inline worker path calls straight back into
        // the executor
        for data in to_schedule {
            let _ = ctx.schedule_work(&data);
        }
    }

    fn work_executor(&self) -> Option<Arc<dyn WorkExecutor>> {
        Some(self.exec.clone())
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// A state snapshot for the mock world.
#[derive(Default, Clone)]
pub struct MockState {
    pub uri: Option<String>,
    pub label: Option<String>,
    pub port_values: Vec<(String, AnyValue)>,
    pub props: Vec<(Urid, AnyValue)>,
}

impl PluginState for MockState {
    fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn restore(
        &self,
        instance: &mut dyn PluginInstance,
        _sched: Option<&mut WorkerSched>,
        set_port_value: &mut dyn FnMut(&str, &AnyValue),
    ) -> Result<(), StateError> {
        let mock = instance
            .as_any_mut()
            .downcast_mut::<MockInstance>()
            .ok_or_else(|| StateError::Restore(String::from("foreign instance")))?;
        mock.shared.lock().props = self.props.clone();

        for (symbol, value) in &self.port_values {
            set_port_value(symbol, value);
        }
        Ok(())
    }
}

/// A scripted world for one mock plugin.
pub struct MockWorld {
    pub plugin: PluginData,
    pub shared: Arc<Mutex<MockShared>>,
    pub presets: Vec<(PresetRecord, MockState)>,
}

impl MockWorld {
    pub fn new(plugin: PluginData) -> Self {
        Self {
            plugin,
            shared: Arc::new(Mutex::new(MockShared::default())),
            presets: Vec::new(),
        }
    }

    /// Read a state bundle written by `save_state` back in.
    pub fn load_state_dir(dir: &Path) -> std::io::Result<MockState> {
        let text = std::fs::read_to_string(dir.join("state.ttl"))?;
        let mut state = MockState::default();
        let mapper = Mapper::new();
        let urids = Urids::new(&mapper);
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            if parts.next() != Some("port") {
                continue;
            }
            let (Some(symbol), Some(bits)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(bits) = u32::from_str_radix(bits, 16) else {
                continue;
            };
            state.port_values.push((
                symbol.to_string(),
                AnyValue::from_float(&urids, f32::from_bits(bits)),
            ));
        }
        Ok(state)
    }
}

impl World for MockWorld {
    fn plugin(&self) -> &PluginData {
        &self.plugin
    }

    fn instantiate(
        &mut self,
        _sample_rate: f64,
        features: &HostFeatures,
    ) -> Result<Box<dyn PluginInstance>, OpenError> {
        Ok(Box::new(MockInstance::new(
            self.plugin.clone(),
            *features.urids,
            self.shared.clone(),
        )))
    }

    fn load_presets(&mut self) -> Vec<PresetRecord> {
        self.presets.iter().map(|(rec, _)| rec.clone()).collect()
    }

    fn load_preset(&mut self, uri: &str) -> Result<Box<dyn PluginState>, StateError> {
        self.presets
            .iter()
            .find(|(rec, _)| rec.uri == uri)
            .map(|(_, state)| Box::new(state.clone()) as Box<dyn PluginState>)
            .ok_or_else(|| StateError::NotFound(uri.to_string()))
    }

    fn save_state(
        &mut self,
        _instance: &mut dyn PluginInstance,
        target: &SaveTarget,
        get_port_value: &mut dyn FnMut(&str) -> Option<AnyValue>,
    ) -> Result<Box<dyn PluginState>, StateError> {
        std::fs::create_dir_all(target.dir)?;

        let mut state = MockState {
            uri: target.uri.map(str::to_owned),
            label: target.label.map(str::to_owned),
            ..MockState::default()
        };

        let mut body = String::new();
        for port in &self.plugin.ports {
            if let Some(value) = get_port_value(&port.symbol) {
                if let Ok(bytes) = <[u8; 4]>::try_from(value.data()) {
                    let bits = u32::from_ne_bytes(bytes);
                    body.push_str(&format!("port {} {:08x}\n", port.symbol, bits));
                }
                state.port_values.push((port.symbol.clone(), value));
            }
        }

        let filename = target.filename.unwrap_or("state.ttl");
        std::fs::write(target.dir.join("manifest.ttl"), "# roost state bundle\n")?;
        std::fs::write(target.dir.join(filename), body)?;
        Ok(Box::new(state))
    }

    fn delete_preset(&mut self, uri: &str) -> Result<(), StateError> {
        self.presets.retain(|(rec, _)| rec.uri != uri);
        Ok(())
    }
}

/// Backend buffers for driving cycles by hand.
#[derive(Default)]
pub struct MockIo {
    pub audio: HashMap<u32, Vec<f32>>,
    pub midi_in: HashMap<u32, Vec<(u32, Vec<u8>)>>,
    pub midi_out: HashMap<u32, Vec<(u32, Vec<u8>)>>,
    pub midi_clears: usize,
    pub transport: Option<TransportInfo>,
}

impl MockIo {
    /// Allocate audio buffers for every audio/CV port, filled with garbage
    /// so silencing is observable.
    pub fn for_plugin(plugin: &PluginData, nframes: u32) -> Self {
        let mut io = Self::default();
        for (i, port) in plugin.ports.iter().enumerate() {
            if matches!(port.ty, PortType::Audio | PortType::Cv) {
                io.audio.insert(i as u32, vec![0.123f32; nframes as usize]);
            }
        }
        io
    }
}

impl CycleIo for MockIo {
    fn audio_buffer(&mut self, port_index: u32, _nframes: u32) -> Option<*mut f32> {
        self.audio.get_mut(&port_index).map(|buf| buf.as_mut_ptr())
    }

    fn for_each_midi_in(
        &mut self,
        port_index: u32,
        _nframes: u32,
        sink: &mut dyn FnMut(u32, &[u8]),
    ) {
        if let Some(events) = self.midi_in.get(&port_index) {
            for (frame, data) in events {
                sink(*frame, data);
            }
        }
    }

    fn clear_midi_out(&mut self, port_index: u32, _nframes: u32) {
        self.midi_clears += 1;
        self.midi_out.entry(port_index).or_default().clear();
    }

    fn write_midi_out(&mut self, port_index: u32, _nframes: u32, frame: u32, data: &[u8]) {
        self.midi_out
            .entry(port_index)
            .or_default()
            .push((frame, data.to_vec()));
    }

    fn transport(&mut self, _nframes: u32) -> Option<TransportInfo> {
        self.transport
    }
}

/// A fully wired process state over a mock instance, plus the UI-side ends.
pub struct Harness {
    pub process: Process,
    pub ui_to_plugin: RingWriter,
    pub plugin_to_ui: RingReader,
    pub shared: Arc<Mutex<MockShared>>,
    pub paused: Arc<Semaphore>,
    pub urids: Urids,
    pub settings: Settings,
}

impl Harness {
    pub fn new(plugin: PluginData, update_frames: u32) -> Self {
        let mapper = Mapper::new();
        let urids = Urids::new(&mapper);
        let settings = Settings {
            sample_rate: 48_000.0,
            block_length: 256,
            midi_buf_size: 1024,
            ring_size: 16_384,
            ui_update_hz: 30.0,
            ui_scale_factor: 1.0,
        };

        let shared = Arc::new(Mutex::new(MockShared::default()));
        let instance = MockInstance::new(plugin.clone(), urids, shared.clone());

        let ports = setup::build_ports(&plugin).expect("test plugin has sound ports");
        let controls_buf = ControlsBuf::with_defaults(&plugin);
        let paused = Arc::new(Semaphore::new(0));

        let (ui_tx, ui_rx) = ring::new(settings.ring_size);
        let (plugin_tx, plugin_rx) = ring::new(settings.ring_size);

        let mut process = Process::new(
            Box::new(instance),
            ports,
            controls_buf,
            ui_rx,
            plugin_tx,
            paused.clone(),
            urids,
            update_frames,
        );
        setup::activate(&mut process, &urids, &settings);

        Self {
            process,
            ui_to_plugin: ui_tx,
            plugin_to_ui: plugin_rx,
            shared,
            paused,
            urids,
            settings,
        }
    }

    /// Drain the plugin→ui ring into `(kind, body)` pairs.
    pub fn drain_ui(&mut self) -> Vec<(u32, Vec<u8>)> {
        let mut messages = Vec::new();
        let mut header_buf = [0u8; 8];
        while self.plugin_to_ui.read(&mut header_buf).is_ok() {
            let header = crate::comm::MessageHeader::from_bytes(header_buf);
            let mut body = vec![0u8; header.size as usize];
            self.plugin_to_ui.read(&mut body).unwrap();
            messages.push((header.kind, body));
        }
        messages
    }
}

/// A plugin description exercising most port kinds.
pub fn rich_plugin() -> PluginData {
    let mut primary = PortData::event_input("control");
    primary.designation_control = true;
    primary.supports_midi = true;
    primary.supports_position = true;

    let mut events_out = PortData::event_output("events_out");
    events_out.supports_midi = true;

    let mut latency_port = PortData::control_output("latency", "Latency");
    latency_port.reports_latency = true;

    PluginData {
        uri: String::from("urn:roost:test"),
        name: String::from("Test Plugin"),
        ports: vec![
            primary,                                                     // 0
            PortData::audio_input("in", "In"),                           // 1
            PortData::audio_output("out", "Out"),                        // 2
            PortData::control_input("gain", "Gain", 0.5, 0.0, 1.0),      // 3
            latency_port,                                                // 4
            PortData::control_input("level", "Level", 0.0, 0.0, 1.0),    // 5
            events_out,                                                  // 6
            PortData::control_output("meter", "Meter"),                  // 7
        ],
        ..PluginData::default()
    }
}

/// A temporary directory that cleans up after itself.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("roost-test-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
