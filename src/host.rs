//! Host orchestration: open, lifecycle, the UI update loop, and control
//! writes.
//!
//! [`Host`] owns the non-realtime side of everything: the world, the
//! backend, the UI ends of the communication rings, the control model, and
//! the worker lifecycles. The realtime side lives in
//! [`Process`](crate::process::Process), which the host builds at open and
//! hands to the backend at activate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::any_value::AnyValue;
use crate::atom::{self, AtomRef, ObjectRef};
use crate::backend::Backend;
use crate::comm::{self, kind, MessageHeader};
use crate::controls::{Control, Controls, ControlsBuf, ControlTarget};
use crate::mapper::{Mapper, Urid};
use crate::plugin::{
    HostFeatures, PluginData, PluginState, PresetRecord, SaveTarget, World,
};
use crate::port::PortMap;
use crate::process::Process;
use crate::ring::{self, RingReader, RingWriter};
use crate::settings::Settings;
use crate::setup;
use crate::state::{self, ApplyContext, StateError};
use crate::sync::{ExitFlag, Semaphore};
use crate::types::RunState;
use crate::urids::{uri, Urids};
use crate::worker::{Worker, WorkerSched};
use crate::plugin::OpenError;

/// Features the host can satisfy, plus the two lilv handles itself.
const SUPPORTED_FEATURES: &[&str] = &[
    uri::URID_MAP,
    uri::URID_UNMAP,
    uri::STATE_MAKE_PATH,
    uri::STATE_LOAD_DEFAULT_STATE,
    uri::STATE_THREAD_SAFE_RESTORE,
    uri::WORKER_SCHEDULE,
    uri::LOG_LOG,
    uri::OPTIONS_OPTIONS,
    uri::UI_REQUEST_VALUE,
    uri::BUF_SIZE_BOUNDED_BLOCK_LENGTH,
    uri::BUF_SIZE_FIXED_BLOCK_LENGTH,
    uri::BUF_SIZE_POW2_BLOCK_LENGTH,
    "http://lv2plug.in/ns/lv2core#isLive",
    "http://lv2plug.in/ns/lv2core#inPlaceBroken",
];

/// Command-line options relevant to the host core.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Backend client name; defaults to the plugin name.
    pub name: Option<String>,
    /// Exit if the requested name is taken.
    pub name_exact: bool,
    /// Requested communication ring size in bytes.
    pub ring_size: u32,
    /// UI update rate in Hz, or 0 for the frontend default.
    pub update_rate: f32,
    /// UI scale factor, or 0 for the frontend default.
    pub scale_factor: f32,
    /// Dump plugin↔UI communication.
    pub dump: bool,
    /// Show controls for ports marked not-on-GUI.
    pub show_hidden: bool,
    /// Show the plugin UI if possible.
    pub show_ui: bool,
    /// Print control output changes to stdout.
    pub print_controls: bool,
    /// Do not listen for commands on stdin.
    pub non_interactive: bool,
    /// URI of a specific UI to load.
    pub ui_uri: Option<String>,
    /// Initial control values as `SYMBOL=VALUE` strings.
    pub controls: Vec<String>,
}

/// The callback contract a frontend implements.
pub trait Frontend {
    /// A control's value changed on the plugin side.
    fn control_changed(&mut self, control: &Control, value: &AnyValue);
}

/// An aliasing handle to the instance inside the process state.
///
/// The instance is owned by the audio side once activated; state save and
/// restore reach it through this handle under the apply protocol (paused
/// process, or a thread-safe restore).
struct InstanceHandle(*mut dyn crate::plugin::PluginInstance);

// Only dereferenced from the UI thread under the apply protocol.
unsafe impl Send for InstanceHandle {}

pub struct Host {
    opts: Options,
    mapper: Arc<Mapper>,
    urids: Urids,
    world: Box<dyn World>,
    backend: Box<dyn Backend>,
    settings: Settings,
    controls: Controls,
    controls_buf: Arc<ControlsBuf>,
    port_map: PortMap,
    control_in: Option<u32>,
    /// UI end of the ui→plugin ring.
    ui_to_plugin: Option<RingWriter>,
    /// UI end of the plugin→ui ring.
    plugin_to_ui: Option<RingReader>,
    /// Buffer for messages and forged atoms on the UI thread.
    ui_msg: Vec<u8>,
    paused: Arc<Semaphore>,
    done: ExitFlag,
    work_lock: Arc<Mutex<()>>,
    worker: Option<Worker>,
    state_worker: Option<Worker>,
    /// Inline schedule handle of the state worker, for restore.
    state_sched: Option<Box<WorkerSched>>,
    /// Present between open and activate, and again after deactivate.
    process: Option<Process>,
    instance: Option<InstanceHandle>,
    run_state: RunState,
    safe_restore: bool,
    /// Suppresses re-entrant control writes while dispatching updates.
    updating: bool,
    preset: Option<Box<dyn PluginState>>,
    presets: Vec<PresetRecord>,
    temp_dir: Option<tempfile::TempDir>,
    opened: bool,
}

impl Host {
    pub fn new(world: Box<dyn World>, backend: Box<dyn Backend>, opts: Options) -> Self {
        Self::with_mapper(world, backend, opts, Arc::new(Mapper::new()))
    }

    /// Create a host sharing a URID mapper with the world (the mapper must
    /// be the one the world loaded any initial state with).
    pub fn with_mapper(
        world: Box<dyn World>,
        backend: Box<dyn Backend>,
        opts: Options,
        mapper: Arc<Mapper>,
    ) -> Self {
        let urids = Urids::new(&mapper);

        Self {
            opts,
            mapper,
            urids,
            world,
            backend,
            settings: Settings::default(),
            controls: Controls::default(),
            controls_buf: ControlsBuf::new(0),
            port_map: PortMap::default(),
            control_in: None,
            ui_to_plugin: None,
            plugin_to_ui: None,
            ui_msg: Vec::new(),
            paused: Arc::new(Semaphore::new(0)),
            done: ExitFlag::new(),
            work_lock: Arc::new(Mutex::new(())),
            worker: None,
            state_worker: None,
            state_sched: None,
            process: None,
            instance: None,
            run_state: RunState::Paused,
            safe_restore: false,
            updating: false,
            preset: None,
            presets: Vec::new(),
            temp_dir: None,
            opened: false,
        }
    }

    /// Load the plugin and set up the application. `initial_state` is a
    /// state loaded from the command line, applied before activation.
    pub fn open(
        &mut self,
        initial_state: Option<Box<dyn PluginState>>,
    ) -> Result<(), OpenError> {
        let plugin = self.world.plugin().clone();
        log::info!("Plugin:       {}", plugin.uri);

        // Check that any required features are supported
        for feature in &plugin.required_features {
            if !SUPPORTED_FEATURES.contains(&feature.as_str()) {
                return Err(OpenError::UnsupportedFeature(feature.clone()));
            }
        }

        self.settings = Settings {
            ring_size: self.opts.ring_size,
            ui_update_hz: self.opts.update_rate,
            ui_scale_factor: self.opts.scale_factor,
            ..Settings::default()
        };

        // Temporary directory for plugin state files (state:makePath)
        self.temp_dir = tempfile::Builder::new()
            .prefix("roost")
            .tempdir()
            .map_err(|err| {
                log::warn!("Failed to create temporary state directory: {err}");
                err
            })
            .ok();

        // Open the backend (to learn the sample rate, among other things)
        let name = self
            .opts
            .name
            .clone()
            .unwrap_or_else(|| plugin.name.clone());
        self.backend
            .open(
                &mut self.settings,
                self.done.clone(),
                &name,
                self.opts.name_exact,
            )
            .map_err(|err| OpenError::Backend(err.to_string()))?;

        log::info!("Sample rate:  {} Hz", self.settings.sample_rate as u32);
        log::info!("Block length: {} frames", self.settings.block_length);
        log::info!("MIDI buffers: {} bytes", self.settings.midi_buf_size);

        // Port and control structures
        let ports = setup::build_ports(&plugin)?;
        self.controls_buf = ControlsBuf::with_defaults(&plugin);
        self.port_map = PortMap::from_plugin(&plugin);
        self.controls = Controls::build(
            &plugin,
            self.settings.sample_rate,
            self.opts.show_hidden,
            &self.mapper,
            &self.urids,
        );
        self.safe_restore = plugin.safe_restore;

        // Finish UI settings
        if self.settings.ui_update_hz <= 0.0 {
            self.settings.ui_update_hz = 30.0;
        }
        self.settings.ui_update_hz = self.settings.ui_update_hz.clamp(1.0, 60.0);
        if self.settings.ui_scale_factor <= 0.0 {
            self.settings.ui_scale_factor = 1.0;
        }

        let sizes = setup::message_sizes(&ports, &self.settings, self.opts.ring_size);
        self.settings.ring_size = sizes.ring_size;
        self.ui_msg = vec![0u8; sizes.ui_msg_size as usize];
        log::info!("Comm buffers: {} bytes", self.settings.ring_size);
        log::info!("Update rate:  {:.01} Hz", self.settings.ui_update_hz);

        // Create workers if necessary
        let mut sched: Option<Box<WorkerSched>> = None;
        if plugin.has_worker {
            let mut worker = Worker::new(self.work_lock.clone(), true);
            sched = Some(Box::new(worker.scheduler()));
            self.worker = Some(worker);

            if plugin.safe_restore {
                let mut state_worker = Worker::new(self.work_lock.clone(), false);
                self.state_sched = Some(Box::new(state_worker.scheduler()));
                self.state_worker = Some(state_worker);
            }
        }

        // Instantiate the plugin
        let features = HostFeatures {
            mapper: &self.mapper,
            urids: &self.urids,
            settings: &self.settings,
            temp_dir: self
                .temp_dir
                .as_ref()
                .map(|dir| dir.path())
                .unwrap_or_else(|| Path::new(".")),
            sched: sched.as_mut().map(|s| &mut **s as *mut WorkerSched),
            state_sched: self
                .state_sched
                .as_mut()
                .map(|s| &mut **s as *mut WorkerSched),
        };
        let instance = self
            .world
            .instantiate(f64::from(self.settings.sample_rate), &features)?;

        // Point the workers at the instance's work interface
        if let Some(exec) = instance.work_executor() {
            if let Some(worker) = &mut self.worker {
                worker.attach(exec.clone());
            }
            if let Some(sched) = &mut sched {
                sched.attach(exec.clone());
            }
            if let Some(state_worker) = &mut self.state_worker {
                state_worker.attach(exec.clone());
            }
            if let Some(state_sched) = &mut self.state_sched {
                state_sched.attach(exec);
            }
        }

        // Plugin↔UI communication rings
        let (ui_tx, ui_rx) = ring::new(self.settings.ring_size);
        let (plugin_tx, plugin_rx) = ring::new(self.settings.ring_size);
        ui_tx.mlock();
        plugin_tx.mlock();
        self.ui_to_plugin = Some(ui_tx);
        self.plugin_to_ui = Some(plugin_rx);

        let mut process = Process::new(
            instance,
            ports,
            self.controls_buf.clone(),
            ui_rx,
            plugin_tx,
            self.paused.clone(),
            self.urids,
            self.settings.update_frames(),
        );
        self.control_in = process.control_in;
        process.set_has_ui(self.opts.show_ui);
        process.set_workers(
            sched,
            self.worker.as_mut().map(|w| w.responses()),
            self.state_worker.as_mut().map(|w| w.responses()),
        );

        // Allocate buffers and connect the plugin to them
        setup::activate(&mut process, &self.urids, &self.settings);

        self.instance = Some(InstanceHandle(process.instance_ptr()));
        self.process = Some(process);

        // Apply loaded state, then initial controls from the command line
        if let Some(state) = initial_state {
            if let Err(err) = self.apply_loaded_state(&*state, None) {
                log::error!("Failed to apply initial state: {err}");
            }
            self.preset = Some(state);
        }

        let control_args = self.opts.controls.clone();
        for arg in &control_args {
            self.apply_control_arg(arg);
        }

        // Create system ports
        if let Some(process) = &self.process {
            for port in process.ports() {
                self.backend.activate_port(port);
            }
        }

        self.opened = true;
        Ok(())
    }

    /// Activate audio processing.
    pub fn activate(&mut self) -> Result<(), OpenError> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };

        if let Some(worker) = &mut self.worker {
            if let Err(err) = worker.launch() {
                log::error!("Failed to launch worker: {err}");
            }
        }

        process.instance_mut().activate();
        process.set_run_state(RunState::Running);
        self.run_state = RunState::Running;

        self.backend
            .activate(process)
            .map_err(|err| OpenError::Backend(err.to_string()))
    }

    /// Deactivate audio processing.
    pub fn deactivate(&mut self) {
        if let Some(mut process) = self.backend.deactivate() {
            process.set_run_state(RunState::Paused);
            process.instance_mut().deactivate();
            self.process = Some(process);
        }
        if let Some(worker) = &mut self.worker {
            worker.exit();
        }
        self.run_state = RunState::Paused;
    }

    /// Shut down the application. Counterpart to `open`.
    pub fn close(&mut self) {
        self.deactivate();
        self.instance = None;
        if let Some(process) = &mut self.process {
            setup::deactivate(process);
        }
        self.process = None;
        self.backend.close();

        // Removes the temporary state directory
        if let Some(dir) = self.temp_dir.take() {
            if let Err(err) = dir.close() {
                log::warn!("Failed to remove temporary directory: {err}");
            }
        }
        self.opened = false;
    }

    pub fn plugin(&self) -> &PluginData {
        self.world.plugin()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    pub fn urids(&self) -> &Urids {
        &self.urids
    }

    pub fn mapper(&self) -> &Arc<Mapper> {
        &self.mapper
    }

    pub fn controls(&self) -> &Controls {
        &self.controls
    }

    pub fn port_map(&self) -> &PortMap {
        &self.port_map
    }

    /// Current value of a control port.
    pub fn control_value(&self, port_index: u32) -> f32 {
        self.controls_buf.get(port_index)
    }

    pub fn done(&self) -> ExitFlag {
        self.done.clone()
    }

    /// Ask the application to exit.
    pub fn request_exit(&self) {
        self.done.raise();
    }

    /// Apply a `SYMBOL=VALUE` control argument.
    fn apply_control_arg(&mut self, arg: &str) {
        let Some((symbol, value)) = arg.split_once('=') else {
            log::warn!("Ignoring invalid value `{arg}'");
            return;
        };
        let Ok(value) = value.trim().parse::<f32>() else {
            log::warn!("Ignoring invalid value `{arg}'");
            return;
        };

        let Some(control) = self.controls.by_symbol(symbol.trim()).cloned() else {
            log::warn!("Ignoring value for unknown control `{symbol}'");
            return;
        };

        self.set_control(&control, self.urids.atom_float, &value.to_ne_bytes());
        log::info!("{symbol} = {value}");
    }

    /// Set a control to the given value.
    ///
    /// Port controls go to the process thread as control changes; property
    /// controls are forged into a patch:Set and sent to the designated
    /// control input. Dropped while an update burst is being dispatched.
    pub fn set_control(&mut self, control: &Control, ty: Urid, body: &[u8]) {
        if self.updating {
            return;
        }
        let Some(ui_to_plugin) = &mut self.ui_to_plugin else {
            return;
        };

        match control.target {
            ControlTarget::Port(index) => {
                if ty == self.urids.atom_float && body.len() == 4 {
                    let value = f32::from_ne_bytes(body.try_into().unwrap());
                    if comm::write_control(ui_to_plugin, index, value).is_err() {
                        log::error!("Failed to write control change");
                    }
                }
            }
            ControlTarget::Property(key) => {
                let Some(control_in) = self.control_in else {
                    return;
                };
                if self.ui_msg.len() < atom::HEADER_SIZE + body.len() + 64 {
                    self.ui_msg.resize(atom::HEADER_SIZE + body.len() + 64, 0);
                }
                match atom::forge_patch_set(&mut self.ui_msg, &self.urids, key, ty, body) {
                    Ok(len) => {
                        let Some(atom) = AtomRef::parse(&self.ui_msg[..len]) else {
                            return;
                        };
                        if self.opts.dump {
                            dump_atom(&self.mapper, "UI => Plugin", atom.ty, atom.body);
                        }
                        if comm::write_event(
                            ui_to_plugin,
                            control_in,
                            self.urids.atom_event_transfer,
                            atom.ty,
                            atom.body,
                        )
                        .is_err()
                        {
                            log::error!("Failed to write property change");
                        }
                    }
                    Err(err) => log::error!("Failed to forge property change: {err}"),
                }
            }
        }
    }

    /// Write a control port change by index, as the console `set` command
    /// does.
    pub fn write_control_change(&mut self, port_index: u32, value: f32) {
        if let Some(ui_to_plugin) = &mut self.ui_to_plugin {
            if comm::write_control(ui_to_plugin, port_index, value).is_err() {
                log::error!("Failed to write control change");
            }
        }
    }

    /// Set a control port value directly in the controls buffer.
    pub fn set_port_value_direct(&mut self, port_index: u32, value: f32) {
        self.controls_buf.set(port_index, value);
    }

    /// Report current control values to the frontend and request the
    /// plugin's parameters, to initialize a UI.
    pub fn init_ui(&mut self, frontend: &mut dyn Frontend) {
        for control in self.controls.iter() {
            if let ControlTarget::Port(index) = control.target {
                let value = AnyValue::from_float(&self.urids, self.controls_buf.get(index));
                frontend.control_changed(control, &value);
            }
        }

        // Ask for initial parameter values
        if let (Some(control_in), Some(ui_to_plugin)) =
            (self.control_in, self.ui_to_plugin.as_mut())
        {
            let get = atom::patch_get_atom(&self.urids);
            let _ = comm::write_event(
                ui_to_plugin,
                control_in,
                self.urids.atom_event_transfer,
                self.urids.atom_object,
                &get[8..16],
            );
        }
    }

    /// Drain pending plugin→UI messages and dispatch them to the frontend.
    ///
    /// Returns false once the application should exit.
    pub fn update(&mut self, frontend: &mut dyn Frontend) -> bool {
        if !self.opened {
            return true;
        }
        if self.done.raised() {
            return false;
        }

        let Some(rx) = &mut self.plugin_to_ui else {
            return true;
        };

        self.updating = true;

        let space = rx.read_space() as usize;
        let mut consumed = 0usize;
        let mut header_buf = [0u8; 8];
        while consumed < space {
            if rx.read(&mut header_buf).is_err() {
                log::error!("Failed to read header from process ring");
                break;
            }
            let header = MessageHeader::from_bytes(header_buf);
            consumed += 8 + header.size as usize;

            let size = header.size as usize;
            if size > self.ui_msg.len() {
                self.ui_msg.resize(size, 0);
            }
            if rx.read(&mut self.ui_msg[..size]).is_err() {
                log::error!("Failed to read message from process ring");
                break;
            }

            match header.kind {
                kind::CONTROL_PORT_CHANGE => {
                    if let Some((port_index, value)) = comm::parse_control(&self.ui_msg[..size]) {
                        if let Some(control) = self.controls.by_port(port_index) {
                            let value = AnyValue::from_float(&self.urids, value);
                            frontend.control_changed(control, &value);
                        }
                    }
                }
                kind::EVENT_TRANSFER => {
                    let Some((_, ty, body)) = comm::parse_event_transfer(&self.ui_msg[..size])
                    else {
                        continue;
                    };
                    if self.opts.dump {
                        dump_atom(&self.mapper, "Plugin => UI", ty, body);
                    }
                    if ty != self.urids.atom_object {
                        continue;
                    }
                    let Some(obj) = ObjectRef::from_body(body) else {
                        continue;
                    };

                    if obj.otype == self.urids.patch_set {
                        if let Ok((key, value)) = crate::patch::patch_set_get(&self.urids, &obj)
                        {
                            property_changed(&self.controls, frontend, key, value);
                        }
                    } else if obj.otype == self.urids.patch_put {
                        if let Ok(put_body) = crate::patch::patch_put_get(&self.urids, &obj) {
                            for (key, value) in put_body.properties() {
                                property_changed(&self.controls, frontend, key, value);
                            }
                        }
                    } else {
                        log::error!("Unknown object type");
                    }
                }
                kind::LATENCY_CHANGE => {
                    self.backend.recompute_latencies();
                }
                _ => {
                    log::error!("Unknown message type in process ring");
                    break;
                }
            }
        }

        self.updating = false;
        true
    }

    /// Apply a loaded state to the instance, pausing the process thread if
    /// the plugin cannot restore while running.
    fn apply_loaded_state(
        &mut self,
        state: &dyn PluginState,
        mut frontend: Option<&mut dyn Frontend>,
    ) -> Result<(), StateError> {
        let Some(instance) = &self.instance else {
            return Err(StateError::Restore(String::from("no instance")));
        };
        let Some(ui_to_plugin) = &mut self.ui_to_plugin else {
            return Err(StateError::Restore(String::from("not opened")));
        };

        // The handle is only dereferenced under the apply protocol: either
        // the process thread is paused before restore touches the instance,
        // or the plugin declared its restore thread-safe.
        let instance = unsafe { &mut *instance.0 };

        let controls = &self.controls;
        let urids = self.urids;
        state::apply_state(
            state,
            ApplyContext {
                instance,
                state_sched: self.state_sched.as_deref_mut(),
                ports: &self.port_map,
                controls_buf: &self.controls_buf,
                ui_to_plugin,
                paused: &self.paused,
                run_state: self.run_state,
                safe_restore: self.safe_restore,
                urids: &self.urids,
            },
            &mut |port_index, value| {
                if let Some(frontend) = frontend.as_deref_mut() {
                    if let Some(control) = controls.by_port(port_index) {
                        frontend.control_changed(control, &AnyValue::from_float(&urids, value));
                    }
                }
            },
        )
    }

    /// Load (or refresh) the preset list.
    pub fn load_presets(&mut self) -> &[PresetRecord] {
        self.world.unload_presets();
        self.presets = self.world.load_presets();
        self.presets.sort_by(|a, b| a.label.cmp(&b.label));
        &self.presets
    }

    /// Load a preset by URI and apply it, retaining it as current.
    pub fn apply_preset(
        &mut self,
        uri: &str,
        frontend: Option<&mut dyn Frontend>,
    ) -> Result<(), StateError> {
        let state = self.world.load_preset(uri)?;
        self.apply_loaded_state(&*state, frontend)?;
        self.preset = Some(state);
        Ok(())
    }

    /// The label of the current preset, if any.
    pub fn preset_label(&self) -> Option<&str> {
        self.preset.as_ref().and_then(|p| p.label())
    }

    /// Save the current state to a directory.
    pub fn save(&mut self, dir: &Path) -> Result<(), StateError> {
        self.save_preset(dir, None, None, Some("state.ttl"))
    }

    /// Save the current state as a preset bundle, retaining it as current.
    pub fn save_preset(
        &mut self,
        dir: &Path,
        preset_uri: Option<&str>,
        label: Option<&str>,
        filename: Option<&str>,
    ) -> Result<(), StateError> {
        let Some(instance) = &self.instance else {
            return Err(StateError::Restore(String::from("no instance")));
        };
        // Saving only reads the instance's own state; the port values come
        // from the controls buffer.
        let instance = unsafe { &mut *instance.0 };

        let controls_buf = &self.controls_buf;
        let port_map = &self.port_map;
        let urids = self.urids;

        let state = self.world.save_state(
            instance,
            &SaveTarget {
                dir,
                uri: preset_uri,
                label,
                filename,
            },
            &mut |symbol| {
                let (index, ty, flow) = port_map.by_symbol(symbol)?;
                if ty != crate::port::PortType::Control || flow != crate::port::PortFlow::Input
                {
                    return None;
                }
                Some(AnyValue::from_float(&urids, controls_buf.get(index)))
            },
        )?;

        self.preset = Some(state);
        Ok(())
    }

    /// Delete the current preset's files.
    pub fn delete_current_preset(&mut self) -> Result<(), StateError> {
        let Some(preset) = self.preset.take() else {
            return Err(StateError::NoCurrentPreset);
        };
        if let Some(uri) = preset.uri() {
            self.world.delete_preset(uri)?;
        }
        Ok(())
    }
}

/// Dispatch a plugin-reported property change to the frontend.
fn property_changed(
    controls: &Controls,
    frontend: &mut dyn Frontend,
    key: Urid,
    value: AtomRef,
) {
    if let Some(control) = controls.by_property(key) {
        let value = AnyValue::new(value.ty, value.body);
        frontend.control_changed(control, &value);
    }
}

/// Print one atom of plugin↔UI traffic for debugging.
fn dump_atom(mapper: &Mapper, label: &str, ty: Urid, body: &[u8]) {
    let type_uri = mapper.unmap(ty).unwrap_or_else(|| format!("urid:{ty}"));
    println!("{label}: <{type_uri}> ({} bytes)", body.len());
}

/// Build a `PathBuf` under the directory the plugin may create files in.
/// Exposed for the state:makePath feature plumbing.
pub fn make_path(base: &Path, suffix: &str) -> PathBuf {
    base.join(suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::comm;
    use crate::plugin::PropertyData;
    use crate::testing::{rich_plugin, scratch_dir, MockWorld};
    use crate::urids::uri as lv2_uri;

    #[derive(Default)]
    struct RecordingFrontend {
        changes: Vec<(String, AnyValue)>,
    }

    impl Frontend for RecordingFrontend {
        fn control_changed(&mut self, control: &Control, value: &AnyValue) {
            self.changes.push((control.symbol.clone(), value.clone()));
        }
    }

    fn plugin_with_property() -> crate::plugin::PluginData {
        let mut plugin = rich_plugin();
        plugin.properties.push(PropertyData {
            uri: String::from("http://example.org/plug#volume"),
            label: Some(String::from("Volume")),
            writable: true,
            readable: true,
            value_type: Some(String::from(lv2_uri::ATOM_FLOAT)),
            min: 0.0,
            max: 10.0,
            default: 1.0,
        });
        plugin
    }

    fn open_host(plugin: crate::plugin::PluginData) -> Host {
        let world = MockWorld::new(plugin);
        let mut host = Host::new(
            Box::new(world),
            Box::new(DummyBackend::new()),
            Options::default(),
        );
        host.open(None).unwrap();
        host
    }

    fn read_message(host: &mut Host) -> (u32, Vec<u8>) {
        let rx = &mut host.process.as_mut().unwrap().ui_to_plugin;
        let mut header_buf = [0u8; 8];
        rx.read(&mut header_buf).unwrap();
        let header = MessageHeader::from_bytes(header_buf);
        let mut body = vec![0u8; header.size as usize];
        rx.read(&mut body).unwrap();
        (header.kind, body)
    }

    #[test]
    fn port_control_writes_become_one_control_change() {
        let mut host = open_host(rich_plugin());
        let control = host.controls().by_symbol("gain").unwrap().clone();

        let value = 0.3f32;
        host.set_control(&control, host.urids.atom_float, &value.to_ne_bytes());

        let (kind, body) = read_message(&mut host);
        assert_eq!(kind, comm::kind::CONTROL_PORT_CHANGE);
        assert_eq!(comm::parse_control(&body), Some((3, value)));

        // Exactly one message
        assert_eq!(
            host.process.as_ref().unwrap().ui_to_plugin.read_space(),
            0
        );
        host.close();
    }

    #[test]
    fn property_control_writes_become_a_patch_set_transfer() {
        let mut host = open_host(plugin_with_property());
        let control = host.controls().by_symbol("volume").unwrap().clone();
        let key = host
            .mapper()
            .try_map("http://example.org/plug#volume")
            .unwrap();

        let value = 2.5f32;
        host.set_control(&control, host.urids.atom_float, &value.to_ne_bytes());

        let (kind, body) = read_message(&mut host);
        assert_eq!(kind, comm::kind::EVENT_TRANSFER);
        let (port, ty, atom_body) = comm::parse_event_transfer(&body).unwrap();
        // Addressed to the designated control input
        assert_eq!(port, 0);
        assert_eq!(ty, host.urids.atom_object);

        let obj = ObjectRef::from_body(atom_body).unwrap();
        assert_eq!(obj.otype, host.urids.patch_set);
        let (property, set_value) = crate::patch::patch_set_get(&host.urids, &obj).unwrap();
        assert_eq!(property, key);
        assert_eq!(set_value.body_f32(), Some(value));

        assert_eq!(
            host.process.as_ref().unwrap().ui_to_plugin.read_space(),
            0
        );
        host.close();
    }

    #[test]
    fn state_round_trips_through_a_save_directory() {
        let dir = scratch_dir("roundtrip");

        let mut host = open_host(rich_plugin());
        host.set_port_value_direct(3, 0.6180339887);
        host.set_port_value_direct(5, -0.125);
        let saved_gain = host.control_value(3);
        let saved_level = host.control_value(5);
        host.save(&dir).unwrap();
        host.close();

        // A fresh host with the same plugin, loading from the directory
        let state = MockWorld::load_state_dir(&dir).unwrap();
        let world = MockWorld::new(rich_plugin());
        let mut host = Host::new(
            Box::new(world),
            Box::new(DummyBackend::new()),
            Options::default(),
        );
        host.open(Some(Box::new(state))).unwrap();

        assert_eq!(host.control_value(3), saved_gain);
        assert_eq!(host.control_value(5), saved_level);
        host.close();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn initial_control_arguments_are_applied() {
        let world = MockWorld::new(rich_plugin());
        let mut host = Host::new(
            Box::new(world),
            Box::new(DummyBackend::new()),
            Options {
                controls: vec![String::from("gain=0.8"), String::from("nope=1")],
                ..Options::default()
            },
        );
        host.open(None).unwrap();

        let (kind, body) = read_message(&mut host);
        assert_eq!(kind, comm::kind::CONTROL_PORT_CHANGE);
        assert_eq!(comm::parse_control(&body), Some((3, 0.8)));
        host.close();
    }

    #[test]
    fn update_dispatches_plugin_changes_to_the_frontend() {
        let mut host = open_host(plugin_with_property());
        let key = host
            .mapper()
            .try_map("http://example.org/plug#volume")
            .unwrap();

        // Simulate the process side reporting changes
        {
            let process = host.process.as_mut().unwrap();
            comm::write_control(&mut process.plugin_to_ui, 3, 0.8).unwrap();

            let mut buf = [0u8; 128];
            let len = atom::forge_patch_set(
                &mut buf,
                &host.urids,
                key,
                host.urids.atom_float,
                &4.5f32.to_ne_bytes(),
            )
            .unwrap();
            let atom = AtomRef::parse(&buf[..len]).unwrap();
            comm::write_event(
                &mut process.plugin_to_ui,
                0,
                host.urids.atom_event_transfer,
                atom.ty,
                atom.body,
            )
            .unwrap();
        }

        let mut frontend = RecordingFrontend::default();
        assert!(host.update(&mut frontend));

        assert_eq!(frontend.changes.len(), 2);
        assert_eq!(frontend.changes[0].0, "gain");
        assert_eq!(frontend.changes[0].1.number(&host.urids), 0.8f32 as f64);
        assert_eq!(frontend.changes[1].0, "volume");
        assert_eq!(frontend.changes[1].1.number(&host.urids), 4.5f32 as f64);

        // An exit request ends the loop
        host.request_exit();
        assert!(!host.update(&mut frontend));
        host.close();
    }
}
