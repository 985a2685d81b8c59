//! The boundary between the host core and the plugin library.
//!
//! The RDF world, the plugin binary, and the state (de)serializer are
//! external collaborators. The core sees them through three traits: a
//! [`World`] that describes and instantiates one plugin, a
//! [`PluginInstance`] that is run on the audio thread, and a [`PluginState`]
//! that can be applied to an instance, plus plain descriptor data resolved
//! at load time. The `lilv`-gated glue implements these for real plugins;
//! the test world scripts them.

use std::any::Any;
use std::fmt;
use std::os::raw::c_void;
use std::path::Path;
use std::sync::Arc;

use crate::any_value::AnyValue;
use crate::mapper::Mapper;
use crate::port::{PortFlow, PortType};
use crate::settings::Settings;
use crate::state::StateError;
use crate::urids::Urids;
use crate::worker::{WorkExecutor, WorkerError, WorkerSched};

/// Errors that abort program start.
#[derive(Debug)]
pub enum OpenError {
    /// The plugin (or its initial state) could not be found.
    PluginNotFound(String),
    /// The plugin requires a feature the host does not support.
    UnsupportedFeature(String),
    /// The plugin's shared library failed to instantiate.
    InstantiationFailed,
    /// A mandatory port could not be classified.
    BadPort(crate::port::PortError),
    /// The audio/MIDI system could not be opened.
    Backend(String),
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenError::PluginNotFound(uri) => write!(f, "plugin <{uri}> not found"),
            OpenError::UnsupportedFeature(uri) => write!(f, "feature {uri} is not supported"),
            OpenError::InstantiationFailed => f.write_str("failed to instantiate plugin"),
            OpenError::BadPort(err) => write!(f, "{err}"),
            OpenError::Backend(msg) => write!(f, "failed to open audio system: {msg}"),
        }
    }
}

impl std::error::Error for OpenError {}

impl From<crate::port::PortError> for OpenError {
    fn from(err: crate::port::PortError) -> Self {
        OpenError::BadPort(err)
    }
}

/// Description of one plugin port, resolved from its metadata at load time.
#[derive(Debug, Clone, Default)]
pub struct PortData {
    pub symbol: String,
    pub name: String,
    pub ty: PortType,
    pub flow: PortFlow,
    /// Connecting this port is optional.
    pub optional: bool,
    /// The port asks not to be shown on generic UIs.
    pub not_on_gui: bool,
    /// Minimum buffer size hint in bytes.
    pub min_size: Option<u32>,
    /// Carries the control-channel designation.
    pub designation_control: bool,
    /// Control output with the latency property or designation.
    pub reports_latency: bool,
    /// Control input designated as the tempo.
    pub is_bpm: bool,
    /// Event port that declares MIDI support.
    pub supports_midi: bool,
    /// Event port that declares transport position support.
    pub supports_position: bool,
    /// Range and presentation metadata for control ports.
    pub control: Option<ControlMeta>,
}

/// Range and presentation metadata of a control port.
#[derive(Debug, Clone)]
pub struct ControlMeta {
    pub default: f32,
    pub min: f32,
    pub max: f32,
    pub toggled: bool,
    pub integer: bool,
    pub enumeration: bool,
    pub logarithmic: bool,
    /// Range is a multiple of the sample rate.
    pub sample_rate: bool,
    /// Group URI for UI grouping.
    pub group: Option<String>,
    /// `(value, label)` pairs, in document order.
    pub scale_points: Vec<(f32, String)>,
}

impl Default for ControlMeta {
    fn default() -> Self {
        Self {
            default: 0.0,
            min: 0.0,
            max: 1.0,
            toggled: false,
            integer: false,
            enumeration: false,
            logarithmic: false,
            sample_rate: false,
            group: None,
            scale_points: Vec::new(),
        }
    }
}

impl PortData {
    pub fn control_input(symbol: &str, name: &str, default: f32, min: f32, max: f32) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            ty: PortType::Control,
            flow: PortFlow::Input,
            control: Some(ControlMeta {
                default,
                min,
                max,
                ..ControlMeta::default()
            }),
            ..Self::default()
        }
    }

    pub fn control_output(symbol: &str, name: &str) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            ty: PortType::Control,
            flow: PortFlow::Output,
            control: Some(ControlMeta::default()),
            ..Self::default()
        }
    }

    pub fn audio_input(symbol: &str, name: &str) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            ty: PortType::Audio,
            flow: PortFlow::Input,
            ..Self::default()
        }
    }

    pub fn audio_output(symbol: &str, name: &str) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            ty: PortType::Audio,
            flow: PortFlow::Output,
            ..Self::default()
        }
    }

    pub fn event_input(symbol: &str) -> Self {
        Self {
            symbol: symbol.into(),
            name: symbol.into(),
            ty: PortType::Event,
            flow: PortFlow::Input,
            ..Self::default()
        }
    }

    pub fn event_output(symbol: &str) -> Self {
        Self {
            symbol: symbol.into(),
            name: symbol.into(),
            ty: PortType::Event,
            flow: PortFlow::Output,
            ..Self::default()
        }
    }
}

/// Description of one patch parameter exposed by the plugin.
#[derive(Debug, Clone)]
pub struct PropertyData {
    /// The property URI.
    pub uri: String,
    pub label: Option<String>,
    pub writable: bool,
    pub readable: bool,
    /// The declared rdfs:range, as a URI, if any.
    pub value_type: Option<String>,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

/// Everything the host needs to know about the loaded plugin.
#[derive(Debug, Clone, Default)]
pub struct PluginData {
    pub uri: String,
    pub name: String,
    pub ports: Vec<PortData>,
    pub properties: Vec<PropertyData>,
    /// The plugin implements the worker extension.
    pub has_worker: bool,
    /// The plugin's restore() is thread-safe.
    pub safe_restore: bool,
    /// Features the plugin cannot run without.
    pub required_features: Vec<String>,
}

/// Realtime services handed to the plugin for the duration of one `run()`.
pub struct RunContext<'a> {
    sched: Option<&'a mut WorkerSched>,
}

impl<'a> RunContext<'a> {
    pub fn new(sched: Option<&'a mut WorkerSched>) -> Self {
        Self { sched }
    }

    /// Schedule work to be performed off the audio thread.
    pub fn schedule_work(&mut self, data: &[u8]) -> Result<(), WorkerError> {
        match &mut self.sched {
            Some(sched) => sched.schedule(data),
            None => Err(WorkerError::NotAttached),
        }
    }
}

/// A loaded plugin instance, run on the audio thread.
pub trait PluginInstance: Send {
    fn activate(&mut self) {}

    fn deactivate(&mut self) {}

    /// Connect a port to a buffer, or to null.
    ///
    /// # Safety
    ///
    /// `buffer` must stay valid until the port is reconnected or the
    /// instance is dropped; audio buffers are reconnected every cycle.
    unsafe fn connect_port(&mut self, index: u32, buffer: *mut c_void);

    /// Run the plugin for a block of frames. Must be realtime-safe.
    fn run(&mut self, nframes: u32, ctx: &mut RunContext);

    /// The plugin's worker extension, if implemented.
    fn work_executor(&self) -> Option<Arc<dyn WorkExecutor>> {
        None
    }

    /// Downcast support for the state facility, which must reach the
    /// concrete instance behind this trait.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A loaded state or preset that can be applied to an instance.
pub trait PluginState {
    fn uri(&self) -> Option<&str> {
        None
    }

    fn label(&self) -> Option<&str> {
        None
    }

    /// Restore the plugin's internal state, reporting each saved port value
    /// through `set_port_value`. The state worker's schedule handle is
    /// available for plugins that offload restore work.
    fn restore(
        &self,
        instance: &mut dyn PluginInstance,
        sched: Option<&mut WorkerSched>,
        set_port_value: &mut dyn FnMut(&str, &AnyValue),
    ) -> Result<(), StateError>;
}

/// A preset known to the world, for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetRecord {
    pub uri: String,
    pub label: String,
}

/// Where and how to save a state snapshot.
pub struct SaveTarget<'a> {
    pub dir: &'a Path,
    /// URI for the saved preset, if it should be addressable.
    pub uri: Option<&'a str>,
    /// Human-readable label.
    pub label: Option<&'a str>,
    /// State file name within the bundle.
    pub filename: Option<&'a str>,
}

/// Host-side services a world may need while instantiating the plugin.
pub struct HostFeatures<'a> {
    pub mapper: &'a Arc<Mapper>,
    pub urids: &'a Urids,
    pub settings: &'a Settings,
    /// Directory for files the plugin creates through state:makePath.
    pub temp_dir: &'a Path,
    /// Schedule handle for worker:schedule, stable for the instance's
    /// lifetime.
    pub sched: Option<*mut WorkerSched>,
    /// Schedule handle for the state-restore worker.
    pub state_sched: Option<*mut WorkerSched>,
}

/// The discovery and state facility for one plugin.
///
/// Implementations load metadata from the LV2 world (or script it, in
/// tests); the host core never touches RDF itself.
pub trait World {
    /// The loaded plugin's description.
    fn plugin(&self) -> &PluginData;

    /// Instantiate the plugin's shared library.
    fn instantiate(
        &mut self,
        sample_rate: f64,
        features: &HostFeatures,
    ) -> Result<Box<dyn PluginInstance>, OpenError>;

    /// Load preset metadata and return the known presets.
    fn load_presets(&mut self) -> Vec<PresetRecord>;

    /// Drop loaded preset metadata (before a re-scan).
    fn unload_presets(&mut self) {}

    /// Load a preset by URI.
    fn load_preset(&mut self, uri: &str) -> Result<Box<dyn PluginState>, StateError>;

    /// Snapshot the instance and write it to `target`. `get_port_value`
    /// reports the current value of each input control port by symbol.
    fn save_state(
        &mut self,
        instance: &mut dyn PluginInstance,
        target: &SaveTarget,
        get_port_value: &mut dyn FnMut(&str) -> Option<AnyValue>,
    ) -> Result<Box<dyn PluginState>, StateError>;

    /// Delete a preset's files and unload its metadata.
    fn delete_preset(&mut self, uri: &str) -> Result<(), StateError>;
}
