//! The lilv world: plugin discovery, metadata queries, and the state
//! facility, implementing [`World`] for real plugins.

use std::ffi::{c_char, c_void, CStr, CString};
use std::path::PathBuf;
use std::sync::Arc;

use lilv_sys as lilv;

use crate::any_value::AnyValue;
use crate::mapper::Mapper;
use crate::plugin::{
    ControlMeta, HostFeatures, OpenError, PluginData, PluginInstance, PluginState, PortData,
    PresetRecord, PropertyData, SaveTarget, World,
};
use crate::port::{PortFlow, PortType};
use crate::state::StateError;
use crate::urids::uri;
use crate::worker::WorkerSched;

use super::features::{Features, UridBridge};
use super::instance::Lv2Instance;

// RDF-level URIs only the world queries.
const LV2_INPUT_PORT: &str = "http://lv2plug.in/ns/lv2core#InputPort";
const LV2_OUTPUT_PORT: &str = "http://lv2plug.in/ns/lv2core#OutputPort";
const LV2_CONTROL_PORT: &str = "http://lv2plug.in/ns/lv2core#ControlPort";
const LV2_AUDIO_PORT: &str = "http://lv2plug.in/ns/lv2core#AudioPort";
const LV2_CV_PORT: &str = "http://lv2plug.in/ns/lv2core#CVPort";
const ATOM_PORT: &str = "http://lv2plug.in/ns/ext/atom#AtomPort";
const LV2_CONNECTION_OPTIONAL: &str = "http://lv2plug.in/ns/lv2core#connectionOptional";
const LV2_DESIGNATION: &str = "http://lv2plug.in/ns/lv2core#designation";
const LV2_CONTROL_DESIGNATION: &str = "http://lv2plug.in/ns/lv2core#control";
const LV2_REPORTS_LATENCY: &str = "http://lv2plug.in/ns/lv2core#reportsLatency";
const LV2_LATENCY: &str = "http://lv2plug.in/ns/lv2core#latency";
const LV2_TOGGLED: &str = "http://lv2plug.in/ns/lv2core#toggled";
const LV2_INTEGER: &str = "http://lv2plug.in/ns/lv2core#integer";
const LV2_ENUMERATION: &str = "http://lv2plug.in/ns/lv2core#enumeration";
const LV2_SAMPLE_RATE: &str = "http://lv2plug.in/ns/lv2core#sampleRate";
const LV2_MINIMUM: &str = "http://lv2plug.in/ns/lv2core#minimum";
const LV2_MAXIMUM: &str = "http://lv2plug.in/ns/lv2core#maximum";
const LV2_DEFAULT: &str = "http://lv2plug.in/ns/lv2core#default";
const PPROPS_NOT_ON_GUI: &str = "http://lv2plug.in/ns/ext/port-props#notOnGUI";
const PPROPS_LOGARITHMIC: &str = "http://lv2plug.in/ns/ext/port-props#logarithmic";
const RSZ_MINIMUM_SIZE: &str = "http://lv2plug.in/ns/ext/resize-port#minimumSize";
const PG_GROUP: &str = "http://lv2plug.in/ns/ext/port-groups#group";
const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
const RDFS_RANGE: &str = "http://www.w3.org/2000/01/rdf-schema#range";
const PSET_PRESET: &str = "http://lv2plug.in/ns/ext/presets#Preset";

const LV2_STATE_IS_POD: u32 = 1;
const LV2_STATE_IS_PORTABLE: u32 = 2;

/// The property value types a control can carry, in priority order.
const PROPERTY_TYPES: &[&str] = &[
    uri::ATOM_INT,
    uri::ATOM_LONG,
    uri::ATOM_FLOAT,
    uri::ATOM_DOUBLE,
    uri::ATOM_BOOL,
    uri::ATOM_STRING,
    uri::ATOM_PATH,
];

fn cstring(s: &str) -> CString {
    CString::new(s).expect("URI with interior NUL")
}

unsafe fn node_string(node: *const lilv::LilvNode) -> Option<String> {
    if node.is_null() {
        return None;
    }
    let s = lilv::lilv_node_as_string(node);
    if s.is_null() {
        return None;
    }
    Some(CStr::from_ptr(s).to_string_lossy().into_owned())
}

/// An owned lilv node.
struct Node(*mut lilv::LilvNode);

impl Node {
    unsafe fn new_uri(world: *mut lilv::LilvWorld, uri_str: &str) -> Self {
        let uri = cstring(uri_str);
        Self(lilv::lilv_new_uri(world, uri.as_ptr()))
    }

    fn ptr(&self) -> *const lilv::LilvNode {
        self.0
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        unsafe { lilv::lilv_node_free(self.0) };
    }
}

/// Nodes for every URI the world queries with.
struct Nodes {
    input_port: Node,
    output_port: Node,
    control_port: Node,
    audio_port: Node,
    cv_port: Node,
    atom_port: Node,
    connection_optional: Node,
    designation: Node,
    control_designation: Node,
    reports_latency: Node,
    latency: Node,
    toggled: Node,
    integer: Node,
    enumeration: Node,
    sample_rate: Node,
    minimum: Node,
    maximum: Node,
    default: Node,
    not_on_gui: Node,
    logarithmic: Node,
    minimum_size: Node,
    group: Node,
    rdfs_label: Node,
    rdfs_range: Node,
    patch_writable: Node,
    patch_readable: Node,
    preset_class: Node,
    safe_restore: Node,
    work_interface: Node,
    midi_event: Node,
    time_position: Node,
    time_beats_per_minute: Node,
}

impl Nodes {
    unsafe fn new(world: *mut lilv::LilvWorld) -> Self {
        Self {
            input_port: Node::new_uri(world, LV2_INPUT_PORT),
            output_port: Node::new_uri(world, LV2_OUTPUT_PORT),
            control_port: Node::new_uri(world, LV2_CONTROL_PORT),
            audio_port: Node::new_uri(world, LV2_AUDIO_PORT),
            cv_port: Node::new_uri(world, LV2_CV_PORT),
            atom_port: Node::new_uri(world, ATOM_PORT),
            connection_optional: Node::new_uri(world, LV2_CONNECTION_OPTIONAL),
            designation: Node::new_uri(world, LV2_DESIGNATION),
            control_designation: Node::new_uri(world, LV2_CONTROL_DESIGNATION),
            reports_latency: Node::new_uri(world, LV2_REPORTS_LATENCY),
            latency: Node::new_uri(world, LV2_LATENCY),
            toggled: Node::new_uri(world, LV2_TOGGLED),
            integer: Node::new_uri(world, LV2_INTEGER),
            enumeration: Node::new_uri(world, LV2_ENUMERATION),
            sample_rate: Node::new_uri(world, LV2_SAMPLE_RATE),
            minimum: Node::new_uri(world, LV2_MINIMUM),
            maximum: Node::new_uri(world, LV2_MAXIMUM),
            default: Node::new_uri(world, LV2_DEFAULT),
            not_on_gui: Node::new_uri(world, PPROPS_NOT_ON_GUI),
            logarithmic: Node::new_uri(world, PPROPS_LOGARITHMIC),
            minimum_size: Node::new_uri(world, RSZ_MINIMUM_SIZE),
            group: Node::new_uri(world, PG_GROUP),
            rdfs_label: Node::new_uri(world, RDFS_LABEL),
            rdfs_range: Node::new_uri(world, RDFS_RANGE),
            patch_writable: Node::new_uri(world, uri::PATCH_WRITABLE),
            patch_readable: Node::new_uri(world, uri::PATCH_READABLE),
            preset_class: Node::new_uri(world, PSET_PRESET),
            safe_restore: Node::new_uri(world, uri::STATE_THREAD_SAFE_RESTORE),
            work_interface: Node::new_uri(world, uri::WORKER_INTERFACE),
            midi_event: Node::new_uri(world, uri::MIDI_EVENT),
            time_position: Node::new_uri(world, uri::TIME_POSITION),
            time_beats_per_minute: Node::new_uri(world, uri::TIME_BEATS_PER_MINUTE),
        }
    }
}

/// A state or preset loaded through lilv.
pub struct Lv2State {
    state: *mut lilv::LilvState,
    uri: Option<String>,
    label: Option<String>,
}

unsafe impl Send for Lv2State {}

impl Lv2State {
    unsafe fn wrap(state: *mut lilv::LilvState) -> Self {
        let uri = node_string(lilv::lilv_state_get_uri(state));
        let label = {
            let label = lilv::lilv_state_get_label(state);
            if label.is_null() {
                None
            } else {
                Some(CStr::from_ptr(label).to_string_lossy().into_owned())
            }
        };
        Self { state, uri, label }
    }
}

impl Drop for Lv2State {
    fn drop(&mut self) {
        unsafe { lilv::lilv_state_free(self.state) };
    }
}

struct SetPortCtx<'a> {
    set_port_value: &'a mut dyn FnMut(&str, &AnyValue),
}

unsafe extern "C" fn set_port_value_trampoline(
    port_symbol: *const c_char,
    user_data: *mut c_void,
    value: *const c_void,
    size: u32,
    ty: u32,
) {
    let ctx = &mut *(user_data as *mut SetPortCtx);
    let symbol = CStr::from_ptr(port_symbol).to_string_lossy();
    let body = std::slice::from_raw_parts(value as *const u8, size as usize);
    (ctx.set_port_value)(&symbol, &AnyValue::new(ty, body));
}

impl PluginState for Lv2State {
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
        // The schedule handle reaches the plugin through the state worker
        // feature it was instantiated with
        let instance = instance
            .as_any_mut()
            .downcast_mut::<Lv2Instance>()
            .ok_or_else(|| StateError::Restore(String::from("foreign instance")))?;

        let features = instance.features().clone();
        let mut ctx = SetPortCtx {
            set_port_value,
        };
        unsafe {
            lilv::lilv_state_restore(
                self.state,
                instance.raw(),
                Some(set_port_value_trampoline),
                &mut ctx as *mut SetPortCtx as *mut c_void,
                0,
                features.state_list() as *const *const lilv::LV2_Feature,
            );
        }
        Ok(())
    }
}

struct GetPortCtx<'a> {
    get_port_value: &'a mut dyn FnMut(&str) -> Option<AnyValue>,
    /// Returned values must stay at stable addresses until the state is
    /// built.
    held: Vec<Box<AnyValue>>,
}

unsafe extern "C" fn get_port_value_trampoline(
    port_symbol: *const c_char,
    user_data: *mut c_void,
    size: *mut u32,
    ty: *mut u32,
) -> *const c_void {
    let ctx = &mut *(user_data as *mut GetPortCtx);
    let symbol = CStr::from_ptr(port_symbol).to_string_lossy();

    match (ctx.get_port_value)(&symbol) {
        Some(value) => {
            *size = value.size();
            *ty = value.ty();
            ctx.held.push(Box::new(value));
            ctx.held.last().map_or(std::ptr::null(), |v| {
                v.data().as_ptr() as *const c_void
            })
        }
        None => {
            *size = 0;
            *ty = 0;
            std::ptr::null()
        }
    }
}

/// Frees the world after everything that references it.
struct WorldGuard(*mut lilv::LilvWorld);

impl Drop for WorldGuard {
    fn drop(&mut self) {
        unsafe { lilv::lilv_world_free(self.0) };
    }
}

/// The lilv world and the one plugin loaded from it.
pub struct Lv2World {
    plugin: *const lilv::LilvPlugin,
    /// Dropped before the world guard below.
    nodes: Nodes,
    data: PluginData,
    mapper: Arc<Mapper>,
    urid: UridBridge,
    /// Features of the current instance, for state calls.
    features: Option<Arc<Features>>,
    temp_dir: PathBuf,
    world: *mut lilv::LilvWorld,
    _world_guard: WorldGuard,
}

unsafe impl Send for Lv2World {}

impl Lv2World {
    /// Load the LV2 world and resolve `load_arg`: a plugin URI, a preset or
    /// state URI, or a path to a saved state bundle. Returns the world and
    /// the initial state, if one was loaded.
    pub fn open(
        load_arg: &str,
        mapper: Arc<Mapper>,
    ) -> Result<(Self, Option<Box<dyn PluginState>>), OpenError> {
        unsafe {
            let world = lilv::lilv_world_new();
            lilv::lilv_world_load_all(world);

            let nodes = Nodes::new(world);
            let urid = UridBridge::new(mapper.clone());
            let plugins = lilv::lilv_world_get_all_plugins(world);

            // A URI may name a state/preset or the plugin itself; a bare
            // path is a saved state on disk
            let mut state: *mut lilv::LilvState = std::ptr::null_mut();
            let plugin;
            if load_arg.contains("://") || load_arg.starts_with("urn:") {
                let node = Node::new_uri(world, load_arg);
                state = lilv::lilv_state_new_from_world(
                    world,
                    urid.map_ptr() as *mut lilv::LV2_URID_Map,
                    node.ptr(),
                );
                plugin = if state.is_null() {
                    lilv::lilv_plugins_get_by_uri(plugins, node.ptr())
                } else {
                    lilv::lilv_plugins_get_by_uri(
                        plugins,
                        lilv::lilv_state_get_plugin_uri(state),
                    )
                };
            } else {
                let path = cstring(load_arg);
                state = lilv::lilv_state_new_from_file(
                    world,
                    urid.map_ptr() as *mut lilv::LV2_URID_Map,
                    std::ptr::null(),
                    path.as_ptr(),
                );
                plugin = if state.is_null() {
                    std::ptr::null()
                } else {
                    lilv::lilv_plugins_get_by_uri(
                        plugins,
                        lilv::lilv_state_get_plugin_uri(state),
                    )
                };
            }

            if plugin.is_null() {
                if !state.is_null() {
                    lilv::lilv_state_free(state);
                }
                drop(nodes);
                lilv::lilv_world_free(world);
                return Err(OpenError::PluginNotFound(load_arg.to_string()));
            }

            let data = read_plugin_data(world, plugin, &nodes);
            let this = Self {
                plugin,
                nodes,
                data,
                mapper,
                urid,
                features: None,
                temp_dir: std::env::temp_dir(),
                world,
                _world_guard: WorldGuard(world),
            };

            let initial = (!state.is_null())
                .then(|| Box::new(Lv2State::wrap(state)) as Box<dyn PluginState>);
            Ok((this, initial))
        }
    }

    unsafe fn preset_nodes(&self) -> *mut lilv::LilvNodes {
        lilv::lilv_plugin_get_related(self.plugin, self.nodes.preset_class.ptr())
    }
}

/// Query everything the host needs to know about the plugin up front.
unsafe fn read_plugin_data(
    world: *mut lilv::LilvWorld,
    plugin: *const lilv::LilvPlugin,
    nodes: &Nodes,
) -> PluginData {
    let plugin_uri = lilv::lilv_plugin_get_uri(plugin);
    let uri_string = node_string(plugin_uri).unwrap_or_default();

    let name_node = lilv::lilv_plugin_get_name(plugin);
    let name = node_string(name_node).unwrap_or_else(|| uri_string.clone());
    lilv::lilv_node_free(name_node);

    let n_ports = lilv::lilv_plugin_get_num_ports(plugin);

    // Default values for every port at once
    let mut defaults = vec![0.0f32; n_ports as usize];
    lilv::lilv_plugin_get_port_ranges_float(
        plugin,
        std::ptr::null_mut(),
        std::ptr::null_mut(),
        defaults.as_mut_ptr(),
    );

    let mut ports = Vec::with_capacity(n_ports as usize);
    for index in 0..n_ports {
        let port = lilv::lilv_plugin_get_port_by_index(plugin, index);
        ports.push(read_port_data(
            world,
            plugin,
            port,
            nodes,
            defaults[index as usize],
        ));
    }

    let mut properties: Vec<PropertyData> = Vec::new();
    for (predicate, writable) in [
        (&nodes.patch_writable, true),
        (&nodes.patch_readable, false),
    ] {
        let found =
            lilv::lilv_world_find_nodes(world, plugin_uri, predicate.ptr(), std::ptr::null());
        let mut it = lilv::lilv_nodes_begin(found);
        while !lilv::lilv_nodes_is_end(found, it) {
            let property = lilv::lilv_nodes_get(found, it);
            if let Some(prop_uri) = node_string(property) {
                if let Some(existing) =
                    properties.iter_mut().find(|p| p.uri == prop_uri)
                {
                    existing.writable |= writable;
                    existing.readable |= !writable;
                } else {
                    properties.push(read_property_data(world, property, nodes, writable));
                }
            }
            it = lilv::lilv_nodes_next(found, it);
        }
        lilv::lilv_nodes_free(found);
    }

    let mut required_features = Vec::new();
    let required = lilv::lilv_plugin_get_required_features(plugin);
    let mut it = lilv::lilv_nodes_begin(required);
    while !lilv::lilv_nodes_is_end(required, it) {
        if let Some(uri) = node_string(lilv::lilv_nodes_get(required, it)) {
            required_features.push(uri);
        }
        it = lilv::lilv_nodes_next(required, it);
    }
    lilv::lilv_nodes_free(required);

    PluginData {
        uri: uri_string,
        name,
        ports,
        properties,
        has_worker: lilv::lilv_plugin_has_extension_data(plugin, nodes.work_interface.ptr()),
        safe_restore: lilv::lilv_plugin_has_feature(plugin, nodes.safe_restore.ptr()),
        required_features,
    }
}

unsafe fn port_has_designation(
    plugin: *const lilv::LilvPlugin,
    port: *const lilv::LilvPort,
    nodes: &Nodes,
    designation: *const lilv::LilvNode,
) -> bool {
    let designations =
        lilv::lilv_port_get_value(plugin, port, nodes.designation.ptr());
    let mut found = false;
    let mut it = lilv::lilv_nodes_begin(designations);
    while !lilv::lilv_nodes_is_end(designations, it) {
        if lilv::lilv_node_equals(lilv::lilv_nodes_get(designations, it), designation) {
            found = true;
            break;
        }
        it = lilv::lilv_nodes_next(designations, it);
    }
    lilv::lilv_nodes_free(designations);
    found
}

unsafe fn read_port_data(
    world: *mut lilv::LilvWorld,
    plugin: *const lilv::LilvPlugin,
    port: *const lilv::LilvPort,
    nodes: &Nodes,
    default: f32,
) -> PortData {
    let _ = world;

    let symbol = node_string(lilv::lilv_port_get_symbol(plugin, port)).unwrap_or_default();
    let name_node = lilv::lilv_port_get_name(plugin, port);
    let name = node_string(name_node).unwrap_or_else(|| symbol.clone());
    lilv::lilv_node_free(name_node);

    let flow = if lilv::lilv_port_is_a(plugin, port, nodes.input_port.ptr()) {
        PortFlow::Input
    } else if lilv::lilv_port_is_a(plugin, port, nodes.output_port.ptr()) {
        PortFlow::Output
    } else {
        PortFlow::Unknown
    };

    let ty = if lilv::lilv_port_is_a(plugin, port, nodes.control_port.ptr()) {
        PortType::Control
    } else if lilv::lilv_port_is_a(plugin, port, nodes.audio_port.ptr()) {
        PortType::Audio
    } else if lilv::lilv_port_is_a(plugin, port, nodes.cv_port.ptr()) {
        PortType::Cv
    } else if lilv::lilv_port_is_a(plugin, port, nodes.atom_port.ptr()) {
        PortType::Event
    } else {
        PortType::Unknown
    };

    // Buffer size hint
    let mut min_size = None;
    let min_size_node = lilv::lilv_port_get(plugin, port, nodes.minimum_size.ptr());
    if !min_size_node.is_null() && lilv::lilv_node_is_int(min_size_node) {
        let size = lilv::lilv_node_as_int(min_size_node);
        if size > 0 {
            min_size = Some(size as u32);
        }
    }
    lilv::lilv_node_free(min_size_node);

    let control = (ty == PortType::Control).then(|| {
        let mut def: *mut lilv::LilvNode = std::ptr::null_mut();
        let mut min: *mut lilv::LilvNode = std::ptr::null_mut();
        let mut max: *mut lilv::LilvNode = std::ptr::null_mut();
        lilv::lilv_port_get_range(plugin, port, &mut def, &mut min, &mut max);
        let range = |node: *mut lilv::LilvNode, fallback: f32| {
            let value = if node.is_null() {
                fallback
            } else {
                lilv::lilv_node_as_float(node)
            };
            lilv::lilv_node_free(node);
            value
        };
        let default = range(def, default);
        let min = range(min, 0.0);
        let max = range(max, 1.0);

        let group_node = lilv::lilv_port_get(plugin, port, nodes.group.ptr());
        let group = node_string(group_node);
        lilv::lilv_node_free(group_node);

        let mut scale_points = Vec::new();
        let points = lilv::lilv_port_get_scale_points(plugin, port);
        if !points.is_null() {
            let mut it = lilv::lilv_scale_points_begin(points);
            while !lilv::lilv_scale_points_is_end(points, it) {
                let point = lilv::lilv_scale_points_get(points, it);
                let value_node = lilv::lilv_scale_point_get_value(point);
                if lilv::lilv_node_is_float(value_node) || lilv::lilv_node_is_int(value_node) {
                    let value = lilv::lilv_node_as_float(value_node);
                    if let Some(label) =
                        node_string(lilv::lilv_scale_point_get_label(point))
                    {
                        scale_points.push((value, label));
                    }
                }
                it = lilv::lilv_scale_points_next(points, it);
            }
            lilv::lilv_scale_points_free(points);
        }

        ControlMeta {
            default,
            min,
            max,
            toggled: lilv::lilv_port_has_property(plugin, port, nodes.toggled.ptr()),
            integer: lilv::lilv_port_has_property(plugin, port, nodes.integer.ptr()),
            enumeration: lilv::lilv_port_has_property(plugin, port, nodes.enumeration.ptr()),
            logarithmic: lilv::lilv_port_has_property(plugin, port, nodes.logarithmic.ptr()),
            sample_rate: lilv::lilv_port_has_property(plugin, port, nodes.sample_rate.ptr()),
            group,
            scale_points,
        }
    });

    PortData {
        symbol,
        name,
        ty,
        flow,
        optional: lilv::lilv_port_has_property(
            plugin,
            port,
            nodes.connection_optional.ptr(),
        ),
        not_on_gui: lilv::lilv_port_has_property(plugin, port, nodes.not_on_gui.ptr()),
        min_size,
        designation_control: port_has_designation(
            plugin,
            port,
            nodes,
            nodes.control_designation.ptr(),
        ),
        reports_latency: lilv::lilv_port_has_property(
            plugin,
            port,
            nodes.reports_latency.ptr(),
        ) || port_has_designation(plugin, port, nodes, nodes.latency.ptr()),
        is_bpm: port_has_designation(
            plugin,
            port,
            nodes,
            nodes.time_beats_per_minute.ptr(),
        ),
        supports_midi: lilv::lilv_port_supports_event(plugin, port, nodes.midi_event.ptr()),
        supports_position: lilv::lilv_port_supports_event(
            plugin,
            port,
            nodes.time_position.ptr(),
        ),
        control,
    }
}

unsafe fn read_property_data(
    world: *mut lilv::LilvWorld,
    property: *const lilv::LilvNode,
    nodes: &Nodes,
    writable: bool,
) -> PropertyData {
    let get_float = |predicate: *const lilv::LilvNode, fallback: f32| {
        let node = lilv::lilv_world_get(world, property, predicate, std::ptr::null());
        let value = if node.is_null() {
            fallback
        } else {
            lilv::lilv_node_as_float(node)
        };
        lilv::lilv_node_free(node);
        value
    };

    let label_node =
        lilv::lilv_world_get(world, property, nodes.rdfs_label.ptr(), std::ptr::null());
    let label = node_string(label_node);
    lilv::lilv_node_free(label_node);

    let mut value_type = None;
    for type_uri in PROPERTY_TYPES {
        let type_node = Node::new_uri(world, type_uri);
        if lilv::lilv_world_ask(world, property, nodes.rdfs_range.ptr(), type_node.ptr()) {
            value_type = Some(type_uri.to_string());
            break;
        }
    }

    PropertyData {
        uri: node_string(property).unwrap_or_default(),
        label,
        writable,
        readable: !writable,
        value_type,
        min: get_float(nodes.minimum.ptr(), 0.0),
        max: get_float(nodes.maximum.ptr(), 1.0),
        default: get_float(nodes.default.ptr(), 0.0),
    }
}

impl World for Lv2World {
    fn plugin(&self) -> &PluginData {
        &self.data
    }

    fn instantiate(
        &mut self,
        sample_rate: f64,
        host: &HostFeatures,
    ) -> Result<Box<dyn PluginInstance>, OpenError> {
        self.temp_dir = host.temp_dir.to_path_buf();

        let features: Arc<Features> = Features::new(
            self.mapper.clone(),
            host.urids,
            host.settings,
            host.temp_dir.to_path_buf(),
            host.sched,
            host.state_sched,
        )
        .into();

        let instance = unsafe {
            lilv::lilv_plugin_instantiate(
                self.plugin,
                sample_rate,
                features.instantiate_list() as *const *const lilv::LV2_Feature,
            )
        };
        if instance.is_null() {
            return Err(OpenError::InstantiationFailed);
        }

        self.features = Some(features.clone());
        Ok(Box::new(unsafe { Lv2Instance::new(instance, features) }))
    }

    fn load_presets(&mut self) -> Vec<PresetRecord> {
        let mut records = Vec::new();
        unsafe {
            let presets = self.preset_nodes();
            let mut it = lilv::lilv_nodes_begin(presets);
            while !lilv::lilv_nodes_is_end(presets, it) {
                let preset = lilv::lilv_nodes_get(presets, it);
                lilv::lilv_world_load_resource(self.world, preset);

                let Some(preset_uri) = node_string(preset) else {
                    it = lilv::lilv_nodes_next(presets, it);
                    continue;
                };

                let labels = lilv::lilv_world_find_nodes(
                    self.world,
                    preset,
                    self.nodes.rdfs_label.ptr(),
                    std::ptr::null(),
                );
                if lilv::lilv_nodes_size(labels) > 0 {
                    let label = node_string(lilv::lilv_nodes_get_first(labels))
                        .unwrap_or_else(|| preset_uri.clone());
                    records.push(PresetRecord {
                        uri: preset_uri,
                        label,
                    });
                } else {
                    log::warn!("Preset <{preset_uri}> has no rdfs:label");
                    records.push(PresetRecord {
                        label: preset_uri.clone(),
                        uri: preset_uri,
                    });
                }
                lilv::lilv_nodes_free(labels);

                it = lilv::lilv_nodes_next(presets, it);
            }
            lilv::lilv_nodes_free(presets);
        }
        records
    }

    fn unload_presets(&mut self) {
        unsafe {
            let presets = self.preset_nodes();
            let mut it = lilv::lilv_nodes_begin(presets);
            while !lilv::lilv_nodes_is_end(presets, it) {
                lilv::lilv_world_unload_resource(self.world, lilv::lilv_nodes_get(presets, it));
                it = lilv::lilv_nodes_next(presets, it);
            }
            lilv::lilv_nodes_free(presets);
        }
    }

    fn load_preset(&mut self, preset_uri: &str) -> Result<Box<dyn PluginState>, StateError> {
        unsafe {
            let node = Node::new_uri(self.world, preset_uri);
            lilv::lilv_world_load_resource(self.world, node.ptr());
            let state = lilv::lilv_state_new_from_world(
                self.world,
                self.urid.map_ptr() as *mut lilv::LV2_URID_Map,
                node.ptr(),
            );
            if state.is_null() {
                return Err(StateError::NotFound(preset_uri.to_string()));
            }
            Ok(Box::new(Lv2State::wrap(state)))
        }
    }

    fn save_state(
        &mut self,
        instance: &mut dyn PluginInstance,
        target: &SaveTarget,
        get_port_value: &mut dyn FnMut(&str) -> Option<AnyValue>,
    ) -> Result<Box<dyn PluginState>, StateError> {
        let instance = instance
            .as_any_mut()
            .downcast_mut::<Lv2Instance>()
            .ok_or_else(|| StateError::Restore(String::from("foreign instance")))?;
        let Some(features) = self.features.clone() else {
            return Err(StateError::Restore(String::from("no instance features")));
        };

        std::fs::create_dir_all(target.dir)?;
        let dir = cstring(&target.dir.to_string_lossy());
        let temp_dir = cstring(&self.temp_dir.to_string_lossy());
        let state_uri = target.uri.map(cstring);
        let label = target.label.map(cstring);
        let filename = target.filename.map(cstring);

        // Plugin-created files belong in the bundle while saving
        features.set_make_path_base(target.dir.to_path_buf());

        let mut ctx = GetPortCtx {
            get_port_value,
            held: Vec::new(),
        };

        let state = unsafe {
            lilv::lilv_state_new_from_instance(
                self.plugin,
                instance.raw(),
                features.map_ptr() as *mut lilv::LV2_URID_Map,
                temp_dir.as_ptr(),
                dir.as_ptr(),
                dir.as_ptr(),
                dir.as_ptr(),
                Some(get_port_value_trampoline),
                &mut ctx as *mut GetPortCtx as *mut c_void,
                LV2_STATE_IS_POD | LV2_STATE_IS_PORTABLE,
                std::ptr::null(),
            )
        };
        features.set_make_path_base(self.temp_dir.clone());

        if state.is_null() {
            return Err(StateError::Restore(String::from(
                "failed to build state from instance",
            )));
        }

        unsafe {
            if let Some(label) = &label {
                lilv::lilv_state_set_label(state, label.as_ptr());
            }

            let rc = lilv::lilv_state_save(
                self.world,
                features.map_ptr() as *mut lilv::LV2_URID_Map,
                features.unmap_ptr() as *mut lilv::LV2_URID_Unmap,
                state,
                state_uri.as_ref().map_or(std::ptr::null(), |u| u.as_ptr()),
                dir.as_ptr(),
                filename.as_ref().map_or(std::ptr::null(), |f| f.as_ptr()),
            );
            if rc != 0 {
                lilv::lilv_state_free(state);
                return Err(StateError::Restore(String::from("failed to save state")));
            }

            Ok(Box::new(Lv2State::wrap(state)))
        }
    }

    fn delete_preset(&mut self, preset_uri: &str) -> Result<(), StateError> {
        unsafe {
            let node = Node::new_uri(self.world, preset_uri);
            let state = lilv::lilv_state_new_from_world(
                self.world,
                self.urid.map_ptr() as *mut lilv::LV2_URID_Map,
                node.ptr(),
            );
            if state.is_null() {
                return Err(StateError::NotFound(preset_uri.to_string()));
            }

            lilv::lilv_world_unload_resource(self.world, lilv::lilv_state_get_uri(state));
            lilv::lilv_state_delete(self.world, state);
            lilv::lilv_state_free(state);
        }
        Ok(())
    }
}
