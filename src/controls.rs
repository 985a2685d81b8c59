//! The unified control model.
//!
//! Typed control ports and patch properties are presented to frontends as
//! one sorted list of [`Control`]s, each addressing either a port index or a
//! property URID. This module also owns the controls buffer: the dense
//! array of floats holding the authoritative current value of every control
//! port.

use std::sync::Arc;

use atomic_float::AtomicF32;
use std::sync::atomic::Ordering;

use crate::mapper::{Mapper, Urid};
use crate::plugin::{PluginData, PortData};
use crate::port::{PortFlow, PortType};
use crate::urids::Urids;

/// The authoritative current value of every control port, indexed by port
/// index (allocated for every port for simplicity).
///
/// The process thread reads and writes it every cycle; the UI thread reads
/// it for printing and saving, and writes it directly only while the
/// process thread is paused or through the console's direct-set path. The
/// relaxed atomics make those crossings well-defined without imposing any
/// ordering beyond the rings'.
pub struct ControlsBuf {
    values: Box<[AtomicF32]>,
}

impl ControlsBuf {
    pub fn new(num_ports: usize) -> Arc<Self> {
        Arc::new(Self {
            values: (0..num_ports).map(|_| AtomicF32::new(0.0)).collect(),
        })
    }

    /// Allocate and fill with each port's default value.
    pub fn with_defaults(plugin: &PluginData) -> Arc<Self> {
        let buf = Self::new(plugin.ports.len());
        for (index, port) in plugin.ports.iter().enumerate() {
            if let Some(meta) = &port.control {
                buf.set(index as u32, meta.default);
            }
        }
        buf
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: u32) -> f32 {
        self.values[index as usize].load(Ordering::Relaxed)
    }

    pub fn set(&self, index: u32, value: f32) {
        self.values[index as usize].store(value, Ordering::Relaxed);
    }

    /// Stable pointer for connecting a plugin control port.
    pub fn port_ptr(&self, index: u32) -> *mut f32 {
        &self.values[index as usize] as *const AtomicF32 as *mut f32
    }
}

/// One meaningful setting of a control.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalePoint {
    pub value: f32,
    pub label: String,
}

/// What a control addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTarget {
    /// A control port, by index.
    Port(u32),
    /// A patch parameter, by property URID.
    Property(Urid),
}

/// A UI-facing control handle.
#[derive(Debug, Clone)]
pub struct Control {
    pub target: ControlTarget,
    /// Stable identifier: the port symbol, or a symbol derived from the
    /// property URI.
    pub symbol: String,
    pub label: Option<String>,
    /// Group URI for UI grouping.
    pub group: Option<String>,
    /// Value type URID; always Float for ports, zero when undetermined.
    pub value_type: Urid,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub is_writable: bool,
    pub is_readable: bool,
    pub is_toggle: bool,
    pub is_integer: bool,
    pub is_enumeration: bool,
    pub is_logarithmic: bool,
    /// Sorted by value; ties keep document order.
    pub points: Vec<ScalePoint>,
}

/// Build a control for a control port.
pub fn new_port_control(
    index: u32,
    port: &PortData,
    sample_rate: f32,
    urids: &Urids,
) -> Control {
    let meta = port.control.clone().unwrap_or_default();

    let (mut min, mut max) = (meta.min, meta.max);
    if meta.sample_rate {
        min *= sample_rate;
        max *= sample_rate;
    }

    let mut points: Vec<ScalePoint> = meta
        .scale_points
        .iter()
        .map(|(value, label)| ScalePoint {
            value: *value,
            label: label.clone(),
        })
        .collect();
    points.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap_or(std::cmp::Ordering::Equal));

    Control {
        target: ControlTarget::Port(index),
        symbol: port.symbol.clone(),
        label: Some(port.name.clone()),
        group: meta.group.clone(),
        value_type: urids.atom_float,
        min,
        max,
        default: meta.default,
        is_writable: port.flow == PortFlow::Input,
        is_readable: port.flow == PortFlow::Output,
        is_toggle: meta.toggled,
        is_integer: meta.integer,
        is_enumeration: meta.enumeration,
        is_logarithmic: meta.logarithmic,
        points,
    }
}

/// Build a control for a patch property. The value type is zero when the
/// property declared no usable range; such controls are discarded by
/// [`Controls::build`].
pub fn new_property_control(
    property: &crate::plugin::PropertyData,
    mapper: &Mapper,
    urids: &Urids,
) -> Control {
    let value_type = property
        .value_type
        .as_deref()
        .map(|uri| mapper.map(uri))
        .unwrap_or(0);

    Control {
        target: ControlTarget::Property(mapper.map(&property.uri)),
        symbol: symbol_from_uri(&property.uri),
        label: property.label.clone(),
        group: None,
        value_type,
        min: property.min,
        max: property.max,
        default: property.default,
        is_writable: property.writable,
        is_readable: property.readable,
        is_toggle: value_type == urids.atom_bool,
        is_integer: value_type == urids.atom_int || value_type == urids.atom_long,
        is_enumeration: false,
        is_logarithmic: false,
        points: Vec::new(),
    }
}

/// Derive a symbol-ish identifier from a property URI.
fn symbol_from_uri(uri: &str) -> String {
    uri.rsplit(['#', '/']).next().unwrap_or(uri).to_string()
}

/// All available controls of the loaded plugin.
#[derive(Default)]
pub struct Controls {
    controls: Vec<Control>,
}

impl Controls {
    /// Build the control list: one control per visible control port, one per
    /// patch property with a usable value type.
    pub fn build(
        plugin: &PluginData,
        sample_rate: f32,
        show_hidden: bool,
        mapper: &Mapper,
        urids: &Urids,
    ) -> Self {
        let mut controls = Self::default();

        for (index, port) in plugin.ports.iter().enumerate() {
            if port.ty != PortType::Control {
                continue;
            }
            if port.not_on_gui && !show_hidden {
                continue;
            }
            controls.add(new_port_control(index as u32, port, sample_rate, urids));
        }

        for property in &plugin.properties {
            let control = new_property_control(property, mapper, urids);
            if control.value_type == 0 {
                log::warn!(
                    "Parameter <{}> has unknown value type, ignored",
                    property.uri
                );
                continue;
            }
            controls.add(control);
        }

        controls
    }

    pub fn add(&mut self, control: Control) {
        self.controls.push(control);
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Control> {
        self.controls.iter()
    }

    /// Linear lookup by symbol; used at load and state time only.
    pub fn by_symbol(&self, symbol: &str) -> Option<&Control> {
        self.controls.iter().find(|c| c.symbol == symbol)
    }

    pub fn by_port(&self, index: u32) -> Option<&Control> {
        self.controls
            .iter()
            .find(|c| c.target == ControlTarget::Port(index))
    }

    pub fn by_property(&self, property: Urid) -> Option<&Control> {
        self.controls
            .iter()
            .find(|c| c.target == ControlTarget::Property(property))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{PluginData, PropertyData};
    use crate::urids::uri;

    fn world_bits() -> (Mapper, Urids) {
        let mapper = Mapper::new();
        let urids = Urids::new(&mapper);
        (mapper, urids)
    }

    #[test]
    fn scale_points_sort_by_value_keeping_ties_stable() {
        let (_, urids) = world_bits();
        let mut port = PortData::control_input("mode", "Mode", 0.0, 0.0, 3.0);
        port.control.as_mut().unwrap().scale_points = vec![
            (2.0, "high".into()),
            (0.0, "off".into()),
            (1.0, "first".into()),
            (1.0, "second".into()),
        ];

        let control = new_port_control(0, &port, 48_000.0, &urids);
        let labels: Vec<&str> = control.points.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["off", "first", "second", "high"]);
    }

    #[test]
    fn sample_rate_ports_scale_their_range() {
        let (_, urids) = world_bits();
        let mut port = PortData::control_input("cutoff", "Cutoff", 0.25, 0.0, 0.5);
        port.control.as_mut().unwrap().sample_rate = true;

        let control = new_port_control(0, &port, 48_000.0, &urids);
        assert_eq!(control.min, 0.0);
        assert_eq!(control.max, 24_000.0);
        assert_eq!(control.default, 0.25);
    }

    #[test]
    fn hidden_ports_are_skipped_unless_requested() {
        let (mapper, urids) = world_bits();
        let mut hidden = PortData::control_input("secret", "Secret", 0.0, 0.0, 1.0);
        hidden.not_on_gui = true;
        let plugin = PluginData {
            ports: vec![
                PortData::control_input("gain", "Gain", 0.0, -1.0, 1.0),
                hidden,
            ],
            ..PluginData::default()
        };

        let controls = Controls::build(&plugin, 48_000.0, false, &mapper, &urids);
        assert_eq!(controls.len(), 1);
        assert!(controls.by_symbol("secret").is_none());

        let all = Controls::build(&plugin, 48_000.0, true, &mapper, &urids);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn property_controls_resolve_type_and_symbol() {
        let (mapper, urids) = world_bits();
        let plugin = PluginData {
            properties: vec![
                PropertyData {
                    uri: "http://example.org/plug#volume".into(),
                    label: Some("Volume".into()),
                    writable: true,
                    readable: false,
                    value_type: Some(uri::ATOM_FLOAT.into()),
                    min: 0.0,
                    max: 10.0,
                    default: 5.0,
                },
                PropertyData {
                    uri: "http://example.org/plug#mystery".into(),
                    label: None,
                    writable: true,
                    readable: false,
                    value_type: None,
                    min: 0.0,
                    max: 1.0,
                    default: 0.0,
                },
            ],
            ..PluginData::default()
        };

        let controls = Controls::build(&plugin, 48_000.0, false, &mapper, &urids);
        // The untyped property is dropped
        assert_eq!(controls.len(), 1);

        let control = controls.by_symbol("volume").unwrap();
        assert_eq!(control.value_type, urids.atom_float);
        assert!(control.is_writable);
        assert!(!control.is_toggle);
        let key = mapper.try_map("http://example.org/plug#volume").unwrap();
        assert!(controls.by_property(key).is_some());
    }

    #[test]
    fn controls_buf_holds_defaults() {
        let plugin = PluginData {
            ports: vec![
                PortData::control_input("a", "A", 0.5, 0.0, 1.0),
                PortData::audio_output("out", "Out"),
                PortData::control_input("b", "B", -2.0, -10.0, 10.0),
            ],
            ..PluginData::default()
        };

        let buf = ControlsBuf::with_defaults(&plugin);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.get(0), 0.5);
        assert_eq!(buf.get(1), 0.0);
        assert_eq!(buf.get(2), -2.0);

        buf.set(0, 0.75);
        assert_eq!(buf.get(0), 0.75);
    }
}
