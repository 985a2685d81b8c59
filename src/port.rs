//! Plugin port classification and per-port process state.

use std::fmt;

use crate::evbuf::Evbuf;
use crate::plugin::PortData;

/// Data type of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortType {
    #[default]
    Unknown,
    Control,
    Audio,
    Cv,
    Event,
}

/// Data flow direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortFlow {
    #[default]
    Unknown,
    Input,
    Output,
}

/// Errors from classifying a port at open time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    /// A mandatory port is neither input nor output.
    MissingFlow(String),
    /// A mandatory port has no known data type.
    MissingType(String),
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::MissingFlow(sym) => {
                write!(f, "mandatory port \"{sym}\" is neither input nor output")
            }
            PortError::MissingType(sym) => {
                write!(f, "mandatory port \"{sym}\" has unknown data type")
            }
        }
    }
}

impl std::error::Error for PortError {}

/// Port state owned by the process thread.
///
/// Created once at open from the port's description and immutable except for
/// its event buffer, which is allocated at activate and freed at deactivate.
pub struct ProcessPort {
    pub index: u32,
    pub ty: PortType,
    pub flow: PortFlow,
    /// Stable, unique C-like identifier.
    pub symbol: String,
    /// Human-readable label.
    pub label: String,
    /// Event buffer for event ports, allocated at activate.
    pub evbuf: Option<Evbuf>,
    /// Custom buffer size from the port's minimum-size hint, or 0.
    pub buf_size: u32,
    /// Control output that reports the plugin's latency.
    pub reports_latency: bool,
    /// The designated control-event input channel.
    pub is_primary: bool,
    /// Control input designated as the tempo.
    pub is_bpm: bool,
    /// Event port that accepts MIDI.
    pub supports_midi: bool,
    /// Event port that wants transport positions.
    pub supports_pos: bool,
    /// The backend registers a system port for this port.
    pub has_sys_port: bool,
}

impl ProcessPort {
    /// Classify a described port. Fails for mandatory ports with missing
    /// flow or type.
    pub fn from_data(index: u32, data: &PortData) -> Result<Self, PortError> {
        if data.flow == PortFlow::Unknown && !data.optional {
            return Err(PortError::MissingFlow(data.symbol.clone()));
        }
        if data.ty == PortType::Unknown && !data.optional {
            return Err(PortError::MissingType(data.symbol.clone()));
        }

        let is_primary =
            data.ty == PortType::Event && data.flow == PortFlow::Input && data.designation_control;
        let reports_latency = data.ty == PortType::Control
            && data.flow == PortFlow::Output
            && data.reports_latency;
        let is_bpm = data.ty == PortType::Control && data.flow == PortFlow::Input && data.is_bpm;

        let has_sys_port = matches!(data.ty, PortType::Audio | PortType::Cv)
            || (data.ty == PortType::Event && data.supports_midi);

        Ok(Self {
            index,
            ty: data.ty,
            flow: data.flow,
            symbol: data.symbol.clone(),
            label: data.name.clone(),
            evbuf: None,
            buf_size: data.min_size.unwrap_or(0),
            reports_latency,
            is_primary,
            is_bpm,
            supports_midi: data.supports_midi,
            supports_pos: data.supports_position,
            has_sys_port,
        })
    }
}

/// Symbol-indexed port lookup for the UI side. Linear, which is fine for
/// the load- and state-time paths that use it.
#[derive(Default, Clone)]
pub struct PortMap {
    entries: Vec<(String, PortType, PortFlow)>,
}

impl PortMap {
    pub fn from_plugin(plugin: &crate::plugin::PluginData) -> Self {
        Self {
            entries: plugin
                .ports
                .iter()
                .map(|p| (p.symbol.clone(), p.ty, p.flow))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find a port by symbol, returning its index, type, and flow.
    pub fn by_symbol(&self, symbol: &str) -> Option<(u32, PortType, PortFlow)> {
        self.entries
            .iter()
            .position(|(sym, _, _)| sym == symbol)
            .map(|i| (i as u32, self.entries[i].1, self.entries[i].2))
    }

    pub fn symbol(&self, index: u32) -> Option<&str> {
        self.entries.get(index as usize).map(|(sym, _, _)| sym.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str, PortType, PortFlow)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, (sym, ty, flow))| (i as u32, sym.as_str(), *ty, *flow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PortData;

    #[test]
    fn mandatory_ports_need_flow_and_type() {
        let mut data = PortData::control_input("gain", "Gain", 0.0, -1.0, 1.0);
        data.flow = PortFlow::Unknown;
        assert!(matches!(
            ProcessPort::from_data(0, &data),
            Err(PortError::MissingFlow(_))
        ));

        let mut data = PortData::control_input("gain", "Gain", 0.0, -1.0, 1.0);
        data.ty = PortType::Unknown;
        assert!(matches!(
            ProcessPort::from_data(0, &data),
            Err(PortError::MissingType(_))
        ));

        let mut data = PortData::control_input("opt", "Optional", 0.0, 0.0, 1.0);
        data.ty = PortType::Unknown;
        data.flow = PortFlow::Unknown;
        data.optional = true;
        assert!(ProcessPort::from_data(0, &data).is_ok());
    }

    #[test]
    fn designations_set_flags() {
        let mut data = PortData::event_input("control");
        data.designation_control = true;
        let port = ProcessPort::from_data(3, &data).unwrap();
        assert!(port.is_primary);

        let mut data = PortData::control_output("latency", "Latency");
        data.reports_latency = true;
        let port = ProcessPort::from_data(4, &data).unwrap();
        assert!(port.reports_latency);
        assert!(!port.has_sys_port);
    }
}
