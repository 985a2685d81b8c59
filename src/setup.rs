//! Process thread setup: port classification, buffer allocation, and ring
//! sizing. Everything here runs outside the audio thread.

use crate::evbuf::Evbuf;
use crate::plugin::PluginData;
use crate::port::{PortError, PortFlow, PortType, ProcessPort};
use crate::process::Process;
use crate::settings::Settings;
use crate::urids::Urids;

/// The ring is a few times the size of an event buffer so the UI has a
/// chance to keep up under event bursts.
const N_BUFFER_CYCLES: u32 = 16;

/// Smallest communication ring the host will allocate.
const MIN_RING_SIZE: u32 = 4096;

/// Smallest process-side receive scratch.
const MIN_PROCESS_MSG: u32 = 1024;

/// Message and ring sizes derived from the port set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSizes {
    /// Capacity of each communication ring in bytes.
    pub ring_size: u32,
    /// Largest message body the process thread must accept.
    pub process_msg_size: u32,
    /// Largest message body the UI thread must accept.
    pub ui_msg_size: u32,
}

/// Classify every described port. Fails at open time for bad metadata on
/// mandatory ports.
pub fn build_ports(plugin: &PluginData) -> Result<Vec<ProcessPort>, PortError> {
    plugin
        .ports
        .iter()
        .enumerate()
        .map(|(index, data)| ProcessPort::from_data(index as u32, data))
        .collect()
}

/// The effective event buffer size of a port: its minimum-size hint, or the
/// default MIDI buffer size.
fn effective_buf_size(port: &ProcessPort, settings: &Settings) -> u32 {
    if port.buf_size > 0 {
        port.buf_size
    } else {
        settings.midi_buf_size
    }
}

/// Compute ring and scratch sizes from the port set.
///
/// The process scratch must hold the largest input event buffer, the UI
/// scratch the largest output event buffer, and the rings several times the
/// largest buffer in their direction.
pub fn message_sizes(ports: &[ProcessPort], settings: &Settings, requested_ring: u32) -> MessageSizes {
    let mut ring_size = requested_ring;
    let mut process_msg_size = MIN_PROCESS_MSG;
    let mut ui_msg_size = settings.midi_buf_size;

    for port in ports {
        if port.ty != PortType::Event {
            continue;
        }
        let size = effective_buf_size(port, settings);
        ring_size = ring_size.max(size.saturating_mul(N_BUFFER_CYCLES));
        match port.flow {
            PortFlow::Input => process_msg_size = process_msg_size.max(size),
            PortFlow::Output => ui_msg_size = ui_msg_size.max(size),
            PortFlow::Unknown => {}
        }
    }

    MessageSizes {
        ring_size: ring_size.max(MIN_RING_SIZE),
        process_msg_size,
        ui_msg_size,
    }
}

/// Allocate event buffers and the receive scratch, and connect every plugin
/// port to its buffer. Called at activate, and again when the backend's
/// buffer sizes change.
pub fn activate(process: &mut Process, urids: &Urids, settings: &Settings) {
    let mut process_msg_size = MIN_PROCESS_MSG;

    for i in 0..process.ports.len() {
        let port = &mut process.ports[i];
        let index = port.index;

        match port.ty {
            PortType::Event => {
                let size = effective_buf_size(port, settings);
                let mut evbuf = Evbuf::new(size, urids.atom_chunk, urids.atom_sequence);
                evbuf.reset(port.flow == PortFlow::Input);

                let ptr = evbuf.as_ptr();
                port.evbuf = Some(evbuf);
                unsafe { process.instance.connect_port(index, ptr) };

                if port.flow == PortFlow::Input {
                    process_msg_size = process_msg_size.max(size);
                }
            }
            PortType::Control => {
                let ptr = process.controls_buf.port_ptr(index);
                unsafe { process.instance.connect_port(index, ptr.cast()) };
            }
            // Audio and CV are connected to the backend's buffers each
            // cycle; unknown (optional) ports stay disconnected.
            _ => unsafe { process.instance.connect_port(index, std::ptr::null_mut()) },
        }
    }

    if process.process_msg.len() < process_msg_size as usize {
        process.process_msg = vec![0u8; process_msg_size as usize].into_boxed_slice();
    }
}

/// Free event buffers and disconnect the plugin. Counterpart to
/// [`activate`].
pub fn deactivate(process: &mut Process) {
    for i in 0..process.ports.len() {
        process.ports[i].evbuf = None;
        let index = process.ports[i].index;
        unsafe { process.instance.connect_port(index, std::ptr::null_mut()) };
    }
}
