//! JACK audio and MIDI driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use jack::{
    AsyncClient, AudioIn, AudioOut, Client, ClientOptions, Control, LatencyType, MidiIn,
    MidiOut, MidiWriter, Port, ProcessScope, RawMidi, TransportState,
};

use crate::port::{PortFlow, PortType, ProcessPort};
use crate::process::{Bbt, CycleIo, Process, TransportInfo};
use crate::settings::Settings;
use crate::setup;
use crate::sync::ExitFlag;
use crate::urids::Urids;

use super::{Backend, BackendError};

/// One registered JACK input-side or audio port, keyed by plugin port
/// index. MIDI outputs live separately because writing them takes a
/// per-cycle writer.
enum SysPort {
    AudioIn(Port<AudioIn>),
    AudioOut(Port<AudioOut>),
    MidiIn(Port<MidiIn>),
}

/// Per-cycle view over the JACK buffers. The MIDI writers are created at
/// the top of the cycle, which also clears the JACK buffers.
struct JackIo<'a> {
    ps: &'a ProcessScope,
    ports: &'a mut HashMap<u32, SysPort>,
    writers: &'a mut Vec<(u32, MidiWriter<'a>)>,
    transport: Option<TransportInfo>,
}

impl CycleIo for JackIo<'_> {
    fn audio_buffer(&mut self, port_index: u32, _nframes: u32) -> Option<*mut f32> {
        match self.ports.get_mut(&port_index)? {
            SysPort::AudioIn(port) => Some(port.as_slice(self.ps).as_ptr() as *mut f32),
            SysPort::AudioOut(port) => Some(port.as_mut_slice(self.ps).as_mut_ptr()),
            _ => None,
        }
    }

    fn for_each_midi_in(
        &mut self,
        port_index: u32,
        _nframes: u32,
        sink: &mut dyn FnMut(u32, &[u8]),
    ) {
        if let Some(SysPort::MidiIn(port)) = self.ports.get(&port_index) {
            for event in port.iter(self.ps) {
                sink(event.time, event.bytes);
            }
        }
    }

    fn clear_midi_out(&mut self, _port_index: u32, _nframes: u32) {
        // Cleared when the cycle's writers were created
    }

    fn write_midi_out(&mut self, port_index: u32, _nframes: u32, frame: u32, data: &[u8]) {
        if let Some((_, writer)) = self
            .writers
            .iter_mut()
            .find(|(index, _)| *index == port_index)
        {
            let _ = writer.write(&RawMidi {
                time: frame,
                bytes: data,
            });
        }
    }

    fn transport(&mut self, _nframes: u32) -> Option<TransportInfo> {
        self.transport
    }
}

/// The realtime handler: owns the process state while active.
struct Processor {
    process: Process,
    ports: HashMap<u32, SysPort>,
    midi_out: Vec<(u32, Port<MidiOut>)>,
    settings: Settings,
    urids: Urids,
    /// Mirror of the plugin's reported latency, for the latency callback.
    plugin_latency: Arc<AtomicU32>,
}

impl jack::ProcessHandler for Processor {
    fn process(&mut self, client: &Client, ps: &ProcessScope) -> Control {
        let transport = client.transport().query().ok().map(|tsp| TransportInfo {
            frame: u64::from(tsp.pos.frame()),
            rolling: tsp.state == TransportState::Rolling,
            bbt: tsp.pos.bbt().map(|bbt| Bbt {
                bar: bbt.bar as i64 - 1,
                bar_beat: (bbt.beat as f32 - 1.0)
                    + (bbt.tick as f32 / bbt.ticks_per_beat as f32),
                beat_unit: bbt.sig_denom as i32,
                beats_per_bar: bbt.sig_num as f32,
                beats_per_minute: bbt.bpm as f32,
            }),
        });

        // Creating the writers clears every JACK MIDI output buffer
        let mut writers: Vec<(u32, MidiWriter)> = self
            .midi_out
            .iter_mut()
            .map(|(index, port)| (*index, port.writer(ps)))
            .collect();

        let mut io = JackIo {
            ps,
            ports: &mut self.ports,
            writers: &mut writers,
            transport,
        };
        let _ = self.process.run_cycle(ps.n_frames(), &mut io);
        drop(writers);

        self.plugin_latency
            .store(self.process.plugin_latency(), Ordering::Relaxed);
        Control::Continue
    }

    fn buffer_size(&mut self, _client: &Client, frames: jack::Frames) -> Control {
        // Stop-the-world callback: reallocate the event buffers for the new
        // block size
        self.settings.block_length = frames;
        setup::activate(&mut self.process, &self.urids, &self.settings);
        Control::Continue
    }
}

/// Non-realtime JACK callbacks.
struct Notifications {
    done: ExitFlag,
    plugin_latency: Arc<AtomicU32>,
    /// Names of registered system ports per flow, for latency propagation.
    input_ports: Vec<String>,
    output_ports: Vec<String>,
}

impl jack::NotificationHandler for Notifications {
    fn shutdown(&mut self, _status: jack::ClientStatus, _reason: &str) {
        self.done.raise();
    }

    fn latency(&mut self, client: &Client, mode: LatencyType) {
        // All ports are assumed to depend on each other: propagate the
        // widest feeding range plus the plugin's own latency
        let names = match mode {
            LatencyType::Capture => &self.input_ports,
            LatencyType::Playback => &self.output_ports,
        };

        let mut min = u32::MAX;
        let mut max = 0u32;
        let mut found = 0usize;
        for name in names {
            if let Some(port) = client.port_by_name(name) {
                let range = port.get_latency_range(mode);
                min = min.min(range.0);
                max = max.max(range.1);
                found += 1;
            }
        }
        if found == 0 {
            min = 0;
        }

        let latency = self.plugin_latency.load(Ordering::Relaxed);
        for name in names {
            if let Some(port) = client.port_by_name(name) {
                port.set_latency_range(mode, (min + latency, max + latency));
            }
        }
    }
}

enum ClientState {
    Closed,
    Open(Client),
    Active(AsyncClient<Notifications, Processor>),
}

pub struct JackBackend {
    state: ClientState,
    done: ExitFlag,
    urids: Urids,
    settings: Settings,
    ports: HashMap<u32, SysPort>,
    midi_out: Vec<(u32, Port<MidiOut>)>,
    input_ports: Vec<String>,
    output_ports: Vec<String>,
    plugin_latency: Arc<AtomicU32>,
}

impl JackBackend {
    pub fn new(urids: Urids) -> Self {
        Self {
            state: ClientState::Closed,
            done: ExitFlag::new(),
            urids,
            settings: Settings::default(),
            ports: HashMap::new(),
            midi_out: Vec::new(),
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            plugin_latency: Arc::new(AtomicU32::new(0)),
        }
    }

    fn client(&self) -> Option<&Client> {
        match &self.state {
            ClientState::Open(client) => Some(client),
            _ => None,
        }
    }
}

impl Backend for JackBackend {
    fn open(
        &mut self,
        settings: &mut Settings,
        done: ExitFlag,
        name: &str,
        exact_name: bool,
    ) -> Result<(), BackendError> {
        let options = if exact_name {
            ClientOptions::NO_START_SERVER | ClientOptions::USE_EXACT_NAME
        } else {
            ClientOptions::NO_START_SERVER
        };

        let (client, status) = Client::new(name, options)
            .map_err(|err| BackendError::Open(err.to_string()))?;
        if exact_name && status.contains(jack::ClientStatus::NAME_NOT_UNIQUE) {
            return Err(BackendError::Open(format!("name \"{name}\" is taken")));
        }

        log::info!("JACK name:    {}", client.name());
        settings.sample_rate = client.sample_rate() as f32;
        settings.block_length = client.buffer_size();
        settings.midi_buf_size = settings.midi_buf_size.max(4096);

        self.done = done;
        self.settings = *settings;
        self.state = ClientState::Open(client);
        Ok(())
    }

    fn close(&mut self) {
        self.state = ClientState::Closed;
    }

    fn activate_port(&mut self, port: &ProcessPort) {
        let Some(client) = self.client() else {
            return;
        };
        if !port.has_sys_port {
            return;
        }

        if port.ty == PortType::Event && port.flow == PortFlow::Output {
            match client.register_port(&port.symbol, MidiOut::default()) {
                Ok(sys_port) => {
                    if let Ok(name) = sys_port.name() {
                        self.output_ports.push(name);
                    }
                    self.midi_out.push((port.index, sys_port));
                }
                Err(err) => {
                    log::error!("Failed to register port \"{}\": {err}", port.symbol);
                }
            }
            return;
        }

        let registered = match (port.ty, port.flow) {
            (PortType::Audio | PortType::Cv, PortFlow::Input) => client
                .register_port(&port.symbol, AudioIn::default())
                .map(SysPort::AudioIn)
                .map_err(|e| e.to_string()),
            (PortType::Audio | PortType::Cv, PortFlow::Output) => client
                .register_port(&port.symbol, AudioOut::default())
                .map(SysPort::AudioOut)
                .map_err(|e| e.to_string()),
            (PortType::Event, PortFlow::Input) => client
                .register_port(&port.symbol, MidiIn::default())
                .map(SysPort::MidiIn)
                .map_err(|e| e.to_string()),
            _ => return,
        };

        match registered {
            Ok(sys_port) => {
                let name = match &sys_port {
                    SysPort::AudioIn(p) => p.name(),
                    SysPort::AudioOut(p) => p.name(),
                    SysPort::MidiIn(p) => p.name(),
                };
                if let Ok(name) = name {
                    match port.flow {
                        PortFlow::Input => self.input_ports.push(name),
                        PortFlow::Output => self.output_ports.push(name),
                        PortFlow::Unknown => {}
                    }
                }
                self.ports.insert(port.index, sys_port);
            }
            Err(err) => {
                log::error!("Failed to register port \"{}\": {err}", port.symbol);
            }
        }
    }

    fn activate(&mut self, process: Process) -> Result<(), BackendError> {
        let client = match std::mem::replace(&mut self.state, ClientState::Closed) {
            ClientState::Open(client) => client,
            other => {
                self.state = other;
                return Err(BackendError::NotOpen);
            }
        };

        let processor = Processor {
            process,
            ports: std::mem::take(&mut self.ports),
            midi_out: std::mem::take(&mut self.midi_out),
            settings: self.settings,
            urids: self.urids,
            plugin_latency: self.plugin_latency.clone(),
        };
        let notifications = Notifications {
            done: self.done.clone(),
            plugin_latency: self.plugin_latency.clone(),
            input_ports: self.input_ports.clone(),
            output_ports: self.output_ports.clone(),
        };

        match client.activate_async(notifications, processor) {
            Ok(active) => {
                self.state = ClientState::Active(active);
                Ok(())
            }
            Err(err) => Err(BackendError::Open(err.to_string())),
        }
    }

    fn deactivate(&mut self) -> Option<Process> {
        let active = match std::mem::replace(&mut self.state, ClientState::Closed) {
            ClientState::Active(active) => active,
            other => {
                self.state = other;
                return None;
            }
        };

        match active.deactivate() {
            Ok((client, _notifications, processor)) => {
                self.ports = processor.ports;
                self.midi_out = processor.midi_out;
                self.state = ClientState::Open(client);
                Some(processor.process)
            }
            Err(err) => {
                log::error!("Failed to deactivate JACK client: {err}");
                None
            }
        }
    }

    fn recompute_latencies(&mut self) {
        // JACK republishes latencies through the latency callback, which
        // reads the mirrored plugin latency
    }
}
