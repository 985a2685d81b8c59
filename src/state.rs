//! State and preset handling.
//!
//! Loading, saving, and deleting presets is delegated to the
//! [`World`](crate::plugin::World); this module owns the one routine that
//! has to coordinate with the audio thread: applying a loaded state to a
//! running instance. When the plugin has not declared a thread-safe
//! restore, the process thread is paused over the ring, the restore runs
//! while it idles, and a state request plus a resume are enqueued afterward,
//! in that order.

use std::fmt;

use crate::any_value::AnyValue;
use crate::comm;
use crate::controls::ControlsBuf;
use crate::plugin::{PluginInstance, PluginState};
use crate::port::{PortFlow, PortMap, PortType};
use crate::ring::{RingError, RingWriter};
use crate::sync::Semaphore;
use crate::types::RunState;
use crate::urids::Urids;
use crate::worker::WorkerSched;

#[derive(Debug)]
pub enum StateError {
    /// No preset or state was found at the given URI or path.
    NotFound(String),
    /// There is no current preset to operate on.
    NoCurrentPreset,
    /// The state facility rejected the operation.
    Restore(String),
    /// Disk I/O failed.
    Io(std::io::Error),
    /// A communication ring overflowed during apply.
    Ring(RingError),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::NotFound(what) => write!(f, "no state found at {what}"),
            StateError::NoCurrentPreset => f.write_str("no current preset"),
            StateError::Restore(msg) => write!(f, "state restore failed: {msg}"),
            StateError::Io(err) => write!(f, "state I/O failed: {err}"),
            StateError::Ring(err) => write!(f, "state apply failed: {err}"),
        }
    }
}

impl std::error::Error for StateError {}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        StateError::Io(err)
    }
}

impl From<RingError> for StateError {
    fn from(err: RingError) -> Self {
        StateError::Ring(err)
    }
}

/// Coerce a restored port value to a float, accepting the numeric types
/// presets are written with.
fn port_value_as_float(value: &AnyValue, urids: &Urids) -> Option<f32> {
    let ty = value.ty();
    if ty == urids.atom_float
        || ty == urids.atom_double
        || ty == urids.atom_int
        || ty == urids.atom_long
    {
        Some(value.number(urids) as f32)
    } else {
        None
    }
}

/// Everything apply needs from the host, borrowed for the duration.
pub struct ApplyContext<'a> {
    pub instance: &'a mut dyn PluginInstance,
    /// Schedule handle of the synchronous state worker, if any.
    pub state_sched: Option<&'a mut WorkerSched>,
    pub ports: &'a PortMap,
    pub controls_buf: &'a ControlsBuf,
    pub ui_to_plugin: &'a mut RingWriter,
    /// Posted by the process thread once it has entered the paused state.
    pub paused: &'a Semaphore,
    /// The host's view of the process run state.
    pub run_state: RunState,
    /// The plugin declared state:threadSafeRestore.
    pub safe_restore: bool,
    pub urids: &'a Urids,
}

/// Apply a loaded state to the instance.
///
/// `on_port_value` is invoked for every restored port value so the frontend
/// can reflect the change.
pub fn apply_state(
    state: &dyn PluginState,
    ctx: ApplyContext,
    on_port_value: &mut dyn FnMut(u32, f32),
) -> Result<(), StateError> {
    let ApplyContext {
        instance,
        state_sched,
        ports,
        controls_buf,
        ui_to_plugin,
        paused,
        run_state,
        safe_restore,
        urids,
    } = ctx;

    // If the plugin can not restore while running, pause it and wait until
    // the process thread is idle
    let must_pause = !safe_restore && run_state == RunState::Running;
    if must_pause {
        comm::write_run_state(ui_to_plugin, RunState::Paused)?;
        paused.wait();
    }

    let running = run_state == RunState::Running && !must_pause;
    state
        .restore(instance, state_sched, &mut |symbol, value| {
            let Some((index, ty, flow)) = ports.by_symbol(symbol) else {
                log::error!("Preset port `{symbol}' is missing");
                return;
            };
            if ty != PortType::Control || flow != PortFlow::Input {
                return;
            }
            let Some(fvalue) = port_value_as_float(value, urids) else {
                log::error!("Preset `{symbol}' value has unusable type");
                return;
            };

            if running {
                // Send the value to the plugin as if from the UI
                if comm::write_control(ui_to_plugin, index, fvalue).is_err() {
                    log::error!("Failed to write restored value for `{symbol}'");
                }
            } else {
                // The process thread is idle; set the value directly
                controls_buf.set(index, fvalue);
            }

            on_port_value(index, fvalue);
        })?;

    if must_pause {
        // Resynchronize properties, then resume; the resume must not
        // overtake the state request
        comm::write_state_request(ui_to_plugin)?;
        comm::write_run_state(ui_to_plugin, RunState::Running)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::any_value::AnyValue;
    use crate::atom::ObjectRef;
    use crate::plugin::PluginInstance;
    use crate::testing::{rich_plugin, Harness, MockIo, MockState};

    struct SendInstance(*mut dyn PluginInstance);
    unsafe impl Send for SendInstance {}

    #[test]
    fn apply_pauses_restores_and_resumes_in_order() {
        let plugin = rich_plugin();
        let mut h = Harness::new(plugin.clone(), 0);
        h.process.set_run_state(RunState::Running);

        let urids = h.urids;
        let port_map = PortMap::from_plugin(&plugin);
        let controls_buf = h.process.controls_buf().clone();
        let paused = h.paused.clone();
        let instance = SendInstance(h.process.instance_ptr());
        let mut ui_to_plugin = h.ui_to_plugin;

        let state = MockState {
            port_values: vec![(String::from("gain"), AnyValue::from_float(&urids, 0.9))],
            props: vec![(42, AnyValue::from_int(&urids, 7))],
            ..MockState::default()
        };

        let mut echoed = Vec::new();
        std::thread::scope(|scope| {
            let echoed = &mut echoed;
            let apply = scope.spawn(move || {
                let instance = instance;
                // The process thread idles under the pause handshake while
                // restore touches the instance
                let instance = unsafe { &mut *instance.0 };
                apply_state(
                    &state,
                    ApplyContext {
                        instance,
                        state_sched: None,
                        ports: &port_map,
                        controls_buf: &controls_buf,
                        ui_to_plugin: &mut ui_to_plugin,
                        paused: &paused,
                        run_state: RunState::Running,
                        safe_restore: false,
                        urids: &urids,
                    },
                    &mut |index, value| echoed.push((index, value)),
                )
                .unwrap();
            });

            // Drive cycles like a backend until the apply completes
            let mut io = MockIo::for_plugin(&plugin, 256);
            while !apply.is_finished() {
                let _ = h.process.run_cycle(256, &mut io);
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            apply.join().unwrap();

            // Post-resume cycles: the process resumes and the plugin
            // resynchronizes through a patch:Get
            let _ = h.process.run_cycle(256, &mut io);
            let _ = h.process.run_cycle(256, &mut io);
        });

        assert_eq!(h.process.run_state(), RunState::Running);
        assert_eq!(h.process.controls_buf().get(3), 0.9);
        assert_eq!(echoed, vec![(3, 0.9)]);

        let shared = h.shared.lock();
        // Internal state arrived while the process thread was paused
        assert_eq!(shared.props.len(), 1);
        assert_eq!(shared.props[0].0, 42);

        // Every post-resume run saw the restored value, and one of them saw
        // the injected patch:Get
        let resumed: Vec<&crate::testing::RunRecord> = shared
            .runs
            .iter()
            .filter(|r| r.controls.get(&3) == Some(&0.9))
            .collect();
        assert!(!resumed.is_empty());
        assert!(resumed.iter().any(|r| {
            r.primary_events.iter().any(|(ty, body)| {
                *ty == urids.atom_object
                    && ObjectRef::from_body(body).map(|o| o.otype) == Some(urids.patch_get)
            })
        }));
    }

    #[test]
    fn apply_writes_directly_when_not_running() {
        let plugin = rich_plugin();
        let mut h = Harness::new(plugin.clone(), 0);

        let urids = h.urids;
        let port_map = PortMap::from_plugin(&plugin);
        let controls_buf = h.process.controls_buf().clone();
        let paused = h.paused.clone();
        let instance = unsafe { &mut *h.process.instance_ptr() };

        let state = MockState {
            port_values: vec![
                (String::from("gain"), AnyValue::from_float(&urids, 0.25)),
                (String::from("missing"), AnyValue::from_float(&urids, 1.0)),
                (String::from("level"), AnyValue::from_int(&urids, 1)),
            ],
            ..MockState::default()
        };

        apply_state(
            &state,
            ApplyContext {
                instance,
                state_sched: None,
                ports: &port_map,
                controls_buf: &controls_buf,
                ui_to_plugin: &mut h.ui_to_plugin,
                paused: &paused,
                run_state: RunState::Paused,
                safe_restore: false,
                urids: &urids,
            },
            &mut |_, _| {},
        )
        .unwrap();

        // Direct writes, no pause handshake, integer values coerced
        assert_eq!(controls_buf.get(3), 0.25);
        assert_eq!(controls_buf.get(5), 1.0);
        assert!(!paused.try_wait());
        // Nothing was enqueued for the process thread
        let mut io = MockIo::for_plugin(&plugin, 64);
        h.process.set_run_state(RunState::Running);
        h.process.run_cycle(64, &mut io).unwrap();
        assert!(h.shared.lock().runs[0].primary_events.is_empty());
    }
}
