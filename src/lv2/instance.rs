//! A loaded plugin instance behind the [`PluginInstance`] trait.

use std::any::Any;
use std::ffi::{c_void, CStr, CString};
use std::sync::Arc;

use lilv_sys as lilv;

use crate::plugin::{PluginInstance, RunContext};
use crate::worker::{WorkExecutor, WorkerError};

use super::features::{Features, Lv2WorkerInterface, LV2_WORKER_SUCCESS};

/// The plugin's worker extension, callable from the worker thread and the
/// audio thread. The LV2 worker contract makes `work` safe to run
/// concurrently with `run()`.
pub struct Lv2WorkExecutor {
    handle: *mut c_void,
    iface: *const Lv2WorkerInterface,
}

unsafe impl Send for Lv2WorkExecutor {}
unsafe impl Sync for Lv2WorkExecutor {}

unsafe extern "C" fn respond_trampoline(
    handle: *mut c_void,
    size: u32,
    data: *const c_void,
) -> u32 {
    let respond =
        &mut *(handle as *mut &mut dyn FnMut(&[u8]) -> Result<(), WorkerError>);
    let data = std::slice::from_raw_parts(data as *const u8, size as usize);
    match respond(data) {
        Ok(()) => LV2_WORKER_SUCCESS,
        Err(_) => super::features::LV2_WORKER_ERR_NO_SPACE,
    }
}

impl WorkExecutor for Lv2WorkExecutor {
    fn work(
        &self,
        respond: &mut dyn FnMut(&[u8]) -> Result<(), WorkerError>,
        data: &[u8],
    ) -> Result<(), WorkerError> {
        let mut respond_ref: &mut dyn FnMut(&[u8]) -> Result<(), WorkerError> = respond;
        let status = unsafe {
            ((*self.iface).work)(
                self.handle,
                respond_trampoline,
                &mut respond_ref as *mut _ as *mut c_void,
                data.len() as u32,
                data.as_ptr() as *const c_void,
            )
        };
        if status == LV2_WORKER_SUCCESS {
            Ok(())
        } else {
            Err(WorkerError::Failed)
        }
    }

    fn work_response(&self, data: &[u8]) -> Result<(), WorkerError> {
        let status = unsafe {
            ((*self.iface).work_response)(
                self.handle,
                data.len() as u32,
                data.as_ptr() as *const c_void,
            )
        };
        if status == LV2_WORKER_SUCCESS {
            Ok(())
        } else {
            Err(WorkerError::Failed)
        }
    }

    fn end_run(&self) {
        unsafe {
            if let Some(end_run) = (*self.iface).end_run {
                end_run(self.handle);
            }
        }
    }
}

/// A plugin instance loaded through lilv.
pub struct Lv2Instance {
    instance: *mut lilv::LilvInstance,
    exec: Option<Arc<Lv2WorkExecutor>>,
    /// Keeps the feature structs the plugin points at alive; also the
    /// feature source for state restore.
    features: Arc<Features>,
}

unsafe impl Send for Lv2Instance {}

impl Lv2Instance {
    /// Wrap a freshly instantiated plugin, resolving its worker interface.
    ///
    /// # Safety
    ///
    /// `instance` must be a valid instance that outlives nothing else; the
    /// wrapper frees it on drop.
    pub unsafe fn new(instance: *mut lilv::LilvInstance, features: Arc<Features>) -> Self {
        let worker_uri =
            CString::new(crate::urids::uri::WORKER_INTERFACE).expect("static URI");
        let iface = lilv::lilv_instance_get_extension_data(instance, worker_uri.as_ptr())
            as *const Lv2WorkerInterface;

        let exec = (!iface.is_null()).then(|| {
            Arc::new(Lv2WorkExecutor {
                handle: lilv::lilv_instance_get_handle(instance),
                iface,
            })
        });

        Self {
            instance,
            exec,
            features,
        }
    }

    /// The raw lilv instance, for the state facility.
    pub fn raw(&mut self) -> *mut lilv::LilvInstance {
        self.instance
    }

    /// The features the instance was created with.
    pub fn features(&self) -> &Arc<Features> {
        &self.features
    }

    pub fn uri(&self) -> String {
        unsafe {
            CStr::from_ptr(lilv::lilv_instance_get_uri(self.instance))
                .to_string_lossy()
                .into_owned()
        }
    }
}

impl PluginInstance for Lv2Instance {
    fn activate(&mut self) {
        unsafe { lilv::lilv_instance_activate(self.instance) };
    }

    fn deactivate(&mut self) {
        unsafe { lilv::lilv_instance_deactivate(self.instance) };
    }

    unsafe fn connect_port(&mut self, index: u32, buffer: *mut c_void) {
        lilv::lilv_instance_connect_port(self.instance, index, buffer);
    }

    fn run(&mut self, nframes: u32, _ctx: &mut RunContext) {
        // The plugin schedules work through the worker feature it was
        // instantiated with, not through the context
        unsafe { lilv::lilv_instance_run(self.instance, nframes) };
    }

    fn work_executor(&self) -> Option<Arc<dyn WorkExecutor>> {
        self.exec
            .as_ref()
            .map(|exec| exec.clone() as Arc<dyn WorkExecutor>)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for Lv2Instance {
    fn drop(&mut self) {
        unsafe { lilv::lilv_instance_free(self.instance) };
    }
}
