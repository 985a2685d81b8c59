//! LV2 features passed to plugin instances.
//!
//! The C structs handed to the plugin must stay at stable addresses for the
//! instance's whole lifetime, so [`Features`] boxes each of them and is kept
//! alive alongside the instance. Extension structs that `lv2_raw` does not
//! cover (worker, log, options, make-path) are declared here, matching the
//! corresponding LV2 headers.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use lv2_raw::core::LV2Feature;
use lv2_raw::urid::{LV2Urid, LV2UridMap, LV2UridMapHandle};

use crate::mapper::Mapper;
use crate::settings::Settings;
use crate::urids::{uri, Urids};
use crate::worker::{WorkerError, WorkerSched};

pub const LV2_WORKER_SUCCESS: u32 = 0;
pub const LV2_WORKER_ERR_UNKNOWN: u32 = 1;
pub const LV2_WORKER_ERR_NO_SPACE: u32 = 2;

/// `LV2_URID_Unmap` from urid.h.
#[repr(C)]
pub struct Lv2UridUnmap {
    pub handle: *mut c_void,
    pub unmap: extern "C" fn(handle: *mut c_void, urid: LV2Urid) -> *const c_char,
}

/// `LV2_Worker_Schedule` from worker.h.
#[repr(C)]
pub struct Lv2WorkerSchedule {
    pub handle: *mut c_void,
    pub schedule_work:
        unsafe extern "C" fn(handle: *mut c_void, size: u32, data: *const c_void) -> u32,
}

/// `LV2_Worker_Interface` from worker.h, retrieved from the plugin.
#[repr(C)]
pub struct Lv2WorkerInterface {
    pub work: unsafe extern "C" fn(
        instance: *mut c_void,
        respond: unsafe extern "C" fn(*mut c_void, u32, *const c_void) -> u32,
        handle: *mut c_void,
        size: u32,
        data: *const c_void,
    ) -> u32,
    pub work_response:
        unsafe extern "C" fn(instance: *mut c_void, size: u32, body: *const c_void) -> u32,
    pub end_run: Option<unsafe extern "C" fn(instance: *mut c_void) -> u32>,
}

/// `LV2_Log_Log` from log.h. The printf members are variadic; the
/// implementations below read only the format string.
#[repr(C)]
pub struct Lv2LogLog {
    pub handle: *mut c_void,
    pub printf:
        unsafe extern "C" fn(handle: *mut c_void, ty: LV2Urid, fmt: *const c_char, ...) -> c_int,
    pub vprintf:
        unsafe extern "C" fn(handle: *mut c_void, ty: LV2Urid, fmt: *const c_char, args: *mut c_void)
            -> c_int,
}

/// `LV2_State_Make_Path` from state.h.
#[repr(C)]
pub struct Lv2StateMakePath {
    pub handle: *mut c_void,
    pub path: extern "C" fn(handle: *mut c_void, path: *const c_char) -> *mut c_char,
}

/// `LV2_Options_Option` from options.h.
#[repr(C)]
pub struct Lv2OptionsOption {
    pub context: u32,
    pub subject: u32,
    pub key: LV2Urid,
    pub size: u32,
    pub ty: LV2Urid,
    pub value: *const c_void,
}

// ── URID map/unmap shims ──

struct MapperCtx {
    mapper: Arc<Mapper>,
    /// Interned C strings for unmap, so returned pointers stay valid.
    unmapped: Mutex<Vec<(LV2Urid, CString)>>,
}

/// The C-visible ends of a [`Mapper`]: an `LV2_URID_Map` and an
/// `LV2_URID_Unmap` at stable addresses. The world needs one of these
/// before any instance (and its [`Features`]) exists, for loading states.
pub struct UridBridge {
    _ctx: Box<MapperCtx>,
    map: Box<LV2UridMap>,
    unmap: Box<Lv2UridUnmap>,
}

impl UridBridge {
    pub fn new(mapper: Arc<Mapper>) -> Self {
        let ctx = Box::new(MapperCtx {
            mapper,
            unmapped: Mutex::new(Vec::new()),
        });
        let map = Box::new(LV2UridMap {
            handle: &*ctx as *const MapperCtx as LV2UridMapHandle,
            map: map_uri,
        });
        let unmap = Box::new(Lv2UridUnmap {
            handle: &*ctx as *const MapperCtx as *mut c_void,
            unmap: unmap_uri,
        });
        Self {
            _ctx: ctx,
            map,
            unmap,
        }
    }

    pub fn map_ptr(&self) -> *mut LV2UridMap {
        &*self.map as *const LV2UridMap as *mut LV2UridMap
    }

    pub fn unmap_ptr(&self) -> *mut Lv2UridUnmap {
        &*self.unmap as *const Lv2UridUnmap as *mut Lv2UridUnmap
    }
}

// The C structs are immutable after construction and the shims are
// thread-safe.
unsafe impl Send for UridBridge {}
unsafe impl Sync for UridBridge {}

extern "C" fn map_uri(handle: LV2UridMapHandle, uri: *const c_char) -> LV2Urid {
    if handle.is_null() || uri.is_null() {
        return 0;
    }
    let ctx = unsafe { &*(handle as *const MapperCtx) };
    match unsafe { CStr::from_ptr(uri) }.to_str() {
        Ok(uri) => ctx.mapper.map(uri),
        Err(_) => 0,
    }
}

extern "C" fn unmap_uri(handle: *mut c_void, urid: LV2Urid) -> *const c_char {
    if handle.is_null() {
        return std::ptr::null();
    }
    let ctx = unsafe { &*(handle as *const MapperCtx) };

    let mut unmapped = ctx.unmapped.lock();
    if let Some((_, cstr)) = unmapped.iter().find(|(id, _)| *id == urid) {
        return cstr.as_ptr();
    }

    let Some(uri) = ctx.mapper.unmap(urid) else {
        return std::ptr::null();
    };
    let Ok(cstr) = CString::new(uri) else {
        return std::ptr::null();
    };
    unmapped.push((urid, cstr));
    unmapped.last().map(|(_, s)| s.as_ptr()).unwrap_or(std::ptr::null())
}

// ── Worker schedule shim ──

unsafe extern "C" fn schedule_work(handle: *mut c_void, size: u32, data: *const c_void) -> u32 {
    if handle.is_null() || size == 0 {
        return LV2_WORKER_ERR_UNKNOWN;
    }
    let sched = &mut *(handle as *mut WorkerSched);
    let data = std::slice::from_raw_parts(data as *const u8, size as usize);
    match sched.schedule(data) {
        Ok(()) => LV2_WORKER_SUCCESS,
        Err(WorkerError::NoSpace) => LV2_WORKER_ERR_NO_SPACE,
        Err(_) => LV2_WORKER_ERR_UNKNOWN,
    }
}

// ── Log shim ──

struct LogCtx {
    urids: Urids,
}

unsafe extern "C" fn log_vprintf(
    handle: *mut c_void,
    ty: LV2Urid,
    fmt: *const c_char,
    _args: *mut c_void,
) -> c_int {
    if fmt.is_null() {
        return 0;
    }
    // Format arguments are not expanded; the raw format string is logged
    let message = CStr::from_ptr(fmt).to_string_lossy();
    let message = message.trim_end();

    let trace = !handle.is_null() && {
        let ctx = &*(handle as *const LogCtx);
        ty == ctx.urids.log_trace
    };
    let error = !handle.is_null() && {
        let ctx = &*(handle as *const LogCtx);
        ty == ctx.urids.log_error
    };

    if trace {
        log::trace!("plugin: {message}");
    } else if error {
        log::error!("plugin: {message}");
    } else {
        log::info!("plugin: {message}");
    }
    message.len() as c_int
}

// Installed behind the variadic printf pointer; reads only the fixed
// arguments, which the C calling convention permits
unsafe extern "C" fn log_printf_impl(
    handle: *mut c_void,
    ty: LV2Urid,
    fmt: *const c_char,
) -> c_int {
    log_vprintf(handle, ty, fmt, std::ptr::null_mut())
}

type VariadicPrintf =
    unsafe extern "C" fn(handle: *mut c_void, ty: LV2Urid, fmt: *const c_char, ...) -> c_int;

fn log_printf() -> VariadicPrintf {
    unsafe {
        std::mem::transmute(
            log_printf_impl as unsafe extern "C" fn(*mut c_void, LV2Urid, *const c_char) -> c_int,
        )
    }
}

// ── Make-path shim ──

struct MakePathCtx {
    /// Where plugin-created files land: the save directory during a save,
    /// the session temp directory otherwise.
    base: Mutex<PathBuf>,
}

extern "C" fn make_path(handle: *mut c_void, path: *const c_char) -> *mut c_char {
    if handle.is_null() || path.is_null() {
        return std::ptr::null_mut();
    }
    let ctx = unsafe { &*(handle as *const MakePathCtx) };
    let suffix = unsafe { CStr::from_ptr(path) }.to_string_lossy();
    let full = ctx.base.lock().join(suffix.as_ref());

    let Some(full) = full.to_str().and_then(|s| CString::new(s).ok()) else {
        return std::ptr::null_mut();
    };
    // The plugin frees this with free(), so it must come from malloc
    unsafe { libc::strdup(full.as_ptr()) }
}

/// All features and feature data for one plugin instance, at stable
/// addresses for the instance's lifetime.
pub struct Features {
    urid: UridBridge,
    sched: Option<Box<Lv2WorkerSchedule>>,
    ssched: Option<Box<Lv2WorkerSchedule>>,
    _log_ctx: Box<LogCtx>,
    pub log: Box<Lv2LogLog>,
    make_path_ctx: Box<MakePathCtx>,
    make_path: Box<Lv2StateMakePath>,
    _option_values: Box<OptionValues>,
    options: Box<[Lv2OptionsOption; 7]>,
    /// URI strings referenced by the feature array.
    uris: Vec<CString>,
    features: Vec<Box<LV2Feature>>,
    /// Null-terminated array for lilv_plugin_instantiate.
    instantiate_ptrs: Vec<*const LV2Feature>,
    /// Null-terminated array for lilv_state_restore.
    state_ptrs: Vec<*const LV2Feature>,
}

#[repr(C)]
struct OptionValues {
    sample_rate: f32,
    block_length: i32,
    midi_buf_size: i32,
    ui_update_hz: f32,
    ui_scale_factor: f32,
}

impl Features {
    pub fn new(
        mapper: Arc<Mapper>,
        urids: &Urids,
        settings: &Settings,
        temp_dir: PathBuf,
        sched: Option<*mut WorkerSched>,
        state_sched: Option<*mut WorkerSched>,
    ) -> Box<Self> {
        let urid = UridBridge::new(mapper);

        let sched = sched.map(|handle| {
            Box::new(Lv2WorkerSchedule {
                handle: handle as *mut c_void,
                schedule_work,
            })
        });
        let ssched = state_sched.map(|handle| {
            Box::new(Lv2WorkerSchedule {
                handle: handle as *mut c_void,
                schedule_work,
            })
        });

        let log_ctx = Box::new(LogCtx { urids: *urids });
        let log = Box::new(Lv2LogLog {
            handle: &*log_ctx as *const LogCtx as *mut c_void,
            printf: log_printf(),
            vprintf: log_vprintf,
        });

        let make_path_ctx = Box::new(MakePathCtx {
            base: Mutex::new(temp_dir),
        });
        let make_path = Box::new(Lv2StateMakePath {
            handle: &*make_path_ctx as *const MakePathCtx as *mut c_void,
            path: make_path,
        });

        let option_values = Box::new(OptionValues {
            sample_rate: settings.sample_rate,
            block_length: settings.block_length as i32,
            midi_buf_size: settings.midi_buf_size as i32,
            ui_update_hz: settings.ui_update_hz,
            ui_scale_factor: settings.ui_scale_factor,
        });
        let values = &*option_values;
        let option = |key, size, ty, value| Lv2OptionsOption {
            context: 0, // LV2_OPTIONS_INSTANCE
            subject: 0,
            key,
            size,
            ty,
            value,
        };
        let options = Box::new([
            option(
                urids.param_sample_rate,
                4,
                urids.atom_float,
                &values.sample_rate as *const f32 as *const c_void,
            ),
            option(
                urids.bufsz_min_block_length,
                4,
                urids.atom_int,
                &values.block_length as *const i32 as *const c_void,
            ),
            option(
                urids.bufsz_max_block_length,
                4,
                urids.atom_int,
                &values.block_length as *const i32 as *const c_void,
            ),
            option(
                urids.bufsz_sequence_size,
                4,
                urids.atom_int,
                &values.midi_buf_size as *const i32 as *const c_void,
            ),
            option(
                urids.ui_update_rate,
                4,
                urids.atom_float,
                &values.ui_update_hz as *const f32 as *const c_void,
            ),
            option(
                urids.ui_scale_factor,
                4,
                urids.atom_float,
                &values.ui_scale_factor as *const f32 as *const c_void,
            ),
            option(0, 0, 0, std::ptr::null()),
        ]);

        let mut this = Box::new(Self {
            urid,
            sched,
            ssched,
            _log_ctx: log_ctx,
            log,
            make_path_ctx,
            make_path,
            _option_values: option_values,
            options,
            uris: Vec::new(),
            features: Vec::new(),
            instantiate_ptrs: Vec::new(),
            state_ptrs: Vec::new(),
        });
        this.build_lists();
        this
    }

    fn feature(&mut self, uri_str: &str, data: *mut c_void) -> *const LV2Feature {
        let uri = CString::new(uri_str).expect("feature URI");
        let feature = Box::new(LV2Feature {
            uri: uri.as_ptr(),
            data,
        });
        let ptr = &*feature as *const LV2Feature;
        self.uris.push(uri);
        self.features.push(feature);
        ptr
    }

    fn build_lists(&mut self) {
        let map = self.urid.map_ptr() as *mut c_void;
        let unmap = self.urid.unmap_ptr() as *mut c_void;
        let make_path = &*self.make_path as *const Lv2StateMakePath as *mut c_void;
        let log = &*self.log as *const Lv2LogLog as *mut c_void;
        let options = self.options.as_ptr() as *mut c_void;
        let sched = self
            .sched
            .as_ref()
            .map(|s| &**s as *const Lv2WorkerSchedule as *mut c_void);
        let ssched = self
            .ssched
            .as_ref()
            .map(|s| &**s as *const Lv2WorkerSchedule as *mut c_void);

        let map_f = self.feature(uri::URID_MAP, map);
        let unmap_f = self.feature(uri::URID_UNMAP, unmap);
        let make_path_f = self.feature(uri::STATE_MAKE_PATH, make_path);
        let log_f = self.feature(uri::LOG_LOG, log);
        let options_f = self.feature(uri::OPTIONS_OPTIONS, options);
        let safe_restore_f =
            self.feature(uri::STATE_THREAD_SAFE_RESTORE, std::ptr::null_mut());
        let sched_f = sched.map(|data| self.feature(uri::WORKER_SCHEDULE, data));
        let ssched_f = ssched.map(|data| self.feature(uri::WORKER_SCHEDULE, data));

        // Declared support without data
        let load_default_f =
            self.feature(uri::STATE_LOAD_DEFAULT_STATE, std::ptr::null_mut());
        let pow2_f = self.feature(uri::BUF_SIZE_POW2_BLOCK_LENGTH, std::ptr::null_mut());
        let fixed_f = self.feature(uri::BUF_SIZE_FIXED_BLOCK_LENGTH, std::ptr::null_mut());
        let bounded_f =
            self.feature(uri::BUF_SIZE_BOUNDED_BLOCK_LENGTH, std::ptr::null_mut());

        self.instantiate_ptrs = vec![map_f, unmap_f, make_path_f, log_f, options_f];
        if let Some(f) = sched_f {
            self.instantiate_ptrs.push(f);
        }
        self.instantiate_ptrs
            .extend([load_default_f, pow2_f, fixed_f, bounded_f]);
        self.instantiate_ptrs.push(std::ptr::null());

        self.state_ptrs = vec![map_f, unmap_f, make_path_f, log_f, options_f, safe_restore_f];
        if let Some(f) = ssched_f {
            self.state_ptrs.push(f);
        }
        self.state_ptrs.push(std::ptr::null());
    }

    /// Null-terminated feature array for plugin instantiation.
    pub fn instantiate_list(&self) -> *const *const LV2Feature {
        self.instantiate_ptrs.as_ptr()
    }

    /// Null-terminated feature array for state restore.
    pub fn state_list(&self) -> *const *const LV2Feature {
        self.state_ptrs.as_ptr()
    }

    /// The URID map struct, for lilv state calls.
    pub fn map_ptr(&self) -> *mut LV2UridMap {
        self.urid.map_ptr()
    }

    /// The URID unmap struct, for lilv state calls.
    pub fn unmap_ptr(&self) -> *mut Lv2UridUnmap {
        self.urid.unmap_ptr()
    }

    /// Redirect plugin-created files to `dir` (used while saving).
    pub fn set_make_path_base(&self, dir: PathBuf) {
        *self.make_path_ctx.base.lock() = dir;
    }
}

// The boxed C structs are immutable after construction and the shims they
// point at are thread-safe.
unsafe impl Send for Features {}
unsafe impl Sync for Features {}
