//! LV2 vocabulary: URI constants and the table of URIDs the host uses.

use crate::mapper::{Mapper, Urid};

/// URIs from the LV2 specifications that the host refers to by name.
pub mod uri {
    pub const ATOM_BOOL: &str = "http://lv2plug.in/ns/ext/atom#Bool";
    pub const ATOM_CHUNK: &str = "http://lv2plug.in/ns/ext/atom#Chunk";
    pub const ATOM_DOUBLE: &str = "http://lv2plug.in/ns/ext/atom#Double";
    pub const ATOM_FLOAT: &str = "http://lv2plug.in/ns/ext/atom#Float";
    pub const ATOM_INT: &str = "http://lv2plug.in/ns/ext/atom#Int";
    pub const ATOM_LONG: &str = "http://lv2plug.in/ns/ext/atom#Long";
    pub const ATOM_OBJECT: &str = "http://lv2plug.in/ns/ext/atom#Object";
    pub const ATOM_PATH: &str = "http://lv2plug.in/ns/ext/atom#Path";
    pub const ATOM_SEQUENCE: &str = "http://lv2plug.in/ns/ext/atom#Sequence";
    pub const ATOM_STRING: &str = "http://lv2plug.in/ns/ext/atom#String";
    pub const ATOM_URI: &str = "http://lv2plug.in/ns/ext/atom#URI";
    pub const ATOM_URID: &str = "http://lv2plug.in/ns/ext/atom#URID";
    pub const ATOM_EVENT_TRANSFER: &str = "http://lv2plug.in/ns/ext/atom#eventTransfer";

    pub const BUF_SIZE_BOUNDED_BLOCK_LENGTH: &str =
        "http://lv2plug.in/ns/ext/buf-size#boundedBlockLength";
    pub const BUF_SIZE_FIXED_BLOCK_LENGTH: &str =
        "http://lv2plug.in/ns/ext/buf-size#fixedBlockLength";
    pub const BUF_SIZE_POW2_BLOCK_LENGTH: &str =
        "http://lv2plug.in/ns/ext/buf-size#powerOf2BlockLength";
    pub const BUF_SIZE_MAX_BLOCK_LENGTH: &str =
        "http://lv2plug.in/ns/ext/buf-size#maxBlockLength";
    pub const BUF_SIZE_MIN_BLOCK_LENGTH: &str =
        "http://lv2plug.in/ns/ext/buf-size#minBlockLength";
    pub const BUF_SIZE_SEQUENCE_SIZE: &str = "http://lv2plug.in/ns/ext/buf-size#sequenceSize";

    pub const LOG_ERROR: &str = "http://lv2plug.in/ns/ext/log#Error";
    pub const LOG_LOG: &str = "http://lv2plug.in/ns/ext/log#log";
    pub const LOG_NOTE: &str = "http://lv2plug.in/ns/ext/log#Note";
    pub const LOG_TRACE: &str = "http://lv2plug.in/ns/ext/log#Trace";
    pub const LOG_WARNING: &str = "http://lv2plug.in/ns/ext/log#Warning";

    pub const MIDI_EVENT: &str = "http://lv2plug.in/ns/ext/midi#MidiEvent";

    pub const OPTIONS_OPTIONS: &str = "http://lv2plug.in/ns/ext/options#options";

    pub const PARAM_SAMPLE_RATE: &str = "http://lv2plug.in/ns/ext/parameters#sampleRate";

    pub const PATCH_GET: &str = "http://lv2plug.in/ns/ext/patch#Get";
    pub const PATCH_PUT: &str = "http://lv2plug.in/ns/ext/patch#Put";
    pub const PATCH_SET: &str = "http://lv2plug.in/ns/ext/patch#Set";
    pub const PATCH_BODY: &str = "http://lv2plug.in/ns/ext/patch#body";
    pub const PATCH_PROPERTY: &str = "http://lv2plug.in/ns/ext/patch#property";
    pub const PATCH_VALUE: &str = "http://lv2plug.in/ns/ext/patch#value";
    pub const PATCH_READABLE: &str = "http://lv2plug.in/ns/ext/patch#readable";
    pub const PATCH_WRITABLE: &str = "http://lv2plug.in/ns/ext/patch#writable";

    pub const STATE_LOAD_DEFAULT_STATE: &str =
        "http://lv2plug.in/ns/ext/state#loadDefaultState";
    pub const STATE_MAKE_PATH: &str = "http://lv2plug.in/ns/ext/state#makePath";
    pub const STATE_THREAD_SAFE_RESTORE: &str =
        "http://lv2plug.in/ns/ext/state#threadSafeRestore";

    pub const TIME_POSITION: &str = "http://lv2plug.in/ns/ext/time#Position";
    pub const TIME_BAR: &str = "http://lv2plug.in/ns/ext/time#bar";
    pub const TIME_BAR_BEAT: &str = "http://lv2plug.in/ns/ext/time#barBeat";
    pub const TIME_BEAT_UNIT: &str = "http://lv2plug.in/ns/ext/time#beatUnit";
    pub const TIME_BEATS_PER_BAR: &str = "http://lv2plug.in/ns/ext/time#beatsPerBar";
    pub const TIME_BEATS_PER_MINUTE: &str = "http://lv2plug.in/ns/ext/time#beatsPerMinute";
    pub const TIME_FRAME: &str = "http://lv2plug.in/ns/ext/time#frame";
    pub const TIME_SPEED: &str = "http://lv2plug.in/ns/ext/time#speed";

    pub const UI_REQUEST_VALUE: &str = "http://lv2plug.in/ns/extensions/ui#requestValue";
    pub const UI_SCALE_FACTOR: &str = "http://lv2plug.in/ns/extensions/ui#scaleFactor";
    pub const UI_UPDATE_RATE: &str = "http://lv2plug.in/ns/extensions/ui#updateRate";

    pub const URID_MAP: &str = "http://lv2plug.in/ns/ext/urid#map";
    pub const URID_UNMAP: &str = "http://lv2plug.in/ns/ext/urid#unmap";

    pub const WORKER_SCHEDULE: &str = "http://lv2plug.in/ns/ext/worker#schedule";
    pub const WORKER_INTERFACE: &str = "http://lv2plug.in/ns/ext/worker#interface";
}

/// Cached URIDs for everything the host touches per cycle or per message.
#[derive(Debug, Clone, Copy)]
pub struct Urids {
    pub atom_bool: Urid,
    pub atom_chunk: Urid,
    pub atom_double: Urid,
    pub atom_float: Urid,
    pub atom_int: Urid,
    pub atom_long: Urid,
    pub atom_object: Urid,
    pub atom_path: Urid,
    pub atom_sequence: Urid,
    pub atom_string: Urid,
    pub atom_uri: Urid,
    pub atom_urid: Urid,
    pub atom_event_transfer: Urid,
    pub bufsz_max_block_length: Urid,
    pub bufsz_min_block_length: Urid,
    pub bufsz_sequence_size: Urid,
    pub log_error: Urid,
    pub log_note: Urid,
    pub log_trace: Urid,
    pub log_warning: Urid,
    pub midi_event: Urid,
    pub param_sample_rate: Urid,
    pub patch_get: Urid,
    pub patch_put: Urid,
    pub patch_set: Urid,
    pub patch_body: Urid,
    pub patch_property: Urid,
    pub patch_value: Urid,
    pub time_position: Urid,
    pub time_bar: Urid,
    pub time_bar_beat: Urid,
    pub time_beat_unit: Urid,
    pub time_beats_per_bar: Urid,
    pub time_beats_per_minute: Urid,
    pub time_frame: Urid,
    pub time_speed: Urid,
    pub ui_scale_factor: Urid,
    pub ui_update_rate: Urid,
}

impl Urids {
    pub fn new(mapper: &Mapper) -> Self {
        Self {
            atom_bool: mapper.map(uri::ATOM_BOOL),
            atom_chunk: mapper.map(uri::ATOM_CHUNK),
            atom_double: mapper.map(uri::ATOM_DOUBLE),
            atom_float: mapper.map(uri::ATOM_FLOAT),
            atom_int: mapper.map(uri::ATOM_INT),
            atom_long: mapper.map(uri::ATOM_LONG),
            atom_object: mapper.map(uri::ATOM_OBJECT),
            atom_path: mapper.map(uri::ATOM_PATH),
            atom_sequence: mapper.map(uri::ATOM_SEQUENCE),
            atom_string: mapper.map(uri::ATOM_STRING),
            atom_uri: mapper.map(uri::ATOM_URI),
            atom_urid: mapper.map(uri::ATOM_URID),
            atom_event_transfer: mapper.map(uri::ATOM_EVENT_TRANSFER),
            bufsz_max_block_length: mapper.map(uri::BUF_SIZE_MAX_BLOCK_LENGTH),
            bufsz_min_block_length: mapper.map(uri::BUF_SIZE_MIN_BLOCK_LENGTH),
            bufsz_sequence_size: mapper.map(uri::BUF_SIZE_SEQUENCE_SIZE),
            log_error: mapper.map(uri::LOG_ERROR),
            log_note: mapper.map(uri::LOG_NOTE),
            log_trace: mapper.map(uri::LOG_TRACE),
            log_warning: mapper.map(uri::LOG_WARNING),
            midi_event: mapper.map(uri::MIDI_EVENT),
            param_sample_rate: mapper.map(uri::PARAM_SAMPLE_RATE),
            patch_get: mapper.map(uri::PATCH_GET),
            patch_put: mapper.map(uri::PATCH_PUT),
            patch_set: mapper.map(uri::PATCH_SET),
            patch_body: mapper.map(uri::PATCH_BODY),
            patch_property: mapper.map(uri::PATCH_PROPERTY),
            patch_value: mapper.map(uri::PATCH_VALUE),
            time_position: mapper.map(uri::TIME_POSITION),
            time_bar: mapper.map(uri::TIME_BAR),
            time_bar_beat: mapper.map(uri::TIME_BAR_BEAT),
            time_beat_unit: mapper.map(uri::TIME_BEAT_UNIT),
            time_beats_per_bar: mapper.map(uri::TIME_BEATS_PER_BAR),
            time_beats_per_minute: mapper.map(uri::TIME_BEATS_PER_MINUTE),
            time_frame: mapper.map(uri::TIME_FRAME),
            time_speed: mapper.map(uri::TIME_SPEED),
            ui_scale_factor: mapper.map(uri::UI_SCALE_FACTOR),
            ui_update_rate: mapper.map(uri::UI_UPDATE_RATE),
        }
    }
}
