//! roost is a host for LV2 audio plugins: it loads one plugin, connects it
//! to an audio/MIDI backend, and mediates state between the plugin's
//! realtime audio thread and a non-realtime control surface.
//!
//! The crate is organized around the realtime boundary. Everything the
//! audio thread touches lives in [`process`]; the non-realtime side is
//! orchestrated by [`host`]; the two meet only through the lock-free rings
//! in [`ring`] and the small signalling primitives in [`sync`]. The plugin
//! library itself (RDF discovery, instantiation, state serialization) sits
//! behind the traits in [`plugin`], implemented by the `lilv`-gated glue in
//! [`lv2`] for real plugins.

pub mod any_value;
pub mod atom;
pub mod backend;
pub mod comm;
pub mod console;
pub mod controls;
pub mod evbuf;
pub mod host;
pub mod mapper;
pub mod patch;
pub mod plugin;
pub mod port;
pub mod process;
pub mod ring;
pub mod settings;
pub mod setup;
pub mod state;
pub mod symap;
pub mod sync;
pub mod types;
pub mod urids;
pub mod worker;

#[cfg(feature = "lilv")]
pub mod lv2;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::host::{Frontend, Host, Options};
pub use crate::types::RunState;
