//! The lilv-backed implementation of the plugin boundary.
//!
//! Everything that touches the LV2 RDF world, the plugin shared library, or
//! the LV2 C ABI lives here, behind the `lilv` cargo feature. The rest of
//! the host only sees the traits in [`crate::plugin`].

pub mod features;
pub mod instance;
pub mod world;

pub use world::Lv2World;
