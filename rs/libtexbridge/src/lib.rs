//! C bindings for texbridge.
//!
//! Sessions and frames are referenced by non-zero `i32` handles. Every function returns a
//! non-negative value on success or a negative error code, and panics never cross the boundary.

mod api;
mod callbacks;
mod error;
mod ffi;
mod id;
mod runtime;
mod state;

pub use api::*;
pub use callbacks::{EngineCallbacks, ListenerCallbacks, RegistryCallbacks};
pub use error::*;
pub use id::*;
