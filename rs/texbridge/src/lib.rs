//! Hands decoded video frames from an asynchronous playback engine to a pull-based renderer.
//!
//! The engine pushes frames into a [DecoderCallbackSink] from its own threads. Each frame
//! replaces the previous one in a single-slot [FrameBuffer], and the renderer polls a
//! [TextureSampler] at display cadence for the latest complete frame. Neither side waits on
//! the other, and a superseded frame is released once the last reader drops it.
//!
//! A [PlaybackSession] owns the buffer, drives the engine through its lifecycle, registers
//! the texture with the renderer's [TextureRegistry], and reports transitions to a
//! [SessionListener].

mod buffer;
mod config;
mod engine;
mod error;
mod frame;
mod listener;
mod log;
mod sampler;
mod session;
mod sink;
mod texture;
mod timestamp;

#[cfg(test)]
mod mock;

pub use buffer::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use frame::*;
pub use listener::{ListenerId, SessionListener};
pub use log::*;
pub use sampler::*;
pub use session::{PlaybackSession, SessionId, SessionState};
pub use sink::*;
pub use texture::{TextureHandle, TextureId, TextureRegistry, TextureState};
pub use timestamp::*;
