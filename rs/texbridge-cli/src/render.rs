use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use texbridge::{
	EngineError, EngineState, Frame, RegistryError, SessionId, SessionListener, SessionState, TextureId,
	TextureRegistry, TextureSampler,
};
use tokio::sync::watch;

/// What the compositor keeps from an upload: enough to prove the frame arrived intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
	pub generation: u64,
	pub width: u32,
	pub height: u32,
	pub checksum: u32,
}

fn upload(frame: &Frame) -> Surface {
	let checksum = frame
		.planes()
		.iter()
		.flat_map(|plane| plane.data.iter())
		.fold(0u32, |sum, byte| sum.wrapping_mul(31).wrapping_add(*byte as u32));

	Surface {
		generation: frame.generation,
		width: frame.width,
		height: frame.height,
		checksum,
	}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
	pub uploads: u64,
	pub unchanged: u64,
	pub skipped: u64,
}

/// A pretend compositor that polls every registered texture at display cadence.
#[derive(Default)]
pub struct Compositor {
	next: AtomicI64,
	textures: Mutex<HashMap<TextureId, TextureSampler>>,
	stats: Mutex<Stats>,
}

impl Compositor {
	/// Draw one display frame.
	pub fn render(&self) {
		let mut textures = self.textures.lock().unwrap_or_else(|err| err.into_inner());
		let mut stats = self.stats.lock().unwrap_or_else(|err| err.into_inner());

		for (id, sampler) in textures.iter_mut() {
			let before = sampler.last_generation();
			match sampler.copy_pixel_buffer(&upload) {
				Some(surface) => {
					// Frames the decoder produced faster than we displayed them.
					stats.skipped += surface.generation.saturating_sub(before + 1);
					stats.uploads += 1;
					tracing::trace!(
						texture = id,
						generation = surface.generation,
						width = surface.width,
						height = surface.height,
						checksum = surface.checksum,
						"uploaded"
					);
				}
				None => stats.unchanged += 1,
			}
		}
	}

	pub fn stats(&self) -> Stats {
		*self.stats.lock().unwrap_or_else(|err| err.into_inner())
	}
}

impl TextureRegistry for Compositor {
	fn register(&self, sampler: TextureSampler) -> Result<TextureId, RegistryError> {
		let id = self.next.fetch_add(1, Ordering::Relaxed);
		if id < 0 {
			return Err(RegistryError::new("out of texture ids"));
		}

		self.textures.lock().unwrap_or_else(|err| err.into_inner()).insert(id, sampler);
		tracing::info!(texture = id, "texture registered");
		Ok(id)
	}

	fn unregister(&self, id: TextureId) {
		let sampler = self.textures.lock().unwrap_or_else(|err| err.into_inner()).remove(&id);
		if sampler.is_some() {
			tracing::info!(texture = id, "texture unregistered");
		}
	}
}

/// Logs every notification and publishes the latest state for the main loop.
pub struct Listener {
	state: watch::Sender<SessionState>,
}

impl Listener {
	pub fn channel() -> (Self, watch::Receiver<SessionState>) {
		let (state, rx) = watch::channel(SessionState::Idle);
		(Self { state }, rx)
	}
}

impl SessionListener for Listener {
	fn on_state_changed(&self, session: SessionId, state: SessionState) {
		tracing::info!(%session, %state, "session state");
		self.state.send_replace(state);
	}

	fn on_error(&self, session: SessionId, error: &EngineError) {
		tracing::error!(%session, code = error.code, message = %error.message, "playback failed");
	}

	fn on_texture_changed(&self, session: SessionId, texture: Option<TextureId>) {
		tracing::debug!(%session, ?texture, "texture changed");
	}

	fn on_engine_event(&self, session: SessionId, event: EngineState) {
		tracing::debug!(%session, ?event, "engine event");
	}
}
