use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::{FrameReader, RegistryError, TextureSampler};

/// The identifier the renderer assigned to a registered texture.
pub type TextureId = i64;

/// The renderer's texture registry, such as a UI framework's external texture table.
pub trait TextureRegistry: Send + Sync {
	/// Register a new external texture backed by the sampler.
	fn register(&self, sampler: TextureSampler) -> Result<TextureId, RegistryError>;

	/// Remove a texture. Called exactly once per successful registration.
	fn unregister(&self, id: TextureId);

	/// A new frame was published and the texture should be redrawn.
	///
	/// Never called after `unregister` for the same id. Invalidation waits for this call to
	/// return, so it must not tear down the session that owns the texture.
	fn frame_available(&self, _id: TextureId) {}
}

/// Guards sampler reads against invalidation.
///
/// Readers hold the read half for the duration of a sample; closing takes the write half,
/// so it waits for in-flight samples and every later sample sees the closed gate.
#[derive(Clone)]
pub(crate) struct Gate(Arc<RwLock<bool>>);

impl Gate {
	pub fn new() -> Self {
		Self(Arc::new(RwLock::new(true)))
	}

	// Readers don't queue behind a pending close, since a notifier may be waiting on the
	// renderer while a sampler holds the gate.
	pub fn read(&self) -> RwLockReadGuard<'_, bool> {
		self.0.read_recursive()
	}

	pub fn close(&self) {
		*self.0.write() = false;
	}
}

impl fmt::Debug for Gate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Gate").field(&*self.0.read()).finish()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureState {
	Unregistered,
	Registered,
	Invalidated,
}

/// A session's external rendering surface.
///
/// Moves from `Unregistered` to `Registered` to `Invalidated`, never backwards.
/// Re-registration requires a new handle.
#[derive(Debug)]
pub struct TextureHandle {
	id: Option<TextureId>,
	state: TextureState,
	gate: Gate,
}

impl TextureHandle {
	pub fn new() -> Self {
		Self {
			id: None,
			state: TextureState::Unregistered,
			gate: Gate::new(),
		}
	}

	pub fn id(&self) -> Option<TextureId> {
		self.id
	}

	pub fn state(&self) -> TextureState {
		self.state
	}

	/// The id while registered.
	pub fn registered(&self) -> Option<TextureId> {
		match self.state {
			TextureState::Registered => self.id,
			_ => None,
		}
	}

	/// Notifies the renderer of new frames for as long as the texture stays registered.
	pub(crate) fn notifier(&self) -> Option<Notifier> {
		let id = self.registered()?;
		Some(Notifier {
			id,
			gate: self.gate.clone(),
		})
	}

	pub(crate) fn register(
		&mut self,
		registry: &dyn TextureRegistry,
		reader: FrameReader,
	) -> Result<TextureId, RegistryError> {
		match self.state {
			TextureState::Registered => return self.id.ok_or_else(|| RegistryError::new("missing id")),
			TextureState::Invalidated => return Err(RegistryError::new("handle was invalidated")),
			TextureState::Unregistered => {}
		}

		let sampler = TextureSampler::new(reader, self.gate.clone());
		let id = registry.register(sampler)?;

		self.id = Some(id);
		self.state = TextureState::Registered;

		Ok(id)
	}

	/// Mark the handle invalidated, returning the work left to finish outside of any lock.
	pub(crate) fn invalidate(&mut self) -> Option<Revocation> {
		let previous = std::mem::replace(&mut self.state, TextureState::Invalidated);
		match (previous, self.id) {
			(TextureState::Registered, Some(id)) => Some(Revocation {
				id,
				gate: self.gate.clone(),
			}),
			_ => {
				// Samplers can't exist without registration, but close anyway.
				self.gate.close();
				None
			}
		}
	}
}

impl Default for TextureHandle {
	fn default() -> Self {
		Self::new()
	}
}

pub(crate) struct Notifier {
	pub id: TextureId,
	gate: Gate,
}

impl Notifier {
	/// Call `frame_available` unless the texture was invalidated, holding off invalidation until it returns.
	pub fn notify(&self, registry: &dyn TextureRegistry) -> bool {
		let open = self.gate.read();
		if !*open {
			return false;
		}

		registry.frame_available(self.id);
		true
	}
}

/// The second half of an invalidation: wait for in-flight samples, then unregister.
#[must_use]
pub(crate) struct Revocation {
	pub id: TextureId,
	gate: Gate,
}

impl Revocation {
	pub fn complete(self, registry: &dyn TextureRegistry) {
		self.gate.close();
		registry.unregister(self.id);
		tracing::debug!(texture = self.id, "texture unregistered");
	}
}
