use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{EngineError, EngineState, SessionId, SessionState, TextureId};

/// Receives a session's state transitions and errors.
///
/// Callbacks run synchronously on the thread that caused the event, after the session
/// released its locks, so they may call back into the session.
pub trait SessionListener: Send + Sync {
	fn on_state_changed(&self, session: SessionId, state: SessionState);

	/// A fatal engine error; delivered exactly once per failure.
	fn on_error(&self, session: SessionId, error: &EngineError);

	/// The session's texture was registered, replaced, or invalidated.
	fn on_texture_changed(&self, _session: SessionId, _texture: Option<TextureId>) {}

	/// A non-fatal engine event, such as buffering.
	fn on_engine_event(&self, _session: SessionId, _event: EngineState) {}
}

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Identifies a registration so it can be removed explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
	fn next() -> Self {
		Self(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
	}
}

#[derive(Debug, Clone)]
pub(crate) enum Notification {
	State(SessionState),
	Error(EngineError),
	Texture(Option<TextureId>),
	Engine(EngineState),
}

/// A non-owning listener registration.
#[derive(Default)]
pub(crate) struct ListenerSlot {
	entry: Option<(ListenerId, Weak<dyn SessionListener>)>,
}

impl ListenerSlot {
	pub fn set(&mut self, listener: Weak<dyn SessionListener>) -> ListenerId {
		let id = ListenerId::next();
		self.entry = Some((id, listener));
		id
	}

	pub fn remove(&mut self, id: ListenerId) -> bool {
		match &self.entry {
			Some((current, _)) if *current == id => {
				self.entry = None;
				true
			}
			_ => false,
		}
	}

	pub fn get(&self) -> Option<Weak<dyn SessionListener>> {
		self.entry.as_ref().map(|(_, listener)| listener.clone())
	}
}

pub(crate) fn deliver(listener: &dyn SessionListener, session: SessionId, notification: Notification) {
	match notification {
		Notification::State(state) => listener.on_state_changed(session, state),
		Notification::Error(err) => listener.on_error(session, &err),
		Notification::Texture(texture) => listener.on_texture_changed(session, texture),
		Notification::Engine(event) => listener.on_engine_event(session, event),
	}
}
