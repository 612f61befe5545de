use std::fmt;
use std::sync::Weak;

use crate::session::Shared;
use crate::{DecodedFrame, EngineError, EngineState, SessionId};

/// The entry point the engine calls from its own threads.
///
/// Each `start` hands the engine a new sink. Once the session stops or is destroyed,
/// the sink is detached and every call becomes a no-op that reports `false`.
#[derive(Clone)]
pub struct DecoderCallbackSink {
	session: Weak<Shared>,
	epoch: u64,
}

impl DecoderCallbackSink {
	pub(crate) fn new(session: Weak<Shared>, epoch: u64) -> Self {
		Self { session, epoch }
	}

	/// Publish a decoded frame, replacing the previous one.
	///
	/// Never waits on the renderer. Returns false if the frame was dropped, either because
	/// the session is not expecting video or because this sink was detached.
	pub fn on_frame_ready(&self, frame: DecodedFrame) -> bool {
		match self.session.upgrade() {
			Some(session) => session.frame_ready(self.epoch, frame),
			None => false,
		}
	}

	/// Report a non-fatal engine state change.
	pub fn on_state_changed(&self, state: EngineState) -> bool {
		match self.session.upgrade() {
			Some(session) => session.engine_state(self.epoch, state),
			None => false,
		}
	}

	/// Report a fatal engine error. The session moves to `Error` and stops expecting frames.
	pub fn on_error(&self, error: EngineError) -> bool {
		match self.session.upgrade() {
			Some(session) => session.engine_error(self.epoch, error),
			None => false,
		}
	}

	/// Returns true while the session still accepts callbacks from this sink.
	pub fn is_registered(&self) -> bool {
		self.session
			.upgrade()
			.is_some_and(|session| session.is_current(self.epoch))
	}

	pub fn session(&self) -> Option<SessionId> {
		self.session.upgrade().map(|session| session.id)
	}
}

impl fmt::Debug for DecoderCallbackSink {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DecoderCallbackSink")
			.field("session", &self.session())
			.field("epoch", &self.epoch)
			.finish()
	}
}
