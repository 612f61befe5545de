use std::sync::Arc;

use crate::SessionState;

/// A fatal condition reported by the playback engine.
///
/// Transient glitches are absorbed by the engine; only conditions that end playback arrive here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("engine error code={code}: {message}")]
pub struct EngineError {
	pub code: i32,
	pub message: Arc<str>,
}

impl EngineError {
	pub fn new(code: i32, message: impl Into<Arc<str>>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}
}

/// The reason a texture could not be registered with the renderer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("texture registration refused: {0}")]
pub struct RegistryError(pub Arc<str>);

impl RegistryError {
	pub fn new(reason: impl Into<Arc<str>>) -> Self {
		Self(reason.into())
	}
}

/// A list of possible errors surfaced by a playback session.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
	/// An argument, such as the source descriptor, was rejected before reaching the engine.
	#[error("invalid argument: {0}")]
	Config(Arc<str>),

	/// The engine reported a fatal decode or network failure.
	#[error(transparent)]
	EngineFatal(#[from] EngineError),

	/// The renderer refused a new texture.
	#[error(transparent)]
	TextureRegistration(#[from] RegistryError),

	/// The session was used after it was destroyed.
	#[error("{0} called after the session was destroyed")]
	LifecycleViolation(&'static str),

	/// The command is not valid in the current state.
	#[error("{op} is not valid while {state}")]
	InvalidState { op: &'static str, state: SessionState },
}

impl Error {
	pub(crate) fn config(reason: impl Into<Arc<str>>) -> Self {
		Self::Config(reason.into())
	}

	/// A stable integer code, negative so it can share a return value with handles.
	pub fn code(&self) -> i32 {
		match self {
			Self::Config(_) => -10,
			Self::EngineFatal(_) => -11,
			Self::TextureRegistration(_) => -12,
			Self::LifecycleViolation(_) => -13,
			Self::InvalidState { .. } => -14,
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;
