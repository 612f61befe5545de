use std::str::Utf8Error;

/// Errors surfaced across the C boundary, each with a stable negative code.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	#[error("handle not found")]
	NotFound,

	#[error("invalid pointer")]
	InvalidPointer,

	#[error("invalid id")]
	InvalidId,

	#[error("return value out of range")]
	InvalidCode,

	#[error("invalid utf8: {0}")]
	Utf8(#[from] Utf8Error),

	#[error("panic")]
	Panic,

	#[error("unknown pixel format: {0}")]
	UnknownFormat(u32),

	#[error("unknown engine state: {0}")]
	UnknownState(i32),

	#[error("invalid log level: {0}")]
	Level(#[from] tracing::metadata::ParseLevelError),

	#[error("texture invalidated")]
	Invalidated,

	#[error(transparent)]
	Session(#[from] texbridge::Error),
}

impl Error {
	pub fn code(&self) -> i32 {
		match self {
			Self::NotFound => -1,
			Self::InvalidPointer => -2,
			Self::InvalidId => -3,
			Self::InvalidCode => -4,
			Self::Utf8(_) => -5,
			Self::Panic => -6,
			Self::UnknownFormat(_) => -7,
			Self::UnknownState(_) => -8,
			Self::Level(_) => -9,
			Self::Invalidated => -20,
			Self::Session(err) => err.code(),
		}
	}
}
