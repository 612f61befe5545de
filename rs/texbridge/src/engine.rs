use std::fmt;
use std::time::Duration;

use url::Url;

use crate::{DecoderCallbackSink, EngineError, Error};

/// URL schemes the live/VOD engine understands.
const SCHEMES: &[&str] = &["rtmp", "rtmps", "http", "https", "rtsp", "srt", "webrtc", "trtc", "file"];

/// What to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
	pub url: Url,

	/// Decode audio only; no texture is registered and video frames are dropped.
	pub audio_only: bool,
}

impl SourceDescriptor {
	/// Validate a source before the engine sees it.
	pub fn parse(url: &str, audio_only: bool) -> Result<Self, Error> {
		let url = url.trim();
		if url.is_empty() {
			return Err(Error::config("empty url"));
		}

		let url = Url::parse(url).map_err(|err| Error::config(format!("{url}: {err}")))?;
		if !SCHEMES.contains(&url.scheme()) {
			return Err(Error::config(format!("unsupported scheme: {}", url.scheme())));
		}

		// A live URL without a stream path has nothing to play.
		if matches!(url.scheme(), "rtmp" | "rtmps" | "srt" | "rtsp") && url.path().trim_matches('/').is_empty() {
			return Err(Error::config(format!("missing stream key: {url}")));
		}

		Ok(Self { url, audio_only })
	}
}

impl fmt::Display for SourceDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.url)?;
		if self.audio_only {
			write!(f, " (audio only)")?;
		}
		Ok(())
	}
}

/// Non-fatal state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineState {
	/// Connecting or probing the source.
	Loading,
	/// The engine can render; required before a session reports `Playing`.
	Ready,
	/// Stalled waiting for data.
	Buffering,
	/// The source reached its end.
	Ended,
}

impl EngineState {
	pub fn from_code(code: i32) -> Option<Self> {
		match code {
			0 => Some(Self::Loading),
			1 => Some(Self::Ready),
			2 => Some(Self::Buffering),
			3 => Some(Self::Ended),
			_ => None,
		}
	}
}

/// The vendor playback engine, treated as a black box.
///
/// Commands are serialised by the session. The engine reports back through the
/// [DecoderCallbackSink] it receives on `start`, from any thread. Implementations must not
/// wait for their own in-flight callbacks while a command runs.
pub trait Engine: Send + 'static {
	fn start(&mut self, source: &SourceDescriptor, sink: DecoderCallbackSink) -> Result<(), EngineError>;
	fn pause(&mut self) -> Result<(), EngineError>;
	fn resume(&mut self) -> Result<(), EngineError>;
	fn stop(&mut self) -> Result<(), EngineError>;
	fn seek(&mut self, position: Duration) -> Result<(), EngineError>;
	fn set_volume(&mut self, level: f32) -> Result<(), EngineError>;
}
