use std::fmt;

use bytes::Bytes;

use crate::Timestamp;

/// Pixel layout of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum PixelFormat {
	/// 32-bit BGRA packed, the format most platform compositors sample directly.
	Bgra32,
	/// 32-bit RGBA packed.
	Rgba32,
	/// Y plane followed by an interleaved half-resolution UV plane.
	Nv12,
	/// YUV 4:2:0 with three separate planes.
	I420,
}

impl PixelFormat {
	/// The number of planes a CPU frame of this format carries.
	pub fn plane_count(&self) -> usize {
		match self {
			Self::Bgra32 | Self::Rgba32 => 1,
			Self::Nv12 => 2,
			Self::I420 => 3,
		}
	}

	pub fn from_code(code: u32) -> Option<Self> {
		match code {
			0 => Some(Self::Bgra32),
			1 => Some(Self::Rgba32),
			2 => Some(Self::Nv12),
			3 => Some(Self::I420),
			_ => None,
		}
	}

	pub fn to_code(&self) -> u32 {
		match self {
			Self::Bgra32 => 0,
			Self::Rgba32 => 1,
			Self::Nv12 => 2,
			Self::I420 => 3,
		}
	}
}

/// A single plane of pixel data.
#[derive(Debug, Clone)]
pub struct Plane {
	pub data: Bytes,

	/// Number of bytes between rows (may include padding).
	pub stride: usize,
}

type ReleaseFn = Box<dyn FnOnce(usize) + Send + Sync>;

/// A pixel buffer owned by the platform, such as a `CVPixelBufferRef`.
///
/// The release callback runs exactly once, when the buffer is dropped.
pub struct NativeBuffer {
	handle: usize,
	release: Option<ReleaseFn>,
}

impl NativeBuffer {
	pub fn new<F>(handle: usize, release: F) -> Self
	where
		F: FnOnce(usize) + Send + Sync + 'static,
	{
		Self {
			handle,
			release: Some(Box::new(release)),
		}
	}

	/// A buffer that needs no cleanup.
	pub fn borrowed(handle: usize) -> Self {
		Self { handle, release: None }
	}

	pub fn handle(&self) -> usize {
		self.handle
	}
}

impl fmt::Debug for NativeBuffer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NativeBuffer")
			.field("handle", &format_args!("{:#x}", self.handle))
			.finish()
	}
}

impl Drop for NativeBuffer {
	fn drop(&mut self) {
		if let Some(release) = self.release.take() {
			release(self.handle);
		}
	}
}

/// The backing memory of a frame.
#[derive(Debug)]
pub enum PixelData {
	Planes(Vec<Plane>),
	Native(NativeBuffer),
}

/// The decoder's output, before the bridge has assigned it a generation.
#[derive(Debug)]
pub struct DecodedFrame {
	pub pixels: PixelData,
	pub format: PixelFormat,
	pub width: u32,
	pub height: u32,
	pub timestamp: Timestamp,
}

impl DecodedFrame {
	/// A packed single-plane frame with tightly packed rows.
	pub fn packed(format: PixelFormat, width: u32, height: u32, data: impl Into<Bytes>, timestamp: Timestamp) -> Self {
		Self {
			pixels: PixelData::Planes(vec![Plane {
				data: data.into(),
				stride: width as usize * 4,
			}]),
			format,
			width,
			height,
			timestamp,
		}
	}
}

/// A decoded frame as published to the renderer.
///
/// Immutable once constructed. The pixel memory is released when the last reference is dropped.
#[derive(Debug)]
pub struct Frame {
	pub pixels: PixelData,
	pub format: PixelFormat,
	pub width: u32,
	pub height: u32,
	pub timestamp: Timestamp,

	/// Strictly increasing for every frame published by a session, starting at 1.
	pub generation: u64,
}

impl Frame {
	pub(crate) fn new(decoded: DecodedFrame, generation: u64) -> Self {
		Self {
			pixels: decoded.pixels,
			format: decoded.format,
			width: decoded.width,
			height: decoded.height,
			timestamp: decoded.timestamp,
			generation,
		}
	}

	pub fn planes(&self) -> &[Plane] {
		match &self.pixels {
			PixelData::Planes(planes) => planes,
			PixelData::Native(_) => &[],
		}
	}

	pub fn native(&self) -> Option<&NativeBuffer> {
		match &self.pixels {
			PixelData::Native(buffer) => Some(buffer),
			PixelData::Planes(_) => None,
		}
	}
}
