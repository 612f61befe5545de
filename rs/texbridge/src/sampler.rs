use std::sync::Arc;

use crate::{Frame, FrameReader, texture::Gate};

/// The result of sampling the frame buffer.
#[derive(Debug, Clone)]
pub enum Sample {
	/// Nothing has been published, or the last frame was released.
	Empty,

	/// The same frame as the previous sample.
	Unchanged(Arc<Frame>),

	/// A frame this sampler has not returned before.
	New(Arc<Frame>),

	/// The texture was invalidated; the sampler must not be used again.
	Invalidated,
}

impl Sample {
	pub fn is_new(&self) -> bool {
		matches!(self, Self::New(_))
	}

	pub fn frame(&self) -> Option<&Arc<Frame>> {
		match self {
			Self::New(frame) | Self::Unchanged(frame) => Some(frame),
			Self::Empty | Self::Invalidated => None,
		}
	}

	pub fn generation(&self) -> Option<u64> {
		self.frame().map(|frame| frame.generation)
	}

	pub fn into_frame(self) -> Option<Arc<Frame>> {
		match self {
			Self::New(frame) | Self::Unchanged(frame) => Some(frame),
			Self::Empty | Self::Invalidated => None,
		}
	}
}

/// Converts a frame into something the GPU can sample.
///
/// Implementations must be pure: no state retained between calls.
pub trait SurfaceConverter {
	type Surface;

	fn to_gpu_surface(&self, frame: &Frame) -> Self::Surface;
}

impl<F, S> SurfaceConverter for F
where
	F: Fn(&Frame) -> S,
{
	type Surface = S;

	fn to_gpu_surface(&self, frame: &Frame) -> S {
		self(frame)
	}
}

/// The renderer's side of a texture, polled on the renderer thread at its own cadence.
///
/// Each registered texture owns exactly one sampler.
#[derive(Debug)]
pub struct TextureSampler {
	reader: FrameReader,
	gate: Gate,
}

impl TextureSampler {
	pub(crate) fn new(reader: FrameReader, gate: Gate) -> Self {
		Self { reader, gate }
	}

	/// Return the most recent complete frame, flagging whether it changed since the last call.
	pub fn sample_current_frame(&mut self) -> Sample {
		// Held for the whole read so invalidation waits for us to finish.
		let open = self.gate.read();
		if !*open {
			return Sample::Invalidated;
		}

		self.reader.read()
	}

	/// Convert the current frame only if it is new, otherwise return `None` so the renderer
	/// keeps its previous upload.
	pub fn copy_pixel_buffer<C: SurfaceConverter>(&mut self, converter: &C) -> Option<C::Surface> {
		let open = self.gate.read();
		if !*open {
			return None;
		}

		match self.reader.read() {
			Sample::New(frame) => Some(converter.to_gpu_surface(&frame)),
			_ => None,
		}
	}

	pub fn is_valid(&self) -> bool {
		*self.gate.read()
	}

	/// The generation last returned as new.
	pub fn last_generation(&self) -> u64 {
		self.reader.last_generation()
	}
}
