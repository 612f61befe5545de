use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::{DecodedFrame, Frame, Sample};

#[derive(Default)]
struct Slot {
	// The latest published frame, if any.
	frame: Option<Arc<Frame>>,

	// The generation of the most recently published frame, zero if none.
	generation: u64,
}

impl fmt::Debug for Slot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Slot")
			.field("frame", &self.frame.as_ref().map(|frame| frame.generation))
			.field("generation", &self.generation)
			.finish()
	}
}

/// A single-slot exchange holding the latest decoded frame.
///
/// Writers replace the slot's reference and readers clone it, so neither side waits on the other
/// for longer than a pointer swap. A superseded frame is released once its last reader drops it.
pub struct FrameBuffer {
	slot: watch::Sender<Slot>,

	// The highest generation handed to any reader.
	delivered: Arc<AtomicU64>,
}

impl FrameBuffer {
	pub fn new() -> Self {
		Self {
			slot: watch::Sender::new(Slot::default()),
			delivered: Default::default(),
		}
	}

	/// Replace the current frame, returning the generation assigned to the new one.
	///
	/// The generation is assigned while the slot is held, so concurrent writers still publish
	/// strictly increasing generations.
	pub fn publish(&self, decoded: DecodedFrame) -> u64 {
		let mut decoded = Some(decoded);
		let mut previous = None;
		let mut generation = 0;

		self.slot.send_modify(|slot| {
			let Some(decoded) = decoded.take() else { return };
			slot.generation += 1;
			generation = slot.generation;
			previous = slot.frame.replace(Arc::new(Frame::new(decoded, generation)));
		});

		// Release outside of the slot so a slow release callback never stalls readers.
		drop(previous);

		generation
	}

	/// Drop the current frame, keeping the generation counter.
	pub fn clear(&self) {
		let mut previous = None;
		self.slot.send_if_modified(|slot| {
			previous = slot.frame.take();
			previous.is_some()
		});

		if let Some(frame) = previous {
			tracing::trace!(generation = frame.generation, "released current frame");
		}
	}

	/// The current frame without marking anything as delivered.
	pub fn current(&self) -> Option<Arc<Frame>> {
		self.slot.borrow().frame.clone()
	}

	/// The generation of the most recently published frame.
	pub fn generation(&self) -> u64 {
		self.slot.borrow().generation
	}

	/// The highest generation returned to a reader as a new frame.
	pub fn delivered(&self) -> u64 {
		self.delivered.load(Ordering::Acquire)
	}

	/// Create a reader that treats the current frame, if any, as new.
	pub fn reader(&self) -> FrameReader {
		FrameReader {
			slot: self.slot.subscribe(),
			delivered: self.delivered.clone(),
			last: 0,
		}
	}
}

impl Default for FrameBuffer {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for FrameBuffer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FrameBuffer")
			.field("slot", &*self.slot.borrow())
			.field("delivered", &self.delivered())
			.finish()
	}
}

impl Drop for FrameBuffer {
	fn drop(&mut self) {
		// Readers may outlive the buffer; make sure they don't keep the last frame alive.
		self.clear();
	}
}

/// The reading half of a [FrameBuffer], owned by a single renderer.
#[derive(Debug)]
pub struct FrameReader {
	slot: watch::Receiver<Slot>,
	delivered: Arc<AtomicU64>,

	// The generation last returned as new by this reader.
	last: u64,
}

impl FrameReader {
	pub fn read(&mut self) -> Sample {
		let frame = self.slot.borrow_and_update().frame.clone();

		match frame {
			None => Sample::Empty,
			Some(frame) if frame.generation > self.last => {
				self.last = frame.generation;
				self.delivered.fetch_max(frame.generation, Ordering::AcqRel);
				Sample::New(frame)
			}
			Some(frame) => Sample::Unchanged(frame),
		}
	}

	/// Returns true if the slot was written since the last read.
	pub fn has_changed(&self) -> bool {
		self.slot.has_changed().unwrap_or(false)
	}

	/// The generation last returned as new.
	pub fn last_generation(&self) -> u64 {
		self.last
	}
}
