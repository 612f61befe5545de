use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use texbridge::{DecoderCallbackSink, Frame, PlaybackSession, Sample, SessionListener, TextureId, TextureSampler};
use tokio::task::AbortHandle;

use crate::callbacks::{FfiListener, SinkSlot};
use crate::{Error, FrameInfo, Id, NonZeroSlab};

struct Entry {
	session: PlaybackSession,

	// The engine's current sink, set on start.
	sink: SinkSlot,

	// The session only holds the listener weakly.
	#[allow(dead_code)]
	listener: Arc<FfiListener>,

	// Fires once the app has been backgrounded for too long.
	timer: Option<AbortHandle>,
}

impl Drop for Entry {
	fn drop(&mut self) {
		if let Some(timer) = self.timer.take() {
			timer.abort();
		}
	}
}

/// Everything owned on behalf of C, indexed by handle.
///
/// Nothing here calls into a session or back into C while the lock is held;
/// callers clone what they need and release the lock first.
#[derive(Default)]
pub struct State {
	sessions: NonZeroSlab<Entry>,

	// Registered textures, sampled by the renderer, keyed by session.
	samplers: HashMap<(Id, TextureId), TextureSampler>,

	// Frames the renderer is still reading.
	frames: NonZeroSlab<Arc<Frame>>,
}

static STATE: LazyLock<Mutex<State>> = LazyLock::new(Default::default);

impl State {
	pub fn lock() -> MutexGuard<'static, State> {
		STATE.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn session_insert(
		&mut self,
		session: PlaybackSession,
		sink: SinkSlot,
		listener: Arc<FfiListener>,
	) -> Result<Id, Error> {
		let shared: Arc<dyn SessionListener> = listener.clone();
		session.set_listener(Arc::downgrade(&shared));

		self.sessions.insert(Entry {
			session,
			sink,
			listener,
			timer: None,
		})
	}

	pub fn session(&self, id: Id) -> Result<PlaybackSession, Error> {
		let entry = self.sessions.get(id).ok_or(Error::NotFound)?;
		Ok(entry.session.clone())
	}

	/// Remove the session, returning it so it can be torn down without the lock.
	pub fn session_remove(&mut self, id: Id) -> Result<SessionHandle, Error> {
		let entry = self.sessions.remove(id).ok_or(Error::NotFound)?;
		Ok(SessionHandle(entry))
	}

	pub fn sink(&self, id: Id) -> Result<Option<DecoderCallbackSink>, Error> {
		let entry = self.sessions.get(id).ok_or(Error::NotFound)?;
		let sink = entry.sink.lock().unwrap_or_else(PoisonError::into_inner);
		Ok(sink.clone())
	}

	/// Replace the background timer, cancelling the previous one.
	pub fn set_timer(&mut self, id: Id, timer: Option<AbortHandle>) -> Result<(), Error> {
		let entry = self.sessions.get_mut(id).ok_or(Error::NotFound)?;
		if let Some(previous) = std::mem::replace(&mut entry.timer, timer) {
			previous.abort();
		}
		Ok(())
	}

	pub fn sampler_insert(&mut self, session: Id, id: TextureId, sampler: TextureSampler) {
		if self.samplers.insert((session, id), sampler).is_some() {
			tracing::warn!(?session, texture = id, "renderer reused a texture id");
		}
	}

	pub fn sampler_remove(&mut self, session: Id, id: TextureId) -> Option<TextureSampler> {
		self.samplers.remove(&(session, id))
	}

	/// Sample a session's texture, returning a frame handle only if the frame is new.
	pub fn texture_copy(&mut self, session: Id, texture: TextureId) -> Result<Option<Id>, Error> {
		let sampler = self.samplers.get_mut(&(session, texture)).ok_or(Error::NotFound)?;

		match sampler.sample_current_frame() {
			Sample::New(frame) => Ok(Some(self.frames.insert(frame)?)),
			Sample::Unchanged(_) | Sample::Empty => Ok(None),
			Sample::Invalidated => Err(Error::Invalidated),
		}
	}

	pub fn frame_info(&self, frame: Id, dst: &mut FrameInfo) -> Result<(), Error> {
		let frame = self.frames.get(frame).ok_or(Error::NotFound)?;

		*dst = FrameInfo {
			format: frame.format.to_code(),
			width: frame.width,
			height: frame.height,
			pts: frame.timestamp.as_micros(),
			generation: frame.generation,
			..FrameInfo::default()
		};

		for (i, plane) in frame.planes().iter().take(3).enumerate() {
			dst.planes[i] = plane.data.as_ptr();
			dst.plane_sizes[i] = plane.data.len();
			dst.strides[i] = plane.stride;
		}

		if let Some(native) = frame.native() {
			dst.native = native.handle() as *mut c_void;
		}

		Ok(())
	}

	/// Release the renderer's hold on a frame, returning it so it's dropped without the lock.
	pub fn frame_close(&mut self, frame: Id) -> Result<Arc<Frame>, Error> {
		self.frames.remove(frame).ok_or(Error::NotFound)
	}
}

/// A session removed from the global state, torn down by the caller.
pub struct SessionHandle(Entry);

impl SessionHandle {
	pub fn session(&self) -> &PlaybackSession {
		&self.0.session
	}
}
