use std::ffi::{CString, c_char, c_void};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use texbridge::{
	DecoderCallbackSink, EngineError, EngineState, RegistryError, SessionId, SessionListener, SessionState,
	SourceDescriptor, TextureId, TextureRegistry, TextureSampler,
};

use crate::state::State;
use crate::{Id, ffi};

/// The vendor engine's command surface.
///
/// Each command returns zero on success or a negative, engine-specific code on failure.
/// A missing callback is treated as a successful no-op.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct EngineCallbacks {
	pub user_data: *mut c_void,
	pub start: Option<unsafe extern "C" fn(user_data: *mut c_void, url: *const c_char, audio_only: bool) -> i32>,
	pub pause: Option<unsafe extern "C" fn(user_data: *mut c_void) -> i32>,
	pub resume: Option<unsafe extern "C" fn(user_data: *mut c_void) -> i32>,
	pub stop: Option<unsafe extern "C" fn(user_data: *mut c_void) -> i32>,
	// microseconds
	pub seek: Option<unsafe extern "C" fn(user_data: *mut c_void, position: u64) -> i32>,
	pub set_volume: Option<unsafe extern "C" fn(user_data: *mut c_void, level: f32) -> i32>,
}

/// The renderer's texture table.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RegistryCallbacks {
	pub user_data: *mut c_void,
	/// Returns a new texture id, or a negative value if no texture is available.
	pub register: Option<unsafe extern "C" fn(user_data: *mut c_void) -> i64>,
	pub unregister: Option<unsafe extern "C" fn(user_data: *mut c_void, texture: i64)>,
	pub frame_available: Option<unsafe extern "C" fn(user_data: *mut c_void, texture: i64)>,
}

/// Session notifications, all optional.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ListenerCallbacks {
	pub user_data: *mut c_void,
	pub on_state: Option<unsafe extern "C" fn(user_data: *mut c_void, state: i32)>,
	pub on_error: Option<unsafe extern "C" fn(user_data: *mut c_void, code: i32, message: *const c_char)>,
	/// Called with -1 when the texture is invalidated.
	pub on_texture: Option<unsafe extern "C" fn(user_data: *mut c_void, texture: i64)>,
	pub on_engine: Option<unsafe extern "C" fn(user_data: *mut c_void, state: i32)>,
}

impl Default for ListenerCallbacks {
	fn default() -> Self {
		Self {
			user_data: std::ptr::null_mut(),
			on_state: None,
			on_error: None,
			on_texture: None,
			on_engine: None,
		}
	}
}

/// The sink handed to the engine on the most recent start, shared with the inbound C calls.
pub type SinkSlot = Arc<Mutex<Option<DecoderCallbackSink>>>;

pub struct FfiEngine {
	callbacks: EngineCallbacks,
	sink: SinkSlot,
}

// SAFETY: The engine is moved into the session and called from whichever thread issues a command.
// The C side MUST guarantee:
// - user_data may be used from any thread
// - Function pointers remain valid until the session is destroyed
unsafe impl Send for FfiEngine {}

impl FfiEngine {
	pub fn new(callbacks: EngineCallbacks, sink: SinkSlot) -> Self {
		Self { callbacks, sink }
	}

	fn check(op: &'static str, code: Option<i32>) -> Result<(), EngineError> {
		match code {
			Some(code) if code < 0 => Err(EngineError::new(code, format!("{op} failed"))),
			_ => Ok(()),
		}
	}
}

impl texbridge::Engine for FfiEngine {
	fn start(&mut self, source: &SourceDescriptor, sink: DecoderCallbackSink) -> Result<(), EngineError> {
		*self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);

		let url = CString::new(source.url.as_str()).map_err(|_| EngineError::new(-1, "url contains a nul byte"))?;
		let user_data = self.callbacks.user_data;
		let code = self
			.callbacks
			.start
			.map(|start| unsafe { start(user_data, url.as_ptr(), source.audio_only) });

		Self::check("start", code)
	}

	fn pause(&mut self) -> Result<(), EngineError> {
		let user_data = self.callbacks.user_data;
		Self::check("pause", self.callbacks.pause.map(|pause| unsafe { pause(user_data) }))
	}

	fn resume(&mut self) -> Result<(), EngineError> {
		let user_data = self.callbacks.user_data;
		Self::check("resume", self.callbacks.resume.map(|resume| unsafe { resume(user_data) }))
	}

	fn stop(&mut self) -> Result<(), EngineError> {
		let user_data = self.callbacks.user_data;
		Self::check("stop", self.callbacks.stop.map(|stop| unsafe { stop(user_data) }))
	}

	fn seek(&mut self, position: Duration) -> Result<(), EngineError> {
		let user_data = self.callbacks.user_data;
		let position = u64::try_from(position.as_micros()).unwrap_or(u64::MAX);
		Self::check("seek", self.callbacks.seek.map(|seek| unsafe { seek(user_data, position) }))
	}

	fn set_volume(&mut self, level: f32) -> Result<(), EngineError> {
		let user_data = self.callbacks.user_data;
		Self::check(
			"set_volume",
			self.callbacks.set_volume.map(|set_volume| unsafe { set_volume(user_data, level) }),
		)
	}
}

pub struct FfiRegistry {
	callbacks: RegistryCallbacks,

	// Texture ids are only unique per registry, so samplers are keyed by session too.
	session: OnceLock<Id>,
}

// SAFETY: Registration happens on the control thread while frame notifications come from the
// decoder thread. The C side MUST guarantee that user_data tolerates both.
unsafe impl Send for FfiRegistry {}
unsafe impl Sync for FfiRegistry {}

impl FfiRegistry {
	pub fn new(callbacks: RegistryCallbacks) -> Self {
		Self {
			callbacks,
			session: OnceLock::new(),
		}
	}

	/// Set once the session has a handle, before it can be started.
	pub fn bind(&self, session: Id) {
		if self.session.set(session).is_err() {
			tracing::warn!(?session, "registry already bound");
		}
	}
}

impl TextureRegistry for FfiRegistry {
	fn register(&self, sampler: TextureSampler) -> Result<TextureId, RegistryError> {
		let session = *self
			.session
			.get()
			.ok_or_else(|| RegistryError::new("session not created"))?;
		let register = self
			.callbacks
			.register
			.ok_or_else(|| RegistryError::new("no register callback"))?;

		let id = unsafe { register(self.callbacks.user_data) };
		if id < 0 {
			return Err(RegistryError::new(format!("renderer returned {id}")));
		}

		State::lock().sampler_insert(session, id, sampler);
		Ok(id)
	}

	fn unregister(&self, id: TextureId) {
		if let Some(session) = self.session.get() {
			// Dropped outside of the state lock.
			let sampler = State::lock().sampler_remove(*session, id);
			drop(sampler);
		}

		if let Some(unregister) = self.callbacks.unregister {
			unsafe { unregister(self.callbacks.user_data, id) };
		}
	}

	fn frame_available(&self, id: TextureId) {
		if let Some(frame_available) = self.callbacks.frame_available {
			unsafe { frame_available(self.callbacks.user_data, id) };
		}
	}
}

pub struct FfiListener {
	callbacks: ListenerCallbacks,
}

// SAFETY: Notifications are delivered on whichever thread caused them.
// The C side MUST guarantee that user_data tolerates that.
unsafe impl Send for FfiListener {}
unsafe impl Sync for FfiListener {}

impl FfiListener {
	pub fn new(callbacks: ListenerCallbacks) -> Self {
		Self { callbacks }
	}
}

impl SessionListener for FfiListener {
	fn on_state_changed(&self, _session: SessionId, state: SessionState) {
		if let Some(on_state) = self.callbacks.on_state {
			unsafe { on_state(self.callbacks.user_data, ffi::session_state_code(state)) };
		}
	}

	fn on_error(&self, _session: SessionId, error: &EngineError) {
		let Some(on_error) = self.callbacks.on_error else {
			return;
		};

		let message = CString::new(error.message.replace('\0', "")).unwrap_or_default();
		unsafe { on_error(self.callbacks.user_data, error.code, message.as_ptr()) };
	}

	fn on_texture_changed(&self, _session: SessionId, texture: Option<TextureId>) {
		if let Some(on_texture) = self.callbacks.on_texture {
			unsafe { on_texture(self.callbacks.user_data, texture.unwrap_or(-1)) };
		}
	}

	fn on_engine_event(&self, _session: SessionId, event: EngineState) {
		if let Some(on_engine) = self.callbacks.on_engine {
			unsafe { on_engine(self.callbacks.user_data, ffi::engine_state_code(event)) };
		}
	}
}
