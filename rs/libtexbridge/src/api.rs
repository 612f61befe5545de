use std::ffi::{c_char, c_void};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use texbridge::{
	DecodedFrame, EngineError, EngineState, NativeBuffer, PixelData, PixelFormat, Plane, PlaybackSession, SessionConfig,
	SourceDescriptor, Timestamp,
};
use tracing::Level;

use crate::callbacks::{EngineCallbacks, FfiEngine, FfiListener, FfiRegistry, ListenerCallbacks, RegistryCallbacks};
use crate::state::State;
use crate::{Error, Id, ffi, runtime};

/// A decoded frame handed over by the engine.
#[repr(C)]
pub struct FrameDesc {
	pub format: u32,
	pub width: u32,
	pub height: u32,

	// microseconds
	pub pts: u64,

	/// CPU planes, copied on submission. Unused entries may be null.
	pub planes: [*const u8; 3],
	pub plane_sizes: [usize; 3],
	pub strides: [usize; 3],

	/// A platform pixel buffer; when non-null the planes are ignored.
	pub native: *mut c_void,

	/// Called exactly once when the bridge no longer needs the native buffer.
	pub release: Option<unsafe extern "C" fn(native: *mut c_void, user_data: *mut c_void)>,
	pub release_user_data: *mut c_void,
}

/// A frame held by the renderer, valid until [texbridge_frame_close].
#[repr(C)]
pub struct FrameInfo {
	pub format: u32,
	pub width: u32,
	pub height: u32,

	// microseconds
	pub pts: u64,

	pub generation: u64,

	pub planes: [*const u8; 3],
	pub plane_sizes: [usize; 3],
	pub strides: [usize; 3],

	/// The platform pixel buffer, or null for CPU frames.
	pub native: *mut c_void,
}

impl Default for FrameInfo {
	fn default() -> Self {
		Self {
			format: 0,
			width: 0,
			height: 0,
			pts: 0,
			generation: 0,
			planes: [std::ptr::null(); 3],
			plane_sizes: [0; 3],
			strides: [0; 3],
			native: std::ptr::null_mut(),
		}
	}
}

/// Take ownership of the native buffer, if any, so it's released however the call ends.
///
/// # Safety
/// `release` must be safe to call with `native` and `release_user_data` from any thread.
unsafe fn native_buffer(desc: &FrameDesc) -> Option<NativeBuffer> {
	if desc.native.is_null() {
		return None;
	}

	let handle = desc.native as usize;
	let user_data = desc.release_user_data as usize;

	Some(match desc.release {
		Some(release) => NativeBuffer::new(handle, move |handle| unsafe {
			release(handle as *mut c_void, user_data as *mut c_void)
		}),
		None => NativeBuffer::borrowed(handle),
	})
}

/// # Safety
/// The plane pointers in `desc` must be valid for the sizes given.
unsafe fn decode(desc: &FrameDesc, native: Option<NativeBuffer>) -> Result<DecodedFrame, Error> {
	let format = PixelFormat::from_code(desc.format).ok_or(Error::UnknownFormat(desc.format))?;

	let pixels = match native {
		Some(buffer) => PixelData::Native(buffer),
		None => {
			let mut planes = Vec::with_capacity(format.plane_count());
			for i in 0..format.plane_count() {
				let data = unsafe { ffi::parse_slice(desc.planes[i], desc.plane_sizes[i]) }?;
				planes.push(Plane {
					data: Bytes::copy_from_slice(data),
					stride: desc.strides[i],
				});
			}
			PixelData::Planes(planes)
		}
	};

	Ok(DecodedFrame {
		pixels,
		format,
		width: desc.width,
		height: desc.height,
		timestamp: Timestamp::from_micros(desc.pts),
	})
}

/// Initialize the library with a log level.
///
/// This should be called before any other functions.
/// The level is a string: "error", "warn", "info", "debug", "trace"
///
/// Returns a zero on success, or a negative code on failure.
///
/// # Safety
/// - The caller must ensure that level is a valid null-terminated C string, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn texbridge_log_level(level: *const c_char) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		match unsafe { ffi::parse_str(level) }? {
			"" => texbridge::Log::default(),
			level => texbridge::Log::new(Level::from_str(level)?),
		}
		.init();

		Ok(())
	})
}

/// Create a playback session.
///
/// The engine and registry callbacks are required; the listener may be null.
/// A negative `background_timeout_ms` keeps the texture while the app is backgrounded.
///
/// Returns a non-zero handle to the session on success, or a negative code on failure.
/// You must call [texbridge_session_destroy] to release it.
///
/// # Safety
/// - The caller must ensure that the pointers are valid or null.
/// - The callbacks and their user_data must remain valid until the session is destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn texbridge_session_create(
	engine: *const EngineCallbacks,
	registry: *const RegistryCallbacks,
	listener: *const ListenerCallbacks,
	background_timeout_ms: i64,
) -> i32 {
	ffi::return_code(move || -> Result<Id, Error> {
		let engine = *unsafe { ffi::parse_ref(engine) }?;
		let registry = *unsafe { ffi::parse_ref(registry) }?;
		let listener = unsafe { listener.as_ref() }.copied().unwrap_or_default();

		let mut config = SessionConfig::default();
		config.background_timeout = u64::try_from(background_timeout_ms).ok().map(Duration::from_millis);
		// A panic can't cross the C boundary.
		config.strict_lifecycle = Some(false);

		let sink = Arc::new(Mutex::new(None));
		let registry = Arc::new(FfiRegistry::new(registry));
		let session = PlaybackSession::new(FfiEngine::new(engine, sink.clone()), registry.clone(), config);

		let id = State::lock().session_insert(session, sink, Arc::new(FfiListener::new(listener)))?;
		registry.bind(id);

		Ok(id)
	})
}

/// Start playing a source, registering a texture for video.
///
/// Returns a zero on success, or a negative code on failure.
///
/// # Safety
/// - The caller must ensure that url is a valid null-terminated C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn texbridge_session_start(session: i32, url: *const c_char, audio_only: bool) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		let session = ffi::parse_id(session)?;
		let source = SourceDescriptor::parse(unsafe { ffi::parse_str(url) }?, audio_only)?;
		let session = State::lock().session(session)?;
		session.start(source)?;
		Ok(())
	})
}

#[unsafe(no_mangle)]
pub extern "C" fn texbridge_session_pause(session: i32) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		let session = ffi::parse_id(session)?;
		let session = State::lock().session(session)?;
		Ok(session.pause()?)
	})
}

#[unsafe(no_mangle)]
pub extern "C" fn texbridge_session_resume(session: i32) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		let session = ffi::parse_id(session)?;
		let session = State::lock().session(session)?;
		Ok(session.resume()?)
	})
}

/// Stop playback, keeping the texture for a later start.
///
/// Stopping an idle or stopped session does nothing.
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_session_stop(session: i32) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		let session = ffi::parse_id(session)?;
		let session = State::lock().session(session)?;
		Ok(session.stop()?)
	})
}

/// Seek to a position in microseconds.
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_session_seek(session: i32, position: u64) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		let session = ffi::parse_id(session)?;
		let session = State::lock().session(session)?;
		Ok(session.seek(Duration::from_micros(position))?)
	})
}

/// Set the volume between 0 and 1.
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_session_volume(session: i32, level: f32) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		let session = ffi::parse_id(session)?;
		let session = State::lock().session(session)?;
		Ok(session.set_volume(level)?)
	})
}

/// Destroy a session, invalidating its texture and releasing every frame.
///
/// The handle is invalid afterwards.
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_session_destroy(session: i32) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		let session = ffi::parse_id(session)?;
		let handle = State::lock().session_remove(session)?;
		Ok(handle.session().destroy()?)
	})
}

/// Returns the current state: 0 idle, 1 preparing, 2 playing, 3 paused, 4 stopped, 5 error, 6 destroyed.
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_session_state(session: i32) -> i32 {
	ffi::return_code(move || -> Result<i32, Error> {
		let session = ffi::parse_id(session)?;
		let session = State::lock().session(session)?;
		Ok(ffi::session_state_code(session.state()))
	})
}

/// Write the registered texture id into `dst`.
///
/// Returns 1 if a texture is registered, 0 if not, or a negative code on failure.
///
/// # Safety
/// - The caller must ensure that dst is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn texbridge_session_texture_id(session: i32, dst: *mut i64) -> i32 {
	ffi::return_code(move || -> Result<bool, Error> {
		let session = ffi::parse_id(session)?;
		let dst = unsafe { dst.as_mut() }.ok_or(Error::InvalidPointer)?;
		let session = State::lock().session(session)?;

		match session.texture_id() {
			Some(id) => {
				*dst = id;
				Ok(true)
			}
			None => Ok(false),
		}
	})
}

/// Called by the engine, on any thread, when a frame is decoded.
///
/// Returns 1 if the frame was published, 0 if it was dropped, or a negative code on failure.
///
/// Once `frame` is a valid pointer, the native buffer belongs to the bridge: `release` is called
/// exactly once, whether the frame is published, dropped, or rejected with an error. A dropped or
/// rejected buffer has been released by the time this returns.
///
/// # Safety
/// - The caller must ensure that frame is a valid pointer and its planes are valid for their sizes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn texbridge_engine_frame(session: i32, frame: *const FrameDesc) -> i32 {
	ffi::return_code(move || -> Result<bool, Error> {
		let desc = unsafe { ffi::parse_ref(frame) }?;
		let native = unsafe { native_buffer(desc) };

		let session = ffi::parse_id(session)?;
		let frame = unsafe { decode(desc, native) }?;

		let Some(sink) = State::lock().sink(session)? else {
			return Ok(false);
		};

		Ok(sink.on_frame_ready(frame))
	})
}

/// Called by the engine when its state changes: 0 loading, 1 ready, 2 buffering, 3 ended.
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_engine_state(session: i32, state: i32) -> i32 {
	ffi::return_code(move || -> Result<bool, Error> {
		let session = ffi::parse_id(session)?;
		let state = EngineState::from_code(state).ok_or(Error::UnknownState(state))?;

		let Some(sink) = State::lock().sink(session)? else {
			return Ok(false);
		};

		Ok(sink.on_state_changed(state))
	})
}

/// Called by the engine on a fatal error. The listener hears about it once.
///
/// # Safety
/// - The caller must ensure that message is a valid null-terminated C string, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn texbridge_engine_error(session: i32, code: i32, message: *const c_char) -> i32 {
	ffi::return_code(move || -> Result<bool, Error> {
		let session = ffi::parse_id(session)?;
		let message = unsafe { ffi::parse_str(message) }?;

		let Some(sink) = State::lock().sink(session)? else {
			return Ok(false);
		};

		Ok(sink.on_error(EngineError::new(code, message)))
	})
}

/// Called by the renderer to pull the latest frame of a session's texture.
///
/// Returns a non-zero frame handle if the frame changed since the last call, zero if not,
/// or a negative code on failure. Frame handles must be released with [texbridge_frame_close].
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_texture_copy(session: i32, texture: i64) -> i32 {
	ffi::return_code(move || -> Result<Option<Id>, Error> {
		let session = ffi::parse_id(session)?;
		State::lock().texture_copy(session, texture)
	})
}

/// Describe a frame returned by [texbridge_texture_copy].
///
/// # Safety
/// - The caller must ensure that dst is a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn texbridge_frame_info(frame: i32, dst: *mut FrameInfo) -> i32 {
	ffi::return_code(move || {
		let frame = ffi::parse_id(frame)?;
		let dst = unsafe { dst.as_mut() }.ok_or(Error::InvalidPointer)?;
		State::lock().frame_info(frame, dst)
	})
}

/// Release a frame. Its memory is freed once the bridge no longer needs it either.
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_frame_close(frame: i32) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		let frame = ffi::parse_id(frame)?;
		let frame = State::lock().frame_close(frame)?;
		drop(frame);
		Ok(())
	})
}

/// The app moved to the background. The texture is invalidated after the session's timeout.
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_app_background(session: i32) -> i32 {
	ffi::return_code(move || {
		let id = ffi::parse_id(session)?;
		let session = State::lock().session(id)?;

		session.on_app_background();
		let timer = runtime::background_timer(&session);
		State::lock().set_timer(id, timer)
	})
}

/// The app returned to the foreground. An invalidated texture is replaced by a new one.
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_app_foreground(session: i32) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		let id = ffi::parse_id(session)?;
		let session = {
			let mut state = State::lock();
			state.set_timer(id, None)?;
			state.session(id)?
		};

		session.on_app_foreground();
		Ok(())
	})
}

/// The app is exiting; equivalent to [texbridge_session_destroy].
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_app_terminate(session: i32) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		let session = ffi::parse_id(session)?;
		let handle = State::lock().session_remove(session)?;
		Ok(handle.session().on_app_terminate()?)
	})
}

/// The UI started displaying the session's texture.
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_attach(session: i32) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		let session = ffi::parse_id(session)?;
		let session = State::lock().session(session)?;
		session.on_attach();
		Ok(())
	})
}

/// The UI stopped displaying the session's texture; it's invalidated until attached again.
#[unsafe(no_mangle)]
pub extern "C" fn texbridge_detach(session: i32) -> i32 {
	ffi::return_code(move || -> Result<(), Error> {
		let session = ffi::parse_id(session)?;
		let session = State::lock().session(session)?;
		session.on_detach();
		Ok(())
	})
}
