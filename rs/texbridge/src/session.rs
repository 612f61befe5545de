use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::listener::{self, ListenerSlot, Notification};
use crate::texture::Revocation;
use crate::{
	DecodedFrame, DecoderCallbackSink, Engine, EngineError, EngineState, Error, Frame, FrameBuffer, ListenerId, Result,
	SessionConfig, SessionListener, SourceDescriptor, TextureHandle, TextureId, TextureRegistry, TextureState,
};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
	fn next() -> Self {
		Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
	}

	pub fn get(&self) -> u64 {
		self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
	Idle,
	Preparing,
	Playing,
	Paused,
	Stopped,
	Error,
	Destroyed,
}

impl SessionState {
	/// The engine was started and hasn't been stopped or failed.
	pub fn is_active(&self) -> bool {
		matches!(self, Self::Preparing | Self::Playing | Self::Paused)
	}

	/// Decoded frames are published; otherwise they're dropped on arrival.
	pub fn expects_frames(&self) -> bool {
		matches!(self, Self::Preparing | Self::Playing)
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Idle => "idle",
			Self::Preparing => "preparing",
			Self::Playing => "playing",
			Self::Paused => "paused",
			Self::Stopped => "stopped",
			Self::Error => "error",
			Self::Destroyed => "destroyed",
		};
		f.write_str(name)
	}
}

struct Inner {
	id: SessionId,
	state: SessionState,

	// Incremented whenever the engine is started or stopped; sinks from an older epoch are ignored.
	epoch: u64,

	source: Option<SourceDescriptor>,
	texture: TextureHandle,
	listener: ListenerSlot,

	first_frame: bool,
	engine_ready: bool,

	// Whether the UI currently displays the texture.
	attached: bool,

	// When the app was backgrounded, if it still is.
	background: Option<Instant>,

	// Notifications waiting to be delivered outside of the lock, in order.
	pending: VecDeque<Notification>,
}

impl Inner {
	fn transition(&mut self, state: SessionState) {
		if self.state == state {
			return;
		}

		tracing::debug!(session = %self.id, from = %self.state, to = %state, "state changed");
		self.state = state;
		self.pending.push_back(Notification::State(state));
	}

	fn advance(&mut self, from: SessionState, to: SessionState) -> bool {
		if self.state != from {
			return false;
		}

		self.transition(to);
		true
	}

	fn video(&self) -> bool {
		self.source.as_ref().is_some_and(|source| !source.audio_only)
	}

	fn wants_texture(&self) -> bool {
		self.video()
			&& self.state.is_active()
			&& self.attached
			&& self.background.is_none()
			&& self.texture.registered().is_none()
	}

	fn try_play(&mut self) {
		if self.engine_ready && (self.first_frame || !self.video()) {
			self.advance(SessionState::Preparing, SessionState::Playing);
		}
	}

	fn revoke(&mut self) -> Option<Revocation> {
		let revocation = self.texture.invalidate()?;
		self.pending.push_back(Notification::Texture(None));
		Some(revocation)
	}
}

pub(crate) struct Shared {
	pub id: SessionId,
	config: SessionConfig,
	buffer: FrameBuffer,
	registry: Arc<dyn TextureRegistry>,

	// Serialises commands and lifecycle inputs. Engine callbacks never take it.
	engine: Mutex<Box<dyn Engine>>,

	state: Mutex<Inner>,
	dispatching: AtomicBool,
}

impl Shared {
	/// Called by the sink on the decoder thread.
	pub fn frame_ready(&self, epoch: u64, frame: DecodedFrame) -> bool {
		let mut inner = self.state.lock();
		if inner.epoch != epoch || !inner.state.expects_frames() || !inner.video() {
			tracing::trace!(session = %self.id, state = %inner.state, "dropped frame");
			return false;
		}

		inner.first_frame = true;

		let (published, unused) = match inner.texture.notifier() {
			// Published under the state lock so a concurrent stop can't be overtaken by a late frame.
			Some(notifier) => (Some((notifier, self.buffer.publish(frame))), None),
			None => (None, Some(frame)),
		};

		inner.try_play();
		drop(inner);
		drop(unused);

		if let Some((notifier, generation)) = &published {
			tracing::trace!(session = %self.id, texture = notifier.id, generation, "frame published");

			// The texture may have been invalidated since the lock was released.
			notifier.notify(&*self.registry);
		}

		self.flush();
		published.is_some()
	}

	pub fn engine_state(&self, epoch: u64, state: EngineState) -> bool {
		let mut inner = self.state.lock();
		if inner.epoch != epoch || !inner.state.is_active() {
			return false;
		}

		tracing::debug!(session = %self.id, ?state, "engine state");

		match state {
			EngineState::Ready => {
				inner.engine_ready = true;
				inner.try_play();
			}
			other => inner.pending.push_back(Notification::Engine(other)),
		}

		drop(inner);
		self.flush();
		true
	}

	pub fn engine_error(&self, epoch: u64, error: EngineError) -> bool {
		let failed = self.fail(Some(epoch), error);
		self.flush();
		failed
	}

	/// Move to `Error` and queue the notification, at most once per failure.
	///
	/// `epoch` is `None` when the error comes from a command rather than a sink.
	fn fail(&self, epoch: Option<u64>, error: EngineError) -> bool {
		let mut inner = self.state.lock();
		if epoch.is_some_and(|epoch| epoch != inner.epoch) || !inner.state.is_active() {
			tracing::debug!(session = %self.id, state = %inner.state, %error, "ignored engine error");
			return false;
		}

		tracing::warn!(session = %self.id, code = error.code, message = %error.message, "engine failed");
		inner.transition(SessionState::Error);
		inner.pending.push_back(Notification::Error(error));

		true
	}

	pub fn is_current(&self, epoch: u64) -> bool {
		let inner = self.state.lock();
		inner.epoch == epoch && inner.state.is_active()
	}

	fn command_failed(&self, error: EngineError) -> Error {
		self.fail(None, error.clone());
		error.into()
	}

	/// The current state, or an error if the session was destroyed.
	fn current(&self, op: &'static str) -> Result<SessionState> {
		let state = self.state.lock().state;
		match state {
			SessionState::Destroyed => Err(self.violation(op)),
			state => Ok(state),
		}
	}

	fn violation(&self, op: &'static str) -> Error {
		tracing::error!(session = %self.id, op, "session used after destroy");
		if self.config.strict() {
			panic!("{op} called after the session was destroyed");
		}
		Error::LifecycleViolation(op)
	}

	// The caller must hold the engine lock.
	fn ensure_texture(&self) {
		if !self.state.lock().wants_texture() {
			return;
		}

		let mut texture = TextureHandle::new();
		match texture.register(&*self.registry, self.buffer.reader()) {
			Ok(id) => {
				tracing::debug!(session = %self.id, texture = id, "texture registered");
				let mut inner = self.state.lock();
				inner.texture = texture;
				inner.pending.push_back(Notification::Texture(Some(id)));
			}
			Err(err) => tracing::warn!(session = %self.id, %err, "texture registration failed"),
		}
	}

	// The caller must hold the engine lock.
	fn invalidate(&self, reason: &'static str) -> bool {
		let revocation = {
			let mut inner = self.state.lock();
			let revocation = inner.revoke();
			if revocation.is_some() {
				self.buffer.clear();
			}
			revocation
		};

		match revocation {
			Some(revocation) => {
				tracing::info!(session = %self.id, texture = revocation.id, reason, "texture invalidated");
				revocation.complete(&*self.registry);
				true
			}
			None => false,
		}
	}

	// The caller must hold the engine lock.
	fn background_check(&self) -> bool {
		let expired = self
			.state
			.lock()
			.background
			.is_some_and(|since| self.config.background_expired(since.elapsed()));

		expired && self.invalidate("backgrounded")
	}

	/// Deliver queued notifications with no locks held.
	///
	/// Only one thread delivers at a time so the listener sees them in order; a listener that
	/// calls back into the session has its own notifications delivered by the same loop.
	fn flush(&self) {
		loop {
			if self
				.dispatching
				.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
				.is_err()
			{
				return;
			}

			loop {
				let (notification, listener) = {
					let mut inner = self.state.lock();
					match inner.pending.pop_front() {
						Some(notification) => (notification, inner.listener.get()),
						None => break,
					}
				};

				if let Some(listener) = listener.and_then(|listener| listener.upgrade()) {
					listener::deliver(&*listener, self.id, notification);
				}
			}

			self.dispatching.store(false, Ordering::Release);

			// Another thread may have queued something after our last pop but before the store.
			if self.state.lock().pending.is_empty() {
				return;
			}
		}
	}
}

impl Drop for Shared {
	fn drop(&mut self) {
		let inner = self.state.get_mut();
		if inner.state == SessionState::Destroyed {
			return;
		}

		tracing::debug!(session = %self.id, state = %inner.state, "dropped without destroy");

		if inner.state.is_active() || inner.state == SessionState::Error {
			if let Err(err) = self.engine.get_mut().stop() {
				tracing::warn!(session = %self.id, %err, "engine failed to stop");
			}
		}

		inner.state = SessionState::Destroyed;
		if let Some(revocation) = inner.texture.invalidate() {
			revocation.complete(&*self.registry);
		}
	}
}

/// A single playback of a source, from `start` until `destroy`.
///
/// Cloning yields another handle to the same session. Commands are serialised; engine
/// callbacks arrive through the [DecoderCallbackSink] handed to the engine on `start`.
#[derive(Clone)]
pub struct PlaybackSession {
	shared: Arc<Shared>,
}

impl PlaybackSession {
	pub fn new<E: Engine>(engine: E, registry: Arc<dyn TextureRegistry>, config: SessionConfig) -> Self {
		let id = SessionId::next();
		tracing::debug!(session = %id, "session created");

		let inner = Inner {
			id,
			state: SessionState::Idle,
			epoch: 0,
			source: None,
			texture: TextureHandle::new(),
			listener: ListenerSlot::default(),
			first_frame: false,
			engine_ready: false,
			attached: true,
			background: None,
			pending: VecDeque::new(),
		};

		Self {
			shared: Arc::new(Shared {
				id,
				config,
				buffer: FrameBuffer::new(),
				registry,
				engine: Mutex::new(Box::new(engine)),
				state: Mutex::new(inner),
				dispatching: AtomicBool::new(false),
			}),
		}
	}

	pub fn id(&self) -> SessionId {
		self.shared.id
	}

	pub fn config(&self) -> &SessionConfig {
		&self.shared.config
	}

	pub fn state(&self) -> SessionState {
		self.shared.state.lock().state
	}

	pub fn source(&self) -> Option<SourceDescriptor> {
		self.shared.state.lock().source.clone()
	}

	/// The id of the registered texture, if any.
	pub fn texture_id(&self) -> Option<TextureId> {
		self.shared.state.lock().texture.registered()
	}

	pub fn texture_state(&self) -> TextureState {
		self.shared.state.lock().texture.state()
	}

	/// The generation of the most recently published frame.
	pub fn generation(&self) -> u64 {
		self.shared.buffer.generation()
	}

	/// The highest generation a renderer has sampled.
	pub fn delivered(&self) -> u64 {
		self.shared.buffer.delivered()
	}

	pub fn current_frame(&self) -> Option<Arc<Frame>> {
		self.shared.buffer.current()
	}

	/// Register the listener, replacing any previous one. The session never keeps it alive.
	pub fn set_listener(&self, listener: Weak<dyn SessionListener>) -> ListenerId {
		self.shared.state.lock().listener.set(listener)
	}

	/// Returns false if `id` is no longer the registered listener.
	pub fn remove_listener(&self, id: ListenerId) -> bool {
		self.shared.state.lock().listener.remove(id)
	}

	/// Start the engine on `source` from `Idle` or `Stopped`.
	///
	/// Video sessions register a texture first; if the renderer refuses, the session stays put
	/// and the engine is never started.
	pub fn start(&self, source: SourceDescriptor) -> Result<()> {
		let result = self.start_locked(source);
		self.shared.flush();
		result
	}

	fn start_locked(&self, source: SourceDescriptor) -> Result<()> {
		let shared = &self.shared;
		let mut engine = shared.engine.lock();

		match shared.current("start")? {
			SessionState::Idle | SessionState::Stopped => {}
			state => return Err(Error::InvalidState { op: "start", state }),
		}

		let (register, stale) = {
			let mut inner = shared.state.lock();
			let registered = inner.texture.registered().is_some();
			if source.audio_only {
				// A texture left over from a previous video source.
				(false, if registered { inner.revoke() } else { None })
			} else {
				(!registered && inner.attached && inner.background.is_none(), None)
			}
		};

		if let Some(stale) = stale {
			stale.complete(&*shared.registry);
		}

		let mut texture = None;
		if register {
			let mut handle = TextureHandle::new();
			match handle.register(&*shared.registry, shared.buffer.reader()) {
				Ok(id) => {
					tracing::debug!(session = %shared.id, texture = id, "texture registered");
					texture = Some((handle, id));
				}
				Err(err) => {
					tracing::warn!(session = %shared.id, %err, "texture registration failed");
					return Err(err.into());
				}
			}
		}

		let sink = {
			let mut inner = shared.state.lock();
			inner.epoch += 1;
			inner.first_frame = false;
			inner.engine_ready = false;
			inner.source = Some(source.clone());

			if let Some((handle, id)) = texture {
				inner.texture = handle;
				inner.pending.push_back(Notification::Texture(Some(id)));
			}

			inner.transition(SessionState::Preparing);
			DecoderCallbackSink::new(Arc::downgrade(shared), inner.epoch)
		};

		tracing::info!(session = %shared.id, %source, "starting playback");

		engine.start(&source, sink).map_err(|err| shared.command_failed(err))
	}

	/// Pause a playing session. The renderer keeps sampling the last frame.
	pub fn pause(&self) -> Result<()> {
		let result = self.pause_locked();
		self.shared.flush();
		result
	}

	fn pause_locked(&self) -> Result<()> {
		let shared = &self.shared;
		let mut engine = shared.engine.lock();

		match shared.current("pause")? {
			SessionState::Paused => return Ok(()),
			SessionState::Playing => {}
			state => return Err(Error::InvalidState { op: "pause", state }),
		}

		engine.pause().map_err(|err| shared.command_failed(err))?;
		shared.state.lock().advance(SessionState::Playing, SessionState::Paused);

		Ok(())
	}

	pub fn resume(&self) -> Result<()> {
		let result = self.resume_locked();
		self.shared.flush();
		result
	}

	fn resume_locked(&self) -> Result<()> {
		let shared = &self.shared;
		let mut engine = shared.engine.lock();

		match shared.current("resume")? {
			SessionState::Paused => {}
			state => return Err(Error::InvalidState { op: "resume", state }),
		}

		engine.resume().map_err(|err| shared.command_failed(err))?;
		shared.state.lock().advance(SessionState::Paused, SessionState::Playing);

		Ok(())
	}

	/// Seek within the source; only meaningful for VOD.
	pub fn seek(&self, position: std::time::Duration) -> Result<()> {
		let result = self.forward("seek", |engine| engine.seek(position));
		self.shared.flush();
		result
	}

	/// Set the playback volume, between 0 and 1 inclusive.
	pub fn set_volume(&self, level: f32) -> Result<()> {
		let result = if (0.0..=1.0).contains(&level) {
			self.forward("set_volume", |engine| engine.set_volume(level))
		} else {
			self.shared
				.current("set_volume")
				.and_then(|_| Err(Error::config(format!("volume out of range: {level}"))))
		};
		self.shared.flush();
		result
	}

	fn forward<F>(&self, op: &'static str, f: F) -> Result<()>
	where
		F: FnOnce(&mut dyn Engine) -> std::result::Result<(), EngineError>,
	{
		let shared = &self.shared;
		let mut engine = shared.engine.lock();

		match shared.current(op)? {
			state if state.is_active() => {}
			state => return Err(Error::InvalidState { op, state }),
		}

		f(&mut **engine).map_err(|err| shared.command_failed(err))
	}

	/// Stop the engine and release the current frame.
	///
	/// The texture stays registered so a restart can reuse it. Stopping an idle or stopped
	/// session does nothing.
	pub fn stop(&self) -> Result<()> {
		let result = self.stop_locked();
		self.shared.flush();
		result
	}

	fn stop_locked(&self) -> Result<()> {
		let shared = &self.shared;
		let mut engine = shared.engine.lock();

		match shared.current("stop")? {
			SessionState::Idle | SessionState::Stopped => return Ok(()),
			_ => {}
		}

		if let Err(err) = engine.stop() {
			tracing::warn!(session = %shared.id, %err, "engine failed to stop");
		}

		let mut inner = shared.state.lock();
		inner.epoch += 1;
		inner.first_frame = false;
		inner.engine_ready = false;
		inner.transition(SessionState::Stopped);
		shared.buffer.clear();

		tracing::info!(session = %shared.id, "playback stopped");

		Ok(())
	}

	/// Tear the session down: stop the engine, invalidate the texture, and release every frame.
	///
	/// Waits for an in-flight decoder callback or sampler read to finish. Any later use of the
	/// session is a lifecycle violation.
	pub fn destroy(&self) -> Result<()> {
		let result = self.destroy_locked();
		self.shared.flush();
		result
	}

	fn destroy_locked(&self) -> Result<()> {
		let shared = &self.shared;
		let mut engine = shared.engine.lock();

		let state = shared.current("destroy")?;
		if state.is_active() || state == SessionState::Error {
			if let Err(err) = engine.stop() {
				tracing::warn!(session = %shared.id, %err, "engine failed to stop");
			}
		}

		let revocation = {
			let mut inner = shared.state.lock();
			inner.epoch += 1;
			if state.is_active() {
				inner.transition(SessionState::Stopped);
			}
			inner.transition(SessionState::Destroyed);
			inner.source = None;
			shared.buffer.clear();
			inner.revoke()
		};

		if let Some(revocation) = revocation {
			revocation.complete(&*shared.registry);
		}

		tracing::info!(session = %shared.id, "session destroyed");

		Ok(())
	}

	/// The UI started displaying the texture again.
	pub fn on_attach(&self) {
		self.lifecycle("attach", |shared| {
			shared.state.lock().attached = true;
			shared.ensure_texture();
		});
	}

	/// The UI stopped displaying the texture.
	pub fn on_detach(&self) {
		self.lifecycle("detach", |shared| {
			shared.state.lock().attached = false;
			shared.invalidate("detached");
		});
	}

	/// The app moved to the background; the texture survives for the configured timeout.
	pub fn on_app_background(&self) {
		self.lifecycle("background", |shared| {
			shared.state.lock().background.get_or_insert_with(Instant::now);
			shared.background_check();
		});
	}

	/// The app returned to the foreground, re-registering the texture if it was invalidated.
	pub fn on_app_foreground(&self) {
		self.lifecycle("foreground", |shared| {
			shared.background_check();
			shared.state.lock().background = None;
			shared.ensure_texture();
		});
	}

	/// The app is about to exit.
	pub fn on_app_terminate(&self) -> Result<()> {
		match self.state() {
			SessionState::Destroyed => Ok(()),
			_ => self.destroy(),
		}
	}

	/// Invalidate the texture if the app has been backgrounded for longer than the timeout.
	///
	/// Hosts with a timer call this periodically; returns true if the texture was invalidated.
	pub fn check_background(&self) -> bool {
		let mut invalidated = false;
		self.lifecycle("check_background", |shared| invalidated = shared.background_check());
		invalidated
	}

	fn lifecycle<F: FnOnce(&Shared)>(&self, event: &'static str, f: F) {
		let shared = &self.shared;
		let guard = shared.engine.lock();

		if shared.state.lock().state == SessionState::Destroyed {
			tracing::debug!(session = %shared.id, event, "ignored after destroy");
			return;
		}

		tracing::debug!(session = %shared.id, event, "lifecycle");
		f(shared);

		drop(guard);
		shared.flush();
	}
}

impl fmt::Debug for PlaybackSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let inner = self.shared.state.lock();
		f.debug_struct("PlaybackSession")
			.field("id", &self.shared.id)
			.field("state", &inner.state)
			.field("texture", &inner.texture.registered())
			.field("generation", &self.shared.buffer.generation())
			.finish()
	}
}

#[cfg(test)]
mod test {
	use std::time::Duration;

	use tracing_test::traced_test;

	use super::*;
	use crate::mock::{Command, Event, MockEngine, MockListener, MockRegistry};
	use crate::{PixelFormat, Sample, Timestamp};

	struct Harness {
		session: PlaybackSession,
		engine: MockEngine,
		registry: Arc<MockRegistry>,
		listener: Arc<MockListener>,
	}

	impl Harness {
		fn new() -> Self {
			Self::with_config(SessionConfig {
				strict_lifecycle: Some(false),
				..Default::default()
			})
		}

		fn with_config(config: SessionConfig) -> Self {
			let engine = MockEngine::new();
			let registry = Arc::new(MockRegistry::new());
			let session = PlaybackSession::new(engine.clone(), registry.clone(), config);

			let listener = Arc::new(MockListener::default());
			let weak: Weak<dyn SessionListener> = Arc::downgrade(&listener) as Weak<dyn SessionListener>;
			session.set_listener(weak);

			Self {
				session,
				engine,
				registry,
				listener,
			}
		}

		fn start(&self, url: &str) {
			let source = SourceDescriptor::parse(url, false).unwrap();
			self.session.start(source).unwrap();
		}

		/// Start and deliver readiness plus one frame.
		fn play(&self) -> DecoderCallbackSink {
			self.start("rtmp://live/stream1");
			let sink = self.engine.sink();
			assert!(sink.on_state_changed(EngineState::Ready));
			assert!(sink.on_frame_ready(frame(1)));
			assert_eq!(self.session.state(), SessionState::Playing);
			sink
		}

		fn texture(&self) -> TextureId {
			self.session.texture_id().expect("texture registered")
		}

		fn sample(&self) -> Sample {
			self.registry.sample(self.texture())
		}
	}

	fn frame(seed: u8) -> DecodedFrame {
		DecodedFrame::packed(
			PixelFormat::Bgra32,
			2,
			2,
			vec![seed; 16],
			Timestamp::from_millis(seed as u64 * 33).unwrap(),
		)
	}

	#[test]
	fn live_stream_reaches_playing() {
		let harness = Harness::new();
		assert_eq!(harness.session.state(), SessionState::Idle);

		harness.start("rtmp://live/stream1");
		assert_eq!(harness.session.state(), SessionState::Preparing);
		assert_eq!(harness.engine.commands(), vec![Command::Start("rtmp://live/stream1".into())]);

		let sink = harness.engine.sink();
		let texture = harness.texture();

		// Readiness alone isn't enough without a frame.
		sink.on_state_changed(EngineState::Ready);
		assert_eq!(harness.session.state(), SessionState::Preparing);

		sink.on_frame_ready(frame(1));
		assert_eq!(harness.session.state(), SessionState::Playing);
		assert_eq!(harness.registry.available(texture), 1);

		assert_eq!(
			harness.listener.events(),
			vec![
				Event::Texture(Some(texture)),
				Event::State(SessionState::Preparing),
				Event::State(SessionState::Playing),
			]
		);

		let sample = harness.sample();
		assert!(sample.is_new());
		assert_eq!(sample.generation(), Some(1));
		assert_eq!(harness.session.delivered(), 1);
	}

	#[test]
	fn frame_before_ready() {
		let harness = Harness::new();
		harness.start("rtmp://live/stream1");

		let sink = harness.engine.sink();
		sink.on_frame_ready(frame(1));
		assert_eq!(harness.session.state(), SessionState::Preparing);

		sink.on_state_changed(EngineState::Ready);
		assert_eq!(harness.session.state(), SessionState::Playing);
	}

	#[test]
	fn pause_keeps_last_frame() {
		let harness = Harness::new();
		let sink = harness.play();
		sink.on_frame_ready(frame(2));

		harness.session.pause().unwrap();
		assert_eq!(harness.session.state(), SessionState::Paused);

		// The engine may still deliver a frame or two before it settles.
		assert!(!sink.on_frame_ready(frame(3)));

		let generations: Vec<_> = (0..5).map(|_| harness.sample().generation()).collect();
		assert_eq!(generations, vec![Some(2); 5]);

		// Pausing twice is harmless.
		harness.session.pause().unwrap();
		assert_eq!(harness.listener.states().iter().filter(|s| **s == SessionState::Paused).count(), 1);

		harness.session.resume().unwrap();
		assert_eq!(harness.session.state(), SessionState::Playing);
		assert!(sink.on_frame_ready(frame(4)));
		assert_eq!(harness.sample().generation(), Some(3));

		assert_eq!(
			harness.engine.commands()[1..],
			[Command::Pause, Command::Resume]
		);
	}

	#[test]
	fn invalid_commands() {
		let harness = Harness::new();

		let err = harness.session.pause().unwrap_err();
		assert_eq!(
			err,
			Error::InvalidState {
				op: "pause",
				state: SessionState::Idle
			}
		);
		assert!(harness.session.resume().is_err());
		assert!(harness.session.seek(Duration::from_secs(1)).is_err());

		harness.play();
		assert!(matches!(harness.session.resume(), Err(Error::InvalidState { .. })));

		let source = SourceDescriptor::parse("rtmp://live/other", false).unwrap();
		assert!(matches!(harness.session.start(source), Err(Error::InvalidState { .. })));
	}

	#[test]
	fn seek_and_volume() {
		let harness = Harness::new();
		harness.play();

		harness.session.seek(Duration::from_secs(30)).unwrap();
		harness.session.set_volume(0.5).unwrap();

		assert!(matches!(harness.session.set_volume(1.5), Err(Error::Config(_))));
		assert!(matches!(harness.session.set_volume(f32::NAN), Err(Error::Config(_))));

		assert_eq!(
			harness.engine.commands()[1..],
			[Command::Seek(Duration::from_secs(30)), Command::Volume(0.5)]
		);
	}

	#[test]
	fn error_while_playing() {
		let harness = Harness::new();
		let sink = harness.play();

		assert!(sink.on_error(EngineError::new(1001, "network timeout")));
		assert_eq!(harness.session.state(), SessionState::Error);

		// Reported once; the engine repeating itself is ignored.
		assert!(!sink.on_error(EngineError::new(1001, "network timeout")));
		assert_eq!(harness.listener.errors(), vec![EngineError::new(1001, "network timeout")]);

		// The last frame is still there for the renderer.
		assert_eq!(harness.sample().generation(), Some(1));

		// No recovery: frames and readiness are ignored.
		assert!(!sink.on_frame_ready(frame(2)));
		assert!(!sink.on_state_changed(EngineState::Ready));
		assert_eq!(harness.session.state(), SessionState::Error);
		assert_eq!(harness.session.generation(), 1);
	}

	#[test]
	fn error_from_preparing_and_paused() {
		let harness = Harness::new();
		harness.start("rtmp://live/stream1");
		harness.engine.sink().on_error(EngineError::new(2, "unreachable"));
		assert_eq!(harness.session.state(), SessionState::Error);

		// Restarting requires an explicit stop.
		let source = SourceDescriptor::parse("rtmp://live/stream1", false).unwrap();
		assert!(harness.session.start(source).is_err());
		harness.session.stop().unwrap();

		let sink = harness.play();
		harness.session.pause().unwrap();
		sink.on_error(EngineError::new(3, "decoder"));
		assert_eq!(harness.session.state(), SessionState::Error);
		assert_eq!(harness.listener.errors().len(), 2);
	}

	#[test]
	fn failed_command() {
		let harness = Harness::new();
		harness.play();

		harness.engine.fail_next(EngineError::new(7, "pause refused"));
		let err = harness.session.pause().unwrap_err();
		assert_eq!(err, Error::EngineFatal(EngineError::new(7, "pause refused")));
		assert_eq!(harness.session.state(), SessionState::Error);
		assert_eq!(harness.listener.errors().len(), 1);
	}

	#[test]
	fn stop_is_idempotent() {
		let harness = Harness::new();

		// Nothing to stop yet.
		harness.session.stop().unwrap();
		assert!(harness.listener.events().is_empty());

		let sink = harness.play();
		let texture = harness.texture();

		harness.session.stop().unwrap();
		harness.session.stop().unwrap();

		assert_eq!(harness.session.state(), SessionState::Stopped);
		assert_eq!(harness.listener.states().iter().filter(|s| **s == SessionState::Stopped).count(), 1);
		assert_eq!(harness.engine.commands().iter().filter(|c| **c == Command::Stop).count(), 1);

		// The frame is released but the texture survives for a restart.
		assert!(harness.session.current_frame().is_none());
		assert!(matches!(harness.registry.sample(texture), Sample::Empty));
		assert_eq!(harness.session.texture_id(), Some(texture));

		// The old sink is detached.
		assert!(!sink.is_registered());
		assert!(!sink.on_frame_ready(frame(9)));
	}

	#[test]
	fn restart_after_stop() {
		let harness = Harness::new();
		let old = harness.play();
		let texture = harness.texture();
		harness.session.stop().unwrap();

		harness.start("rtmp://live/stream2");
		let sink = harness.engine.sink();
		assert!(sink.is_registered());
		assert!(!old.on_state_changed(EngineState::Ready));

		sink.on_state_changed(EngineState::Ready);
		sink.on_frame_ready(frame(5));
		assert_eq!(harness.session.state(), SessionState::Playing);

		// Same texture, and generations keep counting.
		assert_eq!(harness.texture(), texture);
		assert_eq!(harness.registry.registered(), vec![texture]);
		assert_eq!(harness.sample().generation(), Some(2));
	}

	#[test]
	fn audio_only() {
		let harness = Harness::new();
		let source = SourceDescriptor::parse("https://cdn.example.com/radio.m3u8", true).unwrap();
		harness.session.start(source).unwrap();

		let sink = harness.engine.sink();
		assert!(!sink.on_frame_ready(frame(1)));
		sink.on_state_changed(EngineState::Ready);

		assert_eq!(harness.session.state(), SessionState::Playing);
		assert_eq!(harness.session.texture_id(), None);
		assert!(harness.registry.registered().is_empty());
		assert_eq!(harness.session.generation(), 0);
	}

	#[test]
	fn engine_events_forwarded() {
		let harness = Harness::new();
		let sink = harness.play();

		sink.on_state_changed(EngineState::Buffering);
		sink.on_state_changed(EngineState::Ended);

		let events = harness.listener.events();
		assert_eq!(
			events[events.len() - 2..],
			[Event::Engine(EngineState::Buffering), Event::Engine(EngineState::Ended)]
		);
		assert_eq!(harness.session.state(), SessionState::Playing);
	}

	#[test]
	fn registration_refused() {
		let harness = Harness::new();
		harness.registry.refuse(true);

		let source = SourceDescriptor::parse("rtmp://live/stream1", false).unwrap();
		let err = harness.session.start(source).unwrap_err();
		assert!(matches!(err, Error::TextureRegistration(_)));

		assert_eq!(harness.session.state(), SessionState::Idle);
		assert!(harness.engine.commands().is_empty());
		assert!(harness.listener.events().is_empty());

		// The renderer recovers and the caller retries.
		harness.registry.refuse(false);
		harness.play();
	}

	#[test]
	fn destroy_invalidates_texture() {
		let harness = Harness::new();
		harness.play();
		let texture = harness.texture();

		harness.session.destroy().unwrap();
		assert_eq!(harness.session.state(), SessionState::Destroyed);
		assert_eq!(harness.session.texture_state(), TextureState::Invalidated);
		assert_eq!(harness.registry.unregistered(), vec![texture]);
		assert!(!harness.registry.sampler_valid(texture));
		assert!(matches!(harness.registry.sample(texture), Sample::Invalidated));
		assert!(harness.session.current_frame().is_none());

		assert_eq!(
			harness.listener.states()[2..],
			[SessionState::Stopped, SessionState::Destroyed]
		);
		assert_eq!(harness.listener.textures(), vec![Some(texture), None]);
		assert_eq!(harness.engine.commands().last(), Some(&Command::Stop));
	}

	#[test]
	fn destroy_releases_native_buffers() {
		use std::sync::atomic::AtomicUsize;

		let harness = Harness::new();
		let sink = harness.play();

		let released = Arc::new(AtomicUsize::new(0));
		let counter = released.clone();
		let native = crate::NativeBuffer::new(0x1000, move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		sink.on_frame_ready(DecodedFrame {
			pixels: crate::PixelData::Native(native),
			format: PixelFormat::Nv12,
			width: 1920,
			height: 1080,
			timestamp: Timestamp::ZERO,
		});

		let held = harness.sample().into_frame().expect("frame");
		harness.session.destroy().unwrap();
		assert_eq!(released.load(Ordering::SeqCst), 0, "renderer still holds it");

		drop(held);
		assert_eq!(released.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn destroy_during_callbacks() {
		let harness = Harness::new();
		let sink = harness.play();
		let texture = harness.texture();

		std::thread::scope(|scope| {
			let decoder = scope.spawn(|| {
				let mut accepted = 0;
				for i in 0..10_000u32 {
					if sink.on_frame_ready(frame(i as u8)) {
						accepted += 1;
					} else {
						break;
					}
				}
				accepted
			});

			let renderer = scope.spawn(|| {
				let mut last = 0;
				loop {
					match harness.registry.sample(texture) {
						Sample::Invalidated => break,
						sample => {
							let generation = sample.generation().unwrap_or(last);
							assert!(generation >= last);
							last = generation;
						}
					}
				}
			});

			std::thread::sleep(Duration::from_millis(5));
			harness.session.destroy().unwrap();

			decoder.join().unwrap();
			renderer.join().unwrap();
		});

		// Everything after the teardown is dropped.
		let generation = harness.session.generation();
		assert!(!sink.on_frame_ready(frame(0)));
		assert_eq!(harness.session.generation(), generation);
		assert!(harness.session.current_frame().is_none());
		assert_eq!(harness.registry.unregistered(), vec![texture]);
	}

	#[test]
	fn no_frame_available_after_unregister() {
		for i in 0..500 {
			let harness = Harness::new();
			let sink = harness.play();

			std::thread::scope(|scope| {
				let decoder = scope.spawn(|| {
					let mut seed = 2u8;
					while sink.on_frame_ready(frame(seed)) {
						seed = seed.wrapping_add(1);
					}
				});

				if i % 2 == 0 {
					harness.session.destroy().unwrap();
				} else {
					harness.session.on_detach();
				}

				decoder.join().unwrap();
			});

			assert_eq!(harness.registry.late(), 0, "frame_available after unregister");
		}
	}

	#[test]
	#[traced_test]
	fn use_after_destroy() {
		let harness = Harness::new();
		harness.session.destroy().unwrap();

		assert_eq!(harness.session.pause(), Err(Error::LifecycleViolation("pause")));
		assert_eq!(harness.session.destroy(), Err(Error::LifecycleViolation("destroy")));
		assert!(logs_contain("session used after destroy"));

		// Terminating an already destroyed session is fine.
		harness.session.on_app_terminate().unwrap();
		harness.session.on_attach();
	}

	#[test]
	#[should_panic(expected = "start called after the session was destroyed")]
	fn strict_use_after_destroy() {
		let harness = Harness::with_config(SessionConfig {
			strict_lifecycle: Some(true),
			..Default::default()
		});
		harness.session.destroy().unwrap();
		harness.start("rtmp://live/stream1");
	}

	#[test]
	fn background_immediate() {
		let harness = Harness::with_config(SessionConfig {
			background_timeout: Some(Duration::ZERO),
			strict_lifecycle: Some(false),
		});
		let sink = harness.play();
		let first = harness.texture();

		harness.session.on_app_background();
		assert_eq!(harness.session.texture_id(), None);
		assert!(!harness.registry.sampler_valid(first));

		// Frames are dropped while there's nothing to draw them.
		assert!(!sink.on_frame_ready(frame(2)));

		harness.session.on_app_foreground();
		let second = harness.texture();
		assert_ne!(first, second);
		assert_eq!(harness.listener.textures(), vec![Some(first), None, Some(second)]);

		assert!(sink.on_frame_ready(frame(3)));
		assert!(harness.registry.sample(second).is_new());
	}

	#[test]
	fn background_timeout() {
		let harness = Harness::with_config(SessionConfig {
			background_timeout: Some(Duration::from_millis(20)),
			strict_lifecycle: Some(false),
		});
		harness.play();
		let texture = harness.texture();

		harness.session.on_app_background();
		assert!(!harness.session.check_background());
		assert_eq!(harness.session.texture_id(), Some(texture));

		std::thread::sleep(Duration::from_millis(30));
		assert!(harness.session.check_background());
		assert_eq!(harness.session.texture_id(), None);
		assert!(!harness.session.check_background());
	}

	#[test]
	fn short_background_keeps_texture() {
		let harness = Harness::new();
		harness.play();
		let texture = harness.texture();

		harness.session.on_app_background();
		harness.session.on_app_foreground();

		assert_eq!(harness.session.texture_id(), Some(texture));
		assert_eq!(harness.registry.registered(), vec![texture]);
	}

	#[test]
	fn detach_and_attach() {
		let harness = Harness::new();
		harness.play();
		let first = harness.texture();

		harness.session.on_detach();
		assert_eq!(harness.session.texture_id(), None);
		assert_eq!(harness.registry.unregistered(), vec![first]);

		harness.session.on_attach();
		let second = harness.texture();
		assert_ne!(first, second);
	}

	#[test]
	fn start_detached() {
		let harness = Harness::new();
		harness.session.on_detach();
		harness.start("rtmp://live/stream1");
		assert_eq!(harness.session.texture_id(), None);

		// Frames still count towards readiness even with nothing to draw them.
		let sink = harness.engine.sink();
		sink.on_state_changed(EngineState::Ready);
		assert!(!sink.on_frame_ready(frame(1)));
		assert_eq!(harness.session.state(), SessionState::Playing);

		harness.session.on_attach();
		assert!(harness.session.texture_id().is_some());
	}

	#[test]
	fn terminate_destroys() {
		let harness = Harness::new();
		harness.play();

		harness.session.on_app_terminate().unwrap();
		assert_eq!(harness.session.state(), SessionState::Destroyed);
		assert_eq!(harness.registry.unregistered().len(), 1);
	}

	#[test]
	fn dropped_without_destroy() {
		let harness = Harness::new();
		harness.play();
		let texture = harness.texture();

		let Harness {
			session,
			engine,
			registry,
			..
		} = harness;
		drop(session);

		assert_eq!(registry.unregistered(), vec![texture]);
		assert_eq!(engine.commands().last(), Some(&Command::Stop));
	}

	#[test]
	fn listener_removed() {
		let harness = Harness::new();
		let other = Arc::new(MockListener::default());
		let id = harness
			.session
			.set_listener(Arc::downgrade(&other) as Weak<dyn SessionListener>);

		harness.start("rtmp://live/stream1");
		assert!(harness.session.remove_listener(id));
		harness.session.stop().unwrap();

		// Replaced listeners hear nothing.
		assert!(harness.listener.events().is_empty());
		assert_eq!(other.states(), vec![SessionState::Preparing]);
	}

	struct PauseOnPlaying {
		session: Mutex<Option<PlaybackSession>>,
		states: Mutex<Vec<SessionState>>,
	}

	impl SessionListener for PauseOnPlaying {
		fn on_state_changed(&self, _session: SessionId, state: SessionState) {
			self.states.lock().push(state);
			if state == SessionState::Playing {
				let session = self.session.lock().clone();
				if let Some(session) = session {
					session.pause().unwrap();
				}
			}
		}

		fn on_error(&self, _session: SessionId, _error: &EngineError) {}
	}

	#[test]
	fn listener_calls_back() {
		let harness = Harness::new();
		let listener = Arc::new(PauseOnPlaying {
			session: Mutex::new(Some(harness.session.clone())),
			states: Mutex::default(),
		});
		harness
			.session
			.set_listener(Arc::downgrade(&listener) as Weak<dyn SessionListener>);

		harness.start("rtmp://live/stream1");
		let sink = harness.engine.sink();
		sink.on_state_changed(EngineState::Ready);
		sink.on_frame_ready(frame(1));

		assert_eq!(harness.session.state(), SessionState::Paused);
		assert_eq!(
			*listener.states.lock(),
			vec![SessionState::Preparing, SessionState::Playing, SessionState::Paused]
		);

		listener.session.lock().take();
	}
}
