//! Test doubles for the engine, the renderer's registry, and the listener.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::{
	DecoderCallbackSink, Engine, EngineError, EngineState, RegistryError, Sample, SessionId, SessionListener,
	SessionState, SourceDescriptor, TextureId, TextureRegistry, TextureSampler,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
	Start(String),
	Pause,
	Resume,
	Stop,
	Seek(Duration),
	Volume(f32),
}

#[derive(Default)]
struct EngineInner {
	commands: Vec<Command>,
	sink: Option<DecoderCallbackSink>,
	fail: Option<EngineError>,
}

/// Records commands and keeps the latest sink so a test can play the decoder.
#[derive(Clone, Default)]
pub struct MockEngine {
	inner: Arc<Mutex<EngineInner>>,
}

impl MockEngine {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn commands(&self) -> Vec<Command> {
		self.inner.lock().commands.clone()
	}

	pub fn sink(&self) -> DecoderCallbackSink {
		self.inner.lock().sink.clone().expect("engine was never started")
	}

	/// Fail the next command with `error`.
	pub fn fail_next(&self, error: EngineError) {
		self.inner.lock().fail = Some(error);
	}

	fn record(&self, command: Command) -> Result<(), EngineError> {
		let mut inner = self.inner.lock();
		inner.commands.push(command);
		match inner.fail.take() {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}
}

impl Engine for MockEngine {
	fn start(&mut self, source: &SourceDescriptor, sink: DecoderCallbackSink) -> Result<(), EngineError> {
		self.inner.lock().sink = Some(sink);
		self.record(Command::Start(source.url.to_string()))
	}

	fn pause(&mut self) -> Result<(), EngineError> {
		self.record(Command::Pause)
	}

	fn resume(&mut self) -> Result<(), EngineError> {
		self.record(Command::Resume)
	}

	fn stop(&mut self) -> Result<(), EngineError> {
		self.record(Command::Stop)
	}

	fn seek(&mut self, position: Duration) -> Result<(), EngineError> {
		self.record(Command::Seek(position))
	}

	fn set_volume(&mut self, level: f32) -> Result<(), EngineError> {
		self.record(Command::Volume(level))
	}
}

#[derive(Default)]
struct RegistryInner {
	next: TextureId,
	samplers: HashMap<TextureId, TextureSampler>,
	registered: Vec<TextureId>,
	unregistered: Vec<TextureId>,
	available: HashMap<TextureId, usize>,
	late: usize,
	refuse: bool,
}

/// A renderer that keeps every sampler it was given, even after unregistering it.
#[derive(Default)]
pub struct MockRegistry {
	inner: Mutex<RegistryInner>,
}

impl MockRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn refuse(&self, refuse: bool) {
		self.inner.lock().refuse = refuse;
	}

	pub fn registered(&self) -> Vec<TextureId> {
		self.inner.lock().registered.clone()
	}

	pub fn unregistered(&self) -> Vec<TextureId> {
		self.inner.lock().unregistered.clone()
	}

	pub fn sampler_valid(&self, id: TextureId) -> bool {
		self.inner.lock().samplers.get(&id).is_some_and(TextureSampler::is_valid)
	}

	pub fn sample(&self, id: TextureId) -> Sample {
		let mut inner = self.inner.lock();
		match inner.samplers.get_mut(&id) {
			Some(sampler) => sampler.sample_current_frame(),
			None => Sample::Invalidated,
		}
	}

	/// The number of frame-available notifications for a texture.
	pub fn available(&self, id: TextureId) -> usize {
		self.inner.lock().available.get(&id).copied().unwrap_or(0)
	}

	/// Notifications that arrived for a texture after it was unregistered.
	pub fn late(&self) -> usize {
		self.inner.lock().late
	}
}

impl TextureRegistry for MockRegistry {
	fn register(&self, sampler: TextureSampler) -> Result<TextureId, RegistryError> {
		let mut inner = self.inner.lock();
		if inner.refuse {
			return Err(RegistryError::new("out of textures"));
		}

		inner.next += 1;
		let id = inner.next;
		inner.samplers.insert(id, sampler);
		inner.registered.push(id);
		Ok(id)
	}

	fn unregister(&self, id: TextureId) {
		self.inner.lock().unregistered.push(id);
	}

	fn frame_available(&self, id: TextureId) {
		let mut inner = self.inner.lock();
		if inner.unregistered.contains(&id) {
			inner.late += 1;
		}
		*inner.available.entry(id).or_default() += 1;
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
	State(SessionState),
	Error(EngineError),
	Texture(Option<TextureId>),
	Engine(EngineState),
}

#[derive(Default)]
pub struct MockListener {
	events: Mutex<Vec<Event>>,
}

impl MockListener {
	pub fn events(&self) -> Vec<Event> {
		self.events.lock().clone()
	}

	pub fn states(&self) -> Vec<SessionState> {
		self.events()
			.into_iter()
			.filter_map(|event| match event {
				Event::State(state) => Some(state),
				_ => None,
			})
			.collect()
	}

	pub fn errors(&self) -> Vec<EngineError> {
		self.events()
			.into_iter()
			.filter_map(|event| match event {
				Event::Error(err) => Some(err),
				_ => None,
			})
			.collect()
	}

	pub fn textures(&self) -> Vec<Option<TextureId>> {
		self.events()
			.into_iter()
			.filter_map(|event| match event {
				Event::Texture(texture) => Some(texture),
				_ => None,
			})
			.collect()
	}
}

impl SessionListener for MockListener {
	fn on_state_changed(&self, _session: SessionId, state: SessionState) {
		self.events.lock().push(Event::State(state));
	}

	fn on_error(&self, _session: SessionId, error: &EngineError) {
		self.events.lock().push(Event::Error(error.clone()));
	}

	fn on_texture_changed(&self, _session: SessionId, texture: Option<TextureId>) {
		self.events.lock().push(Event::Texture(texture));
	}

	fn on_engine_event(&self, _session: SessionId, event: EngineState) {
		self.events.lock().push(Event::Engine(event));
	}
}
