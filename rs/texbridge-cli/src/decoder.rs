use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use texbridge::{
	DecodedFrame, DecoderCallbackSink, Engine, EngineError, EngineState, PixelFormat, SourceDescriptor, Timestamp,
};

/// How the synthetic decoder behaves.
#[derive(Clone, Debug, clap::Args)]
pub struct DecoderConfig {
	/// Frames decoded per second.
	#[arg(long, default_value = "30")]
	pub fps: u32,

	#[arg(long, default_value = "320")]
	pub width: u32,

	#[arg(long, default_value = "180")]
	pub height: u32,

	/// Simulated time to connect before the first frame.
	#[arg(long, default_value = "100ms", value_parser = humantime::parse_duration)]
	pub connect: Duration,

	/// Report a fatal network error after this long.
	#[arg(long, value_parser = humantime::parse_duration)]
	pub fail_after: Option<Duration>,
}

struct Flags {
	stop: AtomicBool,
	paused: AtomicBool,
}

/// A stand-in for the vendor engine that paints a moving gradient on its own thread.
pub struct SyntheticEngine {
	config: DecoderConfig,
	running: Option<Arc<Flags>>,
}

impl SyntheticEngine {
	pub fn new(config: DecoderConfig) -> Self {
		Self { config, running: None }
	}

	fn flags(&self) -> Result<&Flags, EngineError> {
		self.running.as_deref().ok_or_else(|| EngineError::new(-1, "not started"))
	}
}

impl Engine for SyntheticEngine {
	fn start(&mut self, source: &SourceDescriptor, sink: DecoderCallbackSink) -> Result<(), EngineError> {
		if self.config.fps == 0 {
			return Err(EngineError::new(-2, "fps must be positive"));
		}

		let flags = Arc::new(Flags {
			stop: AtomicBool::new(false),
			paused: AtomicBool::new(false),
		});

		if let Some(previous) = self.running.replace(flags.clone()) {
			previous.stop.store(true, Ordering::Relaxed);
		}

		let config = self.config.clone();
		let audio_only = source.audio_only;

		thread::Builder::new()
			.name("decoder".into())
			.spawn(move || decode(config, audio_only, sink, flags))
			.map_err(|err| EngineError::new(-3, err.to_string()))?;

		Ok(())
	}

	fn pause(&mut self) -> Result<(), EngineError> {
		self.flags()?.paused.store(true, Ordering::Relaxed);
		Ok(())
	}

	fn resume(&mut self) -> Result<(), EngineError> {
		self.flags()?.paused.store(false, Ordering::Relaxed);
		Ok(())
	}

	// Only signals the thread; it may still be inside a callback.
	fn stop(&mut self) -> Result<(), EngineError> {
		if let Some(flags) = self.running.take() {
			flags.stop.store(true, Ordering::Relaxed);
		}
		Ok(())
	}

	fn seek(&mut self, position: Duration) -> Result<(), EngineError> {
		self.flags()?;
		tracing::info!(?position, "seek ignored by the live decoder");
		Ok(())
	}

	fn set_volume(&mut self, level: f32) -> Result<(), EngineError> {
		tracing::info!(level, "volume");
		Ok(())
	}
}

fn decode(config: DecoderConfig, audio_only: bool, sink: DecoderCallbackSink, flags: Arc<Flags>) {
	sink.on_state_changed(EngineState::Loading);
	thread::sleep(config.connect);
	sink.on_state_changed(EngineState::Ready);

	let interval = Duration::from_secs(1) / config.fps;
	let start = Instant::now();
	let mut index: u64 = 0;

	while !flags.stop.load(Ordering::Relaxed) {
		if config.fail_after.is_some_and(|after| start.elapsed() >= after) {
			sink.on_error(EngineError::new(1001, "network timeout"));
			return;
		}

		if flags.paused.load(Ordering::Relaxed) || audio_only {
			thread::sleep(interval);
			continue;
		}

		let timestamp = Timestamp::from_micros(index * 1_000_000 / config.fps as u64);
		sink.on_frame_ready(gradient(&config, index, timestamp));
		index += 1;

		thread::sleep(interval);
	}

	tracing::debug!(frames = index, "decoder stopped");
}

fn gradient(config: &DecoderConfig, index: u64, timestamp: Timestamp) -> DecodedFrame {
	let (width, height) = (config.width as usize, config.height as usize);
	let shift = (index * 4) as usize;

	let mut data = Vec::with_capacity(width * height * 4);
	for y in 0..height {
		for x in 0..width {
			data.extend_from_slice(&[(x + shift) as u8, y as u8, shift as u8, 0xff]);
		}
	}

	DecodedFrame::packed(PixelFormat::Bgra32, config.width, config.height, data, timestamp)
}
