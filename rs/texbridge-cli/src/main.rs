mod decoder;
mod render;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use texbridge::{PlaybackSession, SessionConfig, SessionListener, SessionState, SourceDescriptor};

use decoder::*;
use render::*;

#[derive(Parser, Clone)]
pub struct Config {
	/// The source to play, such as rtmp://live/stream1.
	#[arg(long, default_value = "rtmp://live/stream1")]
	pub url: String,

	/// Play audio only; no texture is registered.
	#[arg(long)]
	pub audio_only: bool,

	/// How long to play before stopping.
	#[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
	pub duration: Duration,

	/// Display refresh rate of the pretend compositor.
	#[arg(long, default_value = "60")]
	pub refresh: u32,

	/// Background the app after this long.
	#[arg(long, value_parser = humantime::parse_duration)]
	pub background_at: Option<Duration>,

	/// How long the app stays in the background.
	#[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
	pub background_for: Duration,

	/// Load the session configuration from a TOML file instead of flags.
	#[arg(long)]
	pub config: Option<PathBuf>,

	#[command(flatten)]
	pub session: SessionConfig,

	#[command(flatten)]
	pub decoder: DecoderConfig,

	/// The log configuration.
	#[command(flatten)]
	pub log: texbridge::Log,
}

impl Config {
	fn session(&self) -> anyhow::Result<SessionConfig> {
		let Some(path) = &self.config else {
			return Ok(self.session.clone());
		};

		let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
		toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config = Config::parse();
	config.log.init();

	anyhow::ensure!(config.refresh > 0, "refresh must be positive");

	let source = SourceDescriptor::parse(&config.url, config.audio_only)?;
	let compositor = Arc::new(Compositor::default());
	let session = PlaybackSession::new(
		SyntheticEngine::new(config.decoder.clone()),
		compositor.clone(),
		config.session()?,
	);

	let (listener, mut state) = Listener::channel();
	let listener: Arc<dyn SessionListener> = Arc::new(listener);
	session.set_listener(Arc::downgrade(&listener));

	tracing::info!(session = %session.id(), %source, "starting");
	session.start(source).context("failed to start")?;

	let result = tokio::select! {
		res = render(&compositor, config.refresh) => res,
		res = lifecycle(&session, config.background_at, config.background_for) => res,
		_ = state.wait_for(|state| *state == SessionState::Error) => Err(anyhow::anyhow!("playback failed")),
		_ = tokio::time::sleep(config.duration) => Ok(()),
		res = tokio::signal::ctrl_c() => res.context("failed to listen for ctrl-c"),
	};

	session.stop()?;
	session.destroy()?;

	let stats = compositor.stats();
	tracing::info!(
		published = session.generation(),
		delivered = session.delivered(),
		uploads = stats.uploads,
		unchanged = stats.unchanged,
		skipped = stats.skipped,
		"done"
	);

	result
}

async fn render(compositor: &Compositor, refresh: u32) -> anyhow::Result<()> {
	let mut interval = tokio::time::interval(Duration::from_secs(1) / refresh);
	interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

	loop {
		interval.tick().await;
		compositor.render();
	}
}

async fn lifecycle(session: &PlaybackSession, at: Option<Duration>, duration: Duration) -> anyhow::Result<()> {
	let Some(at) = at else {
		return std::future::pending().await;
	};

	tokio::time::sleep(at).await;
	tracing::info!("app backgrounded");
	session.on_app_background();

	let deadline = tokio::time::Instant::now() + duration;
	let mut check = tokio::time::interval(Duration::from_millis(100));
	while tokio::time::Instant::now() < deadline {
		check.tick().await;
		if session.check_background() {
			tracing::info!("texture released while backgrounded");
		}
	}

	tracing::info!("app foregrounded");
	session.on_app_foreground();

	std::future::pending().await
}
