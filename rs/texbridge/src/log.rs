use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Logging configuration shared by every host.
#[derive(Clone, Debug, clap::Args)]
pub struct Log {
	/// The level of logs to emit, unless `RUST_LOG` overrides it.
	#[arg(id = "log-level", long = "log-level", env = "TEXBRIDGE_LOG_LEVEL", default_value = "info")]
	pub level: Level,
}

impl Default for Log {
	fn default() -> Self {
		Self { level: Level::INFO }
	}
}

impl Log {
	pub fn new(level: Level) -> Self {
		Self { level }
	}

	/// Install a global stderr subscriber.
	///
	/// Only the first call takes effect, so hosts may call this more than once.
	pub fn init(&self) {
		let filter = EnvFilter::builder()
			.with_default_directive(self.level.into())
			.from_env_lossy();

		let fmt = tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.with_target(true)
			.with_thread_names(true);

		if tracing_subscriber::registry().with(filter).with(fmt).try_init().is_err() {
			tracing::debug!("logging already initialized");
		}
	}
}
