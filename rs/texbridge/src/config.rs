use std::time::Duration;

/// Per-session behaviour that the host can tune.
#[derive(Clone, Debug, clap::Args, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct SessionConfig {
	/// How long the texture survives while the app is backgrounded.
	///
	/// Zero invalidates as soon as the app is backgrounded. Defaults to 5s when the flag or key
	/// is omitted; only `None`, set through the library API, keeps the texture forever.
	#[arg(
		id = "background-timeout",
		long = "background-timeout",
		env = "TEXBRIDGE_BACKGROUND_TIMEOUT",
		default_value = "5s",
		value_parser = humantime::parse_duration,
	)]
	#[serde(with = "humantime_serde")]
	#[serde(skip_serializing_if = "Option::is_none")]
	pub background_timeout: Option<Duration>,

	/// Panic when a session is used after it was destroyed, instead of returning an error.
	///
	/// Defaults to on in debug builds.
	#[serde(skip_serializing_if = "Option::is_none")]
	#[arg(
		id = "strict-lifecycle",
		long = "strict-lifecycle",
		env = "TEXBRIDGE_STRICT_LIFECYCLE",
		default_missing_value = "true",
		num_args = 0..=1,
		value_parser = clap::value_parser!(bool),
	)]
	pub strict_lifecycle: Option<bool>,
}

impl SessionConfig {
	pub fn strict(&self) -> bool {
		self.strict_lifecycle.unwrap_or(cfg!(debug_assertions))
	}

	/// Returns true if a texture backgrounded for `elapsed` should be invalidated.
	pub fn background_expired(&self, elapsed: Duration) -> bool {
		self.background_timeout.is_some_and(|timeout| elapsed >= timeout)
	}
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			background_timeout: Some(Duration::from_secs(5)),
			strict_lifecycle: None,
		}
	}
}
