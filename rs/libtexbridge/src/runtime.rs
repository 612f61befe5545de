use std::sync::LazyLock;
use std::time::Duration;

use texbridge::PlaybackSession;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Global tokio runtime handle.
///
/// Runs in a dedicated background thread so timers fire without the host polling.
static RUNTIME: LazyLock<Handle> = LazyLock::new(|| {
	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.expect("failed to build runtime");
	let handle = runtime.handle().clone();

	std::thread::Builder::new()
		.name("texbridge".into())
		.spawn(move || {
			runtime.block_on(std::future::pending::<()>());
		})
		.expect("failed to spawn runtime thread");

	handle
});

/// Invalidate the session's texture once the app has been backgrounded for the configured timeout.
///
/// Returns `None` when there's nothing to wait for: no timeout, or a zero timeout that was
/// already applied when the app was backgrounded.
pub fn background_timer(session: &PlaybackSession) -> Option<AbortHandle> {
	let timeout = session.config().background_timeout.filter(|timeout| !timeout.is_zero())?;
	Some(spawn_background_timer(&RUNTIME, session.clone(), timeout))
}

fn spawn_background_timer(runtime: &Handle, session: PlaybackSession, timeout: Duration) -> AbortHandle {
	runtime
		.spawn(async move {
			tokio::time::sleep(timeout).await;
			if session.check_background() {
				tracing::debug!(session = %session.id(), ?timeout, "background timeout expired");
			}
		})
		.abort_handle()
}
