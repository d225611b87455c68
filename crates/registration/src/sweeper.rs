use std::{
	fmt,
	panic::AssertUnwindSafe,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use async_channel as chan;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::{
	select, spawn,
	sync::Mutex,
	task::{spawn_blocking, JoinHandle},
	time::{interval, timeout, MissedTickBehavior},
};
use tracing::{debug, error, instrument, warn};

use crate::{
	event::{EventDispatcher, RegistrationEvent},
	registration::{Deregistration, DEFAULT_GRACE_PERIOD},
	store::RegistrationStore,
};

pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
	/// Time between two sweeps, must not be zero.
	pub period: Duration,
	/// Margin granted past a registration's lifetime before it's evicted.
	pub grace: Duration,
	/// How long [`ExpirationSweeper::stop`] waits for a sweep in flight.
	pub stop_timeout: Duration,
}

impl Default for SweeperConfig {
	fn default() -> Self {
		Self {
			period: DEFAULT_SWEEP_PERIOD,
			grace: DEFAULT_GRACE_PERIOD,
			stop_timeout: DEFAULT_STOP_TIMEOUT,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
	Stopped,
	Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
	/// The loop finished, along with any sweep it had in flight.
	Stopped,
	/// The loop didn't finish within the stop timeout and was aborted.
	TimedOut,
	NotRunning,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
	pub evicted: usize,
	pub failed: usize,
}

struct Inner {
	store: Arc<dyn RegistrationStore>,
	dispatcher: Arc<EventDispatcher>,
	config: SweeperConfig,
	is_running: AtomicBool,
}

struct RunHandle {
	handle: JoinHandle<()>,
	stop_tx: chan::Sender<()>,
}

/// Background task evicting registrations whose lifetime ran out, one [`RegistrationEvent::Expired`]
/// per eviction.
///
/// Liveness is evaluated on a snapshot of the store, without holding its lock; each eviction is
/// then its own store transaction which checks liveness again, so a device refreshing its
/// registration in between is never evicted.
pub struct ExpirationSweeper {
	inner: Arc<Inner>,
	running: Mutex<Option<RunHandle>>,
}

impl ExpirationSweeper {
	pub fn new(
		store: Arc<dyn RegistrationStore>,
		dispatcher: Arc<EventDispatcher>,
		config: SweeperConfig,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				store,
				dispatcher,
				config,
				is_running: AtomicBool::new(false),
			}),
			running: Mutex::new(None),
		}
	}

	#[must_use]
	pub fn config(&self) -> &SweeperConfig {
		&self.inner.config
	}

	#[must_use]
	pub fn state(&self) -> SweeperState {
		if self.inner.is_running.load(Ordering::Acquire) {
			SweeperState::Running
		} else {
			SweeperState::Stopped
		}
	}

	#[instrument(skip(self), fields(period = ?self.inner.config.period))]
	pub async fn start(&self) {
		let mut running = self.running.lock().await;

		if self.inner.is_running.load(Ordering::Acquire) {
			warn!("Expiration sweeper already running!");
			return;
		}

		if self.inner.config.period.is_zero() {
			error!("Expiration sweeper can't run with a zero sweep period");
			return;
		}

		if let Some(RunHandle { handle, .. }) = running.take() {
			if handle.await.is_err() {
				error!("Expiration sweeper unexpectedly panicked");
			}
		}

		let (stop_tx, stop_rx) = chan::bounded(1);

		self.inner.is_running.store(true, Ordering::Release);

		let handle = spawn({
			let inner = Arc::clone(&self.inner);

			async move {
				if AssertUnwindSafe(Arc::clone(&inner).run(stop_rx))
					.catch_unwind()
					.await
					.is_err()
				{
					error!("Expiration sweeper unexpectedly panicked");
				}

				inner.is_running.store(false, Ordering::Release);
			}
		});

		*running = Some(RunHandle { handle, stop_tx });

		debug!("Expiration sweeper started");
	}

	/// Stops scheduling sweeps. A sweep in flight is given `stop_timeout` to finish before the loop
	/// is aborted.
	#[instrument(skip(self))]
	pub async fn stop(&self) -> StopOutcome {
		let mut running = self.running.lock().await;

		let Some(RunHandle { handle, stop_tx }) = running.take() else {
			warn!("Expiration sweeper already stopped!");
			return StopOutcome::NotRunning;
		};

		if stop_tx.try_send(()).is_err() {
			error!("Failed to send stop signal to expiration sweeper, will check if it's already stopped or abort otherwise");
		}

		let abort_handle = handle.abort_handle();

		match timeout(self.inner.config.stop_timeout, handle).await {
			Ok(Ok(())) => StopOutcome::Stopped,
			Ok(Err(e)) => {
				error!(?e, "Expiration sweeper task failed while stopping");
				self.inner.is_running.store(false, Ordering::Release);
				StopOutcome::Stopped
			}
			Err(_) => {
				error!("Expiration sweeper failed to gracefully stop in the allotted time, will force abortion");
				abort_handle.abort();
				self.inner.is_running.store(false, Ordering::Release);
				StopOutcome::TimedOut
			}
		}
	}

	/// Runs one sweep right away on the calling thread, which it blocks for the duration.
	pub fn sweep_once(&self) -> SweepReport {
		self.inner.sweep(Utc::now())
	}
}

impl fmt::Debug for ExpirationSweeper {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ExpirationSweeper")
			.field("config", &self.inner.config)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

impl Drop for ExpirationSweeper {
	fn drop(&mut self) {
		if let Some(RunHandle { handle, .. }) = self.running.get_mut().take() {
			handle.abort();
		}
	}
}

impl Inner {
	async fn run(self: Arc<Self>, stop_rx: chan::Receiver<()>) {
		let mut ticker = interval(self.config.period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			// A pending stop wins over an overdue tick
			select! {
				biased;

				res = stop_rx.recv() => {
					if res.is_err() {
						warn!("Expiration sweeper stop channel closed, will stop");
					}
					break;
				}
				_ = ticker.tick() => {
					let inner = Arc::clone(&self);

					match spawn_blocking(move || inner.sweep(Utc::now())).await {
						Ok(SweepReport { evicted: 0, failed: 0 }) => {}
						Ok(report) => debug!(?report, "Expiration sweep done"),
						Err(e) => error!(?e, "Expiration sweep task failed"),
					}
				}
			}
		}

		debug!("Expiration sweeper stopped");
	}

	fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
		let grace = self.config.grace;

		let registrations = match self.store.all_registrations() {
			Ok(registrations) => registrations,
			Err(e) => {
				error!(?e, "Failed to list registrations for expiration sweep");
				return SweepReport {
					evicted: 0,
					failed: 1,
				};
			}
		};

		let mut report = SweepReport::default();

		for registration in registrations
			.iter()
			.filter(|registration| !registration.is_alive_at(now, grace))
		{
			match self.store.remove_expired(registration.id(), now, grace) {
				Ok(Some(Deregistration {
					registration,
					observations,
				})) => {
					report.evicted += 1;
					self.dispatcher.dispatch(&RegistrationEvent::Expired {
						registration,
						observations,
					});
				}
				// Removed or refreshed concurrently
				Ok(None) => {}
				Err(e) => {
					error!(
						?e,
						registration_id = %registration.id(),
						endpoint = registration.endpoint(),
						"Failed to evict expired registration",
					);
					report.failed += 1;
				}
			}
		}

		report
	}
}
