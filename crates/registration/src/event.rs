use std::{
	fmt,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, PoisonError, RwLock,
	},
};

use async_channel as chan;
use tracing::{debug, error, info};

use crate::{
	error::ListenerError,
	observation::Observation,
	registration::{Registration, RegistrationUpdate},
};

/// Lifecycle change of a registration, as seen by listeners.
#[derive(Debug, Clone)]
pub enum RegistrationEvent {
	/// A device registered. `previous` is the registration it replaced under the same endpoint name,
	/// if any, and `previous_observations` the observations that went away with it.
	Registered {
		registration: Arc<Registration>,
		previous: Option<Arc<Registration>>,
		previous_observations: Vec<Observation>,
	},
	Updated {
		update: RegistrationUpdate,
		registration: Arc<Registration>,
		previous: Arc<Registration>,
	},
	/// A registration left the store. `explicit` is set when the device asked for it itself, and
	/// `replaced_by` when a newer registration of the same endpoint took its place.
	Unregistered {
		registration: Arc<Registration>,
		observations: Vec<Observation>,
		explicit: bool,
		replaced_by: Option<Arc<Registration>>,
	},
	/// The sweeper evicted a registration whose lifetime ran out.
	Expired {
		registration: Arc<Registration>,
		observations: Vec<Observation>,
	},
}

impl RegistrationEvent {
	/// The registration the event is about, its new state for registrations and updates.
	#[must_use]
	pub const fn registration(&self) -> &Arc<Registration> {
		match self {
			Self::Registered { registration, .. }
			| Self::Updated { registration, .. }
			| Self::Unregistered { registration, .. }
			| Self::Expired { registration, .. } => registration,
		}
	}

	#[must_use]
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Registered { .. } => "registered",
			Self::Updated { .. } => "updated",
			Self::Unregistered { .. } => "unregistered",
			Self::Expired { .. } => "expired",
		}
	}
}

pub trait RegistrationListener: Send + Sync {
	/// Name used when logging about this listener.
	fn name(&self) -> &str {
		std::any::type_name::<Self>()
	}

	fn on_event(&self, event: &RegistrationEvent) -> Result<(), ListenerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "listener#{}", self.0)
	}
}

/// How many listeners took an event and how many failed on it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
	pub delivered: usize,
	pub failed: usize,
}

type Listeners = Arc<Vec<(ListenerId, Arc<dyn RegistrationListener>)>>;

/// Fans events out to a dynamic set of listeners.
///
/// The listener list is copy-on-write: dispatching works on a snapshot, so listeners can be added or
/// removed at any time, including from inside a listener, without blocking a dispatch in flight.
/// Events are delivered synchronously on the dispatching thread. A listener returning an error or
/// panicking is logged and skipped, the remaining listeners still get the event.
#[derive(Default)]
pub struct EventDispatcher {
	listeners: RwLock<Listeners>,
	next_id: AtomicU64,
}

impl EventDispatcher {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_listener(&self, listener: Arc<dyn RegistrationListener>) -> ListenerId {
		let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));

		let mut listeners = self
			.listeners
			.write()
			.unwrap_or_else(PoisonError::into_inner);

		let mut updated = Vec::clone(&listeners);
		debug!(%id, name = listener.name(), "Adding registration listener");
		updated.push((id, listener));
		*listeners = Arc::new(updated);

		id
	}

	/// Returns `false` if no listener was registered under `id`.
	pub fn remove_listener(&self, id: ListenerId) -> bool {
		let mut listeners = self
			.listeners
			.write()
			.unwrap_or_else(PoisonError::into_inner);

		if !listeners.iter().any(|(listener_id, _)| *listener_id == id) {
			return false;
		}

		*listeners = Arc::new(
			listeners
				.iter()
				.filter(|(listener_id, _)| *listener_id != id)
				.cloned()
				.collect(),
		);

		true
	}

	#[must_use]
	pub fn listener_count(&self) -> usize {
		self.snapshot().len()
	}

	pub fn dispatch(&self, event: &RegistrationEvent) -> DispatchReport {
		let mut report = DispatchReport::default();

		for (id, listener) in self.snapshot().iter() {
			match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
				Ok(Ok(())) => report.delivered += 1,
				Ok(Err(e)) => {
					error!(
						%id,
						name = listener.name(),
						event = event.kind(),
						endpoint = event.registration().endpoint(),
						?e,
						"Registration listener failed to handle event",
					);
					report.failed += 1;
				}
				Err(_) => {
					error!(
						%id,
						name = listener.name(),
						event = event.kind(),
						endpoint = event.registration().endpoint(),
						"Registration listener panicked while handling event",
					);
					report.failed += 1;
				}
			}
		}

		report
	}

	fn snapshot(&self) -> Listeners {
		Arc::clone(&self.listeners.read().unwrap_or_else(PoisonError::into_inner))
	}
}

impl fmt::Debug for EventDispatcher {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventDispatcher")
			.field(
				"listeners",
				&self
					.snapshot()
					.iter()
					.map(|(id, listener)| (*id, listener.name().to_owned()))
					.collect::<Vec<_>>(),
			)
			.finish_non_exhaustive()
	}
}

/// Forwards events into a channel, for consumers living on another task or thread.
#[derive(Debug)]
pub struct ChannelListener {
	name: String,
	tx: chan::Sender<RegistrationEvent>,
}

impl ChannelListener {
	/// A full channel makes delivery fail instead of blocking the dispatcher.
	pub fn bounded(
		name: impl Into<String>,
		capacity: usize,
	) -> (Self, chan::Receiver<RegistrationEvent>) {
		let (tx, rx) = chan::bounded(capacity);
		(
			Self {
				name: name.into(),
				tx,
			},
			rx,
		)
	}

	pub fn unbounded(name: impl Into<String>) -> (Self, chan::Receiver<RegistrationEvent>) {
		let (tx, rx) = chan::unbounded();
		(
			Self {
				name: name.into(),
				tx,
			},
			rx,
		)
	}
}

impl RegistrationListener for ChannelListener {
	fn name(&self) -> &str {
		&self.name
	}

	fn on_event(&self, event: &RegistrationEvent) -> Result<(), ListenerError> {
		self.tx.try_send(event.clone()).map_err(|e| match e {
			chan::TrySendError::Full(_) => ListenerError::Full,
			chan::TrySendError::Closed(_) => ListenerError::Closed,
		})
	}
}

/// Listener backed by a closure.
pub struct FnListener<F> {
	name: String,
	f: F,
}

impl<F> FnListener<F>
where
	F: Fn(&RegistrationEvent) -> Result<(), ListenerError> + Send + Sync,
{
	pub fn new(name: impl Into<String>, f: F) -> Self {
		Self {
			name: name.into(),
			f,
		}
	}
}

impl<F> RegistrationListener for FnListener<F>
where
	F: Fn(&RegistrationEvent) -> Result<(), ListenerError> + Send + Sync,
{
	fn name(&self) -> &str {
		&self.name
	}

	fn on_event(&self, event: &RegistrationEvent) -> Result<(), ListenerError> {
		(self.f)(event)
	}
}

impl<F> fmt::Debug for FnListener<F> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FnListener")
			.field("name", &self.name)
			.finish_non_exhaustive()
	}
}

/// Logs every lifecycle event at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogListener;

impl RegistrationListener for LogListener {
	fn name(&self) -> &str {
		"log"
	}

	fn on_event(&self, event: &RegistrationEvent) -> Result<(), ListenerError> {
		let registration = event.registration();

		match event {
			RegistrationEvent::Registered { previous, .. } => info!(
				endpoint = registration.endpoint(),
				registration_id = %registration.id(),
				address = %registration.address(),
				replaced = previous.is_some(),
				"Device registered",
			),
			RegistrationEvent::Updated { .. } => debug!(
				endpoint = registration.endpoint(),
				registration_id = %registration.id(),
				address = %registration.address(),
				"Device updated its registration",
			),
			RegistrationEvent::Unregistered {
				explicit,
				replaced_by,
				observations,
				..
			} => info!(
				endpoint = registration.endpoint(),
				registration_id = %registration.id(),
				explicit,
				replaced = replaced_by.is_some(),
				cancelled_observations = observations.len(),
				"Device unregistered",
			),
			RegistrationEvent::Expired { observations, .. } => info!(
				endpoint = registration.endpoint(),
				registration_id = %registration.id(),
				last_update = %registration.last_update(),
				cancelled_observations = observations.len(),
				"Device registration expired",
			),
		}

		Ok(())
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;

	fn expired() -> RegistrationEvent {
		RegistrationEvent::Expired {
			registration: Arc::new(
				Registration::builder("r1", "dev1", "127.0.0.1:5683".parse().unwrap()).build(),
			),
			observations: Vec::new(),
		}
	}

	#[test]
	fn failing_listeners_do_not_starve_the_others() {
		let dispatcher = EventDispatcher::new();
		let seen = Arc::new(AtomicUsize::new(0));

		dispatcher.add_listener(Arc::new(FnListener::new(
			"failing",
			|_: &RegistrationEvent| -> Result<(), ListenerError> {
				Err(ListenerError::Failed("nope".to_owned()))
			},
		)));
		dispatcher.add_listener(Arc::new(FnListener::new(
			"panicking",
			|_: &RegistrationEvent| -> Result<(), ListenerError> { panic!("boom") },
		)));
		dispatcher.add_listener(Arc::new(FnListener::new("counting", {
			let seen = Arc::clone(&seen);
			move |_: &RegistrationEvent| -> Result<(), ListenerError> {
				seen.fetch_add(1, Ordering::SeqCst);
				Ok(())
			}
		})));

		let report = dispatcher.dispatch(&expired());

		assert_eq!(
			report,
			DispatchReport {
				delivered: 1,
				failed: 2
			}
		);
		assert_eq!(seen.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn removed_listeners_stop_receiving() {
		let dispatcher = EventDispatcher::new();
		let (listener, rx) = ChannelListener::unbounded("channel");

		let id = dispatcher.add_listener(Arc::new(listener));
		assert_eq!(dispatcher.listener_count(), 1);

		dispatcher.dispatch(&expired());
		assert!(dispatcher.remove_listener(id));
		assert!(!dispatcher.remove_listener(id));
		dispatcher.dispatch(&expired());

		assert_eq!(rx.len(), 1);
		assert_eq!(dispatcher.listener_count(), 0);
	}

	#[test]
	fn full_or_closed_channels_are_listener_errors() {
		let (listener, rx) = ChannelListener::bounded("bounded", 1);

		assert!(listener.on_event(&expired()).is_ok());
		assert!(matches!(
			listener.on_event(&expired()),
			Err(ListenerError::Full)
		));

		drop(rx);
		assert!(matches!(
			listener.on_event(&expired()),
			Err(ListenerError::Closed)
		));
	}
}
