use std::{fmt, net::SocketAddr, sync::Arc};

use tracing::debug;

use crate::{
	error::StoreError,
	event::{EventDispatcher, ListenerId, RegistrationEvent, RegistrationListener},
	observation::Observation,
	registration::{
		Deregistration, Registration, RegistrationId, RegistrationUpdate, UpdatedRegistration,
	},
	store::RegistrationStore,
};

/// Front door of the registration layer: every mutation goes to the store first and, once the
/// store's lock is released, the matching [`RegistrationEvent`] goes to the listeners.
///
/// Store errors are returned to the caller, listener errors never are.
///
/// Events are dispatched on the calling thread. Listeners see the events of one registration in
/// store order only when the calls for it are made in sequence; two threads racing on the same
/// registration may have their events delivered in either order.
#[derive(Clone)]
pub struct RegistrationService {
	store: Arc<dyn RegistrationStore>,
	dispatcher: Arc<EventDispatcher>,
}

impl RegistrationService {
	pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
		Self::with_dispatcher(store, Arc::new(EventDispatcher::new()))
	}

	pub fn with_dispatcher(
		store: Arc<dyn RegistrationStore>,
		dispatcher: Arc<EventDispatcher>,
	) -> Self {
		Self { store, dispatcher }
	}

	#[must_use]
	pub fn store(&self) -> &Arc<dyn RegistrationStore> {
		&self.store
	}

	#[must_use]
	pub const fn dispatcher(&self) -> &Arc<EventDispatcher> {
		&self.dispatcher
	}

	pub fn add_listener(&self, listener: Arc<dyn RegistrationListener>) -> ListenerId {
		self.dispatcher.add_listener(listener)
	}

	pub fn remove_listener(&self, id: ListenerId) -> bool {
		self.dispatcher.remove_listener(id)
	}

	/// Registers a device, replacing its previous registration if any.
	///
	/// A replaced registration is first reported as [`RegistrationEvent::Unregistered`] with
	/// `replaced_by` set, then the new one as [`RegistrationEvent::Registered`].
	pub fn register(
		&self,
		registration: Registration,
	) -> Result<Option<Deregistration>, StoreError> {
		let registration = Arc::new(registration);
		let replaced = self.store.register(Arc::clone(&registration))?;

		if let Some(Deregistration {
			registration: previous,
			observations,
		}) = &replaced
		{
			debug!(
				endpoint = registration.endpoint(),
				previous_id = %previous.id(),
				registration_id = %registration.id(),
				"Registration replaced a previous one",
			);

			self.dispatcher.dispatch(&RegistrationEvent::Unregistered {
				registration: Arc::clone(previous),
				observations: observations.clone(),
				explicit: false,
				replaced_by: Some(Arc::clone(&registration)),
			});
		}

		self.dispatcher.dispatch(&RegistrationEvent::Registered {
			registration,
			previous: replaced
				.as_ref()
				.map(|replaced| Arc::clone(&replaced.registration)),
			previous_observations: replaced
				.as_ref()
				.map(|replaced| replaced.observations.clone())
				.unwrap_or_default(),
		});

		Ok(replaced)
	}

	pub fn update(
		&self,
		update: RegistrationUpdate,
	) -> Result<Option<UpdatedRegistration>, StoreError> {
		let Some(updated) = self.store.update(update.clone())? else {
			debug!(registration_id = %update.registration_id, "Update for an unknown registration");
			return Ok(None);
		};

		self.dispatcher.dispatch(&RegistrationEvent::Updated {
			update,
			registration: Arc::clone(&updated.updated),
			previous: Arc::clone(&updated.previous),
		});

		Ok(Some(updated))
	}

	/// Removes a registration at the device's own request.
	pub fn deregister(&self, id: &RegistrationId) -> Result<Option<Deregistration>, StoreError> {
		self.unregister(id, true)
	}

	/// Removes a registration on the server's initiative.
	pub fn evict(&self, id: &RegistrationId) -> Result<Option<Deregistration>, StoreError> {
		self.unregister(id, false)
	}

	fn unregister(
		&self,
		id: &RegistrationId,
		explicit: bool,
	) -> Result<Option<Deregistration>, StoreError> {
		let Some(removed) = self.store.remove(id)? else {
			return Ok(None);
		};

		self.dispatcher.dispatch(&RegistrationEvent::Unregistered {
			registration: Arc::clone(&removed.registration),
			observations: removed.observations.clone(),
			explicit,
			replaced_by: None,
		});

		Ok(Some(removed))
	}

	pub fn get_by_id(&self, id: &RegistrationId) -> Result<Option<Arc<Registration>>, StoreError> {
		self.store.get_by_id(id)
	}

	pub fn get_by_endpoint(&self, endpoint: &str) -> Result<Option<Arc<Registration>>, StoreError> {
		self.store.get_by_endpoint(endpoint)
	}

	pub fn get_by_address(
		&self,
		address: &SocketAddr,
	) -> Result<Option<Arc<Registration>>, StoreError> {
		self.store.get_by_address(address)
	}

	pub fn all_registrations(&self) -> Result<Vec<Arc<Registration>>, StoreError> {
		self.store.all_registrations()
	}

	pub fn observations(&self, id: &RegistrationId) -> Result<Vec<Observation>, StoreError> {
		self.store.get_observations(id)
	}
}

impl fmt::Debug for RegistrationService {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RegistrationService")
			.field("dispatcher", &self.dispatcher)
			.finish_non_exhaustive()
	}
}
