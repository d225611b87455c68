use std::{
	collections::HashMap,
	net::SocketAddr,
	sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
	time::Duration,
};

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::{
	error::StoreError,
	index::ObservationIndex,
	observation::{Observation, ObservationContext, ObserveRequest, Token},
	registration::{
		Deregistration, Registration, RegistrationId, RegistrationUpdate, UpdatedRegistration,
	},
};

/// Authoritative directory of the registered devices and of the observations made on them.
///
/// Every method is fallible so a store living in another process can implement it too. A missing
/// registration or observation is not an error and comes back as `Ok(None)` (or an empty list).
pub trait RegistrationStore: Send + Sync {
	/// Adds `registration`, replacing any registration held under the same endpoint name.
	///
	/// The replaced registration comes back with every observation it owned, which are gone from the
	/// store by the time this returns.
	fn register(
		&self,
		registration: Arc<Registration>,
	) -> Result<Option<Deregistration>, StoreError>;

	/// Applies `update` to the registration it names, returning both the previous and the new state.
	fn update(&self, update: RegistrationUpdate) -> Result<Option<UpdatedRegistration>, StoreError>;

	/// Removes a registration together with all its observations.
	fn remove(&self, id: &RegistrationId) -> Result<Option<Deregistration>, StoreError>;

	/// Same as [`RegistrationStore::remove`] but only if the registration is still dead at `now`,
	/// checked atomically with the removal. A registration refreshed in between is left alone.
	fn remove_expired(
		&self,
		id: &RegistrationId,
		now: DateTime<Utc>,
		grace: Duration,
	) -> Result<Option<Deregistration>, StoreError>;

	fn get_by_id(&self, id: &RegistrationId) -> Result<Option<Arc<Registration>>, StoreError>;

	fn get_by_endpoint(&self, endpoint: &str) -> Result<Option<Arc<Registration>>, StoreError>;

	fn get_by_address(&self, address: &SocketAddr)
		-> Result<Option<Arc<Registration>>, StoreError>;

	fn all_registrations(&self) -> Result<Vec<Arc<Registration>>, StoreError>;

	/// Records an observation, returning the ones it replaced: observations of the same
	/// registration on the same path.
	fn add_observation(&self, request: ObserveRequest) -> Result<Vec<Observation>, StoreError>;

	fn get_observation(&self, token: &Token) -> Result<Option<Observation>, StoreError>;

	fn get_observations(&self, id: &RegistrationId) -> Result<Vec<Observation>, StoreError>;

	/// Removes an observation, but only if it belongs to registration `id`.
	fn remove_observation(
		&self,
		id: &RegistrationId,
		token: &Token,
	) -> Result<Option<Observation>, StoreError>;

	fn remove_observation_by_token(&self, token: &Token)
		-> Result<Option<Observation>, StoreError>;

	fn remove_observations(&self, id: &RegistrationId) -> Result<Vec<Observation>, StoreError>;

	/// Replaces the transport context of an observation, `false` if the token is unknown.
	fn update_observation_context(
		&self,
		token: &Token,
		context: ObservationContext,
	) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
struct State {
	by_endpoint: HashMap<String, Arc<Registration>>,
	endpoint_by_id: HashMap<RegistrationId, String>,
	/// Endpoints per peer address, in registration order.
	endpoints_by_address: HashMap<SocketAddr, Vec<String>>,
	observations: ObservationIndex,
}

impl State {
	fn by_id(&self, id: &RegistrationId) -> Option<&Arc<Registration>> {
		self.endpoint_by_id
			.get(id)
			.and_then(|endpoint| self.by_endpoint.get(endpoint))
	}

	fn index_address(&mut self, address: SocketAddr, endpoint: &str) {
		let endpoints = self.endpoints_by_address.entry(address).or_default();
		endpoints.retain(|e| e != endpoint);
		endpoints.push(endpoint.to_owned());
	}

	fn unindex_address(&mut self, address: SocketAddr, endpoint: &str) {
		if let Some(endpoints) = self.endpoints_by_address.get_mut(&address) {
			endpoints.retain(|e| e != endpoint);
			if endpoints.is_empty() {
				self.endpoints_by_address.remove(&address);
			}
		}
	}

	fn take(&mut self, id: &RegistrationId) -> Option<Deregistration> {
		let endpoint = self.endpoint_by_id.remove(id)?;
		let registration = self.by_endpoint.remove(&endpoint)?;
		self.unindex_address(registration.address(), &endpoint);

		Some(Deregistration {
			observations: self.observations.remove_all(registration.id()),
			registration,
		})
	}
}

/// [`RegistrationStore`] keeping everything in process memory.
///
/// Registrations and observations live behind one reader/writer lock, so a reader never sees a
/// registration without the observations that go with it (or the other way around). Nothing but
/// map operations runs while the lock is held.
#[derive(Debug, Default)]
pub struct InMemoryRegistrationStore {
	state: RwLock<State>,
}

impl InMemoryRegistrationStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.read().by_endpoint.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.read().by_endpoint.is_empty()
	}

	#[must_use]
	pub fn observation_count(&self) -> usize {
		self.read().observations.len()
	}

	fn read(&self) -> RwLockReadGuard<'_, State> {
		self.state.read().unwrap_or_else(PoisonError::into_inner)
	}

	fn write(&self) -> RwLockWriteGuard<'_, State> {
		self.state.write().unwrap_or_else(PoisonError::into_inner)
	}
}

fn invalid_state(message: String) -> StoreError {
	error!(%message, "Rejected registration store operation");
	StoreError::InvalidState(message)
}

impl RegistrationStore for InMemoryRegistrationStore {
	fn register(
		&self,
		registration: Arc<Registration>,
	) -> Result<Option<Deregistration>, StoreError> {
		let mut state = self.write();

		if let Some(owner) = state
			.endpoint_by_id
			.get(registration.id())
			.filter(|owner| *owner != registration.endpoint())
		{
			return Err(invalid_state(format!(
				"registration id '{}' is already used by endpoint '{owner}'",
				registration.id()
			)));
		}

		let endpoint = registration.endpoint().to_owned();
		let previous = state
			.by_endpoint
			.insert(endpoint.clone(), Arc::clone(&registration));

		let deregistration = previous.map(|previous| {
			state.endpoint_by_id.remove(previous.id());
			state.unindex_address(previous.address(), &endpoint);

			Deregistration {
				observations: state.observations.remove_all(previous.id()),
				registration: previous,
			}
		});

		state
			.endpoint_by_id
			.insert(registration.id().clone(), endpoint.clone());
		state.index_address(registration.address(), &endpoint);

		debug!(
			%endpoint,
			registration_id = %registration.id(),
			replaced = deregistration.is_some(),
			"Registered endpoint",
		);

		Ok(deregistration)
	}

	fn update(&self, update: RegistrationUpdate) -> Result<Option<UpdatedRegistration>, StoreError> {
		let mut state = self.write();

		let Some(previous) = state.by_id(&update.registration_id).cloned() else {
			return Ok(None);
		};

		let updated = Arc::new(update.apply(&previous, Utc::now()));

		if updated.address() != previous.address() {
			state.unindex_address(previous.address(), previous.endpoint());
			state.index_address(updated.address(), updated.endpoint());
		}

		state
			.by_endpoint
			.insert(updated.endpoint().to_owned(), Arc::clone(&updated));

		Ok(Some(UpdatedRegistration { previous, updated }))
	}

	fn remove(&self, id: &RegistrationId) -> Result<Option<Deregistration>, StoreError> {
		Ok(self.write().take(id))
	}

	fn remove_expired(
		&self,
		id: &RegistrationId,
		now: DateTime<Utc>,
		grace: Duration,
	) -> Result<Option<Deregistration>, StoreError> {
		let mut state = self.write();

		let Some(registration) = state.by_id(id) else {
			return Ok(None);
		};

		if registration.is_alive_at(now, grace) {
			warn!(
				registration_id = %id,
				endpoint = registration.endpoint(),
				"Registration was refreshed before it could be expired, keeping it",
			);
			return Ok(None);
		}

		Ok(state.take(id))
	}

	fn get_by_id(&self, id: &RegistrationId) -> Result<Option<Arc<Registration>>, StoreError> {
		Ok(self.read().by_id(id).cloned())
	}

	fn get_by_endpoint(&self, endpoint: &str) -> Result<Option<Arc<Registration>>, StoreError> {
		Ok(self.read().by_endpoint.get(endpoint).cloned())
	}

	fn get_by_address(
		&self,
		address: &SocketAddr,
	) -> Result<Option<Arc<Registration>>, StoreError> {
		let state = self.read();

		Ok(state
			.endpoints_by_address
			.get(address)
			.and_then(|endpoints| endpoints.last())
			.and_then(|endpoint| state.by_endpoint.get(endpoint))
			.cloned())
	}

	fn all_registrations(&self) -> Result<Vec<Arc<Registration>>, StoreError> {
		Ok(self.read().by_endpoint.values().cloned().collect())
	}

	fn add_observation(&self, request: ObserveRequest) -> Result<Vec<Observation>, StoreError> {
		let observation = request.into_observation().map_err(|e| {
			error!(?e, "Observation is missing its correlation metadata");
			e
		})?;

		let mut state = self.write();

		if !state
			.endpoint_by_id
			.contains_key(&observation.registration_id)
		{
			return Err(invalid_state(format!(
				"no registration '{}' for observation <token='{}'>",
				observation.registration_id, observation.token
			)));
		}

		Ok(state.observations.add(observation))
	}

	fn get_observation(&self, token: &Token) -> Result<Option<Observation>, StoreError> {
		Ok(self.read().observations.get(token))
	}

	fn get_observations(&self, id: &RegistrationId) -> Result<Vec<Observation>, StoreError> {
		Ok(self.read().observations.list(id))
	}

	fn remove_observation(
		&self,
		id: &RegistrationId,
		token: &Token,
	) -> Result<Option<Observation>, StoreError> {
		let mut state = self.write();

		match state.observations.get(token) {
			Some(observation) if observation.registration_id == *id => {
				Ok(state.observations.remove(token))
			}
			Some(observation) => {
				debug!(
					%token,
					owner = %observation.registration_id,
					requested_by = %id,
					"Ignoring observation removal from a registration that doesn't own it",
				);
				Ok(None)
			}
			None => Ok(None),
		}
	}

	fn remove_observation_by_token(
		&self,
		token: &Token,
	) -> Result<Option<Observation>, StoreError> {
		Ok(self.write().observations.remove(token))
	}

	fn remove_observations(&self, id: &RegistrationId) -> Result<Vec<Observation>, StoreError> {
		Ok(self.write().observations.remove_all(id))
	}

	fn update_observation_context(
		&self,
		token: &Token,
		context: ObservationContext,
	) -> Result<bool, StoreError> {
		Ok(self.write().observations.update_context(token, context))
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use crate::observation::ResourcePath;

	use super::*;

	fn registration(id: &str, endpoint: &str, address: &str) -> Arc<Registration> {
		Arc::new(Registration::builder(id, endpoint, address.parse().unwrap()).build())
	}

	#[test]
	fn address_index_follows_updates_and_removals() {
		let store = InMemoryRegistrationStore::new();
		let first: SocketAddr = "10.0.0.1:5683".parse().unwrap();
		let second: SocketAddr = "10.0.0.2:5683".parse().unwrap();

		store.register(registration("r1", "dev1", "10.0.0.1:5683")).unwrap();
		store.register(registration("r2", "dev2", "10.0.0.1:5683")).unwrap();
		assert_eq!(
			store.get_by_address(&first).unwrap().unwrap().endpoint(),
			"dev2"
		);

		store
			.update(RegistrationUpdate {
				address: Some(second),
				..RegistrationUpdate::new("r2")
			})
			.unwrap()
			.unwrap();
		assert_eq!(
			store.get_by_address(&first).unwrap().unwrap().endpoint(),
			"dev1"
		);
		assert_eq!(
			store.get_by_address(&second).unwrap().unwrap().endpoint(),
			"dev2"
		);

		store.remove(&"r1".into()).unwrap().unwrap();
		assert!(store.get_by_address(&first).unwrap().is_none());
		assert!(store.read().endpoints_by_address.get(&first).is_none());
	}

	#[test]
	fn registration_id_reused_by_another_endpoint_is_rejected() {
		let store = InMemoryRegistrationStore::new();

		store.register(registration("r1", "dev1", "10.0.0.1:5683")).unwrap();
		assert!(matches!(
			store.register(registration("r1", "dev2", "10.0.0.2:5683")),
			Err(StoreError::InvalidState(_))
		));
		assert_eq!(
			store.get_by_id(&"r1".into()).unwrap().unwrap().endpoint(),
			"dev1"
		);
		assert!(store.get_by_endpoint("dev2").unwrap().is_none());
	}

	#[test]
	fn remove_expired_keeps_refreshed_registrations() {
		let store = InMemoryRegistrationStore::new();
		let t0 = Utc::now() - chrono::Duration::seconds(60);

		store
			.register(Arc::new(
				Registration::builder("r1", "dev1", "10.0.0.1:5683".parse().unwrap())
					.lifetime(Duration::from_secs(10))
					.last_update(t0)
					.build(),
			))
			.unwrap();

		// Dead as far as a stale snapshot is concerned, but refreshed since
		store.update(RegistrationUpdate::new("r1")).unwrap().unwrap();
		assert!(store
			.remove_expired(&"r1".into(), Utc::now(), Duration::ZERO)
			.unwrap()
			.is_none());

		let later = Utc::now() + chrono::Duration::seconds(30);
		let removed = store
			.remove_expired(&"r1".into(), later, Duration::ZERO)
			.unwrap()
			.unwrap();
		assert_eq!(removed.registration.endpoint(), "dev1");
		assert!(store.is_empty());
	}

	#[test]
	fn observation_removal_is_owner_checked() {
		let store = InMemoryRegistrationStore::new();
		store.register(registration("r1", "dev1", "10.0.0.1:5683")).unwrap();
		store.register(registration("r2", "dev2", "10.0.0.2:5683")).unwrap();

		let token = Token::new(&[7]).unwrap();
		store
			.add_observation(ObserveRequest::new(
				token,
				&"r1".into(),
				ResourcePath::resource(3, 0, 1),
			))
			.unwrap();

		assert!(store
			.remove_observation(&"r2".into(), &token)
			.unwrap()
			.is_none());
		assert!(store.get_observation(&token).unwrap().is_some());
		assert!(store
			.remove_observation(&"r1".into(), &token)
			.unwrap()
			.is_some());
		assert_eq!(store.observation_count(), 0);
	}
}
