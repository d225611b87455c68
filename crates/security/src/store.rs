use std::{
	collections::HashMap,
	sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::debug;

use crate::{error::SecurityError, info::SecurityInfo};

/// Read side of the security directory, as needed during a handshake.
pub trait SecurityStore: Send + Sync {
	fn get_by_endpoint(&self, endpoint: &str) -> Result<Option<SecurityInfo>, SecurityError>;

	fn get_by_identity(&self, identity: &str) -> Result<Option<SecurityInfo>, SecurityError>;
}

#[derive(Debug, Default)]
struct State {
	by_endpoint: HashMap<String, SecurityInfo>,
	endpoint_by_identity: HashMap<String, String>,
}

/// [`SecurityStore`] kept in memory, with a PSK identity owned by at most one endpoint.
#[derive(Debug, Default)]
pub struct InMemorySecurityStore {
	state: RwLock<State>,
}

impl InMemorySecurityStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_entries(
		entries: impl IntoIterator<Item = SecurityInfo>,
	) -> Result<Self, SecurityError> {
		let store = Self::new();
		for info in entries {
			store.add(info)?;
		}

		Ok(store)
	}

	/// Adds or replaces the entry of `info`'s endpoint, returning the replaced one.
	pub fn add(&self, info: SecurityInfo) -> Result<Option<SecurityInfo>, SecurityError> {
		let mut state = self.write();

		if let Some(identity) = info.psk_identity() {
			if let Some(owner) = state
				.endpoint_by_identity
				.get(identity)
				.filter(|owner| *owner != info.endpoint())
			{
				return Err(SecurityError::NonUniqueIdentity {
					identity: identity.to_owned(),
					endpoint: owner.clone(),
				});
			}
		}

		let previous = state.by_endpoint.remove(info.endpoint());
		if let Some(identity) = previous.as_ref().and_then(SecurityInfo::psk_identity) {
			state.endpoint_by_identity.remove(identity);
		}

		if let Some(identity) = info.psk_identity() {
			state
				.endpoint_by_identity
				.insert(identity.to_owned(), info.endpoint().to_owned());
		}

		debug!(endpoint = info.endpoint(), replaced = previous.is_some(), "Security info added");

		state.by_endpoint.insert(info.endpoint().to_owned(), info);

		Ok(previous)
	}

	pub fn remove(&self, endpoint: &str) -> Option<SecurityInfo> {
		let mut state = self.write();

		let removed = state.by_endpoint.remove(endpoint)?;
		if let Some(identity) = removed.psk_identity() {
			state.endpoint_by_identity.remove(identity);
		}

		Some(removed)
	}

	#[must_use]
	pub fn all(&self) -> Vec<SecurityInfo> {
		self.read().by_endpoint.values().cloned().collect()
	}

	fn read(&self) -> RwLockReadGuard<'_, State> {
		self.state.read().unwrap_or_else(PoisonError::into_inner)
	}

	fn write(&self) -> RwLockWriteGuard<'_, State> {
		self.state.write().unwrap_or_else(PoisonError::into_inner)
	}
}

impl SecurityStore for InMemorySecurityStore {
	fn get_by_endpoint(&self, endpoint: &str) -> Result<Option<SecurityInfo>, SecurityError> {
		Ok(self.read().by_endpoint.get(endpoint).cloned())
	}

	fn get_by_identity(&self, identity: &str) -> Result<Option<SecurityInfo>, SecurityError> {
		let state = self.read();

		Ok(state
			.endpoint_by_identity
			.get(identity)
			.and_then(|endpoint| state.by_endpoint.get(endpoint))
			.cloned())
	}
}
