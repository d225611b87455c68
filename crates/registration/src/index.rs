use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::{
	observation::{Observation, ObservationContext, Token, CTX_PATH, CTX_REGISTRATION_ID},
	registration::RegistrationId,
};

/// Bidirectional observation index: token to observation, and registration to its tokens.
///
/// Not synchronized on its own, it lives inside the registration store's state and is only touched
/// under the store's lock.
#[derive(Debug, Default)]
pub(crate) struct ObservationIndex {
	by_token: HashMap<Token, Observation>,
	tokens_by_registration: HashMap<RegistrationId, HashSet<Token>>,
}

impl ObservationIndex {
	/// Inserts `observation`, returning the observations it cancels: same registration, same path,
	/// different token.
	pub(crate) fn add(&mut self, observation: Observation) -> Vec<Observation> {
		let cancelled = self
			.tokens_by_registration
			.get(&observation.registration_id)
			.into_iter()
			.flatten()
			.filter(|token| **token != observation.token)
			.filter_map(|token| self.by_token.get(token))
			.filter(|existing| existing.path == observation.path)
			.map(|existing| existing.token)
			.collect::<Vec<_>>();

		let cancelled = cancelled
			.into_iter()
			.filter_map(|token| self.remove(&token))
			.collect();

		let token = observation.token;
		let registration_id = observation.registration_id.clone();

		if let Some(previous) = self.by_token.insert(token, observation) {
			warn!(
				%token,
				previous_registration_id = %previous.registration_id,
				previous_path = %previous.path,
				"Token collision, replacing previous observation; tokens are being reused upstream",
			);

			if previous.registration_id != registration_id {
				self.unlink(&previous.registration_id, &token);
			}
		}

		self.tokens_by_registration
			.entry(registration_id)
			.or_default()
			.insert(token);

		cancelled
	}

	pub(crate) fn remove(&mut self, token: &Token) -> Option<Observation> {
		let removed = self.by_token.remove(token)?;
		self.unlink(&removed.registration_id, token);
		Some(removed)
	}

	pub(crate) fn remove_all(&mut self, registration_id: &RegistrationId) -> Vec<Observation> {
		let mut removed = self
			.tokens_by_registration
			.remove(registration_id)
			.into_iter()
			.flatten()
			.filter_map(|token| self.by_token.remove(&token))
			.collect::<Vec<_>>();

		removed.sort_by(|a, b| a.path.cmp(&b.path));
		removed
	}

	pub(crate) fn get(&self, token: &Token) -> Option<Observation> {
		self.by_token.get(token).cloned()
	}

	pub(crate) fn list(&self, registration_id: &RegistrationId) -> Vec<Observation> {
		let mut observations = self
			.tokens_by_registration
			.get(registration_id)
			.into_iter()
			.flatten()
			.filter_map(|token| self.by_token.get(token))
			.cloned()
			.collect::<Vec<_>>();

		observations.sort_by(|a, b| a.path.cmp(&b.path));
		observations
	}

	/// Replaces the transport context of an observation. Correlation keys are ignored so ownership
	/// and path never change.
	pub(crate) fn update_context(&mut self, token: &Token, mut context: ObservationContext) -> bool {
		let Some(observation) = self.by_token.get_mut(token) else {
			return false;
		};

		context.remove(CTX_REGISTRATION_ID);
		context.remove(CTX_PATH);
		observation.context = context;

		true
	}

	pub(crate) fn len(&self) -> usize {
		self.by_token.len()
	}

	fn unlink(&mut self, registration_id: &RegistrationId, token: &Token) {
		if let Some(tokens) = self.tokens_by_registration.get_mut(registration_id) {
			tokens.remove(token);
			if tokens.is_empty() {
				self.tokens_by_registration.remove(registration_id);
			}
		}
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use crate::observation::{ObserveRequest, ResourcePath};

	use super::*;

	fn observation(token: u8, registration_id: &str, path: &str) -> Observation {
		ObserveRequest::new(
			Token::new(&[token]).unwrap(),
			&registration_id.into(),
			path.parse().unwrap(),
		)
		.into_observation()
		.unwrap()
	}

	fn token(byte: u8) -> Token {
		Token::new(&[byte]).unwrap()
	}

	#[test]
	fn same_path_replaces_previous_observation() {
		let mut index = ObservationIndex::default();

		assert!(index.add(observation(0x01, "r1", "/3/0/1")).is_empty());
		let replaced = index.add(observation(0x02, "r1", "/3/0/1"));

		assert_eq!(replaced, vec![observation(0x01, "r1", "/3/0/1")]);
		assert!(index.get(&token(0x01)).is_none());
		assert!(index.get(&token(0x02)).is_some());
		assert_eq!(index.list(&"r1".into()).len(), 1);
	}

	#[test]
	fn other_paths_and_registrations_are_untouched() {
		let mut index = ObservationIndex::default();

		index.add(observation(0x01, "r1", "/3/0/1"));
		assert!(index.add(observation(0x02, "r1", "/3/0/2")).is_empty());
		assert!(index.add(observation(0x03, "r2", "/3/0/1")).is_empty());

		assert_eq!(index.len(), 3);
		assert_eq!(
			index
				.list(&"r1".into())
				.into_iter()
				.map(|observation| observation.path)
				.collect::<Vec<_>>(),
			vec![ResourcePath::resource(3, 0, 1), ResourcePath::resource(3, 0, 2)]
		);
	}

	#[test]
	fn token_collision_moves_ownership() {
		let mut index = ObservationIndex::default();

		index.add(observation(0x01, "r1", "/3/0/1"));
		assert!(index.add(observation(0x01, "r2", "/5/0/3")).is_empty());

		assert_eq!(index.len(), 1);
		assert!(index.list(&"r1".into()).is_empty());
		assert_eq!(
			index.get(&token(0x01)).unwrap().registration_id,
			RegistrationId::from("r2")
		);
		assert!(index.remove_all(&"r1".into()).is_empty());
	}

	#[test]
	fn remove_is_idempotent() {
		let mut index = ObservationIndex::default();

		index.add(observation(0x01, "r1", "/3/0/1"));
		assert!(index.remove(&token(0x01)).is_some());
		assert!(index.remove(&token(0x01)).is_none());
		assert!(index.list(&"r1".into()).is_empty());
		assert_eq!(index.len(), 0);
	}

	#[test]
	fn remove_all_drops_every_owned_observation() {
		let mut index = ObservationIndex::default();

		index.add(observation(0x01, "r1", "/3/0/1"));
		index.add(observation(0x02, "r1", "/3/0/2"));
		index.add(observation(0x03, "r2", "/3/0/1"));

		let removed = index.remove_all(&"r1".into());
		assert_eq!(removed.len(), 2);
		assert!(index.get(&token(0x01)).is_none());
		assert!(index.get(&token(0x02)).is_none());
		assert!(index.get(&token(0x03)).is_some());
	}

	#[test]
	fn context_updates_keep_ownership() {
		let mut index = ObservationIndex::default();
		index.add(observation(0x01, "r1", "/3/0/1"));

		let context = ObservationContext::from([
			("session".to_owned(), "s2".to_owned()),
			(CTX_REGISTRATION_ID.to_owned(), "r9".to_owned()),
			(CTX_PATH.to_owned(), "/1".to_owned()),
		]);

		assert!(index.update_context(&token(0x01), context.clone()));
		assert!(!index.update_context(&token(0x09), context));

		let updated = index.get(&token(0x01)).unwrap();
		assert_eq!(updated.registration_id, RegistrationId::from("r1"));
		assert_eq!(updated.path, ResourcePath::resource(3, 0, 1));
		assert_eq!(updated.context.get("session").map(String::as_str), Some("s2"));
		assert_eq!(updated.context.len(), 1);
	}
}
