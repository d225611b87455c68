use thiserror::Error;

/// Failures of a [`RegistrationStore`](crate::RegistrationStore) call.
///
/// Unknown registrations are not errors, store operations report them as `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
	/// The caller broke a store invariant, e.g. observing a resource for a registration that does
	/// not exist or handing in an observation without its correlation metadata.
	#[error("invalid state: {0}")]
	InvalidState(String),
	/// A backing store living elsewhere could not be reached or failed on its side.
	#[error("registration store unavailable: {0}")]
	Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ListenerError {
	#[error("listener channel closed")]
	Closed,
	#[error("listener channel full")]
	Full,
	#[error("listener failed: {0}")]
	Failed(String),
}
