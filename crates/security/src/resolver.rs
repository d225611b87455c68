use std::{fmt, net::SocketAddr, sync::Arc};

use lw_registration::RegistrationStore;
use tracing::{debug, error};

use crate::{info::Secret, store::SecurityStore};

/// Credential lookups for the DTLS layer.
///
/// Lookups never fail from the handshake's point of view: anything going wrong on the way is
/// logged and reported as "no credentials".
#[derive(Clone)]
pub struct CredentialResolver {
	security: Arc<dyn SecurityStore>,
	registrations: Option<Arc<dyn RegistrationStore>>,
}

impl CredentialResolver {
	pub fn new(security: Arc<dyn SecurityStore>) -> Self {
		Self {
			security,
			registrations: None,
		}
	}

	/// Enables [`CredentialResolver::identity_for`], which needs to map peer addresses to devices.
	#[must_use]
	pub fn with_registrations(mut self, registrations: Arc<dyn RegistrationStore>) -> Self {
		self.registrations = Some(registrations);
		self
	}

	/// A copy of the pre-shared key of the device using `identity`.
	#[must_use]
	pub fn secret_for(&self, identity: &str) -> Option<Secret> {
		match self.security.get_by_identity(identity) {
			Ok(Some(info)) => info.pre_shared_key().cloned(),
			Ok(None) => {
				debug!(%identity, "No security info for PSK identity");
				None
			}
			Err(e) => {
				error!(?e, %identity, "Failed to look up security info by PSK identity");
				None
			}
		}
	}

	/// The PSK identity to present to the device registered from `address`.
	#[must_use]
	pub fn identity_for(&self, address: &SocketAddr) -> Option<String> {
		let registrations = self.registrations.as_ref()?;

		let registration = match registrations.get_by_address(address) {
			Ok(Some(registration)) => registration,
			Ok(None) => {
				debug!(%address, "No registration for peer address");
				return None;
			}
			Err(e) => {
				error!(?e, %address, "Failed to get registration by address");
				return None;
			}
		};

		match self.security.get_by_endpoint(registration.endpoint()) {
			Ok(info) => info.and_then(|info| info.psk_identity().map(ToOwned::to_owned)),
			Err(e) => {
				error!(
					?e,
					endpoint = registration.endpoint(),
					"Failed to look up security info by endpoint",
				);
				None
			}
		}
	}
}

impl fmt::Debug for CredentialResolver {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CredentialResolver")
			.field("with_registrations", &self.registrations.is_some())
			.finish_non_exhaustive()
	}
}
