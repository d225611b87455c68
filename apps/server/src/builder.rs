use std::{
	fmt,
	net::{Ipv6Addr, SocketAddr},
	sync::Arc,
};

use lw_registration::{
	EventDispatcher, ExpirationSweeper, InMemoryRegistrationStore, RegistrationListener,
	RegistrationService, RegistrationStore, StopOutcome, SweeperConfig,
};
use lw_security::{
	CredentialResolver, InMemorySecurityStore, Secret, SecurityError, SecurityStore,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::ServerConfig;

pub const DEFAULT_COAP_PORT: u16 = 5683;
pub const DEFAULT_COAPS_PORT: u16 = 5684;

/// Public key or certificate bytes, hex encoded in configuration files.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyMaterial(#[serde(with = "hex")] Vec<u8>);

impl KeyMaterial {
	pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
		Self(bytes.into())
	}

	#[must_use]
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}

impl fmt::Debug for KeyMaterial {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("KeyMaterial")
			.field(&hex::encode(&self.0))
			.finish()
	}
}

/// Settings of the secure (DTLS) endpoint.
///
/// They can be handed to [`ServerBuilder::dtls_settings`] directly, in which case they must agree
/// with whatever was also set on the builder itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DtlsSettings {
	pub address: Option<SocketAddr>,
	pub private_key: Option<Secret>,
	pub public_key: Option<KeyMaterial>,
	pub certificate_chain: Option<Vec<KeyMaterial>>,
	pub trusted_certificates: Option<Vec<KeyMaterial>>,
}

#[derive(Debug, Error)]
pub enum BuildError {
	#[error("configuration conflict between the server builder and the DTLS settings for {0}")]
	Conflict(&'static str),
	#[error("invalid {0} in server configuration")]
	InvalidConfig(&'static str),
	#[error(transparent)]
	Security(#[from] SecurityError),
}

#[derive(Default)]
pub struct ServerBuilder {
	local_address: Option<SocketAddr>,
	secure_address: Option<SocketAddr>,
	registration_store: Option<Arc<dyn RegistrationStore>>,
	security_store: Option<Arc<dyn SecurityStore>>,
	private_key: Option<Secret>,
	public_key: Option<KeyMaterial>,
	certificate_chain: Option<Vec<KeyMaterial>>,
	trusted_certificates: Option<Vec<KeyMaterial>>,
	dtls: Option<DtlsSettings>,
	sweeper: SweeperConfig,
	listeners: Vec<Arc<dyn RegistrationListener>>,
}

impl ServerBuilder {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder preset from a configuration file. The security entries, if any, make up an in-memory
	/// security store.
	pub fn from_config(config: &ServerConfig) -> Result<Self, BuildError> {
		let mut builder = Self::new()
			.local_address(config.coap_address)
			.secure_address(config.coaps_address)
			.sweeper_config(config.sweeper_config());

		if !config.security.is_empty() {
			builder = builder.security_store(Arc::new(InMemorySecurityStore::from_entries(
				config.security.iter().cloned(),
			)?));
		}

		if let Some(dtls) = &config.dtls {
			builder = builder.dtls_settings(dtls.clone());
		}

		Ok(builder)
	}

	#[must_use]
	pub const fn local_address(mut self, address: SocketAddr) -> Self {
		self.local_address = Some(address);
		self
	}

	#[must_use]
	pub const fn secure_address(mut self, address: SocketAddr) -> Self {
		self.secure_address = Some(address);
		self
	}

	#[must_use]
	pub fn registration_store(mut self, store: Arc<dyn RegistrationStore>) -> Self {
		self.registration_store = Some(store);
		self
	}

	#[must_use]
	pub fn security_store(mut self, store: Arc<dyn SecurityStore>) -> Self {
		self.security_store = Some(store);
		self
	}

	#[must_use]
	pub fn private_key(mut self, key: Secret) -> Self {
		self.private_key = Some(key);
		self
	}

	#[must_use]
	pub fn public_key(mut self, key: KeyMaterial) -> Self {
		self.public_key = Some(key);
		self
	}

	#[must_use]
	pub fn certificate_chain(mut self, chain: Vec<KeyMaterial>) -> Self {
		self.certificate_chain = Some(chain);
		self
	}

	#[must_use]
	pub fn trusted_certificates(mut self, certificates: Vec<KeyMaterial>) -> Self {
		self.trusted_certificates = Some(certificates);
		self
	}

	#[must_use]
	pub fn dtls_settings(mut self, settings: DtlsSettings) -> Self {
		self.dtls = Some(settings);
		self
	}

	#[must_use]
	pub const fn sweeper_config(mut self, config: SweeperConfig) -> Self {
		self.sweeper = config;
		self
	}

	#[must_use]
	pub fn listener(mut self, listener: Arc<dyn RegistrationListener>) -> Self {
		self.listeners.push(listener);
		self
	}

	pub fn build(self) -> Result<Server, BuildError> {
		if self.sweeper.period.is_zero() {
			return Err(BuildError::InvalidConfig("sweep period"));
		}

		let dtls = self.resolve_dtls()?;

		let store = self
			.registration_store
			.unwrap_or_else(|| Arc::new(InMemoryRegistrationStore::new()));

		let dispatcher = Arc::new(EventDispatcher::new());
		for listener in self.listeners {
			dispatcher.add_listener(listener);
		}

		let resolver = self.security_store.map(|security| {
			CredentialResolver::new(security).with_registrations(Arc::clone(&store))
		});

		let sweeper = ExpirationSweeper::new(Arc::clone(&store), Arc::clone(&dispatcher), self.sweeper);

		Ok(Server {
			local_address: self
				.local_address
				.unwrap_or_else(|| SocketAddr::from((Ipv6Addr::UNSPECIFIED, DEFAULT_COAP_PORT))),
			dtls,
			service: RegistrationService::with_dispatcher(store, dispatcher),
			resolver,
			sweeper,
		})
	}

	/// Merges the builder's credentials into the DTLS settings, failing on any disagreement.
	fn resolve_dtls(&self) -> Result<Option<DtlsSettings>, BuildError> {
		let mut dtls = match &self.dtls {
			Some(dtls) => dtls.clone(),
			None if self.security_store.is_some() => DtlsSettings::default(),
			None => return Ok(None),
		};

		match (self.secure_address, dtls.address) {
			(Some(ours), Some(theirs)) if ours != theirs => {
				return Err(BuildError::Conflict("secure address"));
			}
			(ours, None) => {
				dtls.address = Some(ours.unwrap_or_else(|| {
					SocketAddr::from((Ipv6Addr::UNSPECIFIED, DEFAULT_COAPS_PORT))
				}));
			}
			_ => {}
		}

		if let Some(trusted) = &self.trusted_certificates {
			match &dtls.trusted_certificates {
				None => dtls.trusted_certificates = Some(trusted.clone()),
				Some(theirs) if theirs != trusted => {
					return Err(BuildError::Conflict("trusted certificates"));
				}
				Some(_) => {}
			}
		}

		if let Some(private_key) = &self.private_key {
			if dtls
				.private_key
				.as_ref()
				.is_some_and(|theirs| theirs.expose() != private_key.expose())
			{
				return Err(BuildError::Conflict("private key"));
			}

			match (&self.certificate_chain, &self.public_key) {
				// Raw public key mode
				(None, Some(public_key)) => {
					if dtls
						.public_key
						.as_ref()
						.is_some_and(|theirs| theirs != public_key)
					{
						return Err(BuildError::Conflict("public key"));
					}

					dtls.private_key = Some(private_key.clone());
					dtls.public_key = Some(public_key.clone());
				}
				// X.509 mode, the public key comes with the certificate
				(Some(chain), _) if !chain.is_empty() => {
					if dtls
						.certificate_chain
						.as_ref()
						.is_some_and(|theirs| theirs != chain)
					{
						return Err(BuildError::Conflict("certificate chain"));
					}

					dtls.private_key = Some(private_key.clone());
					dtls.certificate_chain = Some(chain.clone());
				}
				_ => {}
			}
		}

		debug!(address = ?dtls.address, "Secure endpoint configured");

		Ok(Some(dtls))
	}
}

/// A configured server: the registration layer, its expiration sweeper and, when DTLS is enabled,
/// the credential resolver backing the handshakes.
#[derive(Debug)]
pub struct Server {
	local_address: SocketAddr,
	dtls: Option<DtlsSettings>,
	service: RegistrationService,
	resolver: Option<CredentialResolver>,
	sweeper: ExpirationSweeper,
}

impl Server {
	#[must_use]
	pub const fn local_address(&self) -> SocketAddr {
		self.local_address
	}

	#[must_use]
	pub fn secure_address(&self) -> Option<SocketAddr> {
		self.dtls.as_ref().and_then(|dtls| dtls.address)
	}

	#[must_use]
	pub const fn dtls(&self) -> Option<&DtlsSettings> {
		self.dtls.as_ref()
	}

	#[must_use]
	pub const fn service(&self) -> &RegistrationService {
		&self.service
	}

	#[must_use]
	pub const fn resolver(&self) -> Option<&CredentialResolver> {
		self.resolver.as_ref()
	}

	#[must_use]
	pub const fn sweeper(&self) -> &ExpirationSweeper {
		&self.sweeper
	}

	#[instrument(skip(self), fields(local_address = %self.local_address))]
	pub async fn start(&self) {
		self.sweeper.start().await;
		info!(secure_address = ?self.secure_address(), "Server started");
	}

	#[instrument(skip(self))]
	pub async fn stop(&self) -> StopOutcome {
		let outcome = self.sweeper.stop().await;
		info!(?outcome, "Server stopped");
		outcome
	}
}
