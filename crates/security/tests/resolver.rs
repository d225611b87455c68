use std::{net::SocketAddr, sync::Arc};

use lw_registration::{InMemoryRegistrationStore, Registration, RegistrationStore};
use lw_security::{
	CredentialResolver, InMemorySecurityStore, Secret, SecurityError, SecurityInfo, SecurityStore,
};
use tracing_test::traced_test;

fn device_address() -> SocketAddr {
	SocketAddr::from(([192, 168, 1, 20], 56830))
}

fn security() -> Arc<InMemorySecurityStore> {
	Arc::new(
		InMemorySecurityStore::from_entries([
			SecurityInfo::psk("dev1", "dev1-identity", Secret::new(*b"secret-key")),
			SecurityInfo::rpk("dev2", [0x04u8, 0x01]),
		])
		.unwrap(),
	)
}

fn registrations() -> Arc<InMemoryRegistrationStore> {
	let store = Arc::new(InMemoryRegistrationStore::new());
	store
		.register(Arc::new(
			Registration::builder("r1", "dev1", device_address()).build(),
		))
		.unwrap();
	store
}

#[test]
fn secrets_are_resolved_by_identity() {
	let resolver = CredentialResolver::new(security());

	assert_eq!(
		resolver.secret_for("dev1-identity").unwrap().expose(),
		b"secret-key"
	);
	assert!(resolver.secret_for("unknown").is_none());
}

#[test]
fn handed_out_secrets_are_copies() {
	let security = security();
	let resolver = CredentialResolver::new(Arc::clone(&security) as Arc<dyn SecurityStore>);

	let secret = resolver.secret_for("dev1-identity").unwrap();
	security.remove("dev1");

	assert_eq!(secret.expose(), b"secret-key");
	assert!(resolver.secret_for("dev1-identity").is_none());
}

#[test]
fn no_identity_without_registration_store() {
	let resolver = CredentialResolver::new(security());

	assert!(resolver.identity_for(&device_address()).is_none());
}

#[test]
fn identity_follows_live_registrations() {
	let registrations = registrations();
	let resolver = CredentialResolver::new(security())
		.with_registrations(Arc::clone(&registrations) as Arc<dyn RegistrationStore>);

	assert_eq!(
		resolver.identity_for(&device_address()).as_deref(),
		Some("dev1-identity")
	);
	assert!(resolver
		.identity_for(&SocketAddr::from(([192, 168, 1, 21], 56830)))
		.is_none());

	registrations.remove(&"r1".into()).unwrap();
	assert!(resolver.identity_for(&device_address()).is_none());
}

#[test]
fn no_identity_for_devices_without_psk() {
	let registrations = registrations();
	registrations
		.register(Arc::new(
			Registration::builder("r2", "dev2", device_address()).build(),
		))
		.unwrap();

	let resolver = CredentialResolver::new(security())
		.with_registrations(registrations as Arc<dyn RegistrationStore>);

	assert!(resolver.identity_for(&device_address()).is_none());
}

struct UnreachableSecurityStore;

impl SecurityStore for UnreachableSecurityStore {
	fn get_by_endpoint(&self, _: &str) -> Result<Option<SecurityInfo>, SecurityError> {
		Err(SecurityError::Unavailable("connection refused".to_owned()))
	}

	fn get_by_identity(&self, _: &str) -> Result<Option<SecurityInfo>, SecurityError> {
		Err(SecurityError::Unavailable("connection refused".to_owned()))
	}
}

#[test]
#[traced_test]
fn store_failures_resolve_to_nothing() {
	let resolver = CredentialResolver::new(Arc::new(UnreachableSecurityStore))
		.with_registrations(registrations() as Arc<dyn RegistrationStore>);

	assert!(resolver.secret_for("dev1-identity").is_none());
	assert!(resolver.identity_for(&device_address()).is_none());
	assert!(logs_contain("Failed to look up security info"));
}
