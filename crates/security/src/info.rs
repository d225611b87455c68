use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key bytes, wiped from memory on drop and hidden from `Debug`.
///
/// Cloning is the only way to get a copy out of a store, and the copy is wiped independently.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(#[serde(with = "hex")] Vec<u8>);

impl Secret {
	pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
		Self(bytes.into())
	}

	#[must_use]
	pub fn expose(&self) -> &[u8] {
		&self.0
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for Secret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("[REDACTED]")
	}
}

/// How a device authenticates during the DTLS handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SecurityMaterial {
	PreSharedKey {
		identity: String,
		key: Secret,
	},
	RawPublicKey {
		#[serde(with = "hex")]
		public_key: Vec<u8>,
	},
	/// Certificate based; the device is identified by its certificate's common name.
	X509,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityInfo {
	endpoint: String,
	material: SecurityMaterial,
}

impl SecurityInfo {
	pub fn psk(endpoint: impl Into<String>, identity: impl Into<String>, key: Secret) -> Self {
		Self {
			endpoint: endpoint.into(),
			material: SecurityMaterial::PreSharedKey {
				identity: identity.into(),
				key,
			},
		}
	}

	pub fn rpk(endpoint: impl Into<String>, public_key: impl Into<Vec<u8>>) -> Self {
		Self {
			endpoint: endpoint.into(),
			material: SecurityMaterial::RawPublicKey {
				public_key: public_key.into(),
			},
		}
	}

	pub fn x509(endpoint: impl Into<String>) -> Self {
		Self {
			endpoint: endpoint.into(),
			material: SecurityMaterial::X509,
		}
	}

	#[must_use]
	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	#[must_use]
	pub const fn material(&self) -> &SecurityMaterial {
		&self.material
	}

	#[must_use]
	pub fn psk_identity(&self) -> Option<&str> {
		match &self.material {
			SecurityMaterial::PreSharedKey { identity, .. } => Some(identity),
			SecurityMaterial::RawPublicKey { .. } | SecurityMaterial::X509 => None,
		}
	}

	#[must_use]
	pub const fn pre_shared_key(&self) -> Option<&Secret> {
		match &self.material {
			SecurityMaterial::PreSharedKey { key, .. } => Some(key),
			SecurityMaterial::RawPublicKey { .. } | SecurityMaterial::X509 => None,
		}
	}
}
