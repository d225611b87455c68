use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::{error::StoreError, registration::RegistrationId};

/// CoAP tokens are at most 8 bytes long.
pub const TOKEN_MAX_LEN: usize = 8;

/// Context key carrying the owning registration id on an [`ObserveRequest`].
pub const CTX_REGISTRATION_ID: &str = "registration_id";
/// Context key carrying the observed resource path on an [`ObserveRequest`].
pub const CTX_PATH: &str = "path";

/// Transport metadata attached to an observation (connection or session binding, etc).
pub type ObservationContext = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum TokenError {
	#[error("token is {0} bytes long, at most {TOKEN_MAX_LEN} are allowed")]
	TooLong(usize),
	#[error("token is not valid hex: {0}")]
	Hex(#[from] hex::FromHexError),
}

/// Correlation token of an observation, compared and hashed by value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
	len: u8,
	bytes: [u8; TOKEN_MAX_LEN],
}

impl Token {
	pub fn new(bytes: &[u8]) -> Result<Self, TokenError> {
		if bytes.len() > TOKEN_MAX_LEN {
			return Err(TokenError::TooLong(bytes.len()));
		}

		let mut buf = [0; TOKEN_MAX_LEN];
		buf[..bytes.len()].copy_from_slice(bytes);

		Ok(Self {
			len: u8::try_from(bytes.len()).map_err(|_| TokenError::TooLong(bytes.len()))?,
			bytes: buf,
		})
	}

	#[must_use]
	pub fn as_bytes(&self) -> &[u8] {
		&self.bytes[..usize::from(self.len)]
	}

	#[must_use]
	pub fn len(&self) -> usize {
		usize::from(self.len)
	}

	#[must_use]
	pub const fn is_empty(&self) -> bool {
		self.len == 0
	}
}

impl TryFrom<&[u8]> for Token {
	type Error = TokenError;

	fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl FromStr for Token {
	type Err = TokenError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(&hex::decode(s)?)
	}
}

impl fmt::Display for Token {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&hex::encode(self.as_bytes()))
	}
}

impl fmt::Debug for Token {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Token").field(&hex::encode(self.as_bytes())).finish()
	}
}

impl Serialize for Token {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for Token {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		String::deserialize(deserializer)?
			.parse()
			.map_err(serde::de::Error::custom)
	}
}

#[derive(Debug, Error)]
pub enum PathError {
	#[error("empty resource path")]
	Empty,
	#[error("resource path '{0}' is deeper than object/instance/resource/resource-instance")]
	TooDeep(String),
	#[error("invalid segment '{segment}' in resource path '{path}'")]
	InvalidSegment { path: String, segment: String },
}

/// Path of an observed node: `/object[/instance[/resource[/resource-instance]]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath {
	object_id: u16,
	object_instance_id: Option<u16>,
	resource_id: Option<u16>,
	resource_instance_id: Option<u16>,
}

impl ResourcePath {
	#[must_use]
	pub const fn object(object_id: u16) -> Self {
		Self {
			object_id,
			object_instance_id: None,
			resource_id: None,
			resource_instance_id: None,
		}
	}

	#[must_use]
	pub const fn resource(object_id: u16, object_instance_id: u16, resource_id: u16) -> Self {
		Self {
			object_id,
			object_instance_id: Some(object_instance_id),
			resource_id: Some(resource_id),
			resource_instance_id: None,
		}
	}

	#[must_use]
	pub const fn object_id(&self) -> u16 {
		self.object_id
	}

	#[must_use]
	pub const fn object_instance_id(&self) -> Option<u16> {
		self.object_instance_id
	}

	#[must_use]
	pub const fn resource_id(&self) -> Option<u16> {
		self.resource_id
	}

	#[must_use]
	pub const fn resource_instance_id(&self) -> Option<u16> {
		self.resource_instance_id
	}
}

impl FromStr for ResourcePath {
	type Err = PathError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let trimmed = s.trim().trim_start_matches('/').trim_end_matches('/');
		if trimmed.is_empty() {
			return Err(PathError::Empty);
		}

		let ids = trimmed
			.split('/')
			.map(|segment| {
				segment.parse::<u16>().map_err(|_| PathError::InvalidSegment {
					path: s.to_owned(),
					segment: segment.to_owned(),
				})
			})
			.collect::<Result<Vec<_>, _>>()?;

		match ids[..] {
			[object_id] => Ok(Self::object(object_id)),
			[object_id, instance] => Ok(Self {
				object_instance_id: Some(instance),
				..Self::object(object_id)
			}),
			[object_id, instance, resource] => Ok(Self::resource(object_id, instance, resource)),
			[object_id, instance, resource, resource_instance] => Ok(Self {
				resource_instance_id: Some(resource_instance),
				..Self::resource(object_id, instance, resource)
			}),
			_ => Err(PathError::TooDeep(s.to_owned())),
		}
	}
}

impl fmt::Display for ResourcePath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "/{}", self.object_id)?;
		for id in [
			self.object_instance_id,
			self.resource_id,
			self.resource_instance_id,
		]
		.into_iter()
		.map_while(|id| id)
		{
			write!(f, "/{id}")?;
		}
		Ok(())
	}
}

impl Serialize for ResourcePath {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for ResourcePath {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		String::deserialize(deserializer)?
			.parse()
			.map_err(serde::de::Error::custom)
	}
}

/// An observe relation as the protocol layer sees it: a token plus its request context, where the
/// owning registration and the observed path travel as [`CTX_REGISTRATION_ID`] and [`CTX_PATH`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserveRequest {
	pub token: Token,
	pub context: ObservationContext,
}

impl ObserveRequest {
	pub fn new(token: Token, registration_id: &RegistrationId, path: ResourcePath) -> Self {
		Self {
			token,
			context: ObservationContext::from([
				(CTX_REGISTRATION_ID.to_owned(), registration_id.to_string()),
				(CTX_PATH.to_owned(), path.to_string()),
			]),
		}
	}

	#[must_use]
	pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.context.insert(key.into(), value.into());
		self
	}

	/// Splits the correlation metadata out of the request context.
	pub(crate) fn into_observation(mut self) -> Result<Observation, StoreError> {
		let registration_id = self.context.remove(CTX_REGISTRATION_ID).ok_or_else(|| {
			StoreError::InvalidState(format!(
				"missing registration id in the context of observation <token='{}'>",
				self.token
			))
		})?;

		let path = self
			.context
			.remove(CTX_PATH)
			.ok_or_else(|| {
				StoreError::InvalidState(format!(
					"missing resource path in the context of observation <token='{}'>",
					self.token
				))
			})?
			.parse()
			.map_err(|e: PathError| StoreError::InvalidState(e.to_string()))?;

		Ok(Observation {
			token: self.token,
			registration_id: registration_id.into(),
			path,
			context: self.context,
		})
	}
}

/// An observation in force. Values handed out by the store are copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
	pub token: Token,
	pub registration_id: RegistrationId,
	pub path: ResourcePath,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub context: ObservationContext,
}
