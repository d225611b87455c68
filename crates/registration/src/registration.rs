use std::{
	collections::{BTreeMap, BTreeSet},
	fmt,
	net::SocketAddr,
	str::FromStr,
	sync::Arc,
	time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::observation::Observation;

/// Lifetime assumed when a device doesn't declare one.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(86_400);

/// Latency margin added on top of a registration's lifetime before it is considered dead.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

const DEFAULT_LWM2M_VERSION: &str = "1.0";

/// Server assigned identifier of a registration, distinct from the device chosen endpoint name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrationId(String);

impl RegistrationId {
	#[must_use]
	pub fn generate() -> Self {
		Self(Uuid::new_v4().simple().to_string())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RegistrationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for RegistrationId {
	fn from(value: &str) -> Self {
		Self(value.to_owned())
	}
}

impl From<String> for RegistrationId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

#[derive(Debug, Error)]
#[error("unknown binding mode: '{0}'")]
pub struct BindingError(String);

/// How the server may reach the device: UDP, SMS, or both, optionally in queue mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingMode {
	#[default]
	U,
	UQ,
	S,
	SQ,
	US,
	UQS,
}

impl BindingMode {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::U => "U",
			Self::UQ => "UQ",
			Self::S => "S",
			Self::SQ => "SQ",
			Self::US => "US",
			Self::UQS => "UQS",
		}
	}

	#[must_use]
	pub const fn is_queue_mode(self) -> bool {
		matches!(self, Self::UQ | Self::SQ | Self::UQS)
	}

	#[must_use]
	pub const fn uses_sms(self) -> bool {
		matches!(self, Self::S | Self::SQ | Self::US | Self::UQS)
	}
}

impl fmt::Display for BindingMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for BindingMode {
	type Err = BindingError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"U" => Ok(Self::U),
			"UQ" => Ok(Self::UQ),
			"S" => Ok(Self::S),
			"SQ" => Ok(Self::SQ),
			"US" => Ok(Self::US),
			"UQS" => Ok(Self::UQS),
			other => Err(BindingError(other.to_owned())),
		}
	}
}

#[derive(Debug, Error)]
pub enum LinkError {
	#[error("link is missing its '<uri>' target: '{0}'")]
	MissingUri(String),
	#[error("invalid link attribute: '{0}'")]
	InvalidAttribute(String),
}

/// One entry of the CoRE link list a device declares when registering, e.g. `</3/0>;ver=1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
	uri: String,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	attributes: BTreeMap<String, Option<String>>,
}

impl Link {
	pub fn new(uri: impl Into<String>) -> Self {
		Self {
			uri: uri.into(),
			attributes: BTreeMap::new(),
		}
	}

	#[must_use]
	pub fn with_attribute(mut self, key: impl Into<String>, value: Option<String>) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	#[must_use]
	pub fn uri(&self) -> &str {
		&self.uri
	}

	#[must_use]
	pub const fn attributes(&self) -> &BTreeMap<String, Option<String>> {
		&self.attributes
	}

	/// Parses a comma separated CoRE link-format payload.
	pub fn parse_list(input: &str) -> Result<Vec<Self>, LinkError> {
		let input = input.trim();
		if input.is_empty() {
			return Ok(Vec::new());
		}

		split_unquoted(input, ',')
			.into_iter()
			.map(str::parse)
			.collect()
	}
}

impl FromStr for Link {
	type Err = LinkError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut parts = split_unquoted(s.trim(), ';').into_iter();

		let uri = parts
			.next()
			.map(str::trim)
			.and_then(|target| target.strip_prefix('<'))
			.and_then(|target| target.strip_suffix('>'))
			.ok_or_else(|| LinkError::MissingUri(s.to_owned()))?;

		let mut link = Self::new(uri);

		for attribute in parts.map(str::trim) {
			let (key, value) = match attribute.split_once('=') {
				Some((key, value)) => (key.trim(), Some(value.trim().trim_matches('"').to_owned())),
				None => (attribute, None),
			};

			if key.is_empty() {
				return Err(LinkError::InvalidAttribute(attribute.to_owned()));
			}

			link.attributes.insert(key.to_owned(), value);
		}

		Ok(link)
	}
}

impl fmt::Display for Link {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "<{}>", self.uri)?;

		for (key, value) in &self.attributes {
			match value {
				None => write!(f, ";{key}")?,
				Some(value)
					if value
						.chars()
						.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')) =>
				{
					write!(f, ";{key}={value}")?;
				}
				Some(value) => write!(f, ";{key}=\"{value}\"")?,
			}
		}

		Ok(())
	}
}

fn split_unquoted(input: &str, separator: char) -> Vec<&str> {
	let mut parts = Vec::new();
	let mut start = 0;
	let mut quoted = false;

	for (idx, c) in input.char_indices() {
		if c == '"' {
			quoted = !quoted;
		} else if c == separator && !quoted {
			parts.push(&input[start..idx]);
			start = idx + c.len_utf8();
		}
	}
	parts.push(&input[start..]);

	parts
}

/// A device's current registration.
///
/// Registrations are never mutated once built: an update produces a whole new instance, and the store
/// hands them out as shared `Arc<Registration>` snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
	id: RegistrationId,
	endpoint: String,
	address: SocketAddr,
	#[serde(with = "duration_secs")]
	lifetime: Duration,
	binding: BindingMode,
	lwm2m_version: String,
	sms_number: Option<String>,
	content_formats: BTreeSet<u16>,
	object_links: Vec<Link>,
	additional_attributes: BTreeMap<String, String>,
	registration_date: DateTime<Utc>,
	last_update: DateTime<Utc>,
}

impl Registration {
	pub fn builder(
		id: impl Into<RegistrationId>,
		endpoint: impl Into<String>,
		address: SocketAddr,
	) -> RegistrationBuilder {
		RegistrationBuilder::new(id.into(), endpoint.into(), address)
	}

	#[must_use]
	pub const fn id(&self) -> &RegistrationId {
		&self.id
	}

	#[must_use]
	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	#[must_use]
	pub const fn address(&self) -> SocketAddr {
		self.address
	}

	#[must_use]
	pub const fn lifetime(&self) -> Duration {
		self.lifetime
	}

	#[must_use]
	pub const fn binding(&self) -> BindingMode {
		self.binding
	}

	#[must_use]
	pub fn lwm2m_version(&self) -> &str {
		&self.lwm2m_version
	}

	#[must_use]
	pub fn sms_number(&self) -> Option<&str> {
		self.sms_number.as_deref()
	}

	#[must_use]
	pub const fn content_formats(&self) -> &BTreeSet<u16> {
		&self.content_formats
	}

	#[must_use]
	pub fn object_links(&self) -> &[Link] {
		&self.object_links
	}

	#[must_use]
	pub const fn additional_attributes(&self) -> &BTreeMap<String, String> {
		&self.additional_attributes
	}

	#[must_use]
	pub const fn registration_date(&self) -> DateTime<Utc> {
		self.registration_date
	}

	#[must_use]
	pub const fn last_update(&self) -> DateTime<Utc> {
		self.last_update
	}

	/// Instant after which the registration is dead, `None` if it can't be represented.
	#[must_use]
	pub fn expiration(&self, grace: Duration) -> Option<DateTime<Utc>> {
		chrono::Duration::from_std(self.lifetime.saturating_add(grace))
			.ok()
			.and_then(|ttl| self.last_update.checked_add_signed(ttl))
	}

	/// Whether `now` is still within `last_update + lifetime + grace`.
	#[must_use]
	pub fn is_alive_at(&self, now: DateTime<Utc>, grace: Duration) -> bool {
		// A negative elapsed time (clock skew, future last update) counts as alive
		(now - self.last_update)
			.to_std()
			.map_or(true, |elapsed| elapsed <= self.lifetime.saturating_add(grace))
	}

	#[must_use]
	pub fn is_alive(&self, grace: Duration) -> bool {
		self.is_alive_at(Utc::now(), grace)
	}
}

#[derive(Debug, Clone)]
pub struct RegistrationBuilder {
	id: RegistrationId,
	endpoint: String,
	address: SocketAddr,
	lifetime: Duration,
	binding: BindingMode,
	lwm2m_version: String,
	sms_number: Option<String>,
	content_formats: BTreeSet<u16>,
	object_links: Vec<Link>,
	additional_attributes: BTreeMap<String, String>,
	registration_date: Option<DateTime<Utc>>,
	last_update: Option<DateTime<Utc>>,
}

impl RegistrationBuilder {
	fn new(id: RegistrationId, endpoint: String, address: SocketAddr) -> Self {
		Self {
			id,
			endpoint,
			address,
			lifetime: DEFAULT_LIFETIME,
			binding: BindingMode::default(),
			lwm2m_version: DEFAULT_LWM2M_VERSION.to_owned(),
			sms_number: None,
			content_formats: BTreeSet::new(),
			object_links: Vec::new(),
			additional_attributes: BTreeMap::new(),
			registration_date: None,
			last_update: None,
		}
	}

	#[must_use]
	pub const fn lifetime(mut self, lifetime: Duration) -> Self {
		self.lifetime = lifetime;
		self
	}

	#[must_use]
	pub const fn binding(mut self, binding: BindingMode) -> Self {
		self.binding = binding;
		self
	}

	#[must_use]
	pub fn lwm2m_version(mut self, version: impl Into<String>) -> Self {
		self.lwm2m_version = version.into();
		self
	}

	#[must_use]
	pub fn sms_number(mut self, sms_number: impl Into<String>) -> Self {
		self.sms_number = Some(sms_number.into());
		self
	}

	#[must_use]
	pub fn content_formats(mut self, formats: impl IntoIterator<Item = u16>) -> Self {
		self.content_formats = formats.into_iter().collect();
		self
	}

	#[must_use]
	pub fn object_links(mut self, links: Vec<Link>) -> Self {
		self.object_links = links;
		self
	}

	#[must_use]
	pub fn additional_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.additional_attributes.insert(key.into(), value.into());
		self
	}

	#[must_use]
	pub const fn registration_date(mut self, date: DateTime<Utc>) -> Self {
		self.registration_date = Some(date);
		self
	}

	#[must_use]
	pub const fn last_update(mut self, date: DateTime<Utc>) -> Self {
		self.last_update = Some(date);
		self
	}

	#[must_use]
	pub fn build(self) -> Registration {
		let now = Utc::now();
		let registration_date = self.registration_date.unwrap_or(now);

		Registration {
			id: self.id,
			endpoint: self.endpoint,
			address: self.address,
			lifetime: self.lifetime,
			binding: self.binding,
			lwm2m_version: self.lwm2m_version,
			sms_number: self.sms_number,
			content_formats: self.content_formats,
			object_links: self.object_links,
			additional_attributes: self.additional_attributes,
			registration_date,
			last_update: self.last_update.unwrap_or(registration_date),
		}
	}
}

/// A registration refresh sent by the device. Every `None` field keeps the previous value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationUpdate {
	pub registration_id: RegistrationId,
	pub address: Option<SocketAddr>,
	#[serde(default, with = "duration_secs::option")]
	pub lifetime: Option<Duration>,
	pub sms_number: Option<String>,
	pub binding: Option<BindingMode>,
	pub object_links: Option<Vec<Link>>,
	#[serde(default)]
	pub additional_attributes: BTreeMap<String, String>,
}

impl RegistrationUpdate {
	pub fn new(registration_id: impl Into<RegistrationId>) -> Self {
		Self {
			registration_id: registration_id.into(),
			address: None,
			lifetime: None,
			sms_number: None,
			binding: None,
			object_links: None,
			additional_attributes: BTreeMap::new(),
		}
	}

	/// Builds the registration that replaces `previous`, refreshed at `now`.
	#[must_use]
	pub fn apply(&self, previous: &Registration, now: DateTime<Utc>) -> Registration {
		let mut additional_attributes = previous.additional_attributes.clone();
		additional_attributes.extend(self.additional_attributes.clone());

		Registration {
			id: previous.id.clone(),
			endpoint: previous.endpoint.clone(),
			address: self.address.unwrap_or(previous.address),
			lifetime: self.lifetime.unwrap_or(previous.lifetime),
			binding: self.binding.unwrap_or(previous.binding),
			lwm2m_version: previous.lwm2m_version.clone(),
			sms_number: self
				.sms_number
				.clone()
				.or_else(|| previous.sms_number.clone()),
			content_formats: previous.content_formats.clone(),
			object_links: self
				.object_links
				.clone()
				.unwrap_or_else(|| previous.object_links.clone()),
			additional_attributes,
			registration_date: previous.registration_date,
			last_update: now,
		}
	}
}

/// A registration that left the store, together with the observations removed along with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deregistration {
	pub registration: Arc<Registration>,
	pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedRegistration {
	pub previous: Arc<Registration>,
	pub updated: Arc<Registration>,
}

mod duration_secs {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		duration.as_secs().serialize(serializer)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_secs)
	}

	pub mod option {
		use std::time::Duration;

		use serde::{Deserialize, Deserializer, Serialize, Serializer};

		#[allow(clippy::ref_option)]
		pub fn serialize<S: Serializer>(
			duration: &Option<Duration>,
			serializer: S,
		) -> Result<S::Ok, S::Error> {
			duration.map(|duration| duration.as_secs()).serialize(serializer)
		}

		pub fn deserialize<'de, D: Deserializer<'de>>(
			deserializer: D,
		) -> Result<Option<Duration>, D::Error> {
			Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
		}
	}
}
