use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
	#[error("PSK identity '{identity}' is already used by endpoint '{endpoint}'")]
	NonUniqueIdentity { identity: String, endpoint: String },
	#[error("security store unavailable: {0}")]
	Unavailable(String),
}
