use std::{
	env,
	io,
	net::{Ipv6Addr, SocketAddr},
	path::{Path, PathBuf},
	time::Duration,
};

use lw_registration::{SweeperConfig, DEFAULT_GRACE_PERIOD, DEFAULT_STOP_TIMEOUT, DEFAULT_SWEEP_PERIOD};
use lw_security::SecurityInfo;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::builder::{DtlsSettings, DEFAULT_COAPS_PORT, DEFAULT_COAP_PORT};

/// Path of the JSON configuration file; built-in defaults are used when unset.
pub const CONFIG_PATH_VAR: &str = "LW_CONFIG";
pub const COAP_PORT_VAR: &str = "LW_COAP_PORT";
pub const COAPS_PORT_VAR: &str = "LW_COAPS_PORT";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
	pub coap_address: SocketAddr,
	pub coaps_address: SocketAddr,
	pub sweep_period_secs: u64,
	pub grace_period_secs: u64,
	pub stop_timeout_secs: u64,
	/// Used when `RUST_LOG` isn't set.
	pub log_filter: String,
	/// Devices allowed to connect through DTLS.
	pub security: Vec<SecurityInfo>,
	pub dtls: Option<DtlsSettings>,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			coap_address: SocketAddr::from((Ipv6Addr::UNSPECIFIED, DEFAULT_COAP_PORT)),
			coaps_address: SocketAddr::from((Ipv6Addr::UNSPECIFIED, DEFAULT_COAPS_PORT)),
			sweep_period_secs: DEFAULT_SWEEP_PERIOD.as_secs(),
			grace_period_secs: DEFAULT_GRACE_PERIOD.as_secs(),
			stop_timeout_secs: DEFAULT_STOP_TIMEOUT.as_secs(),
			log_filter: "info,lw_registration=debug".to_owned(),
			security: Vec::new(),
			dtls: None,
		}
	}
}

impl ServerConfig {
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		let bytes = fs::read(path).await.map_err(|source| ConfigError::FileIO {
			path: path.to_path_buf(),
			source,
		})?;

		Ok(serde_json::from_slice(&bytes)?)
	}

	pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
		let path = path.as_ref();

		fs::write(path, serde_json::to_vec_pretty(self)?)
			.await
			.map_err(|source| ConfigError::FileIO {
				path: path.to_path_buf(),
				source,
			})
	}

	/// Loads the file named by `LW_CONFIG` (or the defaults), then applies the port overrides.
	pub async fn from_env() -> Result<Self, ConfigError> {
		let mut config = match env::var_os(CONFIG_PATH_VAR) {
			Some(path) => Self::load(path).await?,
			None => Self::default(),
		};

		config.apply_overrides(|key| env::var(key).ok())?;

		Ok(config)
	}

	/// Applies `LW_COAP_PORT` and `LW_COAPS_PORT`, as returned by `lookup`, on top of the addresses.
	pub fn apply_overrides(
		&mut self,
		lookup: impl Fn(&str) -> Option<String>,
	) -> Result<(), ConfigError> {
		for (var, address) in [
			(COAP_PORT_VAR, &mut self.coap_address),
			(COAPS_PORT_VAR, &mut self.coaps_address),
		] {
			if let Some(value) = lookup(var) {
				let port = value
					.trim()
					.parse()
					.map_err(|_| ConfigError::InvalidPort { var, value })?;
				address.set_port(port);
			}
		}

		Ok(())
	}

	#[must_use]
	pub const fn sweeper_config(&self) -> SweeperConfig {
		SweeperConfig {
			period: Duration::from_secs(self.sweep_period_secs),
			grace: Duration::from_secs(self.grace_period_secs),
			stop_timeout: Duration::from_secs(self.stop_timeout_secs),
		}
	}
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to access config file '{}': {source}", .path.display())]
	FileIO {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error("invalid port in '{var}': '{value}'")]
	InvalidPort { var: &'static str, value: String },
}
