use std::{collections::HashMap, time::Duration};

use lw_security::{Secret, SecurityInfo};
use lw_server::{ConfigError, DtlsSettings, KeyMaterial, ServerConfig};
use tempfile::tempdir;

#[tokio::test]
async fn config_files_round_trip() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("server.json");

	let config = ServerConfig {
		sweep_period_secs: 10,
		security: vec![SecurityInfo::psk("dev1", "dev1-identity", Secret::new(*b"key"))],
		dtls: Some(DtlsSettings {
			public_key: Some(KeyMaterial::new([0xabu8, 0xcd])),
			..DtlsSettings::default()
		}),
		..ServerConfig::default()
	};
	config.save(&path).await.unwrap();

	let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
	assert_eq!(raw["dtls"]["public_key"], "abcd");
	assert_eq!(raw["security"][0]["material"]["key"], "6b6579");

	let loaded = ServerConfig::load(&path).await.unwrap();
	assert_eq!(loaded.sweep_period_secs, 10);
	assert_eq!(loaded.security[0].psk_identity(), Some("dev1-identity"));
	assert_eq!(
		loaded.security[0].pre_shared_key().unwrap().expose(),
		b"key"
	);
}

#[tokio::test]
async fn partial_files_fall_back_to_defaults() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("server.json");
	std::fs::write(&path, r#"{ "grace_period_secs": 3 }"#).unwrap();

	let config = ServerConfig::load(&path).await.unwrap();
	let sweeper = config.sweeper_config();

	assert_eq!(sweeper.grace, Duration::from_secs(3));
	assert_eq!(sweeper.period, Duration::from_secs(2));
	assert_eq!(sweeper.stop_timeout, Duration::from_secs(5));
	assert_eq!(config.coap_address.port(), 5683);
	assert!(config.dtls.is_none());
}

#[tokio::test]
async fn unreadable_files_are_reported() {
	let dir = tempdir().unwrap();

	assert!(matches!(
		ServerConfig::load(dir.path().join("missing.json")).await,
		Err(ConfigError::FileIO { .. })
	));

	let path = dir.path().join("broken.json");
	std::fs::write(&path, "{").unwrap();
	assert!(matches!(
		ServerConfig::load(&path).await,
		Err(ConfigError::SerdeJson(_))
	));
}

#[test]
fn port_overrides() {
	let vars = HashMap::from([("LW_COAP_PORT", "15683"), ("LW_COAPS_PORT", " 15684 ")]);

	let mut config = ServerConfig::default();
	config
		.apply_overrides(|key| vars.get(key).map(|value| (*value).to_owned()))
		.unwrap();

	assert_eq!(config.coap_address.port(), 15683);
	assert_eq!(config.coaps_address.port(), 15684);

	let mut config = ServerConfig::default();
	assert!(matches!(
		config.apply_overrides(|key| (key == "LW_COAPS_PORT").then(|| "https".to_owned())),
		Err(ConfigError::InvalidPort {
			var: "LW_COAPS_PORT",
			..
		})
	));
}
