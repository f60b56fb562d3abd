//! Exporter configuration loading and validation.

use crate::error::ConfigError;
use crate::schema::BatchSchema;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// User agent sent to history archives when none is configured.
pub const DEFAULT_USER_AGENT: &str = "ledgerlake";

const PUBNET_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";
const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";

const PUBNET_ARCHIVE_URLS: &[&str] = &[
    "https://history.stellar.org/prd/core-live/core_live_001",
    "https://history.stellar.org/prd/core-live/core_live_002",
    "https://history.stellar.org/prd/core-live/core_live_003",
];
const TESTNET_ARCHIVE_URLS: &[&str] = &[
    "https://history.stellar.org/prd/core-testnet/core_testnet_001",
    "https://history.stellar.org/prd/core-testnet/core_testnet_002",
    "https://history.stellar.org/prd/core-testnet/core_testnet_003",
];

/// Top-level exporter configuration, loaded from a TOML file.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Reserved for an operational HTTP listener; parsed and validated but
    /// not served by this crate.
    #[serde(default)]
    pub admin_port: Option<u16>,

    pub network_name: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    pub datastore_config: DataStoreConfig,

    pub stellar_core_config: StellarCoreConfig,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

/// Destination store selection and layout.
#[derive(Clone, Debug, Deserialize)]
pub struct DataStoreConfig {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub params: HashMap<String, String>,

    pub schema: SchemaConfig,
}

/// Batch layout parameters; must match on every writer and reader of the
/// same bucket.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct SchemaConfig {
    pub ledgers_per_file: u32,
    pub files_per_partition: u32,
}

/// Replay source configuration.
///
/// Either `preconfigured_network` names a known network, or the
/// passphrase/archive/toml triple is fully specified.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StellarCoreConfig {
    #[serde(default)]
    pub preconfigured_network: String,

    #[serde(default)]
    pub network_passphrase: String,

    #[serde(default)]
    pub history_archive_urls: Vec<String>,

    #[serde(default)]
    pub captive_core_toml_path: String,

    /// Resolved from `PATH` when empty.
    #[serde(default)]
    pub stellar_core_binary_path: String,
}

/// Network parameters after preconfigured names are expanded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedNetwork {
    pub passphrase: String,
    pub archive_urls: Vec<String>,
}

impl StellarCoreConfig {
    /// Expand the configuration into concrete network parameters.
    pub fn resolve(&self) -> Result<ResolvedNetwork, ConfigError> {
        match self.preconfigured_network.as_str() {
            "pubnet" => Ok(ResolvedNetwork {
                passphrase: PUBNET_PASSPHRASE.to_string(),
                archive_urls: PUBNET_ARCHIVE_URLS.iter().map(|s| s.to_string()).collect(),
            }),
            "testnet" => Ok(ResolvedNetwork {
                passphrase: TESTNET_PASSPHRASE.to_string(),
                archive_urls: TESTNET_ARCHIVE_URLS.iter().map(|s| s.to_string()).collect(),
            }),
            "" => {
                if self.network_passphrase.is_empty()
                    || self.history_archive_urls.is_empty()
                    || self.captive_core_toml_path.is_empty()
                {
                    return Err(ConfigError::Invalid(
                        "stellar_core_config requires either preconfigured_network or the full \
                         network_passphrase / history_archive_urls / captive_core_toml_path triple"
                            .into(),
                    ));
                }
                Ok(ResolvedNetwork {
                    passphrase: self.network_passphrase.clone(),
                    archive_urls: self.history_archive_urls.clone(),
                })
            }
            other => Err(ConfigError::Invalid(format!(
                "unknown preconfigured network {other:?}, expected \"pubnet\" or \"testnet\""
            ))),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from TOML text (validated).
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.network_name.is_empty() {
            return Err(ConfigError::Invalid("network_name must not be empty".into()));
        }
        self.batch_schema()?;
        self.stellar_core_config.resolve()?;
        Ok(())
    }

    /// The batch schema configured for the destination store.
    pub fn batch_schema(&self) -> Result<BatchSchema, ConfigError> {
        BatchSchema::new(
            self.datastore_config.schema.ledgers_per_file,
            self.datastore_config.schema.files_per_partition,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        admin_port = 6061
        network_name = "testnet"
        user_agent = "ledgerlake-itest"

        [datastore_config]
        type = "fs"
        params = { base_path = "/data/lake" }
        schema = { ledgers_per_file = 64, files_per_partition = 10 }

        [stellar_core_config]
        preconfigured_network = "testnet"
    "#;

    #[test]
    fn parses_a_full_config() {
        let config = Config::from_toml(FULL).unwrap();
        assert_eq!(config.admin_port, Some(6061));
        assert_eq!(config.network_name, "testnet");
        assert_eq!(config.user_agent, "ledgerlake-itest");
        assert_eq!(config.datastore_config.kind, "fs");
        assert_eq!(
            config.datastore_config.params.get("base_path").unwrap(),
            "/data/lake"
        );
        let schema = config.batch_schema().unwrap();
        assert_eq!(schema.ledgers_per_file(), 64);
        assert_eq!(schema.files_per_partition(), 10);
    }

    #[test]
    fn user_agent_defaults() {
        let config = Config::from_toml(
            r#"
            network_name = "pubnet"
            [datastore_config]
            type = "memory"
            schema = { ledgers_per_file = 1, files_per_partition = 64000 }
            [stellar_core_config]
            preconfigured_network = "pubnet"
            "#,
        )
        .unwrap();
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.admin_port, None);
    }

    #[test]
    fn network_name_is_required() {
        let err = Config::from_toml(
            r#"
            [datastore_config]
            type = "memory"
            schema = { ledgers_per_file = 1, files_per_partition = 1 }
            [stellar_core_config]
            preconfigured_network = "testnet"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn schema_parameters_must_be_positive() {
        let err = Config::from_toml(
            r#"
            network_name = "testnet"
            [datastore_config]
            type = "memory"
            schema = { ledgers_per_file = 0, files_per_partition = 1 }
            [stellar_core_config]
            preconfigured_network = "testnet"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn preconfigured_networks_expand() {
        let pubnet = StellarCoreConfig {
            preconfigured_network: "pubnet".into(),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(pubnet.passphrase, PUBNET_PASSPHRASE);
        assert_eq!(pubnet.archive_urls.len(), 3);

        let testnet = StellarCoreConfig {
            preconfigured_network: "testnet".into(),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(testnet.passphrase, TESTNET_PASSPHRASE);
    }

    #[test]
    fn custom_network_requires_the_full_triple() {
        let incomplete = StellarCoreConfig {
            network_passphrase: "Standalone Network ; February 2017".into(),
            ..Default::default()
        };
        assert!(incomplete.resolve().is_err());

        let complete = StellarCoreConfig {
            network_passphrase: "Standalone Network ; February 2017".into(),
            history_archive_urls: vec!["http://localhost:1570".into()],
            captive_core_toml_path: "standalone.toml".into(),
            ..Default::default()
        };
        let resolved = complete.resolve().unwrap();
        assert_eq!(resolved.archive_urls.len(), 1);
    }

    #[test]
    fn unknown_preconfigured_network_is_rejected() {
        let err = StellarCoreConfig {
            preconfigured_network: "devnet".into(),
            ..Default::default()
        }
        .resolve()
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
