// Storage configuration resolution.
//
// Each field is looked up in the environment first, then on the command
// line, then in the persisted settings. The `s3-config` command moves a
// whole config in and out of the settings as JSON or base64-encoded JSON.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;

use crate::storage::{StorageConfig, DEFAULT_REGION};
use crate::store::{KeyValueStore, StoreError};

/// Source of environment variables.
pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment. Empty variables count as unset.
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl Env for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Storage values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct StorageOverrides {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub bucket_name: Option<String>,
    pub public_endpoint: Option<String>,
    pub public_prefix: Option<String>,
}

// Settings-file keys, matching the serialized field names of StorageConfig.
const ACCESS_KEY: &str = "ACCESS_KEY";
const SECRET_KEY: &str = "SECRET_KEY";
const REGION: &str = "REGION";
const ENDPOINT: &str = "ENDPOINT";
const BUCKET_NAME: &str = "BUCKET_NAME";
const PUBLIC_ENDPOINT: &str = "PUBLIC_ENDPOINT";
const PUBLIC_PREFIX: &str = "PUBLIC_PREFIX";
const SSL: &str = "SSL";

fn pick(
    env: &dyn Env,
    env_key: &str,
    cli: &Option<String>,
    store: &dyn KeyValueStore,
    store_key: &str,
) -> Option<String> {
    env.var(env_key)
        .or_else(|| cli.clone().filter(|v| !v.is_empty()))
        .or_else(|| store.get(store_key).filter(|v| !v.is_empty()))
}

/// Merges environment, command line and settings, in that order.
/// The result is not validated.
pub fn resolve_storage_config(
    env: &dyn Env,
    cli: &StorageOverrides,
    store: &dyn KeyValueStore,
) -> StorageConfig {
    let get = |env_key: &str, cli: &Option<String>, store_key: &str| {
        pick(env, env_key, cli, store, store_key)
    };

    StorageConfig {
        access_key: get("S3_ACCESS_KEY", &cli.access_key, ACCESS_KEY).unwrap_or_default(),
        secret_key: get("S3_SECRET_KEY", &cli.secret_key, SECRET_KEY).unwrap_or_default(),
        region: get("S3_REGION", &cli.region, REGION)
            .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        endpoint: get("S3_ENDPOINT", &cli.endpoint, ENDPOINT).unwrap_or_default(),
        bucket_name: get("S3_BUCKET_NAME", &cli.bucket_name, BUCKET_NAME).unwrap_or_default(),
        public_endpoint: get("S3_PUBLIC_ENDPOINT", &cli.public_endpoint, PUBLIC_ENDPOINT)
            .unwrap_or_default(),
        public_prefix: get("S3_PUBLIC_PREFIX", &cli.public_prefix, PUBLIC_PREFIX),
        ssl: store.get(SSL).and_then(|v| v.parse().ok()),
    }
}

/// Writes every field of `config` to the settings, dropping unset optionals.
pub fn save_storage_config(
    store: &mut dyn KeyValueStore,
    config: &StorageConfig,
) -> Result<(), StoreError> {
    store.set(ACCESS_KEY, &config.access_key)?;
    store.set(SECRET_KEY, &config.secret_key)?;
    store.set(REGION, &config.region)?;
    store.set(ENDPOINT, &config.endpoint)?;
    store.set(BUCKET_NAME, &config.bucket_name)?;
    store.set(PUBLIC_ENDPOINT, &config.public_endpoint)?;
    match &config.public_prefix {
        Some(prefix) => store.set(PUBLIC_PREFIX, prefix)?,
        None => store.delete(PUBLIC_PREFIX)?,
    }
    match config.ssl {
        Some(ssl) => store.set(SSL, &ssl.to_string())?,
        None => store.delete(SSL)?,
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigImportError {
    #[error("not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decoded config is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("not a valid config object: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parses a config given either as a JSON object or as base64 of one.
pub fn parse_config_blob(input: &str) -> Result<StorageConfig, ConfigImportError> {
    let input = input.trim();
    let json = if input.starts_with('{') {
        input.to_string()
    } else {
        tracing::debug!("config is not JSON, decoding as base64");
        String::from_utf8(STANDARD.decode(input)?)?
    };
    let mut config: StorageConfig = serde_json::from_str(&json)?;
    if config.region.is_empty() {
        config.region = DEFAULT_REGION.to_string();
    }
    Ok(config)
}

/// JSON and base64 renderings of `config`, for sharing with teammates.
pub fn encode_config_blob(config: &StorageConfig) -> Result<(String, String), serde_json::Error> {
    let json = serde_json::to_string(config)?;
    let encoded = STANDARD.encode(json.as_bytes());
    Ok((json, encoded))
}
