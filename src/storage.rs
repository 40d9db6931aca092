// Object storage facade: config validation, directory upload, listing and
// public URL formatting. The wire work is delegated to an `ObjectTransport`
// (see `s3.rs` for the real one) so the pipeline can run against a fake.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The document browsers load first. Its key yields the published URL.
pub const ENTRY_DOCUMENT: &str = "index.html";

pub const DEFAULT_REGION: &str = "ru-1";

/// Characters `encodeURI` escapes, plus `! ' ( ) *` which S3 rejects in
/// unescaped form.
const S3_KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}')
    .add(b'!')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*');

/// Connection settings for the bucket the build is published to.
///
/// Field names serialize in upper case (`ACCESS_KEY`, `BUCKET_NAME`, ...),
/// which is the shape used both by the settings file and by `s3-config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct StorageConfig {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub endpoint: String,
    pub bucket_name: String,
    pub public_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl: Option<bool>,
}

/// First violated rule of a [`StorageConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidConfig {
    #[error("empty access key")]
    EmptyAccessKey,
    #[error("empty secret key")]
    EmptySecretKey,
    #[error("empty region")]
    EmptyRegion,
    #[error("empty bucket name")]
    EmptyBucketName,
    #[error("empty endpoint")]
    EmptyEndpoint,
    #[error("empty public endpoint")]
    EmptyPublicEndpoint,
    #[error("endpoint must start with https://")]
    InsecureEndpoint,
    #[error("public endpoint must start with https://")]
    InsecurePublicEndpoint,
}

impl StorageConfig {
    /// Checks the rules in a fixed order and reports the first one broken.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.access_key.is_empty() {
            return Err(InvalidConfig::EmptyAccessKey);
        }
        if self.secret_key.is_empty() {
            return Err(InvalidConfig::EmptySecretKey);
        }
        if self.region.is_empty() {
            return Err(InvalidConfig::EmptyRegion);
        }
        if self.bucket_name.is_empty() {
            return Err(InvalidConfig::EmptyBucketName);
        }
        if self.endpoint.is_empty() {
            return Err(InvalidConfig::EmptyEndpoint);
        }
        if self.public_endpoint.is_empty() {
            return Err(InvalidConfig::EmptyPublicEndpoint);
        }
        if !self.endpoint.starts_with("https://") {
            return Err(InvalidConfig::InsecureEndpoint);
        }
        if !self.public_endpoint.starts_with("https://") {
            return Err(InvalidConfig::InsecurePublicEndpoint);
        }
        Ok(())
    }

    pub fn ssl(&self) -> bool {
        self.ssl.unwrap_or(true)
    }

    /// Public URL of an uploaded `key`.
    ///
    /// With a public endpoint the key is appended verbatim, so callers must
    /// pass an already encoded key. Without one the URL is built path-style
    /// against the storage endpoint and the key is escaped.
    pub fn public_url(&self, key: &str) -> String {
        if !self.public_endpoint.is_empty() {
            let prefix = self.public_prefix.as_deref().unwrap_or_default();
            return format!("{}{}{}", self.public_endpoint, prefix, key);
        }
        if self.endpoint.is_empty() {
            return key.to_string();
        }

        let default_scheme = if self.ssl() { "https" } else { "http" };
        let endpoint = if self.endpoint.contains("http") {
            self.endpoint.clone()
        } else {
            format!("{default_scheme}://{}", self.endpoint)
        };
        let (scheme, authority) = match Url::parse(&endpoint) {
            Ok(url) => {
                let host = url.host_str().unwrap_or_default().to_string();
                let authority = match url.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host,
                };
                (url.scheme().to_string(), authority)
            }
            Err(_) => (default_scheme.to_string(), self.endpoint.clone()),
        };
        format!(
            "{scheme}://{authority}/{}/{}",
            self.bucket_name,
            encode_special_characters(key)
        )
    }
}

/// URI-encodes an object key the way S3 expects it in a path.
pub fn encode_special_characters(key: &str) -> String {
    utf8_percent_encode(key, S3_KEY_ENCODE_SET).to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("failed to put object {key}: {message}")]
    Put { key: String, message: String },

    #[error("failed to list objects under {prefix:?}: {message}")]
    List { prefix: String, message: String },

    #[error("failed to start storage runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// A local file queued for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingObject {
    pub local_path: PathBuf,
    pub key: String,
    pub content_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Wire operations against a bucket.
pub trait ObjectTransport {
    /// Uploads every object as publicly readable. Returns on the first
    /// terminal error; objects already sent stay in the bucket.
    fn put_objects(&self, bucket: &str, objects: &[PendingObject]) -> Result<(), TransportError>;

    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectInfo>, TransportError>;
}

/// Keys written by one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub keys: Vec<String>,
    pub entry_key: String,
}

pub struct ObjectStore {
    config: StorageConfig,
    transport: Box<dyn ObjectTransport>,
}

impl ObjectStore {
    /// Validates `config` and binds it to a transport.
    pub fn new(
        config: StorageConfig,
        transport: Box<dyn ObjectTransport>,
    ) -> Result<Self, InvalidConfig> {
        config.validate()?;
        Ok(Self { config, transport })
    }

    /// Uploads every file below `local_dir` as `remote_prefix + basename`.
    ///
    /// The tree is flattened: `static/js/main.js` lands at
    /// `<prefix>main.js`. Keys are deterministic, so re-running after a
    /// partial failure overwrites rather than duplicates.
    pub fn upload_directory(
        &self,
        local_dir: &Path,
        remote_prefix: &str,
    ) -> Result<UploadResult, TransportError> {
        let files = scan_files(local_dir).map_err(|e| TransportError::Read {
            path: local_dir.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut objects: Vec<PendingObject> = Vec::with_capacity(files.len());
        for path in files {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let key = format!("{remote_prefix}{name}");
            if objects.iter().any(|o| o.key == key) {
                tracing::warn!(%key, path = %path.display(), "duplicate file name, later file wins");
                objects.retain(|o| o.key != key);
            }
            objects.push(PendingObject {
                content_type: content_type_for(&name),
                local_path: path,
                key,
            });
        }

        tracing::debug!(
            bucket = %self.config.bucket_name,
            count = objects.len(),
            prefix = remote_prefix,
            "uploading objects"
        );
        self.transport
            .put_objects(&self.config.bucket_name, &objects)?;

        Ok(UploadResult {
            keys: objects.into_iter().map(|o| o.key).collect(),
            entry_key: format!("{remote_prefix}{ENTRY_DOCUMENT}"),
        })
    }

    pub fn public_url(&self, key: &str) -> String {
        self.config.public_url(key)
    }

    pub fn list_objects(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectInfo>, TransportError> {
        self.transport
            .list_objects(&self.config.bucket_name, prefix, recursive)
    }
}

/// Recursively collects regular files under `root`, sorted by path.
pub fn scan_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk_dir(root, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk_dir(current: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = std::fs::metadata(&path)?;

        if metadata.is_dir() {
            walk_dir(&path, files)?;
        } else if metadata.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

/// Content type for the usual static-site file kinds.
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}
