// The publish pipeline: preflight, config, naming, upload, and testing
// group registration.
//
// Every collaborator with side effects (git, prompts, settings, storage,
// VK API) is injected, so a whole run can be exercised in-process.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::api::{GroupRegistry, GroupRegistryClient, RegistryError, TestGroup};
use crate::config::{resolve_storage_config, Env, StorageOverrides};
use crate::error::PublishError;
use crate::git::RepoInspector;
use crate::naming::RemoteNamer;
use crate::s3::S3Transport;
use crate::storage::{ObjectStore, ObjectTransport, StorageConfig, TransportError, ENTRY_DOCUMENT};
use crate::store::{CredentialStore, KeyValueStore};
use crate::ui::{Prompt, Spinner};

/// Builds the network clients once their settings are known.
pub trait Connector {
    fn object_transport(
        &self,
        config: &StorageConfig,
    ) -> Result<Box<dyn ObjectTransport>, TransportError>;

    fn group_registry(&self, token: &str) -> Result<Box<dyn GroupRegistry>, RegistryError>;
}

/// S3 over aws-sdk-s3 and the public VK API.
pub struct LiveConnector;

impl Connector for LiveConnector {
    fn object_transport(
        &self,
        config: &StorageConfig,
    ) -> Result<Box<dyn ObjectTransport>, TransportError> {
        Ok(Box::new(S3Transport::connect(config)?))
    }

    fn group_registry(&self, token: &str) -> Result<Box<dyn GroupRegistry>, RegistryError> {
        Ok(Box::new(GroupRegistryClient::new(token)?))
    }
}

/// What the caller asked for on the command line.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub build_dir: PathBuf,
    pub upload_prefix: Option<String>,
    pub group_name: Option<String>,
    pub app_id: Option<String>,
    pub force: bool,
    pub check_only: bool,
    pub storage: StorageOverrides,
}

impl Default for PublishOptions {
    fn default() -> Self {
        PublishOptions {
            build_dir: PathBuf::from("build"),
            upload_prefix: None,
            group_name: None,
            app_id: None,
            force: false,
            check_only: false,
            storage: StorageOverrides::default(),
        }
    }
}

/// Inputs of one run after every default and override is applied.
#[derive(Debug, Clone)]
pub struct PublishContext {
    pub storage: StorageConfig,
    pub build_dir: PathBuf,
    pub remote_prefix: String,
    pub group_name: String,
    pub app_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredGroup {
    pub group_id: i64,
    pub name: String,
    pub manage_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub url: String,
    pub remote_prefix: String,
    pub uploaded: usize,
    /// `None` when no app id was given or no access token was entered.
    pub group: Option<RegisteredGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// `--check-only`: the working tree passed preflight, nothing was sent.
    Checked,
    Published(PublishReport),
}

/// Link to the testing-group page of an app.
pub fn manage_url(app_id: &str) -> String {
    format!("https://vk.com/editapp?id={app_id}&section=testing_groups")
}

/// Id of the group to overwrite for `name`.
///
/// When several groups share the name the one listed last wins, so repeated
/// runs keep updating a single group instead of creating new ones.
pub fn find_group_id(groups: &[TestGroup], name: &str) -> Option<i64> {
    let mut found = None;
    for group in groups.iter().filter(|g| g.name == name) {
        tracing::debug!(group_id = ?group.group_id, name, "found testing group with same name");
        found = group.group_id;
    }
    found
}

pub struct PublishPipeline<'a> {
    env: &'a dyn Env,
    repo: &'a dyn RepoInspector,
    prompt: &'a dyn Prompt,
    connector: &'a dyn Connector,
    store: &'a mut dyn KeyValueStore,
    now: DateTime<Utc>,
}

impl<'a> PublishPipeline<'a> {
    pub fn new(
        env: &'a dyn Env,
        repo: &'a dyn RepoInspector,
        prompt: &'a dyn Prompt,
        connector: &'a dyn Connector,
        store: &'a mut dyn KeyValueStore,
    ) -> Self {
        PublishPipeline {
            env,
            repo,
            prompt,
            connector,
            store,
            now: Utc::now(),
        }
    }

    /// Pins the clock used for the default upload prefix.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn run(&mut self, opts: &PublishOptions) -> Result<PublishOutcome, PublishError> {
        self.preflight(opts)?;
        if opts.check_only {
            tracing::info!("working tree checks passed");
            return Ok(PublishOutcome::Checked);
        }

        let ctx = self.resolve_context(opts)?;
        let report = self.publish(&ctx)?;
        Ok(PublishOutcome::Published(report))
    }

    fn preflight(&self, opts: &PublishOptions) -> Result<(), PublishError> {
        if opts.force {
            return Ok(());
        }
        if let Some(changes) = self.repo.uncommitted_changes() {
            let message = format!("{changes}\nThere are uncommitted changes, continue?");
            if !self.prompt.confirm(&message).map_err(PublishError::Prompt)? {
                return Err(PublishError::Preflight("uncommitted changes".into()));
            }
        } else if self.repo.is_ahead_of_upstream() {
            let message = "The current branch does not look pushed, continue?";
            if !self.prompt.confirm(message).map_err(PublishError::Prompt)? {
                return Err(PublishError::Preflight("branch is not pushed".into()));
            }
        }
        Ok(())
    }

    fn resolve_context(&self, opts: &PublishOptions) -> Result<PublishContext, PublishError> {
        let build_dir = self
            .env
            .var("BUILD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| opts.build_dir.clone());
        check_build_dir(&build_dir)?;

        let storage = resolve_storage_config(self.env, &opts.storage, &*self.store);
        storage.validate()?;

        let explicit_prefix = self
            .env
            .var("S3_UPLOAD_PREFIX")
            .or_else(|| opts.upload_prefix.clone());
        let explicit_name = self.env.var("DOMAIN").or_else(|| opts.group_name.clone());
        let (remote_prefix, group_name) = match (explicit_prefix, explicit_name) {
            (Some(prefix), Some(name)) => (prefix, name),
            (prefix, name) => {
                let namer = RemoteNamer::new(&self.repo.identity(), self.now);
                (
                    prefix.unwrap_or_else(|| namer.derive_prefix()),
                    name.unwrap_or_else(|| namer.derive_group_name()),
                )
            }
        };
        tracing::debug!(%remote_prefix, "s3 prefix to upload");
        tracing::debug!(%group_name, "testing group name");

        let app_id = self
            .env
            .var("VK_APP_ID")
            .or_else(|| opts.app_id.clone())
            .filter(|id| !id.is_empty());

        Ok(PublishContext {
            storage,
            build_dir,
            remote_prefix,
            group_name,
            app_id,
        })
    }

    fn publish(&mut self, ctx: &PublishContext) -> Result<PublishReport, PublishError> {
        let transport = self
            .connector
            .object_transport(&ctx.storage)
            .map_err(PublishError::UploadFailed)?;
        let objects = ObjectStore::new(ctx.storage.clone(), transport)?;

        tracing::info!(prefix = %ctx.remote_prefix, "start upload");
        let uploaded = {
            let _spinner = Spinner::start(format!("Uploading to {}", ctx.remote_prefix));
            objects
                .upload_directory(&ctx.build_dir, &ctx.remote_prefix)
                .map_err(PublishError::UploadFailed)?
        };
        tracing::info!(objects = uploaded.keys.len(), "upload finished");

        if tracing::enabled!(tracing::Level::DEBUG) {
            match objects.list_objects(&ctx.remote_prefix, true) {
                Ok(listed) => {
                    for object in listed {
                        tracing::debug!(key = %object.key, last_modified = ?object.last_modified, "remote object");
                    }
                }
                Err(e) => tracing::debug!(error = %e, "could not list uploaded objects"),
            }
        }

        let url = objects.public_url(&uploaded.entry_key);

        let group = match &ctx.app_id {
            Some(app_id) => self.register_group(app_id, &ctx.group_name, &url)?,
            None => {
                tracing::info!("no VK app id given, skipping testing group update");
                None
            }
        };

        Ok(PublishReport {
            url,
            remote_prefix: ctx.remote_prefix.clone(),
            uploaded: uploaded.keys.len(),
            group,
        })
    }

    /// Cached or prompted token for `app_id`. A prompted token is saved
    /// before it is used.
    fn access_token(&mut self, app_id: &str) -> Result<Option<String>, PublishError> {
        if let Some(token) = self.env.var("VK_APP_TOKEN") {
            return Ok(Some(token));
        }
        let mut credentials = CredentialStore::new(&mut *self.store);
        if let Some(token) = credentials.get(app_id) {
            return Ok(Some(token));
        }

        let Some(token) = self.prompt.access_token(app_id).map_err(PublishError::Prompt)? else {
            return Ok(None);
        };
        credentials.set(app_id, &token)?;
        Ok(Some(token))
    }

    fn register_group(
        &mut self,
        app_id: &str,
        name: &str,
        url: &str,
    ) -> Result<Option<RegisteredGroup>, PublishError> {
        tracing::debug!(app_id, "updating testing group");
        let Some(token) = self.access_token(app_id)? else {
            tracing::info!("no access token entered, skipping testing group update");
            return Ok(None);
        };
        let registry = self
            .connector
            .group_registry(&token)
            .map_err(PublishError::Registry)?;

        let groups = registry
            .list_test_groups()
            .map_err(|e| self.registry_failure(app_id, e))?;
        let existing = find_group_id(&groups, name);

        let upserted = registry
            .upsert_test_group(url, name, existing)
            .map_err(|e| self.registry_failure(app_id, e))?;
        tracing::info!(group_id = upserted.group_id, created = existing.is_none(), "testing group updated");

        Ok(Some(RegisteredGroup {
            group_id: upserted.group_id,
            name: name.to_string(),
            manage_url: manage_url(app_id),
        }))
    }

    /// Forgets the cached token when the platform rejected it.
    fn registry_failure(&mut self, app_id: &str, err: RegistryError) -> PublishError {
        if !err.credential_lost() {
            return PublishError::Registry(err);
        }
        if let Err(e) = CredentialStore::new(&mut *self.store).delete(app_id) {
            tracing::error!(error = %e, app_id, "could not forget rejected access token");
        }
        PublishError::AuthExpired {
            app_id: app_id.to_string(),
            source: err,
        }
    }
}

fn check_build_dir(build_dir: &Path) -> Result<(), PublishError> {
    let exists = build_dir.is_dir();
    tracing::debug!(build_dir = %build_dir.display(), exists, "build dir");
    if !exists {
        return Err(PublishError::Preflight(format!(
            "build directory \"{}\" does not exist",
            build_dir.display()
        )));
    }
    let entry = build_dir.join(ENTRY_DOCUMENT);
    if !entry.is_file() {
        return Err(PublishError::Preflight(format!(
            "\"{}\" must contain {ENTRY_DOCUMENT}, {} not found",
            build_dir.display(),
            entry.display()
        )));
    }
    Ok(())
}
