// S3 transport backed by aws-sdk-s3.
//
// The rest of the crate is synchronous, so the transport owns a tokio
// runtime and blocks on it for each bulk operation. Uploads inside one
// call run concurrently up to `MAX_CONCURRENT_UPLOADS`; retries are the
// SDK's standard policy.

use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use chrono::DateTime;
use futures::stream::{self, StreamExt};
use tokio::runtime::Runtime;

use crate::storage::{ObjectInfo, ObjectTransport, PendingObject, StorageConfig, TransportError};

const MAX_CONCURRENT_UPLOADS: usize = 20;
const MAX_ATTEMPTS: u32 = 3;

pub struct S3Transport {
    runtime: Runtime,
    client: Client,
}

impl S3Transport {
    /// Builds a path-style client with static credentials for `config`.
    pub fn connect(config: &StorageConfig) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(TransportError::Runtime)?;

        let credentials =
            Credentials::from_keys(config.access_key.clone(), config.secret_key.clone(), None);
        let sdk_config = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .credentials_provider(credentials)
                .region(Region::new(config.region.clone()))
                .endpoint_url(config.endpoint.clone())
                .retry_config(RetryConfig::standard().with_max_attempts(MAX_ATTEMPTS))
                .load(),
        );

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();
        let client = Client::from_conf(s3_config);

        tracing::debug!(endpoint = %config.endpoint, region = %config.region, "s3 client ready");
        Ok(Self { runtime, client })
    }

    async fn put_one(&self, bucket: &str, object: &PendingObject) -> Result<(), TransportError> {
        let body = ByteStream::from_path(&object.local_path)
            .await
            .map_err(|e| TransportError::Read {
                path: object.local_path.clone(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(&object.key)
            .acl(ObjectCannedAcl::PublicRead)
            .content_type(object.content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Put {
                key: object.key.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::debug!(key = %object.key, "uploaded");
        Ok(())
    }
}

impl ObjectTransport for S3Transport {
    fn put_objects(&self, bucket: &str, objects: &[PendingObject]) -> Result<(), TransportError> {
        self.runtime.block_on(async {
            let mut uploads = stream::iter(objects)
                .map(|object| self.put_one(bucket, object))
                .buffer_unordered(MAX_CONCURRENT_UPLOADS);

            while let Some(result) = uploads.next().await {
                result?;
            }
            Ok(())
        })
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ObjectInfo>, TransportError> {
        let delimiter = (!recursive).then(|| "/".to_string());

        self.runtime.block_on(async {
            let mut objects = Vec::new();
            let mut continuation: Option<String> = None;
            loop {
                let page = self
                    .client
                    .list_objects_v2()
                    .bucket(bucket)
                    .prefix(prefix)
                    .set_delimiter(delimiter.clone())
                    .set_continuation_token(continuation.take())
                    .send()
                    .await
                    .map_err(|e| TransportError::List {
                        prefix: prefix.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    })?;

                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    let last_modified = object
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()));
                    objects.push(ObjectInfo {
                        key: key.to_string(),
                        last_modified,
                    });
                }

                match page.next_continuation_token() {
                    Some(token) if page.is_truncated().unwrap_or(false) => {
                        continuation = Some(token.to_string());
                    }
                    _ => break,
                }
            }
            Ok(objects)
        })
    }
}
