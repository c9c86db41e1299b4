//! Cloudflare R2 (S3-compatible) object store adapter.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::{primitives::ByteStream, Client};
use aws_types::region::Region;

use super::{resolve_delete, resolve_upload, ObjectStore, RemoteError};
use crate::util::{compact_text, is_http_url};
use crate::{Error, Result};

const ENV_ACCOUNT_ID: &str = "R2_ACCOUNT_ID";
const ENV_BUCKET: &str = "R2_BUCKET";
const ENV_ACCESS_KEY_ID: &str = "R2_ACCESS_KEY_ID";
const ENV_SECRET_ACCESS_KEY: &str = "R2_SECRET_ACCESS_KEY";
const ENV_ENDPOINT_URL: &str = "R2_ENDPOINT_URL";
const ENV_KEY_PREFIX: &str = "R2_KEY_PREFIX";

const OPERATION_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cloudflare R2 configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct R2Config {
    /// Cloudflare account identifier.
    pub account_id: String,
    /// R2 bucket name.
    pub bucket: String,
    /// Access key id for S3-compatible auth.
    pub access_key_id: String,
    /// Secret access key for S3-compatible auth.
    pub secret_access_key: String,
    /// Optional endpoint override (any S3-compatible service).
    pub endpoint_url: Option<String>,
    /// Optional folder inside the bucket that holds gallery objects.
    pub key_prefix: Option<String>,
}

impl std::fmt::Debug for R2Config {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("R2Config")
            .field("account_id", &self.account_id)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("endpoint_url", &self.endpoint_url)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl R2Config {
    /// Load R2 configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no R2 variables are set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        parse_config(lookup)
    }

    /// S3-compatible endpoint URL.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        self.endpoint_url.clone().unwrap_or_else(|| {
            format!("https://{}.r2.cloudflarestorage.com", self.account_id)
        })
    }
}

/// R2-backed `ObjectStore`.
#[derive(Clone, Debug)]
pub struct R2ObjectStore {
    config: R2Config,
    client: Client,
}

impl R2ObjectStore {
    #[must_use]
    pub fn new(config: R2Config) -> Self {
        let client = build_s3_client(&config);
        Self { config, client }
    }

    #[must_use]
    pub const fn config(&self) -> &R2Config {
        &self.config
    }

    /// Check that the configured bucket is reachable with current credentials.
    pub async fn bucket_is_reachable(&self) -> std::result::Result<(), RemoteError> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|error| {
                let status = error.raw_response().map(|raw| raw.status().as_u16());
                remote_error("head_bucket", &self.config.bucket, &error, status)
            })?;
        Ok(())
    }

    fn full_key(&self, key: &str) -> std::result::Result<String, RemoteError> {
        let key = key.trim().trim_matches('/');
        if key.is_empty() {
            return Err(RemoteError::Server(
                "Object key cannot be empty".to_string(),
            ));
        }
        Ok(self
            .config
            .key_prefix
            .as_ref()
            .map_or_else(|| key.to_string(), |prefix| format!("{prefix}/{key}")))
    }

    fn relative_key<'a>(&self, full_key: &'a str) -> Option<&'a str> {
        match &self.config.key_prefix {
            Some(prefix) => full_key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/')),
            None => Some(full_key),
        }
        .filter(|key| !key.is_empty())
    }

    fn target(&self, full_key: &str) -> String {
        format!("{}/{full_key}", self.config.bucket)
    }
}

#[async_trait]
impl ObjectStore for R2ObjectStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> std::result::Result<String, RemoteError> {
        let full_key = self.full_key(key)?;
        let content_type = mime_guess::from_path(key)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        let result = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&full_key)
            .content_type(content_type)
            // Never overwrite: a retried upload collides with the first attempt
            .if_none_match("*")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| {
                let status = error.raw_response().map(|raw| raw.status().as_u16());
                remote_error("put_object", &self.target(&full_key), &error, status)
            });

        tracing::debug!("R2 put_object {} -> {:?}", full_key, result.as_ref().err());
        resolve_upload(key, result)
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), RemoteError> {
        let full_key = self.full_key(key)?;
        let result = self
            .client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&full_key)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| {
                let status = error.raw_response().map(|raw| raw.status().as_u16());
                remote_error("delete_object", &self.target(&full_key), &error, status)
            });
        resolve_delete(key, result)
    }

    async fn list(&self) -> std::result::Result<Vec<String>, RemoteError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.config.bucket);
            if let Some(prefix) = &self.config.key_prefix {
                request = request.prefix(format!("{prefix}/"));
            }
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let page = request.send().await.map_err(|error| {
                let status = error.raw_response().map(|raw| raw.status().as_u16());
                remote_error("list_objects_v2", &self.config.bucket, &error, status)
            })?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter_map(|key| self.relative_key(key))
                    .map(ToOwned::to_owned),
            );

            match page.next_continuation_token() {
                Some(token) if !token.is_empty() => continuation = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(keys)
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<R2Config>> {
    let read = |key: &str| lookup(key).map(|value| value.trim().to_string());
    let account_id = read(ENV_ACCOUNT_ID);
    let bucket = read(ENV_BUCKET);
    let access_key_id = read(ENV_ACCESS_KEY_ID);
    let secret_access_key = read(ENV_SECRET_ACCESS_KEY);
    let endpoint_url = read(ENV_ENDPOINT_URL).filter(|value| !value.is_empty());
    let key_prefix = read(ENV_KEY_PREFIX)
        .map(|value| value.trim_matches('/').to_string())
        .filter(|value| !value.is_empty());

    let any_present = account_id.is_some()
        || bucket.is_some()
        || access_key_id.is_some()
        || secret_access_key.is_some()
        || endpoint_url.is_some();

    if !any_present {
        return Ok(None);
    }

    let mut missing = Vec::new();
    // An explicit endpoint makes the account id unnecessary.
    if endpoint_url.is_none() && account_id.as_ref().map_or(true, String::is_empty) {
        missing.push(ENV_ACCOUNT_ID);
    }
    if bucket.as_ref().map_or(true, String::is_empty) {
        missing.push(ENV_BUCKET);
    }
    if access_key_id.as_ref().map_or(true, String::is_empty) {
        missing.push(ENV_ACCESS_KEY_ID);
    }
    if secret_access_key.as_ref().map_or(true, String::is_empty) {
        missing.push(ENV_SECRET_ACCESS_KEY);
    }

    if !missing.is_empty() {
        return Err(Error::InvalidInput(format!(
            "R2 configuration is incomplete. Missing: {}",
            missing.join(", ")
        )));
    }

    let endpoint_url = match endpoint_url {
        Some(url) if !is_http_url(&url) => {
            return Err(Error::InvalidInput(format!(
                "{ENV_ENDPOINT_URL} must start with http:// or https://"
            )));
        }
        other => other.map(|url| url.trim_end_matches('/').to_string()),
    };

    Ok(Some(R2Config {
        account_id: account_id.unwrap_or_default(),
        bucket: bucket.unwrap_or_default(),
        access_key_id: access_key_id.unwrap_or_default(),
        secret_access_key: secret_access_key.unwrap_or_default(),
        endpoint_url,
        key_prefix,
    }))
}

fn build_s3_client(config: &R2Config) -> Client {
    let credentials = Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "shoebox-core-r2-storage",
    );

    let timeouts = TimeoutConfig::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .operation_timeout(OPERATION_TIMEOUT)
        .build();

    let sdk_config = aws_sdk_s3::config::Builder::new()
        .region(Region::new("auto"))
        .credentials_provider(credentials)
        .endpoint_url(config.endpoint_url())
        .force_path_style(true)
        .timeout_config(timeouts)
        .build();

    Client::from_conf(sdk_config)
}

fn remote_error<E, R>(
    operation: &str,
    target: &str,
    error: &SdkError<E, R>,
    status: Option<u16>,
) -> RemoteError
where
    SdkError<E, R>: std::fmt::Display,
{
    let message = compact_text(&format!("R2 {operation} failed for {target}: {error}"));
    match error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => RemoteError::Network(message),
        _ => classify_status(status, message),
    }
}

fn classify_status(status: Option<u16>, message: String) -> RemoteError {
    match status {
        Some(404) => RemoteError::NotFound(message),
        Some(409 | 412) => RemoteError::Conflict(message),
        Some(408 | 429) | None => RemoteError::Network(message),
        Some(_) => RemoteError::Server(message),
    }
}
