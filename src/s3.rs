//! S3 Range Reader implementation using `object_store`
//!
//! Lets the storage base be an `s3://bucket/prefix` URL instead of the public
//! HTTP endpoint, e.g. for a mirror of the Landsat 8 bucket in MinIO.
//!
//! # Configuration
//!
//! The reader is configured via environment variables:
//! - `AWS_ACCESS_KEY_ID` - AWS access key
//! - `AWS_SECRET_ACCESS_KEY` - AWS secret key
//! - `AWS_REGION` - AWS region (default: us-west-2, where landsat-pds lives)
//! - `AWS_ENDPOINT_URL` - Custom endpoint for MinIO/S3-compatible services
//! - `AWS_ALLOW_HTTP` - Set to "true" to allow HTTP endpoints (for local MinIO)
//! - `AWS_SKIP_SIGNATURE` - Set to "true" for anonymous access to public buckets

use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, GetOptions, GetRange, ObjectStore};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

use crate::error::{NdviError, PipelineResult};
use crate::range_reader::{check_length, RangeReader};

const DEFAULT_REGION: &str = "us-west-2";

/// S3 configuration for connecting to S3-compatible storage
#[derive(Debug, Clone, PartialEq)]
pub struct S3Config {
    pub bucket: String,
    /// Object key (path within the bucket)
    pub key: String,
    pub region: Option<String>,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Allow HTTP connections (required for local MinIO without TLS)
    pub allow_http: bool,
    /// Skip signature verification (for anonymous access to public buckets)
    pub skip_signature: bool,
}

impl S3Config {
    /// Parse `s3://bucket/key/path`, filling credentials and endpoint from the environment
    pub fn from_url(url: &str) -> PipelineResult<Self> {
        Self::from_url_with(url, |key| std::env::var(key).ok())
    }

    fn from_url_with(url: &str, env: impl Fn(&str) -> Option<String>) -> PipelineResult<Self> {
        let invalid = |message: &str| NdviError::RemoteFetchFailure {
            url: url.to_string(),
            message: message.to_string(),
        };

        let parsed = url::Url::parse(url).map_err(|e| invalid(&e.to_string()))?;

        if parsed.scheme() != "s3" {
            return Err(invalid(&format!("expected s3:// URL, got {}://", parsed.scheme())));
        }

        let bucket = parsed
            .host_str()
            .ok_or_else(|| invalid("missing bucket in S3 URL"))?
            .to_string();

        let key = parsed.path().trim_start_matches('/').to_string();
        if key.is_empty() {
            return Err(invalid("missing key in S3 URL"));
        }

        let flag = |name: &str| env(name).is_some_and(|v| v.eq_ignore_ascii_case("true"));

        Ok(Self {
            bucket,
            key,
            region: env("AWS_REGION").or_else(|| Some(DEFAULT_REGION.to_string())),
            endpoint_url: env("AWS_ENDPOINT_URL"),
            access_key_id: env("AWS_ACCESS_KEY_ID"),
            secret_access_key: env("AWS_SECRET_ACCESS_KEY"),
            allow_http: flag("AWS_ALLOW_HTTP"),
            skip_signature: flag("AWS_SKIP_SIGNATURE"),
        })
    }

    fn url(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// Async S3 range reader using `object_store`
pub struct S3RangeReaderAsync {
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
    size: u64,
    url: String,
    timeout: Duration,
}

impl S3RangeReaderAsync {
    pub async fn new(url: &str, timeout: Duration) -> PipelineResult<Self> {
        let config = S3Config::from_url(url)?;
        Self::from_config(config, timeout).await
    }

    pub async fn from_config(config: S3Config, timeout: Duration) -> PipelineResult<Self> {
        let url = config.url();
        let fail = |e: object_store::Error| NdviError::RemoteFetchFailure {
            url: url.clone(),
            message: e.to_string(),
        };

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_client_options(ClientOptions::new().with_timeout(timeout));

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(access_key) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }
        if config.skip_signature {
            builder = builder.with_skip_signature(true);
        }

        let store = builder.build().map_err(fail)?;
        let path = ObjectPath::from(config.key.as_str());

        let meta = bounded(&url, timeout, store.head(&path)).await?.map_err(fail)?;
        debug!(url = %url, size = meta.size, "Opened S3 range reader");

        Ok(Self {
            store: Arc::new(store),
            path,
            size: meta.size as u64,
            url,
            timeout,
        })
    }

    pub async fn read_range_async(&self, offset: u64, length: usize) -> PipelineResult<Vec<u8>> {
        let fail = |e: object_store::Error| NdviError::RemoteFetchFailure {
            url: self.url.clone(),
            message: e.to_string(),
        };

        let options = GetOptions {
            range: Some(GetRange::Bounded(Range {
                start: offset,
                end: offset + length as u64,
            })),
            ..Default::default()
        };

        let fetch = async {
            let result = self.store.get_opts(&self.path, options).await?;
            result.bytes().await
        };

        let bytes = bounded(&self.url, self.timeout, fetch).await?.map_err(fail)?;
        check_length(&self.url, offset, length, bytes.len())?;
        Ok(bytes.to_vec())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

async fn bounded<F: Future>(url: &str, timeout: Duration, fut: F) -> PipelineResult<F::Output> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| NdviError::Timeout(url.to_string()))
}

enum Executor {
    Handle(Handle),
    Owned(Runtime),
}

impl Executor {
    fn current_or_new() -> PipelineResult<Self> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(Self::Handle(handle));
        }
        Builder::new_current_thread()
            .enable_all()
            .build()
            .map(Self::Owned)
            .map_err(NdviError::from)
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        match self {
            Self::Handle(handle) => handle.block_on(fut),
            Self::Owned(runtime) => runtime.block_on(fut),
        }
    }
}

/// Synchronous wrapper for [`S3RangeReaderAsync`] that implements [`RangeReader`]
///
/// Uses the ambient tokio runtime when there is one (call from a blocking
/// thread, e.g. inside `spawn_blocking`), otherwise owns a current-thread runtime.
pub struct S3RangeReaderSync {
    inner: S3RangeReaderAsync,
    executor: Executor,
}

impl S3RangeReaderSync {
    pub fn new(url: &str, timeout: Duration) -> PipelineResult<Self> {
        let executor = Executor::current_or_new()?;
        let inner = executor.block_on(S3RangeReaderAsync::new(url, timeout))?;
        Ok(Self { inner, executor })
    }
}

impl RangeReader for S3RangeReaderSync {
    fn read_range(&self, offset: u64, length: usize) -> PipelineResult<Vec<u8>> {
        self.executor.block_on(self.inner.read_range_async(offset, length))
    }

    fn size(&self) -> u64 {
        self.inner.size
    }

    fn identifier(&self) -> &str {
        &self.inner.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_s3_config_from_url() {
        let config = S3Config::from_url_with(
            "s3://landsat-pds/L8/044/034/LC80440342015103LGN00/LC80440342015103LGN00_B5.TIF",
            no_env,
        )
        .unwrap();
        assert_eq!(config.bucket, "landsat-pds");
        assert_eq!(config.key, "L8/044/034/LC80440342015103LGN00/LC80440342015103LGN00_B5.TIF");
        assert_eq!(config.region.as_deref(), Some("us-west-2"));
        assert!(!config.skip_signature);
    }

    #[test]
    fn test_s3_config_env() {
        let env: HashMap<&str, &str> = [
            ("AWS_ENDPOINT_URL", "http://localhost:9000"),
            ("AWS_ALLOW_HTTP", "TRUE"),
            ("AWS_SKIP_SIGNATURE", "true"),
            ("AWS_REGION", "eu-central-1"),
        ]
        .into_iter()
        .collect();

        let config = S3Config::from_url_with("s3://bucket/file.tif", |k| {
            env.get(k).map(|v| (*v).to_string())
        })
        .unwrap();
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert!(config.allow_http);
        assert!(config.skip_signature);
        assert_eq!(config.region.as_deref(), Some("eu-central-1"));
        assert_eq!(config.url(), "s3://bucket/file.tif");
    }

    #[test]
    fn test_s3_config_invalid_scheme() {
        assert!(S3Config::from_url_with("http://bucket/file.tif", no_env).is_err());
    }

    #[test]
    fn test_s3_config_missing_key() {
        assert!(S3Config::from_url_with("s3://bucket/", no_env).is_err());
    }

    #[tokio::test]
    async fn test_bounded_timeout() {
        let slow = tokio::time::sleep(Duration::from_secs(5));
        let result = bounded("s3://bucket/key", Duration::from_millis(10), slow).await;
        assert_eq!(result.unwrap_err(), NdviError::Timeout("s3://bucket/key".to_string()));
    }
}
