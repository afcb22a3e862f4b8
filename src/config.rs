//! Pipeline configuration.
//!
//! Endpoints and limits are passed explicitly to the components that need
//! them, so tests can point the pipeline at local or in-memory sources.
//!
//! Environment overrides read by [`PipelineConfig::from_env`]:
//! - `NDVI_CATALOG_URL` - scene catalog search endpoint
//! - `NDVI_STORAGE_URL` - base URL of the Landsat 8 scene storage (http(s), s3 or local path)
//! - `NDVI_REQUEST_TIMEOUT_SECS` - bound on every remote read
//! - `NDVI_MAX_CONCURRENT_SCENES` - scene parallelism for async searches

use std::time::Duration;

use tracing::warn;

/// Landsat catalog search API
pub const DEFAULT_CATALOG_URL: &str = "https://api.developmentseed.org/landsat";

/// Public Landsat 8 bucket, HTTP endpoint
pub const DEFAULT_STORAGE_URL: &str = "http://landsat-pds.s3.amazonaws.com/L8";

/// WGS84 longitude/latitude
pub const WGS84_EPSG: i32 = 4326;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Catalog search base URL (query string is appended)
    pub catalog_url: String,
    /// Base under which `{path}/{row}/{scene}/` directories live
    pub storage_url: String,
    /// EPSG code of caller-supplied query points
    pub source_epsg: i32,
    /// Timeout applied to every remote request
    pub request_timeout: Duration,
    /// Upper bound on scenes processed at once by async searches
    pub max_concurrent_scenes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            storage_url: DEFAULT_STORAGE_URL.to_string(),
            source_epsg: WGS84_EPSG,
            request_timeout: Duration::from_secs(30),
            max_concurrent_scenes: 4,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `NDVI_*` environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("NDVI_CATALOG_URL") {
            config.catalog_url = url;
        }
        if let Some(url) = lookup("NDVI_STORAGE_URL") {
            config.storage_url = url;
        }
        if let Some(raw) = lookup("NDVI_REQUEST_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => warn!(value = %raw, "Ignoring invalid NDVI_REQUEST_TIMEOUT_SECS"),
            }
        }
        if let Some(raw) = lookup("NDVI_MAX_CONCURRENT_SCENES") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.max_concurrent_scenes = n,
                _ => warn!(value = %raw, "Ignoring invalid NDVI_MAX_CONCURRENT_SCENES"),
            }
        }

        config
    }

    /// Config pointing both endpoints at the given bases, everything else default
    #[must_use]
    pub fn with_endpoints(catalog_url: &str, storage_url: &str) -> Self {
        Self {
            catalog_url: catalog_url.trim_end_matches('/').to_string(),
            storage_url: storage_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }
}
