//! Landsat catalog search
//!
//! The catalog is a search-engine style API: a single GET whose `search`
//! parameter combines range clauses with literal `+AND+` tokens. A point is
//! matched by four open-ended corner clauses rather than a true footprint test,
//! so the result may include scenes whose tilted footprint misses the point.

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::{NdviError, PipelineResult};
use crate::range_reader::http_client;

/// Location and cloud-cover filter of a search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    pub longitude: f64,
    pub latitude: f64,
    /// Cloud cover percentage bounds, inclusive
    pub min_cloud: f64,
    pub max_cloud: f64,
}

impl SearchParams {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            min_cloud: 0.0,
            max_cloud: 100.0,
        }
    }

    #[must_use]
    pub fn with_cloud_range(mut self, min_cloud: f64, max_cloud: f64) -> Self {
        self.min_cloud = min_cloud;
        self.max_cloud = max_cloud;
        self
    }
}

/// Build the full search URL. Dates are passed through as `YYYY-MM-DD`.
pub fn build_query_url(
    base: &str,
    params: &SearchParams,
    min_date: &str,
    max_date: &str,
    limit: u32,
) -> String {
    let SearchParams {
        longitude: lon,
        latitude: lat,
        min_cloud,
        max_cloud,
    } = params;

    let clauses = [
        format!("acquisitionDate:[{min_date}+TO+{max_date}]"),
        format!("cloudCoverFull:[{min_cloud}+TO+{max_cloud}]"),
        format!("upperLeftCornerLatitude:[{lat}+TO+1000]"),
        format!("lowerRightCornerLatitude:[-1000+TO+{lat}]"),
        format!("lowerLeftCornerLongitude:[-1000+TO+{lon}]"),
        format!("upperRightCornerLongitude:[{lon}+TO+1000]"),
    ];

    format!(
        "{}?search={}&limit={limit}",
        base.trim_end_matches('/'),
        clauses.join("+AND+")
    )
}

/// One search, as handed to a [`Catalog`]
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogQuery {
    pub params: SearchParams,
    pub min_date: String,
    pub max_date: String,
    pub limit: u32,
}

impl CatalogQuery {
    pub fn url(&self, base: &str) -> String {
        build_query_url(base, &self.params, &self.min_date, &self.max_date, self.limit)
    }
}

/// Scene as listed by the catalog
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SceneRecord {
    pub date: String,
    #[serde(rename = "cloudCover")]
    pub cloud_cover: f64,
    #[serde(rename = "sceneID")]
    pub scene_id: String,
    pub thumbnail: String,
}

#[derive(Deserialize)]
struct CatalogResponse {
    results: Option<Vec<SceneRecord>>,
    error: Option<CatalogError>,
}

#[derive(Deserialize)]
struct CatalogError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Error code the service answers with when nothing matched
const NO_MATCH_CODE: &str = "NOT_FOUND";

/// Decode a catalog response body.
///
/// The service reports "no matches" as a `NOT_FOUND` error object; that is an
/// empty list. Any other error object, or a body with neither `results` nor
/// `error`, is a [`NdviError::CatalogDecode`].
pub fn decode_response(body: &str) -> PipelineResult<Vec<SceneRecord>> {
    let response: CatalogResponse =
        serde_json::from_str(body).map_err(|e| NdviError::CatalogDecode(e.to_string()))?;

    match response {
        CatalogResponse { results: Some(records), .. } => Ok(records),
        CatalogResponse { error: Some(err), .. } if err.code == NO_MATCH_CODE => Ok(Vec::new()),
        CatalogResponse { error: Some(err), .. } => Err(NdviError::CatalogDecode(format!(
            "catalog error {}: {}",
            err.code, err.message
        ))),
        CatalogResponse { results: None, error: None } => Err(NdviError::CatalogDecode(
            "response has neither results nor error".to_string(),
        )),
    }
}

/// Scene search backend
pub trait Catalog: Send + Sync {
    /// Scenes matching `query`, in the catalog's order
    fn search(&self, query: &CatalogQuery) -> PipelineResult<Vec<SceneRecord>>;
}

/// Catalog reached over HTTP
pub struct HttpCatalog {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpCatalog {
    pub fn new(config: &PipelineConfig) -> PipelineResult<Self> {
        Ok(Self {
            base_url: config.catalog_url.clone(),
            client: http_client(config.request_timeout)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Catalog for HttpCatalog {
    fn search(&self, query: &CatalogQuery) -> PipelineResult<Vec<SceneRecord>> {
        let url = query.url(&self.base_url);
        debug!(url = %url, "Searching catalog");

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| NdviError::from_reqwest(&url, &e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(NdviError::RemoteFetchFailure {
                url,
                message: format!("catalog returned {status}"),
            });
        }

        let body = response
            .text()
            .map_err(|e| NdviError::from_reqwest(&url, &e))?;
        let records = decode_response(&body)?;
        info!(count = records.len(), "Catalog search complete");
        Ok(records)
    }
}
