//! NDVI time series at a point
//!
//! A catalog search lists the scenes covering the point; the NDVI engine then
//! runs once per scene. What happens to a scene that fails is decided by a
//! [`ScenePolicy`]; by default it stays in the output with its error.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::catalog::{Catalog, CatalogQuery, HttpCatalog, SceneRecord, SearchParams};
use crate::config::{PipelineConfig, WGS84_EPSG};
use crate::error::{NdviError, PipelineResult};
use crate::geometry::GeoPoint;
use crate::ndvi::NdviEngine;
use crate::storage::{RemoteSceneStore, SceneStore};

/// Handling of a scene whose NDVI could not be computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScenePolicy {
    /// Keep the scene, carrying its error in place of a value
    #[default]
    MarkError,
    /// Leave the scene out
    Skip,
    /// Fail the whole search with the scene's error
    Abort,
}

/// One scene of the series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeseriesEntry {
    pub date: String,
    pub cloud_cover: f64,
    pub scene_id: String,
    pub thumbnail_url: String,
    #[serde(serialize_with = "serialize_ndvi")]
    pub ndvi: Result<f64, NdviError>,
}

impl TimeseriesEntry {
    fn new(record: SceneRecord, ndvi: PipelineResult<f64>) -> Self {
        Self {
            date: record.date,
            cloud_cover: record.cloud_cover,
            scene_id: record.scene_id,
            thumbnail_url: record.thumbnail,
            ndvi,
        }
    }
}

fn serialize_ndvi<S: Serializer>(ndvi: &Result<f64, NdviError>, serializer: S) -> Result<S::Ok, S::Error> {
    match ndvi {
        Ok(value) => serializer.serialize_f64(*value),
        Err(err) => {
            let mut map = serializer.serialize_map(Some(1))?;
            map.serialize_entry("error", &err.to_string())?;
            map.end()
        }
    }
}

fn apply_policy(
    record: SceneRecord,
    ndvi: PipelineResult<f64>,
    policy: ScenePolicy,
) -> PipelineResult<Option<TimeseriesEntry>> {
    match (ndvi, policy) {
        (Err(err), ScenePolicy::Abort) => Err(err),
        (Err(err), ScenePolicy::Skip) => {
            warn!(scene = %record.scene_id, error = %err, "Skipping scene");
            Ok(None)
        }
        (ndvi, _) => {
            if let Err(err) = &ndvi {
                warn!(scene = %record.scene_id, error = %err, "NDVI failed for scene");
            }
            Ok(Some(TimeseriesEntry::new(record, ndvi)))
        }
    }
}

/// NDVI series search around a fixed point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NdviTimeseries {
    pub params: SearchParams,
    /// EPSG code of `params.longitude`/`params.latitude`
    pub source_epsg: i32,
}

impl NdviTimeseries {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            params: SearchParams::new(longitude, latitude),
            source_epsg: WGS84_EPSG,
        }
    }

    #[must_use]
    pub fn with_cloud_range(mut self, min_cloud: f64, max_cloud: f64) -> Self {
        self.params = self.params.with_cloud_range(min_cloud, max_cloud);
        self
    }

    #[must_use]
    pub fn with_source_epsg(mut self, epsg: i32) -> Self {
        self.source_epsg = epsg;
        self
    }

    /// Query point in its source reference system
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.params.longitude, self.params.latitude, self.source_epsg)
    }

    pub fn query(&self, min_date: &str, max_date: &str, limit: u32) -> CatalogQuery {
        CatalogQuery {
            params: self.params,
            min_date: min_date.to_string(),
            max_date: max_date.to_string(),
            limit,
        }
    }

    /// Search the catalog and compute NDVI for each scene in turn.
    ///
    /// A failed catalog request is an error; no matches is an empty series.
    pub fn search<C, S>(
        &self,
        catalog: &C,
        engine: &NdviEngine<S>,
        min_date: &str,
        max_date: &str,
        limit: u32,
        policy: ScenePolicy,
    ) -> PipelineResult<Vec<TimeseriesEntry>>
    where
        C: Catalog + ?Sized,
        S: SceneStore,
    {
        let records = catalog.search(&self.query(min_date, max_date, limit))?;
        info!(scenes = records.len(), "Computing NDVI series");

        let point = self.point();
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let ndvi = engine.compute_ndvi(&record.scene_id, point);
            if let Some(entry) = apply_policy(record, ndvi, policy)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Like [`search`](Self::search), with up to `max_concurrent` scenes in
    /// flight on tokio's blocking pool. Entries keep catalog order.
    #[allow(clippy::too_many_arguments)]
    pub async fn search_async<C, S>(
        &self,
        catalog: Arc<C>,
        engine: Arc<NdviEngine<S>>,
        min_date: &str,
        max_date: &str,
        limit: u32,
        policy: ScenePolicy,
        max_concurrent: usize,
    ) -> PipelineResult<Vec<TimeseriesEntry>>
    where
        C: Catalog + ?Sized + 'static,
        S: SceneStore + 'static,
    {
        let query = self.query(min_date, max_date, limit);
        let records = tokio::task::spawn_blocking(move || catalog.search(&query))
            .await
            .map_err(|e| NdviError::Io(format!("catalog task failed: {e}")))??;
        info!(scenes = records.len(), max_concurrent, "Computing NDVI series");

        let point = self.point();
        let mut results = stream::iter(records)
            .map(|record| {
                let engine = Arc::clone(&engine);
                async move {
                    let scene_id = record.scene_id.clone();
                    let ndvi = tokio::task::spawn_blocking(move || engine.compute_ndvi(&scene_id, point))
                        .await
                        .unwrap_or_else(|e| Err(NdviError::Io(format!("scene task failed: {e}"))));
                    (record, ndvi)
                }
            })
            .buffered(max_concurrent.max(1));

        let mut entries = Vec::new();
        while let Some((record, ndvi)) = results.next().await {
            if let Some(entry) = apply_policy(record, ndvi, policy)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

/// NDVI series for a WGS84 (or `config.source_epsg`) point using the
/// configured catalog and storage endpoints. Failing scenes carry their error.
pub fn ndvi_timeseries(
    config: &PipelineConfig,
    longitude: f64,
    latitude: f64,
    min_date: &str,
    max_date: &str,
    limit: u32,
) -> PipelineResult<Vec<TimeseriesEntry>> {
    let catalog = HttpCatalog::new(config)?;
    let engine = NdviEngine::new(RemoteSceneStore::new(config)?);

    NdviTimeseries::new(longitude, latitude)
        .with_source_epsg(config.source_epsg)
        .search(&catalog, &engine, min_date, max_date, limit, ScenePolicy::default())
}
