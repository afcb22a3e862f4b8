//! # landsat-ndvi - NDVI time series from Landsat 8 scenes
//!
//! Computes the Normalized Difference Vegetation Index at a single point for
//! every Landsat 8 scene a catalog search returns, reading one pixel per band
//! straight from the archive's GeoTIFFs with byte-range requests.
//!
//! ## Features
//!
//! - **Catalog search**: date, cloud-cover and location query against the Landsat catalog API
//! - **Single-pixel reads**: header, IFD and one tile per band, from HTTP, S3 or local files
//! - **Compression**: DEFLATE, LZW, ZSTD and uncompressed, with horizontal predictor
//! - **Coordinate transforms**: Pure Rust proj4rs, any EPSG code to the band's UTM zone
//! - **Calibration**: MTL metadata parsing and top-of-atmosphere reflectance
//! - **Per-scene errors**: a failing scene is reported in place, never silently dropped
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use landsat_ndvi::{ndvi_timeseries, PipelineConfig};
//!
//! let config = PipelineConfig::from_env();
//! let series = ndvi_timeseries(&config, -122.4, 37.8, "2015-01-01", "2015-12-31", 20)?;
//! for entry in &series {
//!     match &entry.ndvi {
//!         Ok(ndvi) => println!("{} {}: {ndvi:.3}", entry.date, entry.scene_id),
//!         Err(err) => println!("{} {}: {err}", entry.date, entry.scene_id),
//!     }
//! }
//! # Ok::<(), landsat_ndvi::NdviError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`geometry`]: Points, EPSG transforms and pixel location
//! - [`metadata`]: `KEY = VALUE` calibration metadata
//! - [`calibration`]: Digital number to reflectance
//! - [`cog_reader`]: GeoTIFF header parsing and single-pixel reads
//! - [`range_reader`]: I/O abstraction for local/HTTP/S3 sources
//! - [`s3`]: S3-compatible storage backend
//! - [`storage`]: Scene directory layout behind the [`SceneStore`] trait
//! - [`ndvi`]: Per-scene NDVI engine
//! - [`catalog`]: Catalog query and response decoding
//! - [`timeseries`]: Search orchestration, sync and async

// ============================================================================
// Public modules
// ============================================================================

pub mod calibration;
pub mod catalog;
pub mod cog_reader;
pub mod config;
pub mod error;
pub mod geometry;
pub mod metadata;
pub mod ndvi;
pub mod range_reader;
pub mod s3;
pub mod scene;
pub mod storage;
pub mod timeseries;

#[cfg(test)]
pub(crate) mod test_support;

// ============================================================================
// Errors & Configuration
// ============================================================================

pub use error::{NdviError, PipelineResult};
pub use config::PipelineConfig;

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::GeoPoint;
pub use geometry::geotransform::{
    AffineGeotransform,
    PixelIndex,
    locate,
};
pub use geometry::projection::{
    transform,
    get_proj_string,
    is_geographic_crs,
};

// ============================================================================
// Calibration
// ============================================================================

pub use metadata::CalibrationRecord;
pub use calibration::{calibrate, ReflectanceCoefficients};

// ============================================================================
// Rasters & Range Readers
// ============================================================================

pub use cog_reader::{
    CogReader,
    CogMetadata,
    Compression,
    DigitalNumber,
    SampleType,
};
pub use range_reader::{
    RangeReader,
    LocalRangeReader,
    HttpRangeReader,
    MemoryRangeReader,
    create_range_reader,
};
pub use s3::{
    S3Config,
    S3RangeReaderAsync,
    S3RangeReaderSync,
};

// ============================================================================
// Scenes & NDVI
// ============================================================================

pub use scene::{Band, SceneId};
pub use storage::{SceneStore, RemoteSceneStore};
pub use ndvi::{NdviEngine, normalized_difference};

// ============================================================================
// Catalog & Time Series
// ============================================================================

pub use catalog::{
    Catalog,
    CatalogQuery,
    HttpCatalog,
    SceneRecord,
    SearchParams,
    build_query_url,
};
pub use timeseries::{
    NdviTimeseries,
    ScenePolicy,
    TimeseriesEntry,
    ndvi_timeseries,
};
