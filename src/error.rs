//! Error types for the NDVI pipeline.

use thiserror::Error;

/// Result type alias using [`NdviError`].
pub type PipelineResult<T> = Result<T, NdviError>;

/// Everything that can abort a scene's NDVI computation or a catalog search.
///
/// Variants carry strings rather than source errors so a failure can be
/// stored in a [`TimeseriesEntry`](crate::timeseries::TimeseriesEntry) and cloned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NdviError {
    #[error("Unknown reference system: EPSG:{0}")]
    UnknownReferenceSystem(i32),

    #[error("Calibration parameter not found: {0}")]
    KeyNotFound(String),

    #[error("Calibration parameter '{key}' is not a number: '{value}'")]
    MalformedValue { key: String, value: String },

    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("NDVI undefined: near-infrared and red reflectance sum to zero")]
    UndefinedIndex,

    #[error("Remote fetch failed for {url}: {message}")]
    RemoteFetchFailure { url: String, message: String },

    #[error("Remote read timed out: {0}")]
    Timeout(String),

    #[error("Pixel (row {row}, column {column}) outside raster of {width}x{height}")]
    OutOfBoundsPixel {
        row: i64,
        column: i64,
        width: usize,
        height: usize,
    },

    #[error("Invalid scene identifier '{0}'")]
    InvalidSceneId(String),

    #[error("Invalid raster {source_id}: {message}")]
    InvalidRaster { source_id: String, message: String },

    #[error("Projection failed: {0}")]
    Projection(String),

    #[error("Catalog response could not be decoded: {0}")]
    CatalogDecode(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl NdviError {
    pub(crate) fn raster(source_id: &str, message: impl Into<String>) -> Self {
        Self::InvalidRaster {
            source_id: source_id.to_string(),
            message: message.into(),
        }
    }

    /// Classify a reqwest failure: timeouts get their own kind.
    pub(crate) fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(url.to_string())
        } else {
            Self::RemoteFetchFailure {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// True for failures caused by the remote side rather than the data.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteFetchFailure { .. } | Self::Timeout(_))
    }
}

impl From<std::io::Error> for NdviError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
