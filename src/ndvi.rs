//! NDVI at a point for one scene
//!
//! For each of the red and near-infrared bands the engine opens the band
//! raster, reprojects the query point into the raster's CRS, locates the
//! pixel, reads its digital number and calibrates it to top-of-atmosphere
//! reflectance. The two reflectances combine into the normalized difference.

use tracing::{debug, instrument};

use crate::calibration::calibrate;
use crate::error::{NdviError, PipelineResult};
use crate::geometry::geotransform::locate;
use crate::geometry::projection::transform;
use crate::geometry::GeoPoint;
use crate::metadata::CalibrationRecord;
use crate::scene::{Band, SceneId};
use crate::storage::SceneStore;

/// `(nir - red) / (nir + red)`, undefined when both reflectances cancel out
pub fn normalized_difference(nir: f64, red: f64) -> PipelineResult<f64> {
    let sum = nir + red;
    if sum == 0.0 {
        return Err(NdviError::UndefinedIndex);
    }
    let ndvi = (nir - red) / sum;
    if ndvi.is_finite() {
        Ok(ndvi)
    } else {
        Err(NdviError::UndefinedIndex)
    }
}

/// Computes NDVI for scenes served by a [`SceneStore`]
pub struct NdviEngine<S> {
    store: S,
}

impl<S: SceneStore> NdviEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// NDVI of the pixel containing `point` in scene `scene_id`
    #[instrument(skip(self, point), fields(point = %point))]
    pub fn compute_ndvi(&self, scene_id: &str, point: GeoPoint) -> PipelineResult<f64> {
        let scene = SceneId::parse(scene_id)?;
        let record = self.store.fetch_metadata(&scene)?;

        let nir = self.band_reflectance(&scene, Band::NearInfrared, point, &record)?;
        let red = self.band_reflectance(&scene, Band::Red, point, &record)?;

        let ndvi = normalized_difference(nir, red)?;
        debug!(nir, red, ndvi, "Computed NDVI");
        Ok(ndvi)
    }

    /// Top-of-atmosphere reflectance of `band` at `point`
    pub fn band_reflectance(
        &self,
        scene: &SceneId,
        band: Band,
        point: GeoPoint,
        record: &CalibrationRecord,
    ) -> PipelineResult<f64> {
        let raster = self.store.open_band(scene, band)?;
        let native = transform(point, raster.crs_code())?;
        let index = locate(&native, raster.geotransform());
        let dn = raster.sample_dn(index)?;

        debug!(
            band = %band,
            row = index.row,
            column = index.column,
            dn,
            "Sampled band"
        );

        calibrate(dn, band.number(), record)
    }
}
