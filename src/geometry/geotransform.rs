//! Affine geotransforms and world-to-pixel location.

use super::GeoPoint;
use crate::error::{NdviError, PipelineResult};

/// Six-coefficient affine mapping from pixel (column, row) to world (x, y),
/// in GDAL coefficient order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineGeotransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub column_rotation: f64,
    /// Negative for north-up rasters
    pub pixel_height: f64,
}

impl AffineGeotransform {
    /// Build from `[origin_x, pixel_width, row_rotation, origin_y, column_rotation, pixel_height]`.
    #[must_use]
    pub fn from_coefficients(c: [f64; 6]) -> Self {
        Self {
            origin_x: c[0],
            pixel_width: c[1],
            row_rotation: c[2],
            origin_y: c[3],
            column_rotation: c[4],
            pixel_height: c[5],
        }
    }

    #[must_use]
    pub fn coefficients(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.column_rotation,
            self.pixel_height,
        ]
    }

    /// Build from GeoTIFF ModelTiepoint `(i, j, k, x, y, z)` and ModelPixelScale `(sx, sy, sz)`.
    ///
    /// The tiepoint may anchor any pixel, not only (0, 0).
    #[must_use]
    pub fn from_tiepoint_scale(tiepoint: [f64; 6], scale: [f64; 3]) -> Self {
        Self {
            origin_x: tiepoint[3] - tiepoint[0] * scale[0],
            pixel_width: scale[0],
            row_rotation: 0.0,
            origin_y: tiepoint[4] + tiepoint[1] * scale[1],
            column_rotation: 0.0,
            pixel_height: -scale[1],
        }
    }

    /// Build from a row-major 4x4 GeoTIFF ModelTransformation matrix.
    #[must_use]
    pub fn from_model_transformation(m: [f64; 16]) -> Self {
        Self {
            origin_x: m[3],
            pixel_width: m[0],
            row_rotation: m[1],
            origin_y: m[7],
            column_rotation: m[4],
            pixel_height: m[5],
        }
    }

    /// World coordinates of a pixel's upper-left corner
    #[must_use]
    pub fn pixel_to_world(&self, column: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + column * self.pixel_width + row * self.row_rotation,
            self.origin_y + column * self.column_rotation + row * self.pixel_height,
        )
    }

    /// Usable for pixel location: finite coefficients and non-zero pixel width
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.coefficients().iter().all(|c| c.is_finite()) && self.pixel_width != 0.0
    }
}

/// Row/column indices of a pixel. May be negative or past the raster edge
/// until checked with [`PixelIndex::within`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelIndex {
    pub row: i64,
    pub column: i64,
}

impl PixelIndex {
    #[must_use]
    pub fn new(row: i64, column: i64) -> Self {
        Self { row, column }
    }

    /// Check the index against raster dimensions, returning `(row, column)` as usize.
    pub fn within(&self, width: usize, height: usize) -> PipelineResult<(usize, usize)> {
        let row = usize::try_from(self.row).ok().filter(|r| *r < height);
        let column = usize::try_from(self.column).ok().filter(|c| *c < width);

        match (row, column) {
            (Some(row), Some(column)) => Ok((row, column)),
            _ => Err(NdviError::OutOfBoundsPixel {
                row: self.row,
                column: self.column,
                width,
                height,
            }),
        }
    }
}

/// Nearest pixel containing `point`, which must already be in the raster's CRS.
///
/// Both axes divide by `pixel_width`: rows step by the same distance as
/// columns, which holds for the north-up square-pixel rasters Landsat ships.
/// Rotation terms are ignored. Rounding is half away from zero
/// ([`f64::round`]). No bounds check happens here.
#[must_use]
pub fn locate(point: &GeoPoint, geotransform: &AffineGeotransform) -> PixelIndex {
    let column = (point.x - geotransform.origin_x) / geotransform.pixel_width;
    let row = (geotransform.origin_y - point.y) / geotransform.pixel_width;

    PixelIndex {
        row: round_index(row),
        column: round_index(column),
    }
}

// NaN would otherwise cast to 0, a valid index
fn round_index(value: f64) -> i64 {
    if value.is_finite() {
        value.round() as i64
    } else {
        i64::MIN
    }
}
