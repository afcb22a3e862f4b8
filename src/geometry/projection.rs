//! Coordinate transforms between EPSG reference systems, in pure Rust.
//!
//! Projection definitions come from the crs-definitions database (covers
//! every UTM zone Landsat scenes are delivered in); the transform itself
//! is delegated to proj4rs.

use proj4rs::proj::Proj;
use proj4rs::transform::transform as proj_transform;
use tracing::trace;

use super::GeoPoint;
use crate::error::{NdviError, PipelineResult};

/// Express `point` in the `target_epsg` reference system.
///
/// Fails with [`NdviError::UnknownReferenceSystem`] if either code is not
/// in the database. Same-CRS requests return the point unchanged.
pub fn transform(point: GeoPoint, target_epsg: i32) -> PipelineResult<GeoPoint> {
    let source = resolve(point.epsg)?;
    let target = resolve(target_epsg)?;

    if point.epsg == target_epsg {
        return Ok(point);
    }

    let (x, y) = project(&source, &target, point.x, point.y)?;
    trace!(from = %point, to_epsg = target_epsg, x, y, "Projected point");

    Ok(GeoPoint::new(x, y, target_epsg))
}

/// Get PROJ4 string for an EPSG code
#[inline]
pub fn get_proj_string(epsg: i32) -> Option<&'static str> {
    u16::try_from(epsg)
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS
#[inline]
pub fn is_geographic_crs(epsg: i32) -> bool {
    get_proj_string(epsg).is_some_and(|s| s.contains("+proj=longlat"))
}

struct Resolved {
    epsg: i32,
    proj: Proj,
    geographic: bool,
}

fn resolve(epsg: i32) -> PipelineResult<Resolved> {
    let proj_str = get_proj_string(epsg).ok_or(NdviError::UnknownReferenceSystem(epsg))?;
    let proj = Proj::from_proj_string(proj_str)
        .map_err(|_| NdviError::UnknownReferenceSystem(epsg))?;

    Ok(Resolved {
        epsg,
        proj,
        geographic: is_geographic_crs(epsg),
    })
}

fn project(source: &Resolved, target: &Resolved, x: f64, y: f64) -> PipelineResult<(f64, f64)> {
    // proj4rs works in radians for geographic systems
    let mut point = if source.geographic {
        (x.to_radians(), y.to_radians(), 0.0)
    } else {
        (x, y, 0.0)
    };

    proj_transform(&source.proj, &target.proj, &mut point).map_err(|e| {
        NdviError::Projection(format!(
            "EPSG:{} -> EPSG:{} failed: {e:?}",
            source.epsg, target.epsg
        ))
    })?;

    if target.geographic {
        Ok((point.0.to_degrees(), point.1.to_degrees()))
    } else {
        Ok((point.0, point.1))
    }
}
