//! Access to per-scene files in the Landsat 8 archive
//!
//! A scene directory holds one GeoTIFF per band plus the `_MTL.txt`
//! calibration metadata. The [`SceneStore`] trait hides where that directory
//! lives so the NDVI engine can run against the public bucket, a mirror, or
//! an in-memory fixture.

use std::time::Duration;

use tracing::debug;

use crate::cog_reader::CogReader;
use crate::config::PipelineConfig;
use crate::error::{NdviError, PipelineResult};
use crate::metadata::CalibrationRecord;
use crate::range_reader::{create_range_reader, http_client};
use crate::scene::{Band, SceneId};

/// Source of scene metadata and band rasters
pub trait SceneStore: Send + Sync {
    /// Fetch and parse the scene's calibration metadata
    fn fetch_metadata(&self, scene: &SceneId) -> PipelineResult<CalibrationRecord>;

    /// Open one band for point reads; only the header is fetched
    fn open_band(&self, scene: &SceneId, band: Band) -> PipelineResult<CogReader>;
}

/// Scene store backed by the configured storage base (HTTP, S3 or local path)
pub struct RemoteSceneStore {
    storage_url: String,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl RemoteSceneStore {
    pub fn new(config: &PipelineConfig) -> PipelineResult<Self> {
        Ok(Self {
            storage_url: config.storage_url.clone(),
            timeout: config.request_timeout,
            client: http_client(config.request_timeout)?,
        })
    }

    pub fn storage_url(&self) -> &str {
        &self.storage_url
    }

    fn fetch_text(&self, url: &str) -> PipelineResult<String> {
        if !is_http(url) {
            let reader = create_range_reader(url, self.timeout)?;
            let length = usize::try_from(reader.size())
                .map_err(|_| NdviError::Io(format!("{url}: file too large")))?;
            let bytes = reader.read_range(0, length)?;
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| NdviError::from_reqwest(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NdviError::RemoteFetchFailure {
                url: url.to_string(),
                message: format!("GET returned {status}"),
            });
        }

        response.text().map_err(|e| NdviError::from_reqwest(url, &e))
    }
}

impl SceneStore for RemoteSceneStore {
    fn fetch_metadata(&self, scene: &SceneId) -> PipelineResult<CalibrationRecord> {
        let url = scene.metadata_url(&self.storage_url);
        let text = self.fetch_text(&url)?;
        let record = CalibrationRecord::parse_text(&text);
        debug!(url = %url, entries = record.len(), "Fetched scene metadata");
        Ok(record)
    }

    fn open_band(&self, scene: &SceneId, band: Band) -> PipelineResult<CogReader> {
        CogReader::open(&scene.band_url(&self.storage_url, band), self.timeout)
    }
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{http_response, mtl_text, serve_http, TestTiff};
    use std::fs;

    const SCENE: &str = "LC80440342015103LGN00";

    fn local_store(root: &std::path::Path) -> RemoteSceneStore {
        let root = root.to_string_lossy();
        RemoteSceneStore::new(&PipelineConfig::with_endpoints("http://unused", &root)).unwrap()
    }

    fn scene_dir(root: &std::path::Path) -> std::path::PathBuf {
        let dir = root.join("044").join("034").join(SCENE);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_local_metadata() {
        let root = tempfile::tempdir().unwrap();
        let dir = scene_dir(root.path());
        fs::write(dir.join(format!("{SCENE}_MTL.txt")), mtl_text(2.0e-5, -0.1, 45.0)).unwrap();

        let store = local_store(root.path());
        let record = store.fetch_metadata(&SceneId::parse(SCENE).unwrap()).unwrap();
        assert_eq!(record.lookup("SUN_ELEVATION").unwrap(), "45");
        assert_eq!(record.lookup_f64("REFLECTANCE_ADD_BAND_4").unwrap(), -0.1);
    }

    #[test]
    fn test_local_band() {
        let root = tempfile::tempdir().unwrap();
        let dir = scene_dir(root.path());
        let tiff = TestTiff::new(4, 4, 32610, (0..16).collect()).rows_per_strip(2);
        fs::write(dir.join(format!("{SCENE}_B4.TIF")), tiff.build()).unwrap();

        let store = local_store(root.path());
        let band = store
            .open_band(&SceneId::parse(SCENE).unwrap(), Band::Red)
            .unwrap();
        assert_eq!(band.crs_code(), 32610);
        assert!(band.identifier().ends_with("_B4.TIF"));
    }

    fn http_store(base: &str) -> RemoteSceneStore {
        RemoteSceneStore::new(&PipelineConfig::with_endpoints("http://unused", &format!("{base}/L8"))).unwrap()
    }

    #[test]
    fn test_http_metadata() {
        let base = serve_http(|request| {
            if request.path == format!("/L8/044/034/{SCENE}/{SCENE}_MTL.txt") {
                http_response(request, "200 OK", mtl_text(2.0e-5, -0.1, 45.0).as_bytes())
            } else {
                http_response(request, "404 Not Found", b"")
            }
        });

        let record = http_store(&base)
            .fetch_metadata(&SceneId::parse(SCENE).unwrap())
            .unwrap();
        assert_eq!(record.lookup_f64("SUN_ELEVATION").unwrap(), 45.0);
    }

    #[test]
    fn test_http_metadata_not_found() {
        let base = serve_http(|request| http_response(request, "404 Not Found", b"NoSuchKey"));

        let err = http_store(&base)
            .fetch_metadata(&SceneId::parse(SCENE).unwrap())
            .unwrap_err();
        assert!(matches!(err, NdviError::RemoteFetchFailure { ref url, ref message }
            if url.ends_with("_MTL.txt") && message.contains("404")));
    }

    #[test]
    fn test_missing_scene_files() {
        let root = tempfile::tempdir().unwrap();
        let store = local_store(root.path());
        let scene = SceneId::parse(SCENE).unwrap();

        assert!(matches!(store.fetch_metadata(&scene), Err(NdviError::Io(_))));
        assert!(store.open_band(&scene, Band::NearInfrared).is_err());
    }
}
