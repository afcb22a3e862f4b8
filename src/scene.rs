//! Landsat 8 scene identifiers and the storage layout built from them.
//!
//! Pre-collection scene IDs look like `LC80440342015103LGN00`:
//! sensor (`LC8`), WRS-2 path (`044`), row (`034`), year + day of year,
//! ground station and version. Files live under
//! `{storage}/{path}/{row}/{scene}/`.

use std::fmt;

use crate::error::{NdviError, PipelineResult};

/// OLI spectral bands used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    Red,
    NearInfrared,
}

impl Band {
    /// NDVI sampling order: near-infrared first, then red
    pub const NDVI_BANDS: [Band; 2] = [Band::NearInfrared, Band::Red];

    /// OLI band number
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Band::Red => 4,
            Band::NearInfrared => 5,
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.number())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SceneId {
    id: String,
}

impl SceneId {
    /// Validate an identifier; path and row are the characters at `[3, 6)` and `[6, 9)`.
    pub fn parse(id: &str) -> PipelineResult<Self> {
        let id = id.trim();
        let valid = id.len() >= 9
            && id.is_ascii()
            && id.bytes().all(|b| b.is_ascii_alphanumeric())
            && id[3..9].bytes().all(|b| b.is_ascii_digit());

        if !valid {
            return Err(NdviError::InvalidSceneId(id.to_string()));
        }

        Ok(Self { id: id.to_string() })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// WRS-2 path, zero padded
    #[must_use]
    pub fn path(&self) -> &str {
        &self.id[3..6]
    }

    /// WRS-2 row, zero padded
    #[must_use]
    pub fn row(&self) -> &str {
        &self.id[6..9]
    }

    fn directory(&self, storage_url: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            storage_url.trim_end_matches('/'),
            self.path(),
            self.row(),
            self.id
        )
    }

    /// Location of one band's GeoTIFF
    #[must_use]
    pub fn band_url(&self, storage_url: &str, band: Band) -> String {
        format!("{}/{}_B{}.TIF", self.directory(storage_url), self.id, band.number())
    }

    /// Location of the `_MTL.txt` calibration metadata
    #[must_use]
    pub fn metadata_url(&self, storage_url: &str) -> String {
        format!("{}/{}_MTL.txt", self.directory(storage_url), self.id)
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
