//! Landsat `_MTL.txt` calibration metadata.
//!
//! The MTL file is a flat list of `KEY = VALUE` lines nested in
//! `GROUP = ...` / `END_GROUP = ...` markers. Parsing is two-stage: lines are
//! first split into raw string pairs ([`CalibrationRecord::parse`]), and values
//! are only converted to numbers when looked up ([`CalibrationRecord::lookup_f64`]).

use crate::error::{NdviError, PipelineResult};

const SEPARATOR: &str = " = ";

/// Ordered `KEY = VALUE` pairs from one scene's metadata file.
///
/// When a key appears more than once the first occurrence wins; later
/// definitions are kept in the record but never returned by lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationRecord {
    entries: Vec<(String, String)>,
}

impl CalibrationRecord {
    /// Split each line on its first `" = "`, trimming key and value.
    /// Lines without the separator are skipped.
    pub fn parse<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = lines
            .into_iter()
            .filter_map(|line| {
                let (key, value) = line.as_ref().split_once(SEPARATOR)?;
                Some((key.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Self { entries }
    }

    /// Parse a whole metadata document.
    #[must_use]
    pub fn parse_text(text: &str) -> Self {
        Self::parse(text.lines())
    }

    /// Raw value of the first entry named `key`.
    pub fn lookup(&self, key: &str) -> PipelineResult<&str> {
        self.get(key)
            .ok_or_else(|| NdviError::KeyNotFound(key.to_string()))
    }

    /// First value for `key`, parsed as a float. Surrounding quotes are stripped.
    pub fn lookup_f64(&self, key: &str) -> PipelineResult<f64> {
        let raw = self.lookup(key)?;
        raw.trim_matches('"')
            .parse::<f64>()
            .map_err(|_| NdviError::MalformedValue {
                key: key.to_string(),
                value: raw.to_string(),
            })
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
