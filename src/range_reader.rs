//! Range-based reader interface for GeoTIFF band files
//!
//! Band rasters are read a few kilobytes at a time (header, IFD, one tile),
//! so every source is accessed through byte-range reads rather than full
//! downloads.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::debug;

use crate::error::{NdviError, PipelineResult};

/// Trait for reading byte ranges from any source
///
/// This abstraction allows the same TIFF parsing code to work with:
/// - Local files (using seek + read)
/// - S3 objects (using `GetObject` with Range header)
/// - HTTP URLs (using Range header)
/// - In-memory buffers
pub trait RangeReader: Send + Sync {
    /// Read exactly `length` bytes starting at `offset`; short reads are errors
    fn read_range(&self, offset: u64, length: usize) -> PipelineResult<Vec<u8>>;

    /// Total size of the source in bytes (0 if unknown)
    fn size(&self) -> u64;

    /// Human-readable identifier for logging/errors
    fn identifier(&self) -> &str;
}

/// Local file range reader
pub struct LocalRangeReader {
    path: PathBuf,
    id: String,
    size: u64,
}

impl LocalRangeReader {
    pub fn new(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let size = std::fs::metadata(&path)
            .map_err(|e| NdviError::Io(format!("{}: {e}", path.display())))?
            .len();
        Ok(Self {
            id: path.to_string_lossy().into_owned(),
            path,
            size,
        })
    }
}

impl RangeReader for LocalRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> PipelineResult<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; length];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.id
    }
}

/// HTTP range reader with a bounded timeout per request
pub struct HttpRangeReader {
    url: String,
    size: u64,
    client: reqwest::blocking::Client,
}

impl HttpRangeReader {
    /// Open `url`, fetching its size with a HEAD request
    pub fn new(url: &str, timeout: Duration) -> PipelineResult<Self> {
        let client = http_client(timeout)?;

        let response = client
            .head(url)
            .send()
            .map_err(|e| NdviError::from_reqwest(url, &e))?;

        if !response.status().is_success() {
            return Err(NdviError::RemoteFetchFailure {
                url: url.to_string(),
                message: format!("HEAD returned {}", response.status()),
            });
        }

        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        debug!(url, size, "Opened HTTP range reader");

        Ok(Self {
            url: url.to_string(),
            size,
            client,
        })
    }
}

impl RangeReader for HttpRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> PipelineResult<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }

        let range = format!("bytes={}-{}", offset, offset + length as u64 - 1);
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, range)
            .send()
            .map_err(|e| NdviError::from_reqwest(&self.url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NdviError::RemoteFetchFailure {
                url: self.url.clone(),
                message: format!("range request returned {status}"),
            });
        }

        let mut body = response
            .bytes()
            .map_err(|e| NdviError::from_reqwest(&self.url, &e))?;

        // Servers that ignore Range answer 200 with the whole object
        if status == StatusCode::OK {
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(body.len());
            let end = start.saturating_add(length).min(body.len());
            body = body.slice(start..end);
        }

        check_length(&self.url, offset, length, body.len())?;
        Ok(body.to_vec())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}

/// In-memory range reader, mostly for tests and pre-fetched files
pub struct MemoryRangeReader {
    id: String,
    data: Arc<[u8]>,
}

impl MemoryRangeReader {
    pub fn new(id: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
        }
    }
}

impl RangeReader for MemoryRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> PipelineResult<Vec<u8>> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(length);
        self.data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                NdviError::Io(format!(
                    "{}: range {start}..{end} outside {} bytes",
                    self.id,
                    self.data.len()
                ))
            })
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.id
    }
}

/// Fail a read that came back shorter (or longer) than requested
pub(crate) fn check_length(url: &str, offset: u64, expected: usize, actual: usize) -> PipelineResult<()> {
    if actual == expected {
        return Ok(());
    }
    Err(NdviError::RemoteFetchFailure {
        url: url.to_string(),
        message: format!("expected {expected} bytes at offset {offset}, got {actual}"),
    })
}

/// Blocking client used for every HTTP request in the crate
pub(crate) fn http_client(timeout: Duration) -> PipelineResult<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| NdviError::RemoteFetchFailure {
            url: String::new(),
            message: format!("failed to build HTTP client: {e}"),
        })
}

/// Create a range reader from a path or URL
pub fn create_range_reader(source: &str, timeout: Duration) -> PipelineResult<Arc<dyn RangeReader>> {
    if source.starts_with("s3://") {
        Ok(Arc::new(crate::s3::S3RangeReaderSync::new(source, timeout)?))
    } else if source.starts_with("http://") || source.starts_with("https://") {
        Ok(Arc::new(HttpRangeReader::new(source, timeout)?))
    } else {
        Ok(Arc::new(LocalRangeReader::new(source)?))
    }
}
