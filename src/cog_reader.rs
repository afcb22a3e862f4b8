//! Partial-read GeoTIFF reader for single-pixel sampling
//!
//! Opening a band raster costs three small range reads (header, IFD entry
//! count, IFD body) plus whatever out-of-line tag arrays the IFD points at.
//! Sampling a pixel reads and decodes exactly one tile or strip.
//!
//! Supported layout:
//! - Classic TIFF (not BigTIFF), either byte order
//! - Tiled or stripped, chunky (pixel-interleaved) samples
//! - Unsigned 8/16/32-bit samples
//! - No compression, LZW, Deflate or Zstd; predictor 1 or 2
//! - Georeferencing from ModelTransformation or ModelTiepoint + ModelPixelScale,
//!   CRS from the GeoKey directory

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{NdviError, PipelineResult};
use crate::geometry::geotransform::{AffineGeotransform, PixelIndex};
use crate::range_reader::{create_range_reader, RangeReader};

/// Raw sensor reading for one pixel of one band
pub type DigitalNumber = u32;

// TIFF tag constants
const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_PLANAR_CONFIGURATION: u16 = 284;
const TAG_PREDICTOR: u16 = 317;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_SAMPLE_FORMAT: u16 = 339;
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;

// GeoKey constants
const GEO_KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEO_KEY_PROJECTED_CRS: u16 = 3072;
const GEO_KEY_USER_DEFINED: u16 = 32767;

// Field types
const TYPE_BYTE: u16 = 1;
const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_DOUBLE: u16 = 12;
const TYPE_LONG8: u16 = 16;

const SAMPLE_FORMAT_UINT: u64 = 1;

/// Unsigned sample layouts a digital number can be stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    UInt8,
    UInt16,
    UInt32,
}

impl SampleType {
    #[must_use]
    pub fn from_tags(bits_per_sample: u64, sample_format: u64) -> Option<Self> {
        if sample_format != SAMPLE_FORMAT_UINT {
            return None;
        }
        match bits_per_sample {
            8 => Some(Self::UInt8),
            16 => Some(Self::UInt16),
            32 => Some(Self::UInt32),
            _ => None,
        }
    }

    #[must_use]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::UInt8 => 1,
            Self::UInt16 => 2,
            Self::UInt32 => 4,
        }
    }

    fn mask(self) -> u32 {
        match self {
            Self::UInt8 => 0xFF,
            Self::UInt16 => 0xFFFF,
            Self::UInt32 => u32::MAX,
        }
    }
}

/// Compression type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    Deflate,
    Zstd,
}

impl Compression {
    #[must_use]
    pub fn from_tag(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::None),
            5 => Some(Self::Lzw),
            8 | 32946 => Some(Self::Deflate),
            50000 => Some(Self::Zstd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16(self, b: &[u8]) -> u16 {
        let b = [b[0], b[1]];
        match self {
            Self::Little => u16::from_le_bytes(b),
            Self::Big => u16::from_be_bytes(b),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        let b = [b[0], b[1], b[2], b[3]];
        match self {
            Self::Little => u32::from_le_bytes(b),
            Self::Big => u32::from_be_bytes(b),
        }
    }

    fn u64(self, b: &[u8]) -> u64 {
        let b = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
        match self {
            Self::Little => u64::from_le_bytes(b),
            Self::Big => u64::from_be_bytes(b),
        }
    }

    fn f64(self, b: &[u8]) -> f64 {
        f64::from_bits(self.u64(b))
    }
}

/// Band raster metadata, read from the first IFD without touching pixel data
#[derive(Debug, Clone)]
pub struct CogMetadata {
    pub width: usize,
    pub height: usize,

    /// Tile size, or (image width, rows per strip) for stripped files
    pub block_width: usize,
    pub block_height: usize,
    pub blocks_across: usize,
    pub is_tiled: bool,

    pub samples_per_pixel: usize,
    pub sample_type: SampleType,
    pub compression: Compression,
    /// 1 = none, 2 = horizontal differencing
    pub predictor: u16,

    pub block_offsets: Vec<u64>,
    pub block_byte_counts: Vec<u64>,

    pub geotransform: AffineGeotransform,
    /// EPSG code of the raster's native CRS
    pub crs_code: i32,
}

impl CogMetadata {
    /// Block holding pixel (row, column), and the pixel's position inside it
    fn locate_in_block(&self, row: usize, column: usize) -> (usize, usize, usize) {
        let block_row = row / self.block_height;
        let block_col = column / self.block_width;
        let index = block_row * self.blocks_across + block_col;
        (
            index,
            row - block_row * self.block_height,
            column - block_col * self.block_width,
        )
    }
}

/// Band raster reader over any [`RangeReader`]
pub struct CogReader {
    reader: Arc<dyn RangeReader>,
    byte_order: ByteOrder,
    pub metadata: CogMetadata,
}

impl CogReader {
    /// Open a band raster from a local path, HTTP(S) URL or S3 URL
    pub fn open(source: &str, timeout: Duration) -> PipelineResult<Self> {
        let reader = create_range_reader(source, timeout)?;
        Self::from_reader(reader)
    }

    /// Parse header and first IFD from an existing range reader
    pub fn from_reader(reader: Arc<dyn RangeReader>) -> PipelineResult<Self> {
        let id = reader.identifier().to_string();
        let header = read_exact(reader.as_ref(), 0, 8)?;

        let byte_order = match header.get(0..2) {
            Some(b"II") => ByteOrder::Little,
            Some(b"MM") => ByteOrder::Big,
            _ => return Err(NdviError::raster(&id, "invalid TIFF signature")),
        };

        match byte_order.u16(&header[2..4]) {
            42 => {}
            43 => return Err(NdviError::raster(&id, "BigTIFF is not supported")),
            version => return Err(NdviError::raster(&id, format!("invalid TIFF version {version}"))),
        }

        let ifd_offset = u64::from(byte_order.u32(&header[4..8]));
        let ifd = Ifd::read(reader.as_ref(), byte_order, ifd_offset)?;
        let metadata = ifd.into_metadata()?;

        debug!(
            source = %id,
            width = metadata.width,
            height = metadata.height,
            crs = metadata.crs_code,
            compression = ?metadata.compression,
            "Opened band raster"
        );

        Ok(Self {
            reader,
            byte_order,
            metadata,
        })
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    #[must_use]
    pub fn crs_code(&self) -> i32 {
        self.metadata.crs_code
    }

    #[must_use]
    pub fn geotransform(&self) -> &AffineGeotransform {
        &self.metadata.geotransform
    }

    /// Read the first sample of the pixel at `index`.
    ///
    /// Fails with [`NdviError::OutOfBoundsPixel`] outside the raster. Sparse
    /// blocks (zero byte count) read as 0, the Landsat fill value.
    pub fn sample_dn(&self, index: PixelIndex) -> PipelineResult<DigitalNumber> {
        let m = &self.metadata;
        let (row, column) = index.within(m.width, m.height)?;
        let (block, local_row, local_col) = m.locate_in_block(row, column);

        let (Some(&offset), Some(&byte_count)) =
            (m.block_offsets.get(block), m.block_byte_counts.get(block))
        else {
            return Err(NdviError::raster(
                self.identifier(),
                format!("block {block} missing from offset table"),
            ));
        };

        if byte_count == 0 {
            return Ok(0);
        }

        trace!(source = self.identifier(), block, offset, byte_count, "Reading block");

        let length = usize::try_from(byte_count)
            .map_err(|_| NdviError::raster(self.identifier(), "block too large"))?;
        let compressed = read_exact(self.reader.as_ref(), offset, length)?;
        let block_bytes = self.decompress(&compressed)?;

        let bps = m.sample_type.bytes_per_sample();
        let row_bytes = m.block_width * m.samples_per_pixel * bps;
        let row_start = local_row * row_bytes;
        let row_data = block_bytes
            .get(row_start..row_start + row_bytes)
            .ok_or_else(|| {
                NdviError::raster(
                    self.identifier(),
                    format!("block {block} decoded to {} bytes, row {local_row} missing", block_bytes.len()),
                )
            })?;

        let target = local_col * m.samples_per_pixel;
        let mut samples: Vec<u32> = row_data
            .chunks_exact(bps)
            .take(target + 1)
            .map(|b| self.decode_sample(b))
            .collect();

        if m.predictor == 2 {
            undo_horizontal_differencing(&mut samples, m.samples_per_pixel, m.sample_type);
        }

        Ok(samples[target])
    }

    fn decode_sample(&self, bytes: &[u8]) -> u32 {
        match self.metadata.sample_type {
            SampleType::UInt8 => u32::from(bytes[0]),
            SampleType::UInt16 => u32::from(self.byte_order.u16(bytes)),
            SampleType::UInt32 => self.byte_order.u32(bytes),
        }
    }

    fn decompress(&self, compressed: &[u8]) -> PipelineResult<Vec<u8>> {
        let id = self.identifier();
        match self.metadata.compression {
            Compression::None => Ok(compressed.to_vec()),
            Compression::Deflate => {
                let mut decoder = flate2::read::ZlibDecoder::new(compressed);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| NdviError::raster(id, format!("deflate: {e}")))?;
                Ok(out)
            }
            Compression::Lzw => {
                let mut decoder =
                    weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
                decoder
                    .decode(compressed)
                    .map_err(|e| NdviError::raster(id, format!("lzw: {e}")))
            }
            Compression::Zstd => zstd::stream::decode_all(compressed)
                .map_err(|e| NdviError::raster(id, format!("zstd: {e}"))),
        }
    }
}

/// Range read that rejects a short answer, e.g. a file cut off before an
/// offset its IFD points at.
fn read_exact(reader: &dyn RangeReader, offset: u64, length: usize) -> PipelineResult<Vec<u8>> {
    let bytes = reader.read_range(offset, length)?;
    if bytes.len() != length {
        return Err(NdviError::raster(
            reader.identifier(),
            format!("read of {length} bytes at offset {offset} returned {}", bytes.len()),
        ));
    }
    Ok(bytes)
}

/// Reverse TIFF predictor 2 in place.
///
/// Each sample stores the difference from the same channel of the previous
/// pixel in the row; accumulation is per whole sample, wrapping at the sample width.
fn undo_horizontal_differencing(samples: &mut [u32], samples_per_pixel: usize, sample_type: SampleType) {
    let mask = sample_type.mask();
    for i in samples_per_pixel..samples.len() {
        samples[i] = samples[i].wrapping_add(samples[i - samples_per_pixel]) & mask;
    }
}

struct IfdEntry {
    field_type: u16,
    count: u64,
    value: [u8; 4],
}

/// Parsed IFD entries plus the means to fetch out-of-line values
struct Ifd<'a> {
    reader: &'a dyn RangeReader,
    byte_order: ByteOrder,
    entries: HashMap<u16, IfdEntry>,
}

impl<'a> Ifd<'a> {
    fn read(reader: &'a dyn RangeReader, byte_order: ByteOrder, offset: u64) -> PipelineResult<Self> {
        let count_bytes = read_exact(reader, offset, 2)?;
        let entry_count = usize::from(byte_order.u16(&count_bytes));
        let body = read_exact(reader, offset + 2, entry_count * 12)?;

        let entries = body
            .chunks_exact(12)
            .map(|e| {
                (
                    byte_order.u16(&e[0..2]),
                    IfdEntry {
                        field_type: byte_order.u16(&e[2..4]),
                        count: u64::from(byte_order.u32(&e[4..8])),
                        value: [e[8], e[9], e[10], e[11]],
                    },
                )
            })
            .collect();

        Ok(Self {
            reader,
            byte_order,
            entries,
        })
    }

    fn id(&self) -> &str {
        self.reader.identifier()
    }

    /// Raw value bytes of a tag, inline or fetched from its offset
    fn raw(&self, tag: u16) -> PipelineResult<Option<(u16, Vec<u8>)>> {
        let Some(entry) = self.entries.get(&tag) else {
            return Ok(None);
        };

        let type_size: u64 = match entry.field_type {
            TYPE_BYTE | TYPE_ASCII => 1,
            TYPE_SHORT => 2,
            TYPE_LONG => 4,
            TYPE_DOUBLE | TYPE_LONG8 => 8,
            other => {
                return Err(NdviError::raster(
                    self.id(),
                    format!("tag {tag} has unsupported field type {other}"),
                ))
            }
        };

        let total = usize::try_from(entry.count * type_size)
            .map_err(|_| NdviError::raster(self.id(), format!("tag {tag} too large")))?;

        let bytes = if total <= 4 {
            entry.value[..total].to_vec()
        } else {
            let offset = u64::from(self.byte_order.u32(&entry.value));
            read_exact(self.reader, offset, total)?
        };

        Ok(Some((entry.field_type, bytes)))
    }

    fn integers(&self, tag: u16) -> PipelineResult<Option<Vec<u64>>> {
        let Some((field_type, bytes)) = self.raw(tag)? else {
            return Ok(None);
        };

        let bo = self.byte_order;
        let values = match field_type {
            TYPE_BYTE => bytes.iter().map(|b| u64::from(*b)).collect(),
            TYPE_SHORT => bytes.chunks_exact(2).map(|b| u64::from(bo.u16(b))).collect(),
            TYPE_LONG => bytes.chunks_exact(4).map(|b| u64::from(bo.u32(b))).collect(),
            TYPE_LONG8 => bytes.chunks_exact(8).map(|b| bo.u64(b)).collect(),
            other => {
                return Err(NdviError::raster(
                    self.id(),
                    format!("tag {tag} is type {other}, expected an integer"),
                ))
            }
        };
        Ok(Some(values))
    }

    fn integer(&self, tag: u16) -> PipelineResult<Option<u64>> {
        Ok(self.integers(tag)?.and_then(|v| v.first().copied()))
    }

    fn doubles(&self, tag: u16) -> PipelineResult<Option<Vec<f64>>> {
        match self.raw(tag)? {
            Some((TYPE_DOUBLE, bytes)) => Ok(Some(
                bytes.chunks_exact(8).map(|b| self.byte_order.f64(b)).collect(),
            )),
            Some(_) => Err(NdviError::raster(self.id(), format!("tag {tag} is not DOUBLE"))),
            None => Ok(None),
        }
    }

    fn required(&self, tag: u16, name: &str) -> PipelineResult<usize> {
        let value = self
            .integer(tag)?
            .ok_or_else(|| NdviError::raster(self.id(), format!("missing {name} tag")))?;
        usize::try_from(value).map_err(|_| NdviError::raster(self.id(), format!("{name} too large")))
    }

    fn into_metadata(self) -> PipelineResult<CogMetadata> {
        let id = self.id().to_string();

        let width = self.required(TAG_IMAGE_WIDTH, "ImageWidth")?;
        let height = self.required(TAG_IMAGE_LENGTH, "ImageLength")?;
        if width == 0 || height == 0 {
            return Err(NdviError::raster(&id, "empty image"));
        }

        let samples_per_pixel = self.integer(TAG_SAMPLES_PER_PIXEL)?.unwrap_or(1) as usize;
        if samples_per_pixel > 1 && self.integer(TAG_PLANAR_CONFIGURATION)?.unwrap_or(1) != 1 {
            return Err(NdviError::raster(&id, "planar (band-separate) layout is not supported"));
        }

        let bits = self.integer(TAG_BITS_PER_SAMPLE)?.unwrap_or(1);
        let format = self.integer(TAG_SAMPLE_FORMAT)?.unwrap_or(SAMPLE_FORMAT_UINT);
        let sample_type = SampleType::from_tags(bits, format).ok_or_else(|| {
            NdviError::raster(&id, format!("unsupported sample type: bits={bits}, format={format}"))
        })?;

        let compression_tag = self.integer(TAG_COMPRESSION)?.unwrap_or(1);
        let compression = Compression::from_tag(compression_tag)
            .ok_or_else(|| NdviError::raster(&id, format!("unsupported compression {compression_tag}")))?;

        let predictor = self.integer(TAG_PREDICTOR)?.unwrap_or(1);
        if predictor != 1 && predictor != 2 {
            return Err(NdviError::raster(&id, format!("unsupported predictor {predictor}")));
        }

        let is_tiled = self.entries.contains_key(&TAG_TILE_OFFSETS);
        let (block_width, block_height, offsets_tag, counts_tag) = if is_tiled {
            (
                self.required(TAG_TILE_WIDTH, "TileWidth")?,
                self.required(TAG_TILE_LENGTH, "TileLength")?,
                TAG_TILE_OFFSETS,
                TAG_TILE_BYTE_COUNTS,
            )
        } else {
            let rows_per_strip = self.integer(TAG_ROWS_PER_STRIP)?.unwrap_or(height as u64) as usize;
            (width, rows_per_strip.min(height), TAG_STRIP_OFFSETS, TAG_STRIP_BYTE_COUNTS)
        };
        if block_width == 0 || block_height == 0 {
            return Err(NdviError::raster(&id, "zero block size"));
        }

        let blocks_across = width.div_ceil(block_width);
        let blocks_down = height.div_ceil(block_height);
        let expected_blocks = blocks_across * blocks_down;

        let block_offsets = self
            .integers(offsets_tag)?
            .ok_or_else(|| NdviError::raster(&id, "missing block offsets"))?;
        let block_byte_counts = self
            .integers(counts_tag)?
            .ok_or_else(|| NdviError::raster(&id, "missing block byte counts"))?;
        if block_offsets.len() < expected_blocks || block_byte_counts.len() < expected_blocks {
            return Err(NdviError::raster(
                &id,
                format!(
                    "{expected_blocks} blocks expected, found {} offsets / {} counts",
                    block_offsets.len(),
                    block_byte_counts.len()
                ),
            ));
        }

        let geotransform = self.read_geotransform()?;
        let crs_code = self
            .read_epsg()?
            .ok_or_else(|| NdviError::raster(&id, "no EPSG code in GeoKey directory"))?;

        Ok(CogMetadata {
            width,
            height,
            block_width,
            block_height,
            blocks_across,
            is_tiled,
            samples_per_pixel,
            sample_type,
            compression,
            predictor: predictor as u16,
            block_offsets,
            block_byte_counts,
            geotransform,
            crs_code,
        })
    }

    fn read_geotransform(&self) -> PipelineResult<AffineGeotransform> {
        let gt = if let Some(m) = self.doubles(TAG_MODEL_TRANSFORMATION)?.filter(|m| m.len() >= 16) {
            let mut matrix = [0.0; 16];
            matrix.copy_from_slice(&m[..16]);
            AffineGeotransform::from_model_transformation(matrix)
        } else {
            let tiepoint = self.doubles(TAG_MODEL_TIEPOINT)?.filter(|t| t.len() >= 6);
            let scale = self.doubles(TAG_MODEL_PIXEL_SCALE)?.filter(|s| s.len() >= 3);
            let (Some(t), Some(s)) = (tiepoint, scale) else {
                return Err(NdviError::raster(self.id(), "no georeferencing tags"));
            };
            AffineGeotransform::from_tiepoint_scale([t[0], t[1], t[2], t[3], t[4], t[5]], [s[0], s[1], s[2]])
        };

        if !gt.is_valid() {
            return Err(NdviError::raster(self.id(), format!("degenerate geotransform {:?}", gt.coefficients())));
        }
        Ok(gt)
    }

    /// ProjectedCSTypeGeoKey if set, else GeographicTypeGeoKey
    fn read_epsg(&self) -> PipelineResult<Option<i32>> {
        let Some(dir) = self.integers(TAG_GEO_KEY_DIRECTORY)? else {
            return Ok(None);
        };
        if dir.len() < 4 {
            return Ok(None);
        }

        // Header: KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys
        // then per key: KeyID, TIFFTagLocation, Count, Value_Offset
        let mut projected = None;
        let mut geographic = None;
        for key in dir[4..].chunks_exact(4).take(dir[3] as usize) {
            let (key_id, location, value) = (key[0] as u16, key[1], key[3] as u16);
            if location != 0 || value == 0 || value == GEO_KEY_USER_DEFINED {
                continue;
            }
            match key_id {
                GEO_KEY_PROJECTED_CRS => projected = Some(i32::from(value)),
                GEO_KEY_GEOGRAPHIC_TYPE => geographic = Some(i32::from(value)),
                _ => {}
            }
        }

        Ok(projected.or(geographic))
    }
}
