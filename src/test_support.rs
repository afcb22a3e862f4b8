//! Fixtures shared by unit tests: an in-memory GeoTIFF writer, MTL text,
//! and in-memory scene store and catalog.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::sync::{Arc, Mutex};

use crate::catalog::{Catalog, CatalogQuery, SceneRecord};
use crate::cog_reader::{CogReader, Compression};
use crate::error::{NdviError, PipelineResult};
use crate::geometry::projection::transform;
use crate::geometry::GeoPoint;
use crate::metadata::CalibrationRecord;
use crate::range_reader::MemoryRangeReader;
use crate::scene::{Band, SceneId};
use crate::storage::SceneStore;

pub(crate) const STORAGE: &str = "mem://L8";

/// Little-endian single-band uint16 GeoTIFF
#[derive(Clone)]
pub(crate) struct TestTiff {
    width: usize,
    height: usize,
    epsg: u16,
    data: Vec<u16>,
    tile: Option<(usize, usize)>,
    rows_per_strip: Option<usize>,
    compression: Compression,
    predictor: bool,
    sparse_block: Option<usize>,
    geographic: bool,
    geokeys: bool,
    origin: (f64, f64),
    pixel_size: f64,
}

enum TagValue {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Double(Vec<f64>),
    Ascii(&'static str),
}

impl TagValue {
    fn encode(&self) -> (u16, usize, Vec<u8>) {
        match self {
            Self::Short(v) => (3, v.len(), v.iter().flat_map(|x| x.to_le_bytes()).collect()),
            Self::Long(v) => (4, v.len(), v.iter().flat_map(|x| x.to_le_bytes()).collect()),
            Self::Double(v) => (12, v.len(), v.iter().flat_map(|x| x.to_le_bytes()).collect()),
            Self::Ascii(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                (2, bytes.len(), bytes)
            }
        }
    }
}

impl TestTiff {
    pub(crate) fn new(width: usize, height: usize, epsg: u16, data: Vec<u16>) -> Self {
        assert_eq!(data.len(), width * height);
        Self {
            width,
            height,
            epsg,
            data,
            tile: None,
            rows_per_strip: None,
            compression: Compression::None,
            predictor: false,
            sparse_block: None,
            geographic: false,
            geokeys: true,
            origin: (399_885.0, 4_300_215.0),
            pixel_size: 30.0,
        }
    }

    /// Raster of `fill` with `dn` at the pixel containing `point`.
    pub(crate) fn around_point(point: GeoPoint, epsg: u16, dn: u16, fill: u16) -> Self {
        let (width, height, row, col) = (16, 16, 6, 9);
        let native = transform(point, i32::from(epsg)).unwrap();
        let mut data = vec![fill; width * height];
        data[row * width + col] = dn;
        Self::new(width, height, epsg, data)
            .tiled(8, 8)
            .origin(native.x - col as f64 * 30.0, native.y + row as f64 * 30.0)
    }

    pub(crate) fn tiled(mut self, tile_width: usize, tile_height: usize) -> Self {
        self.tile = Some((tile_width, tile_height));
        self
    }

    pub(crate) fn rows_per_strip(mut self, rows: usize) -> Self {
        self.rows_per_strip = Some(rows);
        self
    }

    pub(crate) fn deflate(mut self) -> Self {
        self.compression = Compression::Deflate;
        self
    }

    pub(crate) fn lzw(mut self) -> Self {
        self.compression = Compression::Lzw;
        self
    }

    pub(crate) fn zstd(mut self) -> Self {
        self.compression = Compression::Zstd;
        self
    }

    pub(crate) fn predictor(mut self) -> Self {
        self.predictor = true;
        self
    }

    pub(crate) fn sparse_block(mut self, index: usize) -> Self {
        self.sparse_block = Some(index);
        self
    }

    pub(crate) fn geographic(mut self) -> Self {
        self.geographic = true;
        self.pixel_size = 0.001;
        self.origin = (15.0, 52.0);
        self
    }

    pub(crate) fn without_geokeys(mut self) -> Self {
        self.geokeys = false;
        self
    }

    pub(crate) fn origin(mut self, x: f64, y: f64) -> Self {
        self.origin = (x, y);
        self
    }

    fn compression_tag(&self) -> u16 {
        match self.compression {
            Compression::None => 1,
            Compression::Lzw => 5,
            Compression::Deflate => 8,
            Compression::Zstd => 50000,
        }
    }

    fn pixel(&self, row: usize, col: usize) -> u16 {
        if row < self.height && col < self.width {
            self.data[row * self.width + col]
        } else {
            0
        }
    }

    /// (block width, row ranges of each block, column start of each block)
    fn blocks(&self) -> (usize, Vec<(usize, usize, usize)>) {
        match self.tile {
            Some((tw, th)) => {
                let mut blocks = Vec::new();
                for tile_row in 0..self.height.div_ceil(th) {
                    for tile_col in 0..self.width.div_ceil(tw) {
                        blocks.push((tile_row * th, tile_row * th + th, tile_col * tw));
                    }
                }
                (tw, blocks)
            }
            None => {
                let rps = self.rows_per_strip.unwrap_or(self.height);
                let blocks = (0..self.height.div_ceil(rps))
                    .map(|s| (s * rps, ((s + 1) * rps).min(self.height), 0))
                    .collect();
                (self.width, blocks)
            }
        }
    }

    fn encode_block(&self, block_width: usize, rows: (usize, usize), col0: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for row in rows.0..rows.1 {
            let mut samples: Vec<u16> = (0..block_width).map(|c| self.pixel(row, col0 + c)).collect();
            if self.predictor {
                for i in (1..samples.len()).rev() {
                    samples[i] = samples[i].wrapping_sub(samples[i - 1]);
                }
            }
            bytes.extend(samples.iter().flat_map(|s| s.to_le_bytes()));
        }

        match self.compression {
            Compression::None => bytes,
            Compression::Deflate => {
                let mut encoder =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&bytes).unwrap();
                encoder.finish().unwrap()
            }
            Compression::Lzw => weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
                .encode(&bytes)
                .unwrap(),
            Compression::Zstd => zstd::stream::encode_all(bytes.as_slice(), 0).unwrap(),
        }
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut out = b"II\x2a\x00\0\0\0\0".to_vec();

        let (block_width, blocks) = self.blocks();
        let mut offsets = Vec::new();
        let mut counts = Vec::new();
        for (i, (start, end, col0)) in blocks.iter().enumerate() {
            if self.sparse_block == Some(i) {
                offsets.push(0);
                counts.push(0);
                continue;
            }
            let encoded = self.encode_block(block_width, (*start, *end), *col0);
            offsets.push(out.len() as u32);
            counts.push(encoded.len() as u32);
            out.extend(encoded);
        }
        if out.len() % 2 == 1 {
            out.push(0);
        }

        let ifd_offset = out.len();
        out[4..8].copy_from_slice(&(ifd_offset as u32).to_le_bytes());

        let mut tags = vec![
            (256, TagValue::Long(vec![self.width as u32])),
            (257, TagValue::Long(vec![self.height as u32])),
            (258, TagValue::Short(vec![16])),
            (259, TagValue::Short(vec![self.compression_tag()])),
            (262, TagValue::Short(vec![1])),
            (277, TagValue::Short(vec![1])),
            (339, TagValue::Short(vec![1])),
            (33550, TagValue::Double(vec![self.pixel_size, self.pixel_size, 0.0])),
            (33922, TagValue::Double(vec![0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0])),
            (42113, TagValue::Ascii("0")),
        ];
        if self.predictor {
            tags.push((317, TagValue::Short(vec![2])));
        }
        match self.tile {
            Some((tw, th)) => {
                tags.push((322, TagValue::Long(vec![tw as u32])));
                tags.push((323, TagValue::Long(vec![th as u32])));
                tags.push((324, TagValue::Long(offsets)));
                tags.push((325, TagValue::Long(counts)));
            }
            None => {
                let rps = self.rows_per_strip.unwrap_or(self.height);
                tags.push((273, TagValue::Long(offsets)));
                tags.push((278, TagValue::Long(vec![rps as u32])));
                tags.push((279, TagValue::Long(counts)));
            }
        }
        if self.geokeys {
            let (model_type, crs_key) = if self.geographic { (2, 2048) } else { (1, 3072) };
            tags.push((
                34735,
                TagValue::Short(vec![1, 1, 0, 2, 1024, 0, 1, model_type, crs_key, 0, 1, self.epsg]),
            ));
        }
        tags.sort_by_key(|(tag, _)| *tag);

        let extra_start = ifd_offset + 2 + tags.len() * 12 + 4;
        let mut ifd = (tags.len() as u16).to_le_bytes().to_vec();
        let mut extra = Vec::new();
        for (tag, value) in &tags {
            let (field_type, count, bytes) = value.encode();
            ifd.extend((*tag as u16).to_le_bytes());
            ifd.extend(field_type.to_le_bytes());
            ifd.extend((count as u32).to_le_bytes());
            if bytes.len() <= 4 {
                let mut inline = bytes;
                inline.resize(4, 0);
                ifd.extend(inline);
            } else {
                ifd.extend(((extra_start + extra.len()) as u32).to_le_bytes());
                extra.extend(bytes);
                if extra.len() % 2 == 1 {
                    extra.push(0);
                }
            }
        }
        ifd.extend(0u32.to_le_bytes());

        out.extend(ifd);
        out.extend(extra);
        out
    }
}

/// MTL text with identical coefficients for bands 4 and 5
pub(crate) fn mtl_text(mult: f64, add: f64, sun_elevation: f64) -> String {
    format!(
        "GROUP = L1_METADATA_FILE\n\
         \x20 GROUP = IMAGE_ATTRIBUTES\n\
         \x20   SUN_ELEVATION = {sun_elevation}\n\
         \x20 END_GROUP = IMAGE_ATTRIBUTES\n\
         \x20 GROUP = RADIOMETRIC_RESCALING\n\
         \x20   REFLECTANCE_MULT_BAND_4 = {mult:E}\n\
         \x20   REFLECTANCE_MULT_BAND_5 = {mult:E}\n\
         \x20   REFLECTANCE_ADD_BAND_4 = {add}\n\
         \x20   REFLECTANCE_ADD_BAND_5 = {add}\n\
         \x20 END_GROUP = RADIOMETRIC_RESCALING\n\
         END_GROUP = L1_METADATA_FILE\n\
         END\n"
    )
}

/// Scene store serving files from memory, keyed by storage URL
#[derive(Default)]
pub(crate) struct MemorySceneStore {
    files: HashMap<String, Vec<u8>>,
    opened: Mutex<Vec<String>>,
}

impl MemorySceneStore {
    pub(crate) fn insert_band(&mut self, scene: &str, band: Band, tiff: &TestTiff) {
        let scene = SceneId::parse(scene).unwrap();
        self.files.insert(scene.band_url(STORAGE, band), tiff.build());
    }

    pub(crate) fn insert_metadata(&mut self, scene: &str, text: &str) {
        let scene = SceneId::parse(scene).unwrap();
        self.files.insert(scene.metadata_url(STORAGE), text.as_bytes().to_vec());
    }

    /// Storage URLs in the order they were requested
    pub(crate) fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    fn get(&self, url: String) -> PipelineResult<Vec<u8>> {
        self.opened.lock().unwrap().push(url.clone());
        self.files.get(&url).cloned().ok_or(NdviError::RemoteFetchFailure {
            url,
            message: "404 Not Found".to_string(),
        })
    }
}

impl SceneStore for MemorySceneStore {
    fn fetch_metadata(&self, scene: &SceneId) -> PipelineResult<CalibrationRecord> {
        let bytes = self.get(scene.metadata_url(STORAGE))?;
        Ok(CalibrationRecord::parse_text(&String::from_utf8_lossy(&bytes)))
    }

    fn open_band(&self, scene: &SceneId, band: Band) -> PipelineResult<CogReader> {
        let url = scene.band_url(STORAGE, band);
        let bytes = self.get(url.clone())?;
        CogReader::from_reader(Arc::new(MemoryRangeReader::new(url, bytes)))
    }
}

/// Catalog answering every query with a fixed outcome
pub(crate) struct StaticCatalog {
    pub(crate) response: PipelineResult<Vec<SceneRecord>>,
    pub(crate) queries: Mutex<Vec<CatalogQuery>>,
}

impl StaticCatalog {
    pub(crate) fn new(response: PipelineResult<Vec<SceneRecord>>) -> Self {
        Self {
            response,
            queries: Mutex::new(Vec::new()),
        }
    }
}

impl Catalog for StaticCatalog {
    fn search(&self, query: &CatalogQuery) -> PipelineResult<Vec<SceneRecord>> {
        self.queries.lock().unwrap().push(query.clone());
        self.response.clone()
    }
}

pub(crate) fn record(scene_id: &str, date: &str, cloud_cover: f64) -> SceneRecord {
    SceneRecord {
        date: date.to_string(),
        cloud_cover,
        scene_id: scene_id.to_string(),
        thumbnail: format!("https://thumbs.example.com/{scene_id}.jpg"),
    }
}

/// Loopback HTTP server answering every request through `respond`.
///
/// Each connection carries one request and is closed after the answer.
/// Returns the base URL, e.g. `http://127.0.0.1:PORT`.
pub(crate) fn serve_http<F>(respond: F) -> String
where
    F: Fn(&HttpRequest) -> Vec<u8> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let request = read_request(&mut stream);
            let _ = stream.write_all(&respond(&request));
        }
    });
    format!("http://{addr}")
}

pub(crate) struct HttpRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) range: Option<(u64, u64)>,
}

fn read_request(stream: &mut TcpStream) -> HttpRequest {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") && stream.read(&mut byte).unwrap_or(0) == 1 {
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head);
    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let range = head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.eq_ignore_ascii_case("range") {
            return None;
        }
        let (start, end) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
        Some((start.parse().ok()?, end.parse().ok()?))
    });
    HttpRequest { method, path, range }
}

/// Raw HTTP/1.1 response with a body. HEAD answers carry the length only.
pub(crate) fn http_response(request: &HttpRequest, status: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    if request.method != "HEAD" {
        response.extend_from_slice(body);
    }
    response
}
