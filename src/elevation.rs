//! Elevation raster acquisition with multi-source fallback.
//!
//! Sources are described by an ordered provider chain (region-gated source,
//! then SRTM, then ASTER) run by a single fallback loop. When every real
//! source fails the behavior is a policy decision: synthesize a deterministic
//! DEM if the area config allows it, otherwise fail loudly so production maps
//! never silently degrade to fake terrain.

use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use gdal::spatial_ref::SpatialRef;
use gdal::{raster::Buffer, DriverManager};
use tracing::{debug, error, info, warn};

use crate::bounds::BoundingBox;
use crate::error::{Error, Result};
use crate::tool::ToolRunner;

const NODATA_VALUE: f64 = -9999.0;
/// Anything smaller than this is an error page, not a DEM tile.
const MIN_TILE_BYTES: u64 = 1000;
/// Default synthetic/SRTM grid resolution in meters.
pub const DEFAULT_RESOLUTION_M: f64 = 30.0;

/// A named elevation data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DemSource {
    Srtm,
    Aster,
    OsTerrain,
    EuDem,
    Synthetic,
}

impl DemSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemSource::Srtm => "srtm",
            DemSource::Aster => "aster",
            DemSource::OsTerrain => "os_terrain",
            DemSource::EuDem => "eu_dem",
            DemSource::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for DemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DemSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "srtm" => Ok(DemSource::Srtm),
            "aster" => Ok(DemSource::Aster),
            "os_terrain" => Ok(DemSource::OsTerrain),
            "eu_dem" => Ok(DemSource::EuDem),
            "synthetic" => Ok(DemSource::Synthetic),
            other => Err(Error::Config {
                path: PathBuf::from("areas.json"),
                message: format!(
                    "unknown DEM source '{other}' (supported: srtm, aster, os_terrain, eu_dem, synthetic)"
                ),
            }),
        }
    }
}

/// One entry of the fallback chain: a source plus its region gate.
pub struct DemProvider {
    pub source: DemSource,
    pub accepts: fn(&BoundingBox) -> bool,
}

fn accepts_anywhere(_: &BoundingBox) -> bool {
    true
}

fn accepts_uk(bbox: &BoundingBox) -> bool {
    bbox.intersects_uk()
}

fn accepts_europe(bbox: &BoundingBox) -> bool {
    bbox.intersects_europe()
}

/// Fallback chain for a requested source: the region-specific source first
/// (when one was requested), then SRTM, then ASTER. Requesting a low-priority
/// source never silently upgrades to a higher-priority one.
pub fn provider_chain(requested: DemSource) -> Vec<DemProvider> {
    match requested {
        DemSource::OsTerrain => vec![
            DemProvider { source: DemSource::OsTerrain, accepts: accepts_uk },
            DemProvider { source: DemSource::Srtm, accepts: accepts_anywhere },
            DemProvider { source: DemSource::Aster, accepts: accepts_anywhere },
        ],
        DemSource::EuDem => vec![
            DemProvider { source: DemSource::EuDem, accepts: accepts_europe },
            DemProvider { source: DemSource::Srtm, accepts: accepts_anywhere },
            DemProvider { source: DemSource::Aster, accepts: accepts_anywhere },
        ],
        DemSource::Srtm => vec![
            DemProvider { source: DemSource::Srtm, accepts: accepts_anywhere },
            DemProvider { source: DemSource::Aster, accepts: accepts_anywhere },
        ],
        DemSource::Aster => vec![
            DemProvider { source: DemSource::Aster, accepts: accepts_anywhere },
        ],
        DemSource::Synthetic => Vec::new(),
    }
}

/// SRTM tile name for the 1-degree cell containing `(lat, lon)`,
/// e.g. `N57W003.hgt`.
pub fn srtm_tile_name(lat: i32, lon: i32) -> String {
    format!("{}.hgt", tile_cell_name(lat, lon))
}

/// ASTER GDEM v3 tile file name, e.g. `ASTGTMV003_N57W003_dem.tif`.
pub fn aster_tile_name(lat: i32, lon: i32) -> String {
    format!("ASTGTMV003_{}_dem.tif", tile_cell_name(lat, lon))
}

fn tile_cell_name(lat: i32, lon: i32) -> String {
    let lat_prefix = if lat >= 0 { 'N' } else { 'S' };
    let lon_prefix = if lon >= 0 { 'E' } else { 'W' };
    format!(
        "{lat_prefix}{:02}{lon_prefix}{:03}",
        lat.unsigned_abs(),
        lon.unsigned_abs()
    )
}

/// 1-degree cells covering a bounding box, south-west to north-east.
fn tile_cells(bbox: &BoundingBox) -> Vec<(i32, i32)> {
    let south = bbox.south.floor() as i32;
    let north = bbox.north.floor() as i32;
    let west = bbox.west.floor() as i32;
    let east = bbox.east.floor() as i32;

    let mut cells = Vec::new();
    for lat in south..=north {
        for lon in west..=east {
            cells.push((lat, lon));
        }
    }
    cells
}

/// Seam over tile downloads so the fallback logic is testable offline.
pub trait Downloader {
    /// Streams `url` into `dest`. `Ok(false)` means this source failed;
    /// transport problems are never propagated as hard errors.
    fn download(&self, url: &str, dest: &Path) -> Result<bool>;
}

/// Streaming HTTP downloader with progress reporting.
pub struct HttpDownloader {
    agent: ureq::Agent,
}

impl HttpDownloader {
    pub fn new(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(std::time::Duration::from_secs(30))
                .build(),
        }
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<bool> {
        info!("  Downloading from {url}");
        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(e) => {
                info!("  Download failed: {e}");
                return Ok(false);
            }
        };

        let total_size: u64 = response
            .header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        // Stream into a scratch file and rename into place at the end, so
        // `dest` only ever holds a complete body. A truncated write must
        // not survive: the cache treats any existing file as a valid tile.
        let scratch_dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut scratch = tempfile::NamedTempFile::new_in(scratch_dir)?;
        let mut reader = response.into_reader();
        let mut downloaded: u64 = 0;
        let mut chunk = [0u8; 8192];
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    info!("  Download failed: {e}");
                    return Ok(false);
                }
            };
            scratch.write_all(&chunk[..n])?;
            downloaded += n as u64;
            if total_size > 0 {
                debug!("  Progress: {:.1}%", downloaded as f64 / total_size as f64 * 100.0);
            }
        }
        scratch.persist(dest).map_err(|e| e.error)?;

        info!("  Download complete");
        Ok(true)
    }
}

/// Orchestrates the provider chain for one pipeline run.
pub struct DemFetcher<'a> {
    downloader: &'a dyn Downloader,
    tools: &'a dyn ToolRunner,
    cache_dir: PathBuf,
}

impl<'a> DemFetcher<'a> {
    pub fn new(downloader: &'a dyn Downloader, tools: &'a dyn ToolRunner) -> Self {
        let cache_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tourmap")
            .join("dem_cache");
        Self { downloader, tools, cache_dir }
    }

    pub fn with_cache_dir(mut self, cache_dir: PathBuf) -> Self {
        self.cache_dir = cache_dir;
        self
    }

    /// Obtains an elevation raster for `bbox` at `output`, returning the
    /// source that actually produced it.
    ///
    /// If the requested source is region-gated and the box is outside its
    /// region, the request is rejected synchronously: no network access
    /// happens and only the synthetic-fallback policy applies. Real-source
    /// failures fall through the chain; once it is exhausted,
    /// `allow_synthetic_fallback` decides between a generated DEM and
    /// [`Error::ElevationExhausted`].
    pub fn fetch(
        &self,
        bbox: &BoundingBox,
        output: &Path,
        requested: DemSource,
        allow_synthetic_fallback: bool,
    ) -> Result<DemSource> {
        info!("Attempting to download elevation data from {requested}");

        if requested == DemSource::Synthetic {
            write_synthetic_dem(bbox, output, DEFAULT_RESOLUTION_M)?;
            return Ok(DemSource::Synthetic);
        }

        let chain = provider_chain(requested);

        // A region-gated request outside its region fails before any
        // network traffic; the remaining chain is not consulted.
        if let Some(first) = chain.first() {
            if !(first.accepts)(bbox) {
                warn!(
                    "{} data is not available for this area; rejected without download",
                    first.source
                );
                return self.exhausted(bbox, output, requested, allow_synthetic_fallback);
            }
        }

        for provider in &chain {
            if !(provider.accepts)(bbox) {
                debug!("skipping {}: bounding box outside coverage", provider.source);
                continue;
            }
            if self.try_source(provider.source, bbox, output)? {
                info!("Elevation data saved from {}: {}", provider.source, output.display());
                return Ok(provider.source);
            }
            warn!("{} failed, trying next source", provider.source);
        }

        self.exhausted(bbox, output, requested, allow_synthetic_fallback)
    }

    fn exhausted(
        &self,
        bbox: &BoundingBox,
        output: &Path,
        requested: DemSource,
        allow_synthetic_fallback: bool,
    ) -> Result<DemSource> {
        if allow_synthetic_fallback {
            info!("Real DEM download failed, attempting synthetic fallback");
            write_synthetic_dem(bbox, output, DEFAULT_RESOLUTION_M)?;
            Ok(DemSource::Synthetic)
        } else {
            error!("Failed to download real DEM data from '{requested}'");
            error!("Synthetic fallback is disabled in configuration");
            Err(Error::ElevationExhausted {
                source_name: requested.to_string(),
            })
        }
    }

    fn try_source(&self, source: DemSource, bbox: &BoundingBox, output: &Path) -> Result<bool> {
        match source {
            DemSource::Srtm => self.fetch_tiled(bbox, output, source),
            DemSource::Aster => self.fetch_tiled(bbox, output, source),
            // Both need API access that is not wired up; the chain falls
            // through to SRTM for their regions, as the upstream data
            // products themselves recommend.
            DemSource::OsTerrain => {
                info!("OS Terrain download requires OS Data Hub API access");
                Ok(false)
            }
            DemSource::EuDem => {
                info!("EU-DEM download requires Copernicus Data Space API access");
                Ok(false)
            }
            DemSource::Synthetic => unreachable!("synthetic is not part of the provider chain"),
        }
    }

    fn fetch_tiled(&self, bbox: &BoundingBox, output: &Path, source: DemSource) -> Result<bool> {
        let cells = tile_cells(bbox);
        info!(
            "  Required {source} tiles: lat {} to {}, lon {} to {}",
            bbox.south.floor(),
            bbox.north.floor(),
            bbox.west.floor(),
            bbox.east.floor()
        );

        let cache_dir = self.cache_dir.join(source.as_str());
        fs::create_dir_all(&cache_dir)?;

        let mut tiles = Vec::new();
        for (lat, lon) in cells {
            let tile_name = match source {
                DemSource::Aster => aster_tile_name(lat, lon),
                _ => srtm_tile_name(lat, lon),
            };
            let cached = cache_dir.join(&tile_name);

            if cached.exists() {
                info!("  Using cached tile: {tile_name}");
                tiles.push(cached);
            } else if self.download_tile(source, lat, lon, &cached)? {
                tiles.push(cached);
            } else {
                info!("  Failed to download {tile_name}, continuing with available tiles");
            }
        }

        if tiles.is_empty() {
            info!("  No {source} tiles downloaded successfully");
            return Ok(false);
        }

        info!("  Processing {source} tiles");
        self.merge_and_crop(&tiles, bbox, output)
    }

    fn download_tile(&self, source: DemSource, lat: i32, lon: i32, dest: &Path) -> Result<bool> {
        for url in tile_urls(source, lat, lon) {
            debug!("    Trying source: {url}");
            if self.downloader.download(&url, dest)? {
                let size = fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
                if size > MIN_TILE_BYTES {
                    return Ok(true);
                }
                debug!("    Downloaded file too small, trying next source");
                let _ = fs::remove_file(dest);
            }
        }
        Ok(false)
    }

    /// Merges tiles (when more than one) and crops to the bounding box with
    /// gdalwarp. The merge scratch file is a `NamedTempFile` so it is removed
    /// on every exit path, including errors.
    fn merge_and_crop(&self, tiles: &[PathBuf], bbox: &BoundingBox, output: &Path) -> Result<bool> {
        if tiles.len() == 1 {
            return self.crop_to_bbox(&tiles[0], bbox, output);
        }

        let merged = tempfile::Builder::new().suffix(".tif").tempfile()?;
        let merged_path = merged.path().to_string_lossy().into_owned();

        let mut args: Vec<String> = vec![
            "-of".into(),
            "GTiff".into(),
            "-co".into(),
            "COMPRESS=LZW".into(),
            "-overwrite".into(),
        ];
        args.extend(tiles.iter().map(|t| t.to_string_lossy().into_owned()));
        args.push(merged_path);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let run = self.tools.run("gdalwarp", &arg_refs)?;
        if !run.success() {
            info!("    Failed to merge tiles: {}", run.stderr.trim());
            return Ok(false);
        }

        self.crop_to_bbox(merged.path(), bbox, output)
    }

    fn crop_to_bbox(&self, input: &Path, bbox: &BoundingBox, output: &Path) -> Result<bool> {
        let run = self.tools.run(
            "gdalwarp",
            &[
                "-te",
                &bbox.west.to_string(),
                &bbox.south.to_string(),
                &bbox.east.to_string(),
                &bbox.north.to_string(),
                "-of",
                "GTiff",
                "-co",
                "COMPRESS=LZW",
                "-overwrite",
                &input.to_string_lossy(),
                &output.to_string_lossy(),
            ],
        )?;
        if !run.success() {
            info!("    Failed to crop DEM: {}", run.stderr.trim());
            return Ok(false);
        }
        Ok(true)
    }
}

fn tile_urls(source: DemSource, lat: i32, lon: i32) -> Vec<String> {
    match source {
        DemSource::Srtm => {
            let tile = srtm_tile_name(lat, lon);
            vec![
                format!("https://cloud.sdsc.edu/v1/datasetsearch/download/SRTM_GL1/{tile}"),
                format!(
                    "https://opentopography.org/API/globaldem?demtype=SRTM_GL1&south={lat}&north={}&west={lon}&east={}&outputFormat=GTiff",
                    lat + 1,
                    lon + 1
                ),
                format!(
                    "https://srtm.csi.cgiar.org/wp-content/uploads/files/srtm_5x5/TIFF/{}",
                    tile.replace(".hgt", ".tif")
                ),
            ]
        }
        DemSource::Aster => {
            let tile = aster_tile_name(lat, lon);
            vec![
                format!("https://e4ftl01.cr.usgs.gov/ASTT/ASTGTM.003/2000.03.01/{tile}"),
                format!(
                    "https://opentopography.org/API/globaldem?demtype=ASTER30&south={lat}&north={}&west={lon}&east={}&outputFormat=GTiff",
                    lat + 1,
                    lon + 1
                ),
            ]
        }
        _ => Vec::new(),
    }
}

/// Writes a deterministic synthetic DEM covering `bbox`.
///
/// The surface is an analytic formula: base elevation rising with latitude
/// plus superimposed sinusoids in longitude/latitude, clamped to 0..1000 m.
/// Output is a single-band Float32 EPSG:4326 GeoTIFF with nodata -9999.
pub fn write_synthetic_dem(bbox: &BoundingBox, output: &Path, resolution_m: f64) -> Result<()> {
    info!("  Creating synthetic DEM as fallback");

    let width_deg = bbox.east - bbox.west;
    let height_deg = bbox.north - bbox.south;
    let mid_lat = (bbox.north + bbox.south) / 2.0;

    let meters_per_deg_lat = 111_320.0;
    let meters_per_deg_lon = 111_320.0 * mid_lat.to_radians().cos();

    let cols = ((width_deg * meters_per_deg_lon / resolution_m) as usize).max(1);
    let rows = ((height_deg * meters_per_deg_lat / resolution_m) as usize).max(1);
    debug!("    Creating {cols}x{rows} grid at {resolution_m}m resolution");

    let mut values = Vec::with_capacity(cols * rows);
    for row in 0..rows {
        // Row 0 is the northern edge (GDAL's top-left origin).
        let lat = bbox.north - (row as f64 + 0.5) * height_deg / rows as f64;
        let y = lat - bbox.south;
        for col in 0..cols {
            let lon = bbox.west + (col as f64 + 0.5) * width_deg / cols as f64;
            let x = lon - bbox.west;

            let elevation = 200.0
                + 80.0 * (y / height_deg.max(f64::EPSILON))
                + 100.0 * (x * 10.0).sin() * (y * 8.0).cos()
                + 50.0 * (x * 15.0).sin() * (y * 12.0).sin();
            values.push(elevation.clamp(0.0, 1000.0) as f32);
        }
    }

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<f32, _>(output, cols, rows, 1)?;

    dataset.set_geo_transform(&[
        bbox.west,
        width_deg / cols as f64,
        0.0,
        bbox.north,
        0.0,
        -height_deg / rows as f64,
    ])?;

    let srs = SpatialRef::from_epsg(4326)?;
    dataset.set_projection(&srs.to_wkt()?)?;

    let mut band = dataset.rasterband(1)?;
    band.set_no_data_value(Some(NODATA_VALUE))?;
    let mut buffer = Buffer::new((cols, rows), values);
    band.write((0, 0), (cols, rows), &mut buffer)?;

    info!("    Synthetic DEM created: {}", output.display());
    Ok(())
}

/// Verifies that `dem` fully covers `bbox`; a partial raster is invalid.
pub fn raster_covers_bbox(dem: &Path, bbox: &BoundingBox) -> Result<bool> {
    let dataset = gdal::Dataset::open(dem)?;
    let transform = dataset.geo_transform()?;
    let (cols, rows) = dataset.raster_size();

    let west = transform[0];
    let north = transform[3];
    let east = west + transform[1] * cols as f64;
    let south = north + transform[5] * rows as f64;

    // Half a pixel of slack for warp rounding at the edges.
    let eps_x = transform[1].abs() / 2.0;
    let eps_y = transform[5].abs() / 2.0;
    Ok(west <= bbox.west + eps_x
        && east >= bbox.east - eps_x
        && south <= bbox.south + eps_y
        && north >= bbox.north - eps_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::testing::FakeRunner;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Downloader double that records every URL and never succeeds.
    struct DeadNetwork {
        requests: RefCell<Vec<String>>,
    }

    impl DeadNetwork {
        fn new() -> Self {
            Self { requests: RefCell::new(Vec::new()) }
        }
    }

    impl Downloader for DeadNetwork {
        fn download(&self, url: &str, _dest: &Path) -> Result<bool> {
            self.requests.borrow_mut().push(url.to_string());
            Ok(false)
        }
    }

    fn gtiff_available() -> bool {
        DriverManager::get_driver_by_name("GTiff").is_ok()
    }

    fn scotland() -> BoundingBox {
        BoundingBox::around(57.29, -2.88, 10.0, 15.0)
    }

    fn colorado() -> BoundingBox {
        BoundingBox::around(39.6, -105.9, 10.0, 10.0)
    }

    #[test]
    fn test_srtm_tile_names() {
        assert_eq!(srtm_tile_name(57, -3), "N57W003.hgt");
        assert_eq!(srtm_tile_name(-1, -72), "S01W072.hgt");
        assert_eq!(srtm_tile_name(35, 138), "N35E138.hgt");
        assert_eq!(aster_tile_name(57, -3), "ASTGTMV003_N57W003_dem.tif");
    }

    #[test]
    fn test_tile_cells_cover_bbox() {
        let bbox = BoundingBox {
            south: 56.8,
            north: 57.2,
            west: -3.1,
            east: -2.9,
        };
        assert_eq!(tile_cells(&bbox), vec![(56, -4), (56, -3), (57, -4), (57, -3)]);
    }

    #[test]
    fn test_provider_chain_order() {
        let chain: Vec<DemSource> = provider_chain(DemSource::OsTerrain)
            .iter()
            .map(|p| p.source)
            .collect();
        assert_eq!(chain, vec![DemSource::OsTerrain, DemSource::Srtm, DemSource::Aster]);

        let chain: Vec<DemSource> = provider_chain(DemSource::Srtm)
            .iter()
            .map(|p| p.source)
            .collect();
        assert_eq!(chain, vec![DemSource::Srtm, DemSource::Aster]);
    }

    #[test]
    fn test_source_parsing() {
        assert_eq!("os_terrain".parse::<DemSource>().unwrap(), DemSource::OsTerrain);
        assert!("lidar".parse::<DemSource>().is_err());
    }

    #[test]
    fn test_region_gate_rejects_without_network() {
        let dir = TempDir::new().unwrap();
        let network = DeadNetwork::new();
        let tools = FakeRunner::new();
        let fetcher = DemFetcher::new(&network, &tools).with_cache_dir(dir.path().join("cache"));

        let err = fetcher
            .fetch(&colorado(), &dir.path().join("dem.tif"), DemSource::OsTerrain, false)
            .unwrap_err();
        assert!(matches!(err, Error::ElevationExhausted { .. }));
        assert!(network.requests.borrow().is_empty(), "no network attempt expected");

        let err = fetcher
            .fetch(&colorado(), &dir.path().join("dem.tif"), DemSource::EuDem, false)
            .unwrap_err();
        assert!(matches!(err, Error::ElevationExhausted { .. }));
        assert!(network.requests.borrow().is_empty());
    }

    #[test]
    fn test_exhausted_sources_raise_when_fallback_disabled() {
        let dir = TempDir::new().unwrap();
        let network = DeadNetwork::new();
        let tools = FakeRunner::new();
        let fetcher = DemFetcher::new(&network, &tools).with_cache_dir(dir.path().join("cache"));

        let err = fetcher
            .fetch(&scotland(), &dir.path().join("dem.tif"), DemSource::Srtm, false)
            .unwrap_err();
        assert!(matches!(err, Error::ElevationExhausted { .. }));
        // SRTM tries its mirrors, then ASTER tries its mirrors.
        assert!(!network.requests.borrow().is_empty());
    }

    #[test]
    fn test_exhausted_sources_fall_back_to_synthetic() {
        if !gtiff_available() {
            eprintln!("Skipping test: GTiff driver not available");
            return;
        }
        let dir = TempDir::new().unwrap();
        let network = DeadNetwork::new();
        let tools = FakeRunner::new();
        let fetcher = DemFetcher::new(&network, &tools).with_cache_dir(dir.path().join("cache"));

        let out = dir.path().join("dem.tif");
        let source = fetcher
            .fetch(&scotland(), &out, DemSource::Srtm, true)
            .unwrap();
        assert_eq!(source, DemSource::Synthetic);
        assert!(out.exists());
        assert!(raster_covers_bbox(&out, &scotland()).unwrap());
    }

    #[test]
    fn test_synthetic_dem_is_deterministic() {
        if !gtiff_available() {
            eprintln!("Skipping test: GTiff driver not available");
            return;
        }
        let dir = TempDir::new().unwrap();
        let bbox = scotland();
        let first = dir.path().join("a.tif");
        let second = dir.path().join("b.tif");

        write_synthetic_dem(&bbox, &first, 90.0).unwrap();
        write_synthetic_dem(&bbox, &second, 90.0).unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_synthetic_dem_values_in_range() {
        if !gtiff_available() {
            eprintln!("Skipping test: GTiff driver not available");
            return;
        }
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("dem.tif");
        write_synthetic_dem(&scotland(), &out, 90.0).unwrap();

        let dataset = gdal::Dataset::open(&out).unwrap();
        let band = dataset.rasterband(1).unwrap();
        let (cols, rows) = dataset.raster_size();
        let data = band
            .read_as::<f32>((0, 0), (cols, rows), (cols, rows), None)
            .unwrap();
        assert!(data.data().iter().all(|&v| (0.0..=1000.0).contains(&v)));
        assert_eq!(band.no_data_value(), Some(NODATA_VALUE));
    }

    /// Downloader double whose "tiles" are tiny error pages.
    struct TinyBodyNetwork;

    impl Downloader for TinyBodyNetwork {
        fn download(&self, _url: &str, dest: &Path) -> Result<bool> {
            fs::write(dest, b"<html>rate limited</html>")?;
            Ok(true)
        }
    }

    #[test]
    fn test_undersized_tiles_are_discarded() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        let network = TinyBodyNetwork;
        let tools = FakeRunner::new();
        let fetcher = DemFetcher::new(&network, &tools).with_cache_dir(cache.clone());

        let err = fetcher
            .fetch(&scotland(), &dir.path().join("dem.tif"), DemSource::Srtm, false)
            .unwrap_err();
        assert!(matches!(err, Error::ElevationExhausted { .. }));

        // The undersized bodies were deleted, not left to poison the cache
        // for later runs.
        for source in ["srtm", "aster"] {
            let tile_dir = cache.join(source);
            if tile_dir.exists() {
                assert_eq!(fs::read_dir(&tile_dir).unwrap().count(), 0);
            }
        }
        // With no usable tiles, no merge or crop was attempted.
        assert_eq!(tools.invocations_of("gdalwarp"), 0);
    }

    #[test]
    fn test_truncated_download_leaves_no_file_behind() {
        use std::net::TcpListener;

        // A server that promises far more bytes than it delivers, then
        // hangs up mid-body.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request);
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100000\r\n\r\n")
                .unwrap();
            socket.write_all(&vec![b'x'; 2048]).unwrap();
        });

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("N57W003.hgt");
        let downloader = HttpDownloader::default();
        let fetched = downloader
            .download(&format!("http://{addr}/N57W003.hgt"), &dest)
            .unwrap();
        server.join().unwrap();

        assert!(!fetched);
        assert!(!dest.exists(), "partial body must not reach the cache path");
        // The scratch file is cleaned up as well.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cached_tile_skips_download_and_crops() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        fs::create_dir_all(cache.join("srtm")).unwrap();
        // One plausible cached tile for the single cell this box occupies.
        let bbox = BoundingBox {
            south: 57.2,
            north: 57.4,
            west: -2.95,
            east: -2.8,
        };
        fs::write(cache.join("srtm").join("N57W003.hgt"), vec![0u8; 2048]).unwrap();

        let network = DeadNetwork::new();
        let tools = FakeRunner::new();
        let fetcher = DemFetcher::new(&network, &tools).with_cache_dir(cache);

        let source = fetcher
            .fetch(&bbox, &dir.path().join("dem.tif"), DemSource::Srtm, false)
            .unwrap();
        assert_eq!(source, DemSource::Srtm);
        assert!(network.requests.borrow().is_empty());
        // Exactly one gdalwarp crop, no merge needed for a single tile.
        assert_eq!(tools.invocations_of("gdalwarp"), 1);
    }
}
