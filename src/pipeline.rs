//! End-to-end map generation: configuration to finished PNG.
//!
//! The pipeline owns the artifact layout under the data directory and
//! threads the injected seams (subprocess runner, DEM downloader, render
//! engine) through the stage functions. Failures carry the stage they
//! happened in so the CLI can report something more useful than a bare
//! error chain.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::bounds::BoundingBox;
use crate::config::{self, AreaConfig, OutputFormat};
use crate::elevation::{DemFetcher, DemSource, Downloader};
use crate::error::Error;
use crate::layers::convert_to_layers;
use crate::legend::LegendCatalog;
use crate::osdata::process_os_data;
use crate::osm::{fetch_osm_data, validate_osm_quality};
use crate::render::{render_map, RenderEngine};
use crate::style::{compose_style_file, ContourParams, HillshadeParams, StyleParams};
use crate::terrain::{generate_contours, generate_hillshade};
use crate::tool::ToolRunner;

/// Buffer around the map extent for elevation data, for clean hillshading
/// at the edges.
const ELEVATION_BUFFER_KM: f64 = 1.0;
/// Overpass can legitimately take minutes for a large extract.
const OSM_FETCH_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    OsmAcquisition,
    LayerConversion,
    Elevation,
    OsData,
    Style,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Configuration => "configuration",
            Stage::OsmAcquisition => "OSM acquisition",
            Stage::LayerConversion => "layer conversion",
            Stage::Elevation => "elevation",
            Stage::OsData => "OS data",
            Stage::Style => "style composition",
            Stage::Render => "rendering",
        })
    }
}

/// A pipeline failure, attributed to the stage it occurred in.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

fn at_stage<T>(stage: Stage, result: crate::error::Result<T>) -> PipelineResult<T> {
    result.map_err(|source| PipelineError { stage, source })
}

pub struct Pipeline<'a> {
    config_dir: PathBuf,
    data_dir: PathBuf,
    tools: &'a dyn ToolRunner,
    engine: &'a dyn RenderEngine,
    downloader: &'a dyn Downloader,
    http: ureq::Agent,
    overpass_url: String,
    dem_cache_dir: Option<PathBuf>,
    style_name: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config_dir: PathBuf,
        data_dir: PathBuf,
        tools: &'a dyn ToolRunner,
        engine: &'a dyn RenderEngine,
        downloader: &'a dyn Downloader,
    ) -> Self {
        let http = ureq::AgentBuilder::new().timeout(OSM_FETCH_TIMEOUT).build();
        Self {
            config_dir,
            data_dir,
            tools,
            engine,
            downloader,
            http,
            overpass_url: crate::osm::OVERPASS_URL.to_string(),
            dem_cache_dir: None,
            style_name: "tourist".to_string(),
        }
    }

    /// Overrides the default `~/.tourmap/dem_cache` tile cache.
    pub fn with_dem_cache_dir(mut self, dir: PathBuf) -> Self {
        self.dem_cache_dir = Some(dir);
        self
    }

    pub fn with_style(mut self, style_name: String) -> Self {
        self.style_name = style_name;
        self
    }

    /// Points OSM acquisition at a different Overpass endpoint.
    pub fn with_overpass_url(mut self, url: String) -> Self {
        self.overpass_url = url;
        self
    }

    // Artifact layout. One area's artifacts overwrite each other across
    // runs; concurrent runs for the same area are not supported.

    fn osm_file(&self, area: &str) -> PathBuf {
        self.data_dir.join(format!("{area}_area.osm"))
    }

    fn layer_dir(&self) -> PathBuf {
        self.data_dir.join("osm_data")
    }

    fn elevation_file(&self) -> PathBuf {
        self.data_dir.join("elevation.tif")
    }

    fn hillshade_file(&self) -> PathBuf {
        self.data_dir.join("hillshade.tif")
    }

    fn contour_file(&self) -> PathBuf {
        self.data_dir.join("contours.shp")
    }

    fn output_file(&self, area: &str, format_name: &str) -> PathBuf {
        self.data_dir
            .join(format!("{area}_tourist_map_{format_name}.png"))
    }

    /// Runs the whole pipeline for one area, returning the rendered map
    /// path.
    pub fn run(&self, area_name: &str, format_name: &str) -> PipelineResult<PathBuf> {
        let (area, format) = self.load_configuration(area_name, format_name)?;

        info!("Generating map for: {}", area.name);
        let bbox = BoundingBox::around(
            area.center.lat,
            area.center.lon,
            area.coverage.width_km,
            area.coverage.height_km,
        );
        info!(
            "  Coverage: {:.1} x {:.1} km at 1:{}",
            area.coverage.width_km, area.coverage.height_km, area.scale
        );

        let osm_file = self.acquire_osm(area_name, &bbox)?;

        let layer_dir = at_stage(
            Stage::LayerConversion,
            convert_to_layers(self.tools, &osm_file, &self.layer_dir()),
        )?
        .ok_or(PipelineError {
            stage: Stage::LayerConversion,
            source: Error::ToolMissing("ogr2ogr".to_string()),
        })?;

        let (hillshade_ok, contour_file) = self.prepare_terrain(&area, &bbox)?;

        let os_overlays = at_stage(
            Stage::OsData,
            process_os_data(self.tools, &self.data_dir, &area.ordnance_survey),
        )?;

        let params = StyleParams {
            layer_dir,
            hillshade: HillshadeParams {
                enabled: area.hillshading.enabled && hillshade_ok,
                raster: self.hillshade_file(),
                opacity: area.hillshading.opacity,
            },
            contours: ContourParams {
                enabled: area.contours.enabled && contour_file.is_some(),
                ..ContourParams::with_interval(self.contour_file(), area.contours.interval)
            },
            os_overlays,
        };
        let style = at_stage(
            Stage::Style,
            compose_style_file(&self.style_name, &params, &self.data_dir.join("styles")),
        )?;

        let output = self.output_file(area_name, format_name);
        let (width, height) = format.pixel_dimensions();
        let catalog = LegendCatalog::tourist(&self.data_dir.join("icons"));
        let rendered = at_stage(
            Stage::Render,
            render_map(self.engine, &catalog, &style, &bbox, &output, width, height),
        )?;
        if !rendered {
            return Err(PipelineError {
                stage: Stage::Render,
                source: Error::Render("no map image was produced".to_string()),
            });
        }

        info!("Map generation complete: {}", output.display());
        Ok(output)
    }

    fn load_configuration(
        &self,
        area_name: &str,
        format_name: &str,
    ) -> PipelineResult<(AreaConfig, OutputFormat)> {
        let area = at_stage(
            Stage::Configuration,
            config::load_area_config(&self.config_dir, area_name),
        )?;
        let format = at_stage(
            Stage::Configuration,
            config::load_output_format(&self.config_dir, format_name),
        )?;
        Ok((area, format))
    }

    /// Reuses an existing extract or downloads a fresh one; validates
    /// quality either way, warn-only.
    fn acquire_osm(&self, area_name: &str, bbox: &BoundingBox) -> PipelineResult<PathBuf> {
        let osm_file = self.osm_file(area_name);

        if osm_file.exists() {
            info!("Using existing OSM data: {}", osm_file.display());
        } else {
            let fetched = at_stage(
                Stage::OsmAcquisition,
                fetch_osm_data(&self.http, &self.overpass_url, bbox, &osm_file),
            )?;
            if !fetched {
                return Err(PipelineError {
                    stage: Stage::OsmAcquisition,
                    source: Error::Http(
                        "could not download OSM data and no cached extract exists".to_string(),
                    ),
                });
            }
        }

        match at_stage(Stage::OsmAcquisition, validate_osm_quality(&osm_file))? {
            Some(report) if !report.is_acceptable() => {
                warn!(
                    "OSM data quality is low (score {}); continuing with what we have",
                    report.score()
                );
            }
            Some(_) => {}
            None => warn!("Could not analyze OSM data quality; continuing"),
        }
        Ok(osm_file)
    }

    /// Fetches elevation data and derives hillshade and contours per the
    /// area's flags. Returns whether a hillshade raster was produced and
    /// the contour shapefile if any.
    fn prepare_terrain(
        &self,
        area: &AreaConfig,
        bbox: &BoundingBox,
    ) -> PipelineResult<(bool, Option<PathBuf>)> {
        if !area.contours.enabled && !area.hillshading.enabled {
            return Ok((false, None));
        }

        let requested = at_stage(
            Stage::Elevation,
            area.elevation.source.parse::<DemSource>(),
        )?;
        let mut fetcher = DemFetcher::new(self.downloader, self.tools);
        if let Some(cache) = &self.dem_cache_dir {
            fetcher = fetcher.with_cache_dir(cache.clone());
        }

        let elevation_bbox = bbox.buffered(ELEVATION_BUFFER_KM);
        let elevation = self.elevation_file();
        let used = at_stage(
            Stage::Elevation,
            fetcher.fetch(
                &elevation_bbox,
                &elevation,
                requested,
                area.elevation.allow_synthetic_fallback,
            ),
        )?;
        info!("Elevation data ready (source: {used})");

        let hillshade_ok = if area.hillshading.enabled {
            at_stage(
                Stage::Elevation,
                generate_hillshade(
                    self.tools,
                    &elevation,
                    &self.hillshade_file(),
                    &area.hillshading,
                ),
            )?
        } else {
            false
        };

        let contour_file = if area.contours.enabled {
            at_stage(
                Stage::Elevation,
                generate_contours(self.tools, &elevation, &self.data_dir, area.contours.interval),
            )?
        } else {
            None
        };

        Ok((hillshade_ok, contour_file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_stage_names_read_well_in_errors() {
        let err = PipelineError {
            stage: Stage::OsmAcquisition,
            source: Error::Http("timed out".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "OSM acquisition stage failed: HTTP request failed: timed out"
        );
    }

    #[test]
    fn test_artifact_layout_is_fixed() {
        let tools = crate::tool::testing::FakeRunner::new();
        struct NoEngine;
        impl RenderEngine for NoEngine {
            fn render(
                &self,
                _: &Path,
                _: &BoundingBox,
                _: &Path,
                _: u32,
                _: u32,
            ) -> crate::error::Result<bool> {
                Ok(false)
            }
        }
        struct NoNetwork;
        impl Downloader for NoNetwork {
            fn download(&self, _: &str, _: &Path) -> crate::error::Result<bool> {
                Ok(false)
            }
        }
        let engine = NoEngine;
        let downloader = NoNetwork;
        let pipeline = Pipeline::new(
            PathBuf::from("config"),
            PathBuf::from("data"),
            &tools,
            &engine,
            &downloader,
        );

        assert_eq!(pipeline.osm_file("lumsden"), Path::new("data/lumsden_area.osm"));
        assert_eq!(pipeline.layer_dir(), Path::new("data/osm_data"));
        assert_eq!(pipeline.elevation_file(), Path::new("data/elevation.tif"));
        assert_eq!(pipeline.hillshade_file(), Path::new("data/hillshade.tif"));
        assert_eq!(pipeline.contour_file(), Path::new("data/contours.shp"));
        assert_eq!(
            pipeline.output_file("lumsden", "A3"),
            Path::new("data/lumsden_tourist_map_A3.png")
        );
    }
}
