//! Configuration loading for areas and output formats.
//!
//! Both files are JSON maps keyed by name (`config/areas.json`,
//! `config/output_formats.json`). Lookups by unknown name are hard errors
//! carrying the list of known names.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct AreaConfig {
    pub name: String,
    pub center: Center,
    pub coverage: Coverage,
    pub scale: u32,
    #[serde(default)]
    pub contours: ContourConfig,
    #[serde(default)]
    pub hillshading: HillshadeConfig,
    #[serde(default)]
    pub elevation: ElevationConfig,
    #[serde(default)]
    pub ordnance_survey: OrdnanceSurveyConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Center {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Coverage {
    pub width_km: f64,
    pub height_km: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContourConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_contour_interval")]
    pub interval: u32,
}

impl Default for ContourConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_contour_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HillshadeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default = "default_azimuth")]
    pub azimuth: f64,
    #[serde(default = "default_altitude")]
    pub altitude: f64,
    #[serde(default = "default_z_factor")]
    pub z_factor: f64,
    #[serde(default = "default_shade_scale")]
    pub scale: f64,
}

impl Default for HillshadeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            opacity: default_opacity(),
            azimuth: default_azimuth(),
            altitude: default_altitude(),
            z_factor: default_z_factor(),
            scale: default_shade_scale(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElevationConfig {
    #[serde(default = "default_dem_source")]
    pub source: String,
    #[serde(default = "default_true")]
    pub allow_synthetic_fallback: bool,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            source: default_dem_source(),
            allow_synthetic_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrdnanceSurveyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_os_layers")]
    pub layers: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_contour_interval() -> u32 {
    10
}
fn default_opacity() -> f64 {
    0.3
}
fn default_azimuth() -> f64 {
    315.0
}
fn default_altitude() -> f64 {
    45.0
}
fn default_z_factor() -> f64 {
    1.0
}
fn default_shade_scale() -> f64 {
    111_120.0
}
fn default_dem_source() -> String {
    "srtm".to_string()
}
fn default_os_layers() -> Vec<String> {
    vec!["roads".to_string(), "boundaries".to_string()]
}

/// An output format is either a physical print size (mm at a DPI) or a direct
/// pixel specification for screen targets.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum OutputFormat {
    Pixels { width_px: u32, height_px: u32 },
    Print { width_mm: f64, height_mm: f64, dpi: f64 },
}

impl OutputFormat {
    /// Pixel dimensions for rendering. Print formats use
    /// `px = mm / 25.4 * dpi`, truncated (A3 at 300 DPI is 3507 x 4960).
    pub fn pixel_dimensions(&self) -> (u32, u32) {
        match *self {
            OutputFormat::Pixels { width_px, height_px } => (width_px, height_px),
            OutputFormat::Print { width_mm, height_mm, dpi } => (
                (width_mm / 25.4 * dpi) as u32,
                (height_mm / 25.4 * dpi) as u32,
            ),
        }
    }
}

fn read_json_map<T: serde::de::DeserializeOwned>(path: &Path) -> Result<BTreeMap<String, T>> {
    let text = fs::read_to_string(path).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Loads one area's configuration from `<config_dir>/areas.json`.
pub fn load_area_config(config_dir: &Path, area_name: &str) -> Result<AreaConfig> {
    let path = config_dir.join("areas.json");
    let mut areas: BTreeMap<String, AreaConfig> = read_json_map(&path)?;
    areas.remove(area_name).ok_or_else(|| Error::UnknownArea {
        name: area_name.to_string(),
        available: areas.keys().cloned().collect(),
    })
}

/// Lists the area names known to `<config_dir>/areas.json`.
pub fn list_areas(config_dir: &Path) -> Result<Vec<String>> {
    let path = config_dir.join("areas.json");
    let areas: BTreeMap<String, AreaConfig> = read_json_map(&path)?;
    Ok(areas.keys().cloned().collect())
}

/// Loads one output format from `<config_dir>/output_formats.json`.
pub fn load_output_format(config_dir: &Path, format_name: &str) -> Result<OutputFormat> {
    let path = config_dir.join("output_formats.json");
    let mut formats: BTreeMap<String, OutputFormat> = read_json_map(&path)?;
    formats.remove(format_name).ok_or_else(|| Error::UnknownFormat {
        name: format_name.to_string(),
        available: formats.keys().cloned().collect(),
    })
}
