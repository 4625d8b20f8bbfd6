use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("area '{name}' not found in configuration (available: {})", available.join(", "))]
    UnknownArea { name: String, available: Vec<String> },

    #[error("output format '{name}' not found in configuration (available: {})", available.join(", "))]
    UnknownFormat { name: String, available: Vec<String> },

    #[error("style '{0}' is not registered")]
    UnknownStyle(String),

    #[error("required external tool '{0}' not found on PATH")]
    ToolMissing(String),

    #[error(
        "DEM data download failed from '{source_name}' and synthetic fallback is disabled; \
         either enable synthetic fallback or ensure network connectivity to DEM data sources"
    )]
    ElevationExhausted { source_name: String },

    #[error("configuration file {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("render error: {0}")]
    Render(String),
}
