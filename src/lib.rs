pub mod bounds;
pub mod config;
pub mod elevation;
pub mod error;
pub mod layers;
pub mod legend;
pub mod osdata;
pub mod osm;
pub mod pipeline;
pub mod render;
pub mod style;
pub mod terrain;
pub mod tool;

pub use bounds::BoundingBox;
pub use config::{AreaConfig, OutputFormat};
pub use elevation::{DemFetcher, DemSource, Downloader, HttpDownloader};
pub use error::{Error, Result};
pub use legend::LegendCatalog;
pub use pipeline::{Pipeline, PipelineError, Stage};
pub use render::{Nik4Renderer, RenderEngine};
pub use tool::{CommandRunner, ToolRunner};
