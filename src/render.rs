//! Map rasterization and legend overlay.
//!
//! Rendering is behind a trait so the orchestrator and its tests never
//! depend on a Mapnik installation; the production engine shells out to
//! `nik4`, which reads the composed style XML and writes the PNG.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::bounds::BoundingBox;
use crate::error::{Error, Result};
use crate::legend::LegendCatalog;
use crate::tool::ToolRunner;

/// Rasterizes a styled map for a bounding box at a pixel size.
pub trait RenderEngine {
    /// Returns `Ok(false)` when the engine is unavailable or the render
    /// fails; the caller decides whether that aborts the run.
    fn render(
        &self,
        style: &Path,
        bbox: &BoundingBox,
        output: &Path,
        width: u32,
        height: u32,
    ) -> Result<bool>;
}

/// Drives the `nik4` Mapnik rasterizer.
pub struct Nik4Renderer<'a> {
    tools: &'a dyn ToolRunner,
}

impl<'a> Nik4Renderer<'a> {
    pub fn new(tools: &'a dyn ToolRunner) -> Self {
        Self { tools }
    }
}

impl RenderEngine for Nik4Renderer<'_> {
    fn render(
        &self,
        style: &Path,
        bbox: &BoundingBox,
        output: &Path,
        width: u32,
        height: u32,
    ) -> Result<bool> {
        info!("Rendering map ({width}x{height} px)");
        let run = self.tools.run(
            "nik4",
            &[
                "--dims",
                &width.to_string(),
                &height.to_string(),
                "-b",
                &bbox.west.to_string(),
                &bbox.south.to_string(),
                &bbox.east.to_string(),
                &bbox.north.to_string(),
                &style.to_string_lossy(),
                &output.to_string_lossy(),
            ],
        );
        let run = match run {
            Ok(run) => run,
            Err(Error::ToolMissing(tool)) => {
                warn!("Renderer '{tool}' not found on PATH; cannot produce map image");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if !run.success() {
            warn!("Map rendering failed:");
            warn!("  {}", run.stderr.trim());
            return Ok(false);
        }
        if !output.exists() {
            warn!("Renderer exited cleanly but produced no output file");
            return Ok(false);
        }
        Ok(true)
    }
}

/// Renders the map and overlays the legend.
///
/// The legend is always attempted; if compositing fails the bare map is
/// kept and the failure logged. Returns `Ok(false)` if no image could be
/// produced at all.
pub fn render_map(
    engine: &dyn RenderEngine,
    catalog: &LegendCatalog,
    style: &Path,
    bbox: &BoundingBox,
    output: &Path,
    width: u32,
    height: u32,
) -> Result<bool> {
    if !engine.render(style, bbox, output, width, height)? {
        return Ok(false);
    }

    if let Err(e) = catalog.composite_onto(output) {
        warn!("Could not add legend overlay, keeping the map without it: {e}");
    }

    let size = fs::metadata(output)?.len();
    info!(
        "Map rendered: {} ({:.1} MB)",
        output.display(),
        size as f64 / (1024.0 * 1024.0)
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::testing::FakeRunner;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn bbox() -> BoundingBox {
        BoundingBox {
            south: 57.22,
            north: 57.36,
            west: -2.96,
            east: -2.80,
        }
    }

    /// Engine double that writes a blank PNG like a real render would.
    struct BlankEngine;

    impl RenderEngine for BlankEngine {
        fn render(
            &self,
            _style: &Path,
            _bbox: &BoundingBox,
            output: &Path,
            width: u32,
            height: u32,
        ) -> Result<bool> {
            RgbaImage::from_pixel(width, height, Rgba([248, 246, 240, 255]))
                .save(output)
                .map_err(crate::error::Error::from)?;
            Ok(true)
        }
    }

    struct FailingEngine;

    impl RenderEngine for FailingEngine {
        fn render(
            &self,
            _style: &Path,
            _bbox: &BoundingBox,
            _output: &Path,
            _width: u32,
            _height: u32,
        ) -> Result<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_nik4_invocation_shape() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("map.png");
        fs::write(&output, b"stub").unwrap();
        let tools = FakeRunner::new();

        let ok = Nik4Renderer::new(&tools)
            .render(Path::new("style.xml"), &bbox(), &output, 800, 1200)
            .unwrap();
        assert!(ok);

        let calls = tools.calls.borrow();
        let call = &calls[0];
        assert_eq!(call[0], "nik4");
        let args = call.join(" ");
        assert!(args.contains("--dims 800 1200"));
        assert!(args.contains("-b -2.96 57.22 -2.8 57.36"));
    }

    #[test]
    fn test_missing_nik4_reports_false() {
        let tools = FakeRunner::new().missing_tool("nik4");
        let ok = Nik4Renderer::new(&tools)
            .render(Path::new("style.xml"), &bbox(), Path::new("map.png"), 100, 100)
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_clean_exit_without_output_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let tools = FakeRunner::new();
        let ok = Nik4Renderer::new(&tools)
            .render(
                Path::new("style.xml"),
                &bbox(),
                &dir.path().join("never_written.png"),
                100,
                100,
            )
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_render_map_composites_legend() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("map.png");
        let catalog = LegendCatalog::tourist(&dir.path().join("icons"));

        let ok = render_map(&BlankEngine, &catalog, Path::new("style.xml"), &bbox(), &output, 800, 1200)
            .unwrap();
        assert!(ok);

        // Legend border must be present where the layout puts it.
        let img = image::open(&output).unwrap().to_rgba8();
        let layout = catalog.layout(800, 1200);
        assert_eq!(*img.get_pixel(layout.x, layout.y), Rgba([51, 51, 51, 255]));
    }

    #[test]
    fn test_failed_render_skips_legend() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("map.png");
        let catalog = LegendCatalog::tourist(&dir.path().join("icons"));

        let ok = render_map(
            &FailingEngine,
            &catalog,
            Path::new("style.xml"),
            &bbox(),
            &output,
            800,
            1200,
        )
        .unwrap();
        assert!(!ok);
        assert!(!output.exists());
    }
}
