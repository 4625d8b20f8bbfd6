//! Terrain derivatives: shaded relief and elevation contours, both driven by
//! GDAL's DEM tooling. Each derivative is an optional map enhancement; a
//! failure here disables the layer downstream, never the whole pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::HillshadeConfig;
use crate::error::Result;
use crate::layers::shapefile_feature_count;
use crate::tool::ToolRunner;

/// Runs `gdaldem hillshade` over a DEM.
///
/// Returns `Ok(false)` on non-zero exit; hillshading is an enhancement, so
/// the caller skips it rather than aborting.
pub fn generate_hillshade(
    tools: &dyn ToolRunner,
    dem: &Path,
    output: &Path,
    config: &HillshadeConfig,
) -> Result<bool> {
    let run = tools.run(
        "gdaldem",
        &[
            "hillshade",
            &dem.to_string_lossy(),
            &output.to_string_lossy(),
            "-z",
            &config.z_factor.to_string(),
            "-s",
            &config.scale.to_string(),
            "-az",
            &config.azimuth.to_string(),
            "-alt",
            &config.altitude.to_string(),
            "-of",
            "GTiff",
            "-co",
            "COMPRESS=LZW",
        ],
    )?;

    if !run.success() {
        warn!("Error generating hillshade: {}", run.stderr.trim());
        return Ok(false);
    }

    info!("Generated hillshade: {}", output.display());
    Ok(true)
}

/// Extracts contour lines at a fixed interval into `<out_dir>/contours.shp`.
///
/// A missing elevation raster is a fast `None`, not an attempted generation.
/// Tool failure also yields `None`; the contour layer is simply absent
/// downstream.
pub fn generate_contours(
    tools: &dyn ToolRunner,
    elevation: &Path,
    out_dir: &Path,
    interval_m: u32,
) -> Result<Option<PathBuf>> {
    info!("Generating contour lines (interval: {interval_m}m)");

    if !elevation.exists() {
        warn!("Elevation file not found: {}", elevation.display());
        return Ok(None);
    }
    fs::create_dir_all(out_dir)?;

    let contour_file = out_dir.join("contours.shp");
    let run = tools.run(
        "gdal_contour",
        &[
            "-a",
            "elevation",
            "-i",
            &interval_m.to_string(),
            "-f",
            "ESRI Shapefile",
            &elevation.to_string_lossy(),
            &contour_file.to_string_lossy(),
        ],
    )?;

    if !run.success() {
        warn!("Error generating contour lines:");
        warn!("  {}", run.stderr.trim());
        return Ok(None);
    }
    if !contour_file.exists() {
        warn!("Contour generation completed but no output file found");
        return Ok(None);
    }

    info!("Generated contour lines: {}", contour_file.display());
    if let Ok(Some(count)) = shapefile_feature_count(tools, &contour_file) {
        info!("  Features: {count} contour lines");
        info!("  Interval: {interval_m}m");
    }

    Ok(Some(contour_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::testing::FakeRunner;
    use tempfile::TempDir;

    fn hillshade_config() -> HillshadeConfig {
        HillshadeConfig {
            enabled: true,
            opacity: 0.3,
            azimuth: 315.0,
            altitude: 45.0,
            z_factor: 1.0,
            scale: 111_120.0,
        }
    }

    #[test]
    fn test_hillshade_invocation_parameters() {
        let dir = TempDir::new().unwrap();
        let tools = FakeRunner::new();

        let ok = generate_hillshade(
            &tools,
            Path::new("dem.tif"),
            &dir.path().join("hillshade.tif"),
            &hillshade_config(),
        )
        .unwrap();
        assert!(ok);

        let calls = tools.calls.borrow();
        let call = &calls[0];
        assert_eq!(call[0], "gdaldem");
        assert_eq!(call[1], "hillshade");
        let args = call.join(" ");
        assert!(args.contains("-z 1"));
        assert!(args.contains("-az 315"));
        assert!(args.contains("-alt 45"));
        assert!(args.contains("-s 111120"));
    }

    #[test]
    fn test_hillshade_failure_is_a_skip() {
        let tools = FakeRunner::new().failing_tool("gdaldem");
        let ok = generate_hillshade(
            &tools,
            Path::new("dem.tif"),
            Path::new("hillshade.tif"),
            &hillshade_config(),
        )
        .unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_contours_require_existing_dem() {
        let dir = TempDir::new().unwrap();
        let tools = FakeRunner::new();

        let result =
            generate_contours(&tools, &dir.path().join("missing.tif"), dir.path(), 10).unwrap();
        assert!(result.is_none());
        assert_eq!(tools.invocations_of("gdal_contour"), 0);
    }

    #[test]
    fn test_contour_failure_yields_none() {
        let dir = TempDir::new().unwrap();
        let dem = dir.path().join("dem.tif");
        fs::write(&dem, b"stub").unwrap();
        let tools = FakeRunner::new().failing_tool("gdal_contour");

        let result = generate_contours(&tools, &dem, dir.path(), 10).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_contour_success_reports_path() {
        let dir = TempDir::new().unwrap();
        let dem = dir.path().join("dem.tif");
        fs::write(&dem, b"stub").unwrap();
        // The fake tool does not create files, so pre-create the output the
        // way a successful gdal_contour run would.
        fs::write(dir.path().join("contours.shp"), b"stub").unwrap();
        let tools = FakeRunner::new().with_stdout("ogrinfo", "Feature Count: 88\n");

        let result = generate_contours(&tools, &dem, dir.path(), 10).unwrap();
        assert_eq!(result, Some(dir.path().join("contours.shp")));
    }
}
