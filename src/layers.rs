//! Conversion of a raw OSM extract into the fixed set of renderable
//! shapefile layers, driven by GDAL's ogr2ogr.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::tool::ToolRunner;

/// The four OSM driver layers the renderer consumes, with what they hold.
pub const OSM_LAYERS: [(&str, &str); 4] = [
    ("points", "points of interest, towns, etc."),
    ("lines", "roads, paths, boundaries"),
    ("multilinestrings", "complex routes"),
    ("multipolygons", "land use, water bodies, buildings"),
];

/// Extracts each OSM layer into `<out_dir>/<layer>.shp` with overwrite
/// semantics.
///
/// ogr2ogr being absent is fatal for the whole pipeline: `Ok(None)` is
/// returned immediately and no partial layers are attempted. Individual
/// layer failures are logged with the tool's own diagnostics and skipped;
/// the call still succeeds with the output directory, and emptiness is
/// discoverable downstream through feature counts.
pub fn convert_to_layers(
    tools: &dyn ToolRunner,
    osm_file: &Path,
    out_dir: &Path,
) -> Result<Option<PathBuf>> {
    info!("Converting OSM data to shapefiles (no database required)");
    fs::create_dir_all(out_dir)?;

    match tools.run("ogr2ogr", &["--version"]) {
        Ok(version) => info!("  Using GDAL/OGR version: {}", version.stdout.trim()),
        Err(Error::ToolMissing(_)) => {
            warn!("  Could not find or run 'ogr2ogr'. Is GDAL installed and on your PATH?");
            return Ok(None);
        }
        Err(e) => return Err(e),
    }

    inspect_source_layers(tools, osm_file);

    let osm_path = osm_file.to_string_lossy();
    let mut created = Vec::new();

    for (layer, description) in OSM_LAYERS {
        info!("  Extracting {layer} ({description})");
        let output_file = out_dir.join(format!("{layer}.shp"));
        let output_path = output_file.to_string_lossy().into_owned();

        let run = tools.run(
            "ogr2ogr",
            &[
                "-f",
                "ESRI Shapefile",
                "-overwrite",
                &output_path,
                &osm_path,
                layer,
            ],
        )?;

        if run.success() && output_file.exists() {
            info!("    Created {}", output_file.display());
            created.push(layer);
        } else {
            warn!("    Error creating {layer}:");
            if !run.stdout.trim().is_empty() {
                warn!("      stdout: {}", run.stdout.trim());
            }
            if !run.stderr.trim().is_empty() {
                warn!("      stderr: {}", run.stderr.trim());
            }
        }
    }

    info!("  Successfully created {} shapefiles: {:?}", created.len(), created);

    for layer in created {
        let shapefile = out_dir.join(format!("{layer}.shp"));
        match shapefile_feature_count(tools, &shapefile) {
            Ok(Some(count)) => info!("    {layer}: {count} features"),
            _ => info!("    {layer}: file exists but couldn't get info"),
        }
    }

    Ok(Some(out_dir.to_path_buf()))
}

fn inspect_source_layers(tools: &dyn ToolRunner, osm_file: &Path) {
    debug!("  Inspecting OSM file for available layers");
    match tools.run("ogrinfo", &[&osm_file.to_string_lossy()]) {
        Ok(out) if out.success() => {
            for line in out.stdout.lines().filter(|l| l.contains("Layer name:")) {
                debug!("    {}", line.trim());
            }
        }
        Ok(out) => debug!("  Could not inspect OSM file: {}", out.stderr.trim()),
        Err(e) => debug!("  Could not inspect OSM file: {e}"),
    }
}

/// Feature count of a vector file via `ogrinfo -so`, if it can be obtained.
pub(crate) fn shapefile_feature_count(
    tools: &dyn ToolRunner,
    path: &Path,
) -> Result<Option<u64>> {
    let out = tools.run("ogrinfo", &["-so", &path.to_string_lossy()])?;
    if !out.success() {
        return Ok(None);
    }
    Ok(out
        .stdout
        .lines()
        .find_map(|line| line.split_once("Feature Count:"))
        .and_then(|(_, count)| count.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::testing::FakeRunner;
    use tempfile::TempDir;

    #[test]
    fn test_missing_ogr2ogr_is_fatal_and_attempts_nothing() {
        let dir = TempDir::new().unwrap();
        let tools = FakeRunner::new().missing_tool("ogr2ogr");

        let result = convert_to_layers(&tools, Path::new("area.osm"), dir.path()).unwrap();
        assert!(result.is_none());
        // Only the version probe ran; no per-layer conversion was attempted.
        assert_eq!(tools.invocations_of("ogr2ogr"), 1);
    }

    #[test]
    fn test_per_layer_failure_does_not_abort_others() {
        let dir = TempDir::new().unwrap();
        // ogr2ogr "succeeds" but writes nothing, so every layer is reported
        // failed; the conversion still returns the output directory.
        let tools = FakeRunner::new();

        let result = convert_to_layers(&tools, Path::new("area.osm"), dir.path()).unwrap();
        assert_eq!(result, Some(dir.path().to_path_buf()));
        // version probe + 4 layer extractions
        assert_eq!(tools.invocations_of("ogr2ogr"), 5);
    }

    #[test]
    fn test_created_layers_are_counted() {
        let dir = TempDir::new().unwrap();
        for (layer, _) in OSM_LAYERS {
            fs::write(dir.path().join(format!("{layer}.shp")), b"stub").unwrap();
        }
        let tools = FakeRunner::new().with_stdout("ogrinfo", "Feature Count: 17\n");

        let result = convert_to_layers(&tools, Path::new("area.osm"), dir.path()).unwrap();
        assert!(result.is_some());
        // One inspection call plus one count per layer.
        assert_eq!(tools.invocations_of("ogrinfo"), 5);
    }

    #[test]
    fn test_feature_count_parsing() {
        let tools = FakeRunner::new()
            .with_stdout("ogrinfo", "Layer name: contours\nGeometry: Line String\nFeature Count: 324\n");
        let count = shapefile_feature_count(&tools, Path::new("contours.shp")).unwrap();
        assert_eq!(count, Some(324));
    }
}
