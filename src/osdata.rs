//! Ordnance Survey Open Data overlays.
//!
//! OS products require licensed API downloads, so source data is expected
//! on disk (one file per product under `<data_dir>/os_data/source/`) and
//! this module only converts it into renderable shapefiles. A product with
//! no source data, or whose conversion fails, is dropped from the result;
//! the style composer then omits it instead of referencing a missing file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::OrdnanceSurveyConfig;
use crate::error::{Error, Result};
use crate::tool::ToolRunner;

/// A supported OS Open Data product.
#[derive(Debug, Clone, Copy)]
pub struct OsProduct {
    pub key: &'static str,
    pub name: &'static str,
    /// Layer to extract from the source dataset.
    pub layer_name: &'static str,
}

pub const OS_PRODUCTS: [OsProduct; 3] = [
    OsProduct {
        key: "roads",
        name: "OS Open Roads",
        layer_name: "RoadLink",
    },
    OsProduct {
        key: "boundaries",
        name: "OS Boundary-Line",
        layer_name: "boundary_line",
    },
    OsProduct {
        key: "rights_of_way",
        name: "OS Open Greenspace",
        layer_name: "GreenspaceSite",
    },
];

fn product(key: &str) -> Option<&'static OsProduct> {
    OS_PRODUCTS.iter().find(|p| p.key == key)
}

const SOURCE_EXTENSIONS: [&str; 3] = ["gpkg", "shp", "gml"];

fn find_source(os_dir: &Path, key: &str) -> Option<PathBuf> {
    SOURCE_EXTENSIONS
        .iter()
        .map(|ext| os_dir.join("source").join(format!("{key}.{ext}")))
        .find(|candidate| candidate.exists())
}

/// Converts the enabled OS products into shapefiles under
/// `<data_dir>/os_data/<key>/<key>.shp`.
///
/// Returns `(key, shapefile)` pairs for products that actually produced
/// output. Disabled config yields an empty list without touching the
/// filesystem. Per-product failures are logged and the product dropped.
pub fn process_os_data(
    tools: &dyn ToolRunner,
    data_dir: &Path,
    config: &OrdnanceSurveyConfig,
) -> Result<Vec<(String, PathBuf)>> {
    if !config.enabled {
        return Ok(Vec::new());
    }

    info!("Processing Ordnance Survey data layers");
    let os_dir = data_dir.join("os_data");
    let mut processed = Vec::new();

    for key in &config.layers {
        let Some(product) = product(key) else {
            warn!("  Skipping unknown OS layer: {key}");
            continue;
        };

        let Some(source) = find_source(&os_dir, key) else {
            info!(
                "  {}: no source data under {}, layer disabled",
                product.name,
                os_dir.join("source").display()
            );
            continue;
        };

        match convert_product(tools, product, &source, &os_dir) {
            Ok(Some(shapefile)) => {
                info!("  {} ready for mapping", product.name);
                processed.push((key.clone(), shapefile));
            }
            Ok(None) => {
                warn!("  {} processing failed, layer will be disabled", product.name);
            }
            Err(Error::ToolMissing(tool)) => {
                warn!("  Could not find '{tool}'; OS layers disabled");
                return Ok(processed);
            }
            Err(e) => return Err(e),
        }
    }

    if processed.is_empty() {
        warn!("No OS data layers were successfully processed");
    } else {
        info!("Successfully processed {} OS data layers", processed.len());
    }
    Ok(processed)
}

fn convert_product(
    tools: &dyn ToolRunner,
    product: &OsProduct,
    source: &Path,
    os_dir: &Path,
) -> Result<Option<PathBuf>> {
    info!("  Converting {} to shapefiles", product.name);
    let out_dir = os_dir.join(product.key);
    fs::create_dir_all(&out_dir)?;
    let shapefile = out_dir.join(format!("{}.shp", product.key));

    let run = tools.run(
        "ogr2ogr",
        &[
            "-f",
            "ESRI Shapefile",
            "-overwrite",
            &shapefile.to_string_lossy(),
            &source.to_string_lossy(),
            product.layer_name,
        ],
    )?;

    if !run.success() {
        warn!("    {}", run.stderr.trim());
        return Ok(None);
    }
    if !shapefile.exists() {
        warn!("    Conversion reported success but produced no shapefile");
        return Ok(None);
    }
    info!("    Converted {}: {}", product.name, shapefile.display());
    Ok(Some(shapefile))
}
