//! Cartographic style composition.
//!
//! Styles are built as a structured model (style blocks and layer blocks,
//! each gated on actual data availability) and rendered to Mapnik XML by a
//! deterministic serializer. A layer whose backing file is absent is simply
//! not part of the model, so the output can never contain a dangling
//! datasource reference.

use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesText, Event};
use quick_xml::Writer;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const MERCATOR_SRS: &str = "+proj=merc +a=6378137 +b=6378137 +lat_ts=0.0 +lon_0=0.0 \
     +x_0=0.0 +y_0=0.0 +k=1.0 +units=m +nadgrids=@null +wktext +no_defs +over";
const WGS84_SRS: &str = "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs";
const BACKGROUND: &str = "#f8f6f0";

/// Runtime parameters for composing a style.
#[derive(Debug, Clone)]
pub struct StyleParams {
    /// Directory holding the four OSM shapefile layers.
    pub layer_dir: PathBuf,
    pub hillshade: HillshadeParams,
    pub contours: ContourParams,
    /// Ordnance Survey overlay shapefiles that actually materialized,
    /// as `(product key, shapefile path)` pairs.
    pub os_overlays: Vec<(String, PathBuf)>,
}

#[derive(Debug, Clone)]
pub struct HillshadeParams {
    pub enabled: bool,
    pub raster: PathBuf,
    pub opacity: f64,
}

#[derive(Debug, Clone)]
pub struct ContourParams {
    pub enabled: bool,
    pub shapefile: PathBuf,
    /// Elevations divisible by this are drawn heavier and labelled; five
    /// times the generation interval.
    pub major_interval: u32,
    pub color: String,
    pub major_color: String,
    pub width: f64,
    pub major_width: f64,
}

impl ContourParams {
    pub fn with_interval(shapefile: PathBuf, interval: u32) -> Self {
        Self {
            enabled: true,
            shapefile,
            major_interval: interval * 5,
            color: "#c8a165".to_string(),
            major_color: "#a8743d".to_string(),
            width: 0.6,
            major_width: 1.1,
        }
    }
}

// ---------------------------------------------------------------------------
// Style model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Symbolizer {
    Polygon { fill: String, opacity: f64 },
    Line {
        stroke: String,
        width: f64,
        opacity: f64,
        dasharray: Option<String>,
    },
    Marker { fill: String, width: f64 },
    Raster { opacity: f64 },
    Text { attribute: String, size: u32, fill: String },
}

#[derive(Debug, Clone, Default)]
struct Rule {
    filter: Option<String>,
    symbolizers: Vec<Symbolizer>,
}

impl Rule {
    fn filtered(filter: &str, symbolizers: Vec<Symbolizer>) -> Self {
        Self {
            filter: Some(filter.to_string()),
            symbolizers,
        }
    }

    fn unfiltered(symbolizers: Vec<Symbolizer>) -> Self {
        Self {
            filter: None,
            symbolizers,
        }
    }
}

#[derive(Debug, Clone)]
struct StyleBlock {
    name: String,
    rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
enum Datasource {
    Shapefile(PathBuf),
    Raster(PathBuf),
}

#[derive(Debug, Clone)]
struct LayerBlock {
    name: String,
    styles: Vec<String>,
    datasource: Datasource,
}

/// The fully composed style document model.
#[derive(Debug, Clone)]
pub struct StyleSheet {
    styles: Vec<StyleBlock>,
    layers: Vec<LayerBlock>,
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Builds the style model for `style_name` with the given parameters.
///
/// Optional blocks (hillshade, contours, OS overlays) appear in the model
/// only when enabled *and* their backing file exists on disk. An unknown
/// style name is a configuration error, not a runtime degradation.
pub fn compose_style(style_name: &str, params: &StyleParams) -> Result<StyleSheet> {
    match style_name {
        "tourist" => Ok(tourist_style(params)),
        other => Err(Error::UnknownStyle(other.to_string())),
    }
}

/// Composes and writes `<styles_dir>/<style_name>_map_style.xml`, returning
/// the output path. Byte-identical across runs for identical parameters and
/// identical on-disk layer availability.
pub fn compose_style_file(
    style_name: &str,
    params: &StyleParams,
    styles_dir: &Path,
) -> Result<PathBuf> {
    let sheet = compose_style(style_name, params)?;
    fs::create_dir_all(styles_dir)?;
    let output = styles_dir.join(format!("{style_name}_map_style.xml"));
    fs::write(&output, sheet.to_xml()?)?;
    info!("Created map style: {}", output.display());
    Ok(output)
}

fn abs(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn tourist_style(params: &StyleParams) -> StyleSheet {
    let mut styles = Vec::new();
    let mut layers = Vec::new();

    let polygons = abs(&params.layer_dir.join("multipolygons.shp"));
    let lines = abs(&params.layer_dir.join("lines.shp"));
    let multilines = abs(&params.layer_dir.join("multilinestrings.shp"));
    let points = abs(&params.layer_dir.join("points.shp"));

    // Land use underlies everything else.
    styles.push(StyleBlock {
        name: "landuse".into(),
        rules: vec![
            Rule::filtered(
                "[landuse] = 'forest' or [natural] = 'wood'",
                vec![Symbolizer::Polygon { fill: "#d4e6b7".into(), opacity: 0.8 }],
            ),
            Rule::filtered(
                "[landuse] = 'farmland' or [landuse] = 'meadow' or [landuse] = 'grass'",
                vec![Symbolizer::Polygon { fill: "#e8f5d4".into(), opacity: 0.6 }],
            ),
            Rule::filtered(
                "[leisure] = 'park' or [leisure] = 'garden'",
                vec![Symbolizer::Polygon { fill: "#c8facc".into(), opacity: 0.8 }],
            ),
        ],
    });
    layers.push(LayerBlock {
        name: "landuse".into(),
        styles: vec!["landuse".into()],
        datasource: Datasource::Shapefile(polygons.clone()),
    });

    if params.hillshade.enabled && params.hillshade.raster.exists() {
        styles.push(StyleBlock {
            name: "hillshade".into(),
            rules: vec![Rule::unfiltered(vec![Symbolizer::Raster {
                opacity: params.hillshade.opacity,
            }])],
        });
        layers.push(LayerBlock {
            name: "hillshade".into(),
            styles: vec!["hillshade".into()],
            datasource: Datasource::Raster(abs(&params.hillshade.raster)),
        });
    } else {
        debug!("hillshade layer omitted (disabled or raster absent)");
    }

    styles.push(StyleBlock {
        name: "water".into(),
        rules: vec![
            Rule::filtered(
                "[natural] = 'water' or [landuse] = 'reservoir'",
                vec![Symbolizer::Polygon { fill: "#7dd3c0".into(), opacity: 0.8 }],
            ),
        ],
    });
    layers.push(LayerBlock {
        name: "water".into(),
        styles: vec!["water".into()],
        datasource: Datasource::Shapefile(polygons.clone()),
    });

    styles.push(StyleBlock {
        name: "waterways".into(),
        rules: vec![
            Rule::filtered(
                "[waterway] = 'river'",
                vec![Symbolizer::Line {
                    stroke: "#7dd3c0".into(),
                    width: 3.0,
                    opacity: 0.9,
                    dasharray: None,
                }],
            ),
            Rule::filtered(
                "[waterway] = 'stream'",
                vec![Symbolizer::Line {
                    stroke: "#7dd3c0".into(),
                    width: 1.5,
                    opacity: 0.8,
                    dasharray: None,
                }],
            ),
            Rule::filtered(
                "[waterway] = 'canal'",
                vec![Symbolizer::Line {
                    stroke: "#5dade2".into(),
                    width: 2.0,
                    opacity: 0.8,
                    dasharray: None,
                }],
            ),
        ],
    });
    layers.push(LayerBlock {
        name: "waterways".into(),
        styles: vec!["waterways".into()],
        datasource: Datasource::Shapefile(lines.clone()),
    });

    // Contour blocks are conditional on the shapefile actually existing;
    // structural presence in the style definition does not guarantee
    // presence in the output.
    if params.contours.enabled && params.contours.shapefile.exists() {
        let c = &params.contours;
        styles.push(StyleBlock {
            name: "contours".into(),
            rules: vec![
                Rule::filtered(
                    &format!("([elevation] % {}) != 0", c.major_interval),
                    vec![Symbolizer::Line {
                        stroke: c.color.clone(),
                        width: c.width,
                        opacity: 0.6,
                        dasharray: None,
                    }],
                ),
                Rule::filtered(
                    &format!("([elevation] % {}) = 0", c.major_interval),
                    vec![
                        Symbolizer::Line {
                            stroke: c.major_color.clone(),
                            width: c.major_width,
                            opacity: 0.8,
                            dasharray: None,
                        },
                        Symbolizer::Text {
                            attribute: "elevation".into(),
                            size: 8,
                            fill: c.major_color.clone(),
                        },
                    ],
                ),
            ],
        });
        layers.push(LayerBlock {
            name: "contours".into(),
            styles: vec!["contours".into()],
            datasource: Datasource::Shapefile(abs(&c.shapefile)),
        });
    } else {
        debug!("contour layer omitted (disabled or shapefile absent)");
    }

    styles.push(StyleBlock {
        name: "roads".into(),
        rules: vec![
            Rule::filtered(
                "[highway] = 'motorway' or [highway] = 'trunk'",
                vec![Symbolizer::Line {
                    stroke: "#e74c3c".into(),
                    width: 4.0,
                    opacity: 0.9,
                    dasharray: None,
                }],
            ),
            Rule::filtered(
                "[highway] = 'primary'",
                vec![Symbolizer::Line {
                    stroke: "#f39c12".into(),
                    width: 3.0,
                    opacity: 0.9,
                    dasharray: None,
                }],
            ),
            Rule::filtered(
                "[highway] = 'secondary'",
                vec![Symbolizer::Line {
                    stroke: "#f1c40f".into(),
                    width: 2.5,
                    opacity: 0.8,
                    dasharray: None,
                }],
            ),
            Rule::filtered(
                "[highway] = 'tertiary' or [highway] = 'unclassified'",
                vec![Symbolizer::Line {
                    stroke: "#34495e".into(),
                    width: 1.5,
                    opacity: 0.7,
                    dasharray: None,
                }],
            ),
            Rule::filtered(
                "[highway] = 'residential' or [highway] = 'service'",
                vec![Symbolizer::Line {
                    stroke: "#ecf0f1".into(),
                    width: 1.5,
                    opacity: 0.8,
                    dasharray: None,
                }],
            ),
        ],
    });
    layers.push(LayerBlock {
        name: "roads".into(),
        styles: vec!["roads".into()],
        datasource: Datasource::Shapefile(lines.clone()),
    });

    styles.push(StyleBlock {
        name: "paths".into(),
        rules: vec![
            Rule::filtered(
                "[highway] = 'footway' or [highway] = 'path'",
                vec![Symbolizer::Line {
                    stroke: "#8e44ad".into(),
                    width: 1.5,
                    opacity: 0.8,
                    dasharray: Some("3,2".into()),
                }],
            ),
            Rule::filtered(
                "[highway] = 'cycleway'",
                vec![Symbolizer::Line {
                    stroke: "#27ae60".into(),
                    width: 2.0,
                    opacity: 0.9,
                    dasharray: Some("4,2".into()),
                }],
            ),
        ],
    });
    layers.push(LayerBlock {
        name: "paths".into(),
        styles: vec!["paths".into()],
        datasource: Datasource::Shapefile(lines),
    });

    styles.push(StyleBlock {
        name: "routes".into(),
        rules: vec![Rule::filtered(
            "[type] = 'route'",
            vec![Symbolizer::Line {
                stroke: "#9b59b6".into(),
                width: 1.2,
                opacity: 0.5,
                dasharray: Some("6,3".into()),
            }],
        )],
    });
    layers.push(LayerBlock {
        name: "routes".into(),
        styles: vec!["routes".into()],
        datasource: Datasource::Shapefile(multilines),
    });

    styles.push(StyleBlock {
        name: "buildings".into(),
        rules: vec![Rule::filtered(
            "[building] != ''",
            vec![Symbolizer::Polygon { fill: "#bdc3c7".into(), opacity: 0.6 }],
        )],
    });
    layers.push(LayerBlock {
        name: "buildings".into(),
        styles: vec!["buildings".into()],
        datasource: Datasource::Shapefile(polygons),
    });

    // Supplementary OS overlays: only products whose conversion actually
    // produced a shapefile make it into the model.
    for (key, shapefile) in &params.os_overlays {
        if !shapefile.exists() {
            debug!("OS overlay '{key}' omitted (shapefile absent)");
            continue;
        }
        let (stroke, width, dasharray) = match key.as_str() {
            "roads" => ("#2c3e50", 1.8, None),
            "boundaries" => ("#7f8c8d", 1.0, Some("8,4".to_string())),
            "rights_of_way" => ("#16a085", 1.4, Some("5,3".to_string())),
            _ => ("#95a5a6", 1.0, None),
        };
        let name = format!("os_{key}");
        styles.push(StyleBlock {
            name: name.clone(),
            rules: vec![Rule::unfiltered(vec![Symbolizer::Line {
                stroke: stroke.into(),
                width,
                opacity: 0.7,
                dasharray,
            }])],
        });
        layers.push(LayerBlock {
            name: name.clone(),
            styles: vec![name],
            datasource: Datasource::Shapefile(abs(shapefile)),
        });
    }

    styles.push(StyleBlock {
        name: "poi".into(),
        rules: vec![
            Rule::filtered(
                "[amenity] != '' or [tourism] != '' or [shop] != ''",
                vec![
                    Symbolizer::Marker { fill: "#e74c3c".into(), width: 6.0 },
                    Symbolizer::Text {
                        attribute: "name".into(),
                        size: 9,
                        fill: "#2c3e50".into(),
                    },
                ],
            ),
            Rule::filtered(
                "[place] = 'town' or [place] = 'village' or [place] = 'hamlet'",
                vec![Symbolizer::Text {
                    attribute: "name".into(),
                    size: 12,
                    fill: "#2c3e50".into(),
                }],
            ),
        ],
    });
    layers.push(LayerBlock {
        name: "poi".into(),
        styles: vec!["poi".into()],
        datasource: Datasource::Shapefile(points),
    });

    StyleSheet { styles, layers }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

type XmlResult = std::io::Result<()>;

impl StyleSheet {
    /// Serializes the model to Mapnik XML. Output depends only on the model.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(quick_xml::Error::from)?;

        writer
            .create_element("Map")
            .with_attribute(("background-color", BACKGROUND))
            .with_attribute(("srs", MERCATOR_SRS))
            .write_inner_content(|w| -> XmlResult {
                for style in &self.styles {
                    write_style(w, style)?;
                }
                for layer in &self.layers {
                    write_layer(w, layer)?;
                }
                Ok(())
            })
            .map_err(quick_xml::Error::from)?;

        let bytes = writer.into_inner();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn write_style(w: &mut Writer<Vec<u8>>, style: &StyleBlock) -> XmlResult {
    w.create_element("Style")
        .with_attribute(("name", style.name.as_str()))
        .write_inner_content(|w| -> XmlResult {
            for rule in &style.rules {
                w.create_element("Rule").write_inner_content(|w| -> XmlResult {
                    if let Some(filter) = &rule.filter {
                        w.create_element("Filter")
                            .write_text_content(BytesText::new(filter))?;
                    }
                    for symbolizer in &rule.symbolizers {
                        write_symbolizer(w, symbolizer)?;
                    }
                    Ok(())
                })?;
            }
            Ok(())
        })?;
    Ok(())
}

fn write_symbolizer(w: &mut Writer<Vec<u8>>, symbolizer: &Symbolizer) -> XmlResult {
    match symbolizer {
        Symbolizer::Polygon { fill, opacity } => {
            w.create_element("PolygonSymbolizer")
                .with_attribute(("fill", fill.as_str()))
                .with_attribute(("fill-opacity", fmt_num(*opacity).as_str()))
                .write_empty()?;
        }
        Symbolizer::Line { stroke, width, opacity, dasharray } => {
            let mut element = w
                .create_element("LineSymbolizer")
                .with_attribute(("stroke", stroke.as_str()))
                .with_attribute(("stroke-width", fmt_num(*width).as_str()))
                .with_attribute(("stroke-opacity", fmt_num(*opacity).as_str()));
            if let Some(dasharray) = dasharray {
                element = element.with_attribute(("stroke-dasharray", dasharray.as_str()));
            }
            element.write_empty()?;
        }
        Symbolizer::Marker { fill, width } => {
            w.create_element("MarkersSymbolizer")
                .with_attribute(("fill", fill.as_str()))
                .with_attribute(("width", fmt_num(*width).as_str()))
                .with_attribute(("allow-overlap", "false"))
                .write_empty()?;
        }
        Symbolizer::Raster { opacity } => {
            w.create_element("RasterSymbolizer")
                .with_attribute(("opacity", fmt_num(*opacity).as_str()))
                .write_empty()?;
        }
        Symbolizer::Text { attribute, size, fill } => {
            w.create_element("TextSymbolizer")
                .with_attribute(("face-name", "DejaVu Sans Book"))
                .with_attribute(("size", size.to_string().as_str()))
                .with_attribute(("fill", fill.as_str()))
                .with_attribute(("halo-fill", "#ffffff"))
                .with_attribute(("halo-radius", "1"))
                .write_text_content(BytesText::new(&format!("[{attribute}]")))?;
        }
    }
    Ok(())
}

fn write_layer(w: &mut Writer<Vec<u8>>, layer: &LayerBlock) -> XmlResult {
    w.create_element("Layer")
        .with_attribute(("name", layer.name.as_str()))
        .with_attribute(("srs", WGS84_SRS))
        .write_inner_content(|w| -> XmlResult {
            for style in &layer.styles {
                w.create_element("StyleName")
                    .write_text_content(BytesText::new(style))?;
            }
            w.create_element("Datasource").write_inner_content(|w| -> XmlResult {
                let (kind, file) = match &layer.datasource {
                    Datasource::Shapefile(path) => ("shape", path),
                    Datasource::Raster(path) => ("gdal", path),
                };
                w.create_element("Parameter")
                    .with_attribute(("name", "type"))
                    .write_text_content(BytesText::new(kind))?;
                w.create_element("Parameter")
                    .with_attribute(("name", "file"))
                    .write_text_content(BytesText::new(&file.to_string_lossy()))?;
                Ok(())
            })?;
            Ok(())
        })?;
    Ok(())
}

fn fmt_num(value: f64) -> String {
    // `{}` prints 4.0 as "4"; keep that, it is stable and compact.
    format!("{value}")
}
