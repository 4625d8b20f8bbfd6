//! Map legend catalog and raster overlay.
//!
//! The legend is composited onto the rendered map PNG after the fact: a
//! translucent panel in the bottom-right corner holding one symbol + label
//! row per catalog entry. Symbols mirror the style's colors. Missing fonts
//! or broken icons degrade the affected row, never the whole overlay.

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Pixel, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use crate::error::Result;

const ITEM_HEIGHT: u32 = 18;
const PADDING: u32 = 20;
const TITLE_HEIGHT: u32 = 25;
const LEGEND_WIDTH: u32 = 200;
const MARGIN: u32 = 20;
const SYMBOL_SIZE: u32 = 12;
const ROW_HEIGHT: u32 = 16;

const TEXT_COLOR: Rgba<u8> = Rgba([44, 62, 80, 255]);
const BORDER_COLOR: Rgba<u8> = Rgba([51, 51, 51, 255]);
const PLACEHOLDER_COLOR: Rgba<u8> = Rgba([142, 68, 173, 255]);

/// How a catalog entry is drawn in the legend panel.
#[derive(Debug, Clone)]
pub enum Symbol {
    /// Filled square.
    Polygon { fill: &'static str },
    /// Horizontal stroke, optionally dashed.
    Line { stroke: &'static str, width: f64, dashed: bool },
    /// Filled circle.
    Point { fill: &'static str, width: u32 },
    /// Rasterized SVG icon.
    Icon { file: PathBuf },
}

#[derive(Debug, Clone)]
pub struct LegendItem {
    pub label: &'static str,
    pub symbol: Symbol,
}

/// The set of entries a map's legend shows.
#[derive(Debug, Clone)]
pub struct LegendCatalog {
    pub title: &'static str,
    pub items: Vec<LegendItem>,
}

impl LegendCatalog {
    /// The fixed catalog matching the tourist style, with POI icons looked
    /// up under `icons_dir`.
    pub fn tourist(icons_dir: &Path) -> Self {
        let icon = |name: &str| Symbol::Icon {
            file: icons_dir.join(name),
        };
        let items = vec![
            LegendItem { label: "Forest / Woodland", symbol: Symbol::Polygon { fill: "#d4e6b7" } },
            LegendItem { label: "Farmland / Grassland", symbol: Symbol::Polygon { fill: "#e8f5d4" } },
            LegendItem { label: "Parks / Gardens", symbol: Symbol::Polygon { fill: "#c8facc" } },
            LegendItem { label: "Water Bodies", symbol: Symbol::Polygon { fill: "#7dd3c0" } },
            LegendItem {
                label: "Rivers",
                symbol: Symbol::Line { stroke: "#7dd3c0", width: 3.0, dashed: false },
            },
            LegendItem {
                label: "Streams",
                symbol: Symbol::Line { stroke: "#7dd3c0", width: 1.5, dashed: false },
            },
            LegendItem {
                label: "Canals",
                symbol: Symbol::Line { stroke: "#5dade2", width: 2.0, dashed: false },
            },
            LegendItem {
                label: "Motorways",
                symbol: Symbol::Line { stroke: "#e74c3c", width: 4.0, dashed: false },
            },
            LegendItem {
                label: "Primary Roads",
                symbol: Symbol::Line { stroke: "#f39c12", width: 3.0, dashed: false },
            },
            LegendItem {
                label: "Secondary Roads",
                symbol: Symbol::Line { stroke: "#f1c40f", width: 2.5, dashed: false },
            },
            LegendItem {
                label: "Minor Roads",
                symbol: Symbol::Line { stroke: "#34495e", width: 1.5, dashed: false },
            },
            LegendItem {
                label: "Residential Roads",
                symbol: Symbol::Line { stroke: "#ecf0f1", width: 1.5, dashed: false },
            },
            LegendItem {
                label: "Footpaths",
                symbol: Symbol::Line { stroke: "#8e44ad", width: 1.5, dashed: true },
            },
            LegendItem {
                label: "Cycle Paths",
                symbol: Symbol::Line { stroke: "#27ae60", width: 2.0, dashed: true },
            },
            LegendItem { label: "Buildings", symbol: Symbol::Polygon { fill: "#bdc3c7" } },
            LegendItem {
                label: "Points of Interest",
                symbol: Symbol::Point { fill: "#e74c3c", width: 6 },
            },
            LegendItem { label: "Food & Drink", symbol: icon("restaurant-15.svg") },
            LegendItem { label: "Accommodation", symbol: icon("lodging-15.svg") },
            LegendItem { label: "Attractions", symbol: icon("attraction-15.svg") },
            LegendItem { label: "Shopping", symbol: icon("shop-15.svg") },
            LegendItem { label: "Transportation", symbol: icon("car-15.svg") },
            LegendItem { label: "Public Services", symbol: icon("toilet-15.svg") },
            LegendItem { label: "Healthcare", symbol: icon("hospital-15.svg") },
            LegendItem { label: "Religious Sites", symbol: icon("religious-christian-15.svg") },
        ];
        Self { title: "Map Legend", items }
    }

    /// Panel geometry for a map of the given pixel size: bottom-right
    /// corner, height derived from the item count.
    pub fn layout(&self, map_width: u32, map_height: u32) -> LegendLayout {
        let height = self.items.len() as u32 * ITEM_HEIGHT + PADDING * 2 + TITLE_HEIGHT;
        LegendLayout {
            x: map_width.saturating_sub(LEGEND_WIDTH + MARGIN),
            y: map_height.saturating_sub(height + MARGIN),
            width: LEGEND_WIDTH,
            height,
        }
    }

    /// Draws the legend onto the PNG at `image_path`, saving in place.
    pub fn composite_onto(&self, image_path: &Path) -> Result<()> {
        let mut img = image::open(image_path)?.to_rgba8();
        let layout = self.layout(img.width(), img.height());
        debug!(
            "Legend panel: {}x{} at ({}, {})",
            layout.width, layout.height, layout.x, layout.y
        );

        // Translucent panel with a 2 px border.
        blend_rect(
            &mut img,
            layout.x,
            layout.y,
            layout.width,
            layout.height,
            Rgba([255, 255, 255, 230]),
        );
        for inset in 0..2 {
            hollow_rect(
                &mut img,
                layout.x + inset,
                layout.y + inset,
                layout.width.saturating_sub(inset * 2),
                layout.height.saturating_sub(inset * 2),
                BORDER_COLOR,
            );
        }

        let fonts = Fonts::load();
        if fonts.is_none() {
            warn!("No usable label font found; legend drawn without text");
        }

        let title_y = layout.y + 10;
        if let Some(fonts) = &fonts {
            draw_text_mut(
                &mut img,
                TEXT_COLOR,
                (layout.x + 10) as i32,
                title_y as i32,
                PxScale::from(14.0),
                &fonts.title,
                self.title,
            );
        }

        let mut item_y = title_y + 25;
        for item in &self.items {
            let symbol_x = layout.x + 10;
            let symbol_y = item_y + (ROW_HEIGHT - SYMBOL_SIZE) / 2;
            let text_x = symbol_x + SYMBOL_SIZE + 8;

            self.draw_symbol(&mut img, &item.symbol, symbol_x, symbol_y, fonts.as_ref());

            if let Some(fonts) = &fonts {
                draw_text_mut(
                    &mut img,
                    TEXT_COLOR,
                    text_x as i32,
                    symbol_y as i32,
                    PxScale::from(11.0),
                    &fonts.text,
                    item.label,
                );
            }
            item_y += ROW_HEIGHT;
        }

        img.save(image_path)?;
        info!("Added legend overlay to {}", image_path.display());
        Ok(())
    }

    fn draw_symbol(
        &self,
        img: &mut RgbaImage,
        symbol: &Symbol,
        x: u32,
        y: u32,
        fonts: Option<&Fonts>,
    ) {
        match symbol {
            Symbol::Polygon { fill } => {
                fill_rect(img, x, y, SYMBOL_SIZE, SYMBOL_SIZE, hex_color(fill));
                hollow_rect(img, x, y, SYMBOL_SIZE, SYMBOL_SIZE, Rgba([127, 140, 141, 255]));
            }
            Symbol::Line { stroke, width, dashed } => {
                let color = hex_color(stroke);
                let thickness = (*width).max(1.0) as u32;
                let mid_y = y + SYMBOL_SIZE / 2;
                if *dashed {
                    let mut dx = 0;
                    while dx + 2 <= SYMBOL_SIZE {
                        fill_rect(img, x + dx, mid_y, 2, thickness, color);
                        dx += 4;
                    }
                } else {
                    fill_rect(img, x, mid_y, SYMBOL_SIZE, thickness, color);
                }
            }
            Symbol::Point { fill, width } => {
                let radius = (*width / 2) as i32;
                let center = (
                    (x + SYMBOL_SIZE / 2) as i32,
                    (y + SYMBOL_SIZE / 2) as i32,
                );
                draw_filled_circle_mut(img, center, radius, hex_color(fill));
            }
            Symbol::Icon { file } => {
                if file.exists() {
                    if let Err(e) = paste_svg_icon(img, file, x, y) {
                        debug!("Icon {} failed to rasterize: {e}", file.display());
                        fill_rect(img, x, y, SYMBOL_SIZE, SYMBOL_SIZE, PLACEHOLDER_COLOR);
                    }
                } else if let Some(fonts) = fonts {
                    draw_text_mut(
                        img,
                        TEXT_COLOR,
                        x as i32,
                        y as i32,
                        PxScale::from(11.0),
                        &fonts.text,
                        "?",
                    );
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegendLayout {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

struct Fonts {
    title: FontVec,
    text: FontVec,
}

const TITLE_FONT_PATHS: [&str; 2] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
];
const TEXT_FONT_PATHS: [&str; 2] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
];

impl Fonts {
    fn load() -> Option<Self> {
        let text = load_font(&TEXT_FONT_PATHS)?;
        // Fall back to the regular face for the title when bold is absent.
        let title = load_font(&TITLE_FONT_PATHS).or_else(|| load_font(&TEXT_FONT_PATHS))?;
        Some(Self { title, text })
    }
}

fn load_font(paths: &[&str]) -> Option<FontVec> {
    paths
        .iter()
        .find_map(|path| fs::read(path).ok())
        .and_then(|data| FontVec::try_from_vec(data).ok())
}

/// Parses `#rrggbb`; malformed input falls back to a neutral gray.
fn hex_color(hex: &str) -> Rgba<u8> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() == 6 {
        if let (Ok(r), Ok(g), Ok(b)) = (
            u8::from_str_radix(&digits[0..2], 16),
            u8::from_str_radix(&digits[2..4], 16),
            u8::from_str_radix(&digits[4..6], 16),
        ) {
            return Rgba([r, g, b, 255]);
        }
    }
    Rgba([189, 195, 199, 255])
}

fn fill_rect(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
    let rect = Rect::at(x as i32, y as i32).of_size(w.max(1), h.max(1));
    imageproc::drawing::draw_filled_rect_mut(img, rect, color);
}

fn hollow_rect(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
    let rect = Rect::at(x as i32, y as i32).of_size(w.max(1), h.max(1));
    imageproc::drawing::draw_hollow_rect_mut(img, rect, color);
}

/// Alpha-blends a translucent rectangle instead of overwriting pixels.
fn blend_rect(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
    let (img_w, img_h) = img.dimensions();
    for py in y..(y + h).min(img_h) {
        for px in x..(x + w).min(img_w) {
            img.get_pixel_mut(px, py).blend(&color);
        }
    }
}

fn paste_svg_icon(img: &mut RgbaImage, file: &Path, x: u32, y: u32) -> Result<()> {
    let data = fs::read(file)?;
    let tree = resvg::usvg::Tree::from_data(&data, &resvg::usvg::Options::default())
        .map_err(|e| crate::error::Error::Render(e.to_string()))?;

    let mut pixmap = resvg::tiny_skia::Pixmap::new(SYMBOL_SIZE, SYMBOL_SIZE)
        .ok_or_else(|| crate::error::Error::Render("zero-size icon pixmap".to_string()))?;
    let size = tree.size();
    let transform = resvg::tiny_skia::Transform::from_scale(
        SYMBOL_SIZE as f32 / size.width(),
        SYMBOL_SIZE as f32 / size.height(),
    );
    resvg::render(&tree, transform, &mut pixmap.as_mut());

    let (img_w, img_h) = img.dimensions();
    for (i, pixel) in pixmap.pixels().iter().enumerate() {
        let px = x + (i as u32 % SYMBOL_SIZE);
        let py = y + (i as u32 / SYMBOL_SIZE);
        if px >= img_w || py >= img_h {
            continue;
        }
        let c = pixel.demultiply();
        img.get_pixel_mut(px, py)
            .blend(&Rgba([c.red(), c.green(), c.blue(), c.alpha()]));
    }
    Ok(())
}
