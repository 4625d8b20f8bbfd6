//! Vector data acquisition from the Overpass API, plus quality analysis of
//! the downloaded OSM XML.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, error, info, warn};

use crate::bounds::BoundingBox;
use crate::error::Result;

pub const OVERPASS_URL: &str = "http://overpass-api.de/api/interpreter";

/// Server-side evaluation timeout baked into the query, in seconds.
const OVERPASS_TIMEOUT_S: u32 = 300;
/// Response size ceiling baked into the query (1 GiB).
const OVERPASS_MAXSIZE: u64 = 1_073_741_824;
/// Responses smaller than this cannot be a usable extract.
const MIN_RESPONSE_BYTES: usize = 500;

/// Bounded-area query for nodes, ways, relations and their dependents.
/// The trailing recursion is what guarantees complete way geometry.
pub fn overpass_query(bbox: &BoundingBox) -> String {
    let extent = format!(
        "{},{},{},{}",
        bbox.south, bbox.west, bbox.north, bbox.east
    );
    format!(
        "[out:xml][timeout:{OVERPASS_TIMEOUT_S}][maxsize:{OVERPASS_MAXSIZE}];\n\
         (\n  node({extent});\n  way({extent});\n  relation({extent});\n);\n\
         (._;>;);\nout meta;"
    )
}

/// Downloads raw OSM data for `bbox` into `dest` from the Overpass endpoint
/// at `url`.
///
/// Returns `Ok(false)` on any reported failure (non-200 status, transport
/// error, implausibly small body); retry policy belongs to the caller.
pub fn fetch_osm_data(
    agent: &ureq::Agent,
    url: &str,
    bbox: &BoundingBox,
    dest: &Path,
) -> Result<bool> {
    info!("Downloading OSM data from Overpass API");
    info!(
        "  Query area: {:.4},{:.4} to {:.4},{:.4}",
        bbox.south, bbox.west, bbox.north, bbox.east
    );

    let response = match agent.post(url).send_string(&overpass_query(bbox)) {
        Ok(response) => response,
        Err(ureq::Error::Status(code, response)) => {
            error!("Failed to download OSM data: HTTP {code}");
            if let Ok(body) = response.into_string() {
                let detail: String = body.chars().take(200).collect();
                info!("  Error details: {detail}");
            }
            return Ok(false);
        }
        Err(e) => {
            error!("Failed to download OSM data: {e}");
            return Ok(false);
        }
    };

    let mut body = Vec::new();
    response.into_reader().read_to_end(&mut body)?;

    if !body.windows(4).any(|w| w == b"<osm") || body.len() <= MIN_RESPONSE_BYTES {
        error!("Invalid OSM data received (size: {} bytes)", body.len());
        return Ok(false);
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dest, &body)?;
    info!(
        "OSM data saved: {} ({:.1} KB)",
        dest.display(),
        body.len() as f64 / 1024.0
    );
    Ok(true)
}

/// Quality analysis of a downloaded OSM extract.
#[derive(Debug, Default)]
pub struct QualityReport {
    pub nodes: usize,
    pub ways: usize,
    pub relations: usize,
    pub nodes_with_coords: usize,
    pub tagged_features: usize,
    pub feature_kinds: BTreeMap<String, BTreeSet<String>>,
}

impl QualityReport {
    pub fn coordinate_completeness(&self) -> f64 {
        if self.nodes == 0 {
            0.0
        } else {
            self.nodes_with_coords as f64 / self.nodes as f64 * 100.0
        }
    }

    /// 0-100 score over element counts, coordinate completeness and tag
    /// richness.
    pub fn score(&self) -> u32 {
        let mut score = 0;
        score += match self.nodes {
            n if n > 100 => 25,
            n if n > 10 => 10,
            _ => 0,
        };
        score += match self.ways {
            w if w > 10 => 25,
            w if w > 1 => 10,
            _ => 0,
        };
        let completeness = self.coordinate_completeness();
        score += if completeness > 95.0 {
            25
        } else if completeness > 80.0 {
            15
        } else {
            0
        };
        score += match self.tagged_features {
            t if t > 50 => 25,
            t if t > 10 => 15,
            _ => 0,
        };
        score
    }

    pub fn is_acceptable(&self) -> bool {
        self.score() >= 25
    }
}

/// Parses `osm_file` and reports counts, coordinate completeness and tag
/// diversity. Analysis errors surface as `Ok(None)` with a log line so the
/// pipeline can decide whether to continue on degraded data.
pub fn validate_osm_quality(osm_file: &Path) -> Result<Option<QualityReport>> {
    info!("Analyzing OSM data quality: {}", osm_file.display());

    let mut reader = match Reader::from_file(osm_file) {
        Ok(reader) => reader,
        Err(e) => {
            info!("  Error analyzing OSM data: {e}");
            return Ok(None);
        }
    };
    reader.config_mut().trim_text(true);

    let mut report = QualityReport::default();
    let mut buf = Vec::new();

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                info!("  Error analyzing OSM data: {e}");
                return Ok(None);
            }
        };
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"node" => {
                    report.nodes += 1;
                    let mut has_lat = false;
                    let mut has_lon = false;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"lat" => has_lat = true,
                            b"lon" => has_lon = true,
                            _ => {}
                        }
                    }
                    if has_lat && has_lon {
                        report.nodes_with_coords += 1;
                    }
                }
                b"way" => report.ways += 1,
                b"relation" => report.relations += 1,
                b"tag" => {
                    let mut key = None;
                    let mut value = None;
                    for attr in e.attributes().flatten() {
                        let text = String::from_utf8_lossy(&attr.value).into_owned();
                        match attr.key.as_ref() {
                            b"k" => key = Some(text),
                            b"v" => value = Some(text),
                            _ => {}
                        }
                    }
                    if let (Some(key), Some(value)) = (key, value) {
                        if !key.is_empty() && !value.is_empty() {
                            report.tagged_features += 1;
                            report.feature_kinds.entry(key).or_default().insert(value);
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    log_report(&report);
    Ok(Some(report))
}

fn log_report(report: &QualityReport) {
    info!("  Nodes: {}", report.nodes);
    info!("  Ways: {}", report.ways);
    info!("  Relations: {}", report.relations);
    info!(
        "  Coordinate completeness: {:.1}% ({}/{})",
        report.coordinate_completeness(),
        report.nodes_with_coords,
        report.nodes
    );
    info!("  Tagged features: {}", report.tagged_features);
    info!("  Feature types: {} categories", report.feature_kinds.len());

    let mut kinds: Vec<_> = report.feature_kinds.iter().collect();
    kinds.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    for (key, values) in kinds.into_iter().take(5) {
        debug!("    {key}: {} different values", values.len());
    }

    let score = report.score();
    info!("  Quality score: {score}/100");
    match score {
        s if s >= 75 => info!("  Excellent data quality"),
        s if s >= 50 => info!("  Good data quality"),
        s if s >= 25 => warn!("  Fair data quality - may have limited features"),
        _ => warn!("  Poor data quality - very limited data"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RICH_OSM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="1" lat="57.29" lon="-2.88"><tag k="amenity" v="pub"/></node>
  <node id="2" lat="57.30" lon="-2.87"/>
  <node id="3" lat="57.28" lon="-2.89"/>
  <way id="10"><nd ref="1"/><nd ref="2"/><tag k="highway" v="primary"/></way>
  <way id="11"><nd ref="2"/><nd ref="3"/><tag k="highway" v="footway"/></way>
  <relation id="20"><member type="way" ref="10" role=""/><tag k="route" v="hiking"/></relation>
</osm>"#;

    #[test]
    fn test_overpass_query_shape() {
        let bbox = BoundingBox {
            south: 57.2,
            north: 57.4,
            west: -3.0,
            east: -2.8,
        };
        let query = overpass_query(&bbox);
        assert!(query.contains("[out:xml][timeout:300][maxsize:1073741824]"));
        assert!(query.contains("node(57.2,-3,57.4,-2.8)"));
        assert!(query.contains("(._;>;);"));
        assert!(query.ends_with("out meta;"));
    }

    #[test]
    fn test_quality_report_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("area.osm");
        fs::write(&path, RICH_OSM).unwrap();

        let report = validate_osm_quality(&path).unwrap().unwrap();
        assert_eq!(report.nodes, 3);
        assert_eq!(report.ways, 2);
        assert_eq!(report.relations, 1);
        assert_eq!(report.nodes_with_coords, 3);
        assert_eq!(report.tagged_features, 4);
        assert_eq!(report.feature_kinds["highway"].len(), 2);
        assert!((report.coordinate_completeness() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quality_score_thresholds() {
        let empty = QualityReport::default();
        assert_eq!(empty.score(), 0);
        assert!(!empty.is_acceptable());

        let sparse = QualityReport {
            nodes: 50,
            ways: 5,
            relations: 0,
            nodes_with_coords: 50,
            tagged_features: 5,
            feature_kinds: BTreeMap::new(),
        };
        // 10 (nodes) + 10 (ways) + 25 (coords) = 45
        assert_eq!(sparse.score(), 45);
        assert!(sparse.is_acceptable());
    }

    #[test]
    fn test_unparseable_file_reports_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.osm");
        fs::write(&path, "<osm><node lat=").unwrap();
        // Parse failure is diagnostic, not fatal.
        let report = validate_osm_quality(&path).unwrap();
        assert!(report.is_none() || !report.unwrap().is_acceptable());
    }
}
