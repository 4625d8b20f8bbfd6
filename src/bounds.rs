//! Geographic bounding boxes and the flat-earth arithmetic used to derive
//! them from an area's center point and coverage.

/// Rectangular geographic extent in WGS84 decimal degrees.
///
/// Invariant: `south < north` and `west < east` for any box produced by
/// [`BoundingBox::around`] with positive coverage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

const KM_PER_DEGREE: f64 = 111.32;

impl BoundingBox {
    /// Computes the box covering `width_km` x `height_km` around a center
    /// point, using a local flat-earth approximation (1 degree of latitude is
    /// 111.32 km; longitude is scaled by the cosine of the center latitude).
    ///
    /// No input validation is performed. At `center_lat = ±90` the cosine
    /// term goes to zero and the longitude span diverges; callers must keep
    /// centers away from the poles. The function itself never panics.
    pub fn around(center_lat: f64, center_lon: f64, width_km: f64, height_km: f64) -> Self {
        let lat_deg_per_km = 1.0 / KM_PER_DEGREE;
        let lon_deg_per_km = 1.0 / (KM_PER_DEGREE * center_lat.to_radians().cos().abs());

        let half_height_deg = (height_km / 2.0) * lat_deg_per_km;
        let half_width_deg = (width_km / 2.0) * lon_deg_per_km;

        Self {
            south: center_lat - half_height_deg,
            north: center_lat + half_height_deg,
            west: center_lon - half_width_deg,
            east: center_lon + half_width_deg,
        }
    }

    /// Expands the box by `buffer_km` on every side. Used for elevation
    /// fetches so hillshading stays clean at the map edges.
    pub fn buffered(&self, buffer_km: f64) -> Self {
        let mid_lat = (self.north + self.south) / 2.0;
        let lat_buffer = buffer_km / 111.0;
        let lon_buffer = buffer_km / (111.0 * mid_lat.to_radians().cos());

        Self {
            south: self.south - lat_buffer,
            north: self.north + lat_buffer,
            west: self.west - lon_buffer,
            east: self.east + lon_buffer,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.north + self.south) / 2.0, (self.east + self.west) / 2.0)
    }

    fn intersects(&self, other: &BoundingBox) -> bool {
        self.south < other.north
            && self.north > other.south
            && self.west < other.east
            && self.east > other.west
    }

    /// True if any part of the box lies within the UK.
    pub fn intersects_uk(&self) -> bool {
        const UK: BoundingBox = BoundingBox {
            south: 49.5,
            north: 61.0,
            west: -8.5,
            east: 2.0,
        };
        self.intersects(&UK)
    }

    /// True if any part of the box lies within EU-DEM coverage (a superset of
    /// the UK).
    pub fn intersects_europe(&self) -> bool {
        const EUROPE: BoundingBox = BoundingBox {
            south: 34.0,
            north: 72.0,
            west: -25.0,
            east: 45.0,
        };
        self.intersects(&EUROPE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_centered_on_input() {
        let bbox = BoundingBox::around(57.29, -2.88, 10.0, 15.0);

        assert!((bbox.south + bbox.north) / 2.0 - 57.29 < 1e-9);
        assert!(((bbox.west + bbox.east) / 2.0 - -2.88).abs() < 1e-9);
        assert!(bbox.north > bbox.south);
        assert!(bbox.east > bbox.west);
    }

    #[test]
    fn test_bbox_latitude_span_matches_coverage() {
        let bbox = BoundingBox::around(57.0, -2.5, 10.0, 15.0);
        let span_km = (bbox.north - bbox.south) * KM_PER_DEGREE;
        assert!((span_km - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_bbox_longitude_widens_toward_poles() {
        let equator = BoundingBox::around(0.0, 0.0, 10.0, 10.0);
        let north = BoundingBox::around(60.0, 0.0, 10.0, 10.0);
        assert!(north.east - north.west > equator.east - equator.west);
    }

    #[test]
    fn test_bbox_at_pole_does_not_panic() {
        // cos(90 deg) underflows to ~0: the longitude span blows up, which
        // is the documented behavior. The call must still succeed.
        let bbox = BoundingBox::around(90.0, 0.0, 10.0, 10.0);
        assert!(bbox.north > bbox.south);
        assert!(bbox.east > bbox.west || bbox.east.is_infinite());
    }

    #[test]
    fn test_buffered_strictly_contains() {
        let bbox = BoundingBox::around(57.0, -2.5, 10.0, 10.0);
        let buffered = bbox.buffered(1.0);
        assert!(buffered.south < bbox.south);
        assert!(buffered.north > bbox.north);
        assert!(buffered.west < bbox.west);
        assert!(buffered.east > bbox.east);
    }

    #[test]
    fn test_region_predicates() {
        let aberdeenshire = BoundingBox::around(57.29, -2.88, 10.0, 10.0);
        assert!(aberdeenshire.intersects_uk());
        assert!(aberdeenshire.intersects_europe());

        let alps = BoundingBox::around(46.5, 9.8, 10.0, 10.0);
        assert!(!alps.intersects_uk());
        assert!(alps.intersects_europe());

        let rockies = BoundingBox::around(39.6, -105.9, 10.0, 10.0);
        assert!(!rockies.intersects_uk());
        assert!(!rockies.intersects_europe());
    }
}
