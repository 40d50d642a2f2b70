//! Map regions and their geohash coverage

use crate::geohash::{cell_size, encode, MAX_PRECISION};
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Rectangle around a center point, spans in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoRegion {
    pub latitude: f64,
    pub longitude: f64,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl GeoRegion {
    pub fn new(latitude: f64, longitude: f64, latitude_delta: f64, longitude_delta: f64) -> Self {
        Self {
            latitude,
            longitude,
            latitude_delta: latitude_delta.abs(),
            longitude_delta: longitude_delta.abs(),
        }
    }

    pub fn min_latitude(&self) -> f64 {
        (self.latitude - self.latitude_delta / 2.0).max(-90.0)
    }

    pub fn max_latitude(&self) -> f64 {
        (self.latitude + self.latitude_delta / 2.0).min(90.0)
    }

    pub fn min_longitude(&self) -> f64 {
        (self.longitude - self.longitude_delta / 2.0).max(-180.0)
    }

    pub fn max_longitude(&self) -> f64 {
        (self.longitude + self.longitude_delta / 2.0).min(180.0)
    }

    /// Whether the point lies inside the region, edges included
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_latitude()..=self.max_latitude()).contains(&latitude)
            && (self.min_longitude()..=self.max_longitude()).contains(&longitude)
    }
}

/// Half-open range `start <= hash < end` of geohash strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeohashRange {
    pub start: String,
    pub end: String,
}

impl GeohashRange {
    /// Every hash starting with `prefix`
    pub fn prefix(prefix: &str) -> Self {
        Self {
            start: prefix.to_string(),
            // `~` sorts after every geohash character
            end: format!("{prefix}~"),
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.start.as_str() <= hash && hash < self.end.as_str()
    }
}

/// Geohash ranges that together cover `region`
///
/// Uses the finest precision whose cells are at least as large as the
/// region, so at most four cells are needed.
pub fn geohash_ranges(region: &GeoRegion) -> Vec<GeohashRange> {
    let lat_span = region.max_latitude() - region.min_latitude();
    let lon_span = region.max_longitude() - region.min_longitude();
    let precision = (1..=MAX_PRECISION).rev().find(|&precision| {
        let (height, width) = cell_size(precision);
        height >= lat_span && width >= lon_span
    });
    let Some(precision) = precision else {
        return vec![GeohashRange::prefix("")];
    };

    let corners = [
        (region.min_latitude(), region.min_longitude()),
        (region.min_latitude(), region.max_longitude()),
        (region.max_latitude(), region.min_longitude()),
        (region.max_latitude(), region.max_longitude()),
    ];
    let mut cells: Vec<String> = corners
        .iter()
        .filter_map(|&(lat, lon)| encode(lat, lon, precision).ok())
        .collect();
    cells.sort();
    cells.dedup();
    cells.iter().map(|cell| GeohashRange::prefix(cell)).collect()
}

/// Great-circle distance in kilometers
pub fn distance_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains() {
        let region = GeoRegion::new(52.0, 4.0, 2.0, 4.0);
        assert!(region.contains(52.0, 4.0));
        assert!(region.contains(53.0, 6.0));
        assert!(!region.contains(53.1, 4.0));
        assert!(!region.contains(52.0, 1.9));
    }

    #[test]
    fn test_ranges_cover_region() {
        let region = GeoRegion::new(52.37, 4.89, 0.05, 0.05);
        let ranges = geohash_ranges(&region);
        assert!(!ranges.is_empty() && ranges.len() <= 4);

        for (lat, lon) in [
            (52.37, 4.89),
            (region.min_latitude(), region.min_longitude()),
            (region.max_latitude(), region.max_longitude()),
            (52.36, 4.91),
        ] {
            let hash = encode(lat, lon, 10).unwrap();
            assert!(
                ranges.iter().any(|range| range.contains(&hash)),
                "{hash} not covered"
            );
        }
    }

    #[test]
    fn test_huge_region_covers_globe() {
        let region = GeoRegion::new(0.0, 0.0, 180.0, 360.0);
        assert_eq!(geohash_ranges(&region), vec![GeohashRange::prefix("")]);
        assert!(geohash_ranges(&region)[0].contains("zzzz"));
    }

    #[test]
    fn test_distance() {
        // Amsterdam to Paris
        let km = distance_km((52.3676, 4.9041), (48.8566, 2.3522));
        assert!((km - 430.0).abs() < 5.0, "{km}");
        assert_eq!(distance_km((10.0, 10.0), (10.0, 10.0)), 0.0);
    }
}
