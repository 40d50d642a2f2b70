//! Geohash encoding
//!
//! Geohashes interleave longitude and latitude bisection bits (longitude
//! first) and spell them in a 32-character alphabet. Hashes sharing a prefix
//! lie in the same cell, which is what makes range queries over a geohash
//! field cover regions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Longest supported hash
pub const MAX_PRECISION: usize = 12;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeohashError {
    #[error("Latitude {0} is outside [-90, 90]")]
    InvalidLatitude(f64),

    #[error("Longitude {0} is outside [-180, 180]")]
    InvalidLongitude(f64),

    #[error("Precision {0} is outside 1..=12")]
    InvalidPrecision(usize),

    #[error("Invalid geohash character `{0}`")]
    InvalidCharacter(char),
}

/// Cell covered by a geohash
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Bounds {
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_latitude + self.max_latitude) / 2.0,
            (self.min_longitude + self.max_longitude) / 2.0,
        )
    }

    pub fn height(&self) -> f64 {
        self.max_latitude - self.min_latitude
    }

    pub fn width(&self) -> f64 {
        self.max_longitude - self.min_longitude
    }
}

/// Compass direction of a neighbouring cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    /// (latitude, longitude) step in cells
    fn offset(self) -> (f64, f64) {
        match self {
            Direction::North => (1.0, 0.0),
            Direction::NorthEast => (1.0, 1.0),
            Direction::East => (0.0, 1.0),
            Direction::SouthEast => (-1.0, 1.0),
            Direction::South => (-1.0, 0.0),
            Direction::SouthWest => (-1.0, -1.0),
            Direction::West => (0.0, -1.0),
            Direction::NorthWest => (1.0, -1.0),
        }
    }
}

/// Encode a point with `precision` characters
pub fn encode(latitude: f64, longitude: f64, precision: usize) -> Result<String, GeohashError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(GeohashError::InvalidLatitude(latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(GeohashError::InvalidLongitude(longitude));
    }
    if !(1..=MAX_PRECISION).contains(&precision) {
        return Err(GeohashError::InvalidPrecision(precision));
    }

    let (mut lat_lo, mut lat_hi) = (-90.0, 90.0);
    let (mut lon_lo, mut lon_hi) = (-180.0, 180.0);
    let mut hash = String::with_capacity(precision);
    let mut even = true;
    let mut bits = 0;
    let mut index = 0usize;

    while hash.len() < precision {
        let (value, lo, hi) = if even {
            (longitude, &mut lon_lo, &mut lon_hi)
        } else {
            (latitude, &mut lat_lo, &mut lat_hi)
        };
        let mid = (*lo + *hi) / 2.0;
        index <<= 1;
        if value >= mid {
            index |= 1;
            *lo = mid;
        } else {
            *hi = mid;
        }
        even = !even;

        bits += 1;
        if bits == 5 {
            hash.push(ALPHABET[index] as char);
            bits = 0;
            index = 0;
        }
    }
    Ok(hash)
}

/// Cell covered by `hash`; the empty hash covers the whole globe
pub fn decode_bounds(hash: &str) -> Result<Bounds, GeohashError> {
    let mut bounds = Bounds {
        min_latitude: -90.0,
        max_latitude: 90.0,
        min_longitude: -180.0,
        max_longitude: 180.0,
    };
    let mut even = true;

    for c in hash.chars() {
        let value = ALPHABET
            .iter()
            .position(|&a| a as char == c)
            .ok_or(GeohashError::InvalidCharacter(c))?;
        for shift in (0..5).rev() {
            let bit = (value >> shift) & 1 == 1;
            let (lo, hi) = if even {
                (&mut bounds.min_longitude, &mut bounds.max_longitude)
            } else {
                (&mut bounds.min_latitude, &mut bounds.max_latitude)
            };
            let mid = (*lo + *hi) / 2.0;
            if bit {
                *lo = mid;
            } else {
                *hi = mid;
            }
            even = !even;
        }
    }
    Ok(bounds)
}

/// Center of the cell covered by `hash`
pub fn decode(hash: &str) -> Result<(f64, f64), GeohashError> {
    decode_bounds(hash).map(|bounds| bounds.center())
}

/// Adjacent cell of the same precision
///
/// Longitude wraps around the antimeridian; there is no cell beyond a pole,
/// which yields `None`.
pub fn neighbor(hash: &str, direction: Direction) -> Result<Option<String>, GeohashError> {
    let bounds = decode_bounds(hash)?;
    let (lat, lon) = bounds.center();
    let (dlat, dlon) = direction.offset();

    let latitude = lat + dlat * bounds.height();
    if !(-90.0..=90.0).contains(&latitude) {
        return Ok(None);
    }
    let mut longitude = lon + dlon * bounds.width();
    if longitude > 180.0 {
        longitude -= 360.0;
    } else if longitude < -180.0 {
        longitude += 360.0;
    }
    encode(latitude, longitude, hash.len()).map(Some)
}

/// All existing neighbours, clockwise from north
pub fn neighbors(hash: &str) -> Result<Vec<String>, GeohashError> {
    let mut cells = Vec::with_capacity(8);
    for direction in Direction::ALL {
        if let Some(cell) = neighbor(hash, direction)? {
            cells.push(cell);
        }
    }
    Ok(cells)
}

/// Cell size in degrees (height, width) of hashes with `precision` characters
pub fn cell_size(precision: usize) -> (f64, f64) {
    let bits = 5 * precision as i32;
    let lon_bits = (bits + 1) / 2;
    let lat_bits = bits / 2;
    (180.0 / 2f64.powi(lat_bits), 360.0 / 2f64.powi(lon_bits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_points() {
        assert_eq!(encode(57.64911, 10.40744, 11).unwrap(), "u4pruydqqvj");
        assert_eq!(encode(52.205, 0.119, 7).unwrap(), "u120fxw");
        assert_eq!(encode(0.0, 0.0, 1).unwrap(), "s");
    }

    #[test]
    fn test_decode_contains_point() {
        let bounds = decode_bounds("u4pruydqqvj").unwrap();
        assert!(bounds.min_latitude <= 57.64911 && 57.64911 <= bounds.max_latitude);
        assert!(bounds.min_longitude <= 10.40744 && 10.40744 <= bounds.max_longitude);

        let (lat, lon) = decode("u120fxw").unwrap();
        assert!((lat - 52.205).abs() < 0.001);
        assert!((lon - 0.119).abs() < 0.001);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(encode(91.0, 0.0, 5), Err(GeohashError::InvalidLatitude(91.0)));
        assert_eq!(encode(0.0, 181.0, 5), Err(GeohashError::InvalidLongitude(181.0)));
        assert_eq!(encode(0.0, 0.0, 0), Err(GeohashError::InvalidPrecision(0)));
        assert_eq!(decode("ua"), Err(GeohashError::InvalidCharacter('a')));
    }

    #[test]
    fn test_neighbors() {
        assert_eq!(neighbor("u120fxw", Direction::North).unwrap().unwrap(), "u120fxy");
        assert_eq!(neighbor("u120fxw", Direction::East).unwrap().unwrap(), "u120fxx");
        assert_eq!(neighbor("u120fxw", Direction::South).unwrap().unwrap(), "u120fxq");
        assert_eq!(neighbor("u120fxw", Direction::West).unwrap().unwrap(), "u120fxt");
        assert_eq!(neighbors("u120fxw").unwrap().len(), 8);
    }

    #[test]
    fn test_polar_and_antimeridian_neighbors() {
        // Top row has nothing to the north
        assert_eq!(neighbor("b", Direction::North).unwrap(), None);
        assert_eq!(neighbors("b").unwrap().len(), 5);

        let east = neighbor("x", Direction::East).unwrap().unwrap();
        let (_, lon) = decode(&east).unwrap();
        assert!(lon < 0.0);
    }

    #[test]
    fn test_cell_size() {
        assert_eq!(cell_size(1), (45.0, 45.0));
        assert_eq!(cell_size(2), (45.0 / 8.0, 45.0 / 4.0));
    }
}
