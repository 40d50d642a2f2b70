//! # firebind-geo
//!
//! Region queries over documents carrying a geohash field.
//!
//! - [`geohash`]: encoding, decoding and neighbouring cells
//! - [`region`]: map regions, the geohash ranges covering them, distances
//! - [`query`]: [`GeoQuery`], an aggregate collection with one partition per
//!   covering range

pub mod geohash;
pub mod query;
pub mod region;

pub use geohash::{decode, decode_bounds, encode, neighbors, Bounds, Direction, GeohashError};
pub use query::{GeoQuery, GeoQueryOptions, RegionFilter};
pub use region::{distance_km, geohash_ranges, GeoRegion, GeohashRange};
