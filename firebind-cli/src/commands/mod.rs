//! CLI command implementations.

pub mod geohash;
pub mod replay;

pub use geohash::geohash;
pub use replay::replay;
