use anyhow::{Context, Result};
use firebind_geo::{encode, neighbors};

pub fn geohash(latitude: f64, longitude: f64, precision: usize, with_neighbors: bool) -> Result<()> {
    let hash = encode(latitude, longitude, precision).context("Failed to encode point")?;
    println!("{}", hash);
    if with_neighbors {
        for cell in neighbors(&hash)? {
            println!("{}", cell);
        }
    }
    Ok(())
}
