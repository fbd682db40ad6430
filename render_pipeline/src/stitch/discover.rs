//! Tilepair discovery: finds the seams between neighbouring tiles in an unaligned,
//! grid-placed stack, without assuming the grid is a full rectangle.

use anyhow::{Result, bail};
use render_pipeline_client::TileBounds;
use std::collections::HashMap;

/// Which edge of `p` the seam with `q` runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	/// `p.max_x == q.min_x`: the seam runs vertically, `p` is to the left of `q`.
	Horizontal,
	/// `p.max_y == q.min_y`: the seam runs horizontally, `p` is above `q`.
	Vertical,
}

/// One seam between two grid-neighbouring tiles, in world coordinates.
#[derive(Debug, Clone)]
pub struct TilePair {
	pub p_id: String,
	pub q_id: String,
	pub match_x: f64,
	pub match_y: f64,
	pub section_id: String,
	pub direction: Direction,
}

/// Finds every horizontal and vertical tilepair among one z-level's tile bounds, and the
/// tiles' common square size.
///
/// Sections need not be full rectangles: up to `ylen` horizontally-unmatched tiles (resp.
/// `xlen` vertically-unmatched tiles) are tolerated as the edge of a ragged grid. More than
/// that means the tiles were never placed in a grid at all, which is fatal.
pub fn discover_tilepairs(bounds: &[TileBounds]) -> Result<(Vec<TilePair>, f64)> {
	let Some(first) = bounds.first() else { bail!("no tiles to discover seams between") };
	let size = first.max_x - first.min_x;
	for tile in bounds {
		if (tile.max_x - tile.min_x - size).abs() > 1e-6 || (tile.max_y - tile.min_y - size).abs() > 1e-6 {
			bail!("tile '{}' is {}x{}, expected {size}x{size}", tile.tile_id, tile.max_x - tile.min_x, tile.max_y - tile.min_y);
		}
	}

	let mut by_min_x: HashMap<u64, HashMap<u64, &str>> = HashMap::new();
	for tile in bounds {
		by_min_x.entry(tile.min_x.to_bits()).or_default().insert(tile.min_y.to_bits(), tile.tile_id.as_str());
	}

	let xlen = by_min_x.len();
	let ylen = by_min_x.values().map(HashMap::len).max().unwrap_or(0);

	let mut horizontal = Vec::new();
	let mut x_unmatched = 0usize;
	for tile in bounds {
		let (x, y) = (tile.max_x, tile.min_y);
		match by_min_x.get(&x.to_bits()).and_then(|column| column.get(&y.to_bits())) {
			Some(&matched) => horizontal.push(TilePair { p_id: tile.tile_id.clone(), q_id: matched.to_string(), match_x: x, match_y: y, section_id: tile.section_id.clone(), direction: Direction::Horizontal }),
			None => x_unmatched += 1,
		}
	}
	if horizontal.is_empty() {
		bail!("could not find any horizontal tilepairs");
	}
	if x_unmatched > 0 {
		log::info!("section is not a rectangle: {x_unmatched} tiles have no horizontal neighbour");
	}
	if x_unmatched > ylen {
		bail!("tiles are not set up as a grid: {x_unmatched} horizontally unmatched tiles exceeds ylen {ylen}");
	}

	let mut vertical = Vec::new();
	let mut y_unmatched = 0usize;
	for tile in bounds {
		let (x, y) = (tile.min_x, tile.max_y);
		match by_min_x.get(&x.to_bits()).and_then(|column| column.get(&y.to_bits())) {
			Some(&matched) => vertical.push(TilePair { p_id: tile.tile_id.clone(), q_id: matched.to_string(), match_x: x, match_y: y, section_id: tile.section_id.clone(), direction: Direction::Vertical }),
			None => y_unmatched += 1,
		}
	}
	if vertical.is_empty() {
		bail!("could not find any vertical tilepairs");
	}
	if y_unmatched > 0 {
		log::info!("section is not a rectangle: {y_unmatched} tiles have no vertical neighbour");
	}
	if y_unmatched > xlen {
		bail!("tiles are not set up as a grid: {y_unmatched} vertically unmatched tiles exceeds xlen {xlen}");
	}

	horizontal.extend(vertical);
	Ok((horizontal, size))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn tile(id: &str, min_x: f64, min_y: f64, size: f64) -> TileBounds {
		TileBounds { tile_id: id.to_string(), section_id: "s0".to_string(), min_x, min_y, max_x: min_x + size, max_y: min_y + size }
	}

	#[test]
	fn finds_all_seams_in_a_2x2_grid() {
		let bounds = vec![tile("a", 0.0, 0.0, 10.0), tile("b", 10.0, 0.0, 10.0), tile("c", 0.0, 10.0, 10.0), tile("d", 10.0, 10.0, 10.0)];
		let (pairs, size) = discover_tilepairs(&bounds).unwrap();
		assert_eq!(size, 10.0);
		assert_eq!(pairs.len(), 4);
		assert!(pairs.iter().any(|p| p.p_id == "a" && p.q_id == "b" && p.direction == Direction::Horizontal));
		assert!(pairs.iter().any(|p| p.p_id == "a" && p.q_id == "c" && p.direction == Direction::Vertical));
	}

	#[test]
	fn rejects_mismatched_tile_sizes() {
		let bounds = vec![tile("a", 0.0, 0.0, 10.0), tile("b", 10.0, 0.0, 20.0)];
		assert!(discover_tilepairs(&bounds).is_err());
	}

	#[test]
	fn rejects_a_grid_with_too_many_unmatched_tiles() {
		let bounds = vec![tile("a", 0.0, 0.0, 10.0)];
		assert!(discover_tilepairs(&bounds).is_err());
	}
}
