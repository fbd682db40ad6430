use crate::tile::{AcquisitionTime, Tile, TileSpec};
use crate::transform::{AffineTransform, compose_all};
use anyhow::{Result, bail};
use std::collections::BTreeMap;

/// All tiles captured for one `(stack, z)` coordinate, still in per-tile local coordinates.
///
/// Two invariants are enforced on every insert: each tile's [`AcquisitionTime`] is unique
/// within the section (ties would make "newest occludes oldest" ordering ambiguous), and every
/// tile shares the section's pixel size (mixed-resolution sections cannot be montaged).
#[derive(Debug, Clone)]
pub struct Section {
	pub stack_name: String,
	pub z_value: u32,
	pixel_size: Option<f64>,
	tiles: BTreeMap<AcquisitionTime, Tile>,
}

/// A section after [`Section::seal`]: tile transforms are expressed in section-relative world
/// coordinates and every tile carries its final, zero-padded sequential ID.
#[derive(Debug, Clone)]
pub struct SealedSection {
	pub stack_name: String,
	pub z_value: u32,
	pub pixel_size: f64,
	pub top_left: (f64, f64),
	pub min_intensity: f64,
	pub max_intensity: f64,
	pub tiles: Vec<TileSpec>,
}

impl Section {
	pub fn new(stack_name: &str, z_value: u32) -> Self {
		Section { stack_name: stack_name.to_string(), z_value, pixel_size: None, tiles: BTreeMap::new() }
	}

	pub fn len(&self) -> usize {
		self.tiles.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tiles.is_empty()
	}

	pub fn add_tile(&mut self, tile: Tile) -> Result<()> {
		if self.tiles.contains_key(&tile.acquisition_time) {
			bail!("duplicate acquisition time {} in section {}/{}", tile.acquisition_time, self.stack_name, self.z_value);
		}
		let pixel_size = tile.pixel_size();
		match self.pixel_size {
			None => self.pixel_size = Some(pixel_size),
			Some(existing) if (existing - pixel_size).abs() > existing.abs() * 1e-9 + 1e-12 => {
				bail!("tile pixel size {pixel_size} does not match section pixel size {existing} in {}/{}", self.stack_name, self.z_value);
			}
			Some(_) => {}
		}
		self.tiles.insert(tile.acquisition_time.clone(), tile);
		Ok(())
	}

	/// Consumes the section, assigning sequential tile IDs in descending-acquisition-time
	/// order (the most recently reacquired tile gets ID 0 and therefore occludes older tiles
	/// at the same position when the server renders overlaps), and rewrites every tile's
	/// transform into coordinates relative to the section's own top-left corner.
	pub fn seal(self) -> Result<SealedSection> {
		if self.tiles.is_empty() {
			bail!("cannot seal empty section {}/{}", self.stack_name, self.z_value);
		}
		let pixel_size = self.pixel_size.expect("non-empty section always has a pixel size");

		let mut ordered: Vec<Tile> = self.tiles.into_values().collect();
		ordered.sort_by(|a, b| b.acquisition_time.cmp(&a.acquisition_time));

		let world_boxes: Vec<(f64, f64, f64, f64)> = ordered
			.iter()
			.map(|tile| {
				let placed = compose_all(&tile.local_transforms).then(&AffineTransform::translate(tile.axes[0].pixel_position, tile.axes[1].pixel_position));
				placed.bounding_box(tile.width as f64, tile.height as f64)
			})
			.collect();

		let top_left = world_boxes.iter().fold((f64::INFINITY, f64::INFINITY), |(mx, my), &(x0, y0, _, _)| (mx.min(x0), my.min(y0)));

		let width = ordered.len().saturating_sub(1).to_string().len().max(1);
		let min_intensity = ordered.iter().map(|t| t.min_intensity).fold(f64::INFINITY, f64::min);
		let max_intensity = ordered.iter().map(|t| t.max_intensity).fold(f64::NEG_INFINITY, f64::max);

		let tiles = ordered
			.into_iter()
			.enumerate()
			.map(|(seq, tile)| {
				let shift = AffineTransform::translate(tile.axes[0].pixel_position - top_left.0, tile.axes[1].pixel_position - top_left.1);
				let transform = compose_all(&tile.local_transforms).then(&shift);
				let (min_x, min_y, max_x, max_y) = transform.bounding_box(tile.width as f64, tile.height as f64);
				TileSpec {
					tile_id: format!("{seq:0width$}_{}_{}", tile.stack_name, tile.z_value),
					stack_name: tile.stack_name,
					z_value: tile.z_value,
					min_x,
					min_y,
					max_x,
					max_y,
					width: tile.width,
					height: tile.height,
					min_intensity: tile.min_intensity,
					max_intensity: tile.max_intensity,
					pyramid: tile.pyramid,
					layout: tile.layout,
					transforms: vec![transform],
				}
			})
			.collect();

		Ok(SealedSection { stack_name: self.stack_name, z_value: self.z_value, pixel_size, top_left, min_intensity, max_intensity, tiles })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::axis::Axis;
	use crate::pyramid::ImagePyramid;
	use crate::tile::TileLayout;

	fn layout() -> TileLayout {
		TileLayout { scope_id: "scope".into(), camera_id: None, section_id: "s0".into(), image_row: 0, image_col: 0, pixel_size: 4.0, stage_x: 0.0, stage_y: 0.0 }
	}

	fn tile_at(x: f64, y: f64, synthetic: &str) -> Tile {
		let axes = [Axis::new(0.0, 100.0, x, 4.0), Axis::new(0.0, 100.0, y, 4.0)];
		Tile::new("stack", 0, axes, AcquisitionTime::Synthetic(synthetic.to_string()), 0.0, 65535.0, ImagePyramid::new(), layout(), vec![], 100, 100)
	}

	#[test]
	fn rejects_duplicate_acquisition_time() {
		let mut section = Section::new("stack", 0);
		section.add_tile(tile_at(0.0, 0.0, "a")).unwrap();
		assert!(section.add_tile(tile_at(400.0, 0.0, "a")).is_err());
	}

	#[test]
	fn rejects_mismatched_pixel_size() {
		let mut section = Section::new("stack", 0);
		section.add_tile(tile_at(0.0, 0.0, "a")).unwrap();
		let mut odd = tile_at(400.0, 0.0, "b");
		odd.layout.pixel_size = 8.0;
		assert!(section.add_tile(odd).is_err());
	}

	#[test]
	fn seal_shifts_to_section_origin() {
		let mut section = Section::new("stack", 0);
		section.add_tile(tile_at(400.0, 0.0, "a")).unwrap();
		section.add_tile(tile_at(0.0, 0.0, "b")).unwrap();
		let sealed = section.seal().unwrap();
		assert_eq!(sealed.top_left, (0.0, 0.0));
		let min_x = sealed.tiles.iter().map(|t| t.min_x).fold(f64::INFINITY, f64::min);
		assert_eq!(min_x, 0.0);
	}

	#[test]
	fn seal_orders_ids_by_descending_acquisition_time() {
		let mut section = Section::new("stack", 0);
		section.add_tile(tile_at(0.0, 0.0, "2024-01-01")).unwrap();
		section.add_tile(tile_at(400.0, 0.0, "2024-06-01")).unwrap();
		let sealed = section.seal().unwrap();
		assert!(sealed.tiles[0].tile_id.starts_with("0_"));
		assert!(sealed.tiles[1].tile_id.starts_with("1_"));
	}
}
