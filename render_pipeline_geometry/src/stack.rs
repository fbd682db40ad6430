use crate::section::{Section, SealedSection};
use crate::tile::TileSpec;
use anyhow::{Result, bail};
use std::collections::BTreeMap;

/// All sections captured for one named stack, keyed by z-value while tiles are still being
/// accumulated.
#[derive(Debug, Clone)]
pub struct Stack {
	pub name: String,
	sections: BTreeMap<u32, Section>,
}

/// A stack after every section has been sealed: a uniform pixel size across sections is
/// required (invariant 3) so a single stack-level `pixelSize` can be reported to the server.
#[derive(Debug, Clone)]
pub struct SealedStack {
	pub name: String,
	pub pixel_size: f64,
	pub sections: Vec<SealedSection>,
	pub tile_specs: Vec<TileSpec>,
}

impl Stack {
	pub fn new(name: &str) -> Self {
		Stack { name: name.to_string(), sections: BTreeMap::new() }
	}

	/// Returns the section for `z_value`, creating an empty one on first access.
	pub fn section_mut(&mut self, z_value: u32) -> &mut Section {
		self.sections.entry(z_value).or_insert_with(|| Section::new(&self.name, z_value))
	}

	pub fn z_values(&self) -> impl Iterator<Item = u32> + '_ {
		self.sections.keys().copied()
	}

	pub fn len(&self) -> usize {
		self.sections.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sections.is_empty()
	}

	pub fn seal(self) -> Result<SealedStack> {
		if self.sections.is_empty() {
			bail!("cannot seal empty stack {}", self.name);
		}
		let mut pixel_size: Option<f64> = None;
		let mut sections = Vec::with_capacity(self.sections.len());
		for (_, section) in self.sections {
			let sealed = section.seal()?;
			match pixel_size {
				None => pixel_size = Some(sealed.pixel_size),
				Some(existing) if (existing - sealed.pixel_size).abs() > existing.abs() * 1e-9 + 1e-12 => {
					bail!("section z={} pixel size {} does not match stack {} pixel size {existing}", sealed.z_value, sealed.pixel_size, self.name);
				}
				Some(_) => {}
			}
			sections.push(sealed);
		}
		sections.sort_by_key(|s| s.z_value);
		let tile_specs = sections.iter().flat_map(|s| s.tiles.iter().cloned()).collect();
		Ok(SealedStack { name: self.name, pixel_size: pixel_size.expect("non-empty stack always has a pixel size"), sections, tile_specs })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::axis::Axis;
	use crate::pyramid::ImagePyramid;
	use crate::tile::{AcquisitionTime, Tile, TileLayout};

	fn layout(pixel_size: f64) -> TileLayout {
		TileLayout { scope_id: "scope".into(), camera_id: None, section_id: "s0".into(), image_row: 0, image_col: 0, pixel_size, stage_x: 0.0, stage_y: 0.0 }
	}

	fn tile(pixel_size: f64, synthetic: &str) -> Tile {
		let axes = [Axis::new(0.0, 100.0, 0.0, pixel_size), Axis::new(0.0, 100.0, 0.0, pixel_size)];
		Tile::new("stack", 0, axes, AcquisitionTime::Synthetic(synthetic.to_string()), 0.0, 65535.0, ImagePyramid::new(), layout(pixel_size), vec![], 100, 100)
	}

	#[test]
	fn rejects_mismatched_pixel_size_across_sections() {
		let mut stack = Stack::new("stack");
		stack.section_mut(0).add_tile(tile(4.0, "a")).unwrap();
		stack.section_mut(1).add_tile(tile(8.0, "b")).unwrap();
		assert!(stack.seal().is_err());
	}

	#[test]
	fn seals_sections_sorted_by_z() {
		let mut stack = Stack::new("stack");
		stack.section_mut(2).add_tile(tile(4.0, "a")).unwrap();
		stack.section_mut(0).add_tile(tile(4.0, "b")).unwrap();
		let sealed = stack.seal().unwrap();
		let zs: Vec<u32> = sealed.sections.iter().map(|s| s.z_value).collect();
		assert_eq!(zs, vec![0, 2]);
		assert_eq!(sealed.tile_specs.len(), 2);
	}
}
