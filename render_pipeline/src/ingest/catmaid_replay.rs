//! Re-imports an existing CATMAID tile tree (`{z}/{row}_{col}_0.png`) as a fresh stack, used
//! to bring a previously exported dataset back into the render server for further work.

use crate::mipmap::{IngestAdaptor, write_pyramid};
use anyhow::{Context, Result};
use image::GenericImageView;
use render_pipeline_derive::context;
use render_pipeline_geometry::axis::Axis;
use render_pipeline_geometry::pyramid::ImagePyramid;
use render_pipeline_geometry::tile::{AcquisitionTime, Tile, TileLayout};
use std::path::PathBuf;

const FILENAME_PADDING: usize = 3;

/// One `{row}_{col}_0.png` file discovered under a `{z}/` directory.
#[derive(Debug, Clone)]
pub struct CatmaidReplayItem {
	pub path: PathBuf,
	pub row: u32,
	pub col: u32,
	pub z: u32,
}

pub struct CatmaidReplayAdaptor {
	project_path: PathBuf,
	mipmap_path: PathBuf,
	stack_name: String,
}

impl CatmaidReplayAdaptor {
	pub fn new(project_path: impl Into<PathBuf>, mipmap_path: impl Into<PathBuf>) -> Self {
		let project_path = project_path.into();
		let stack_name = project_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
		CatmaidReplayAdaptor { project_path, mipmap_path: mipmap_path.into(), stack_name }
	}
}

fn parse_filename(name: &str) -> Option<(u32, u32)> {
	let stripped = name.strip_suffix("_0.png")?;
	let (row, col) = stripped.split_once('_')?;
	Some((row.parse().ok()?, col.parse().ok()?))
}

impl IngestAdaptor for CatmaidReplayAdaptor {
	type Item = CatmaidReplayItem;

	#[context("scanning CATMAID tree at {}", self.project_path.display())]
	fn find_files(&self) -> Result<Vec<CatmaidReplayItem>> {
		let mut items = Vec::new();
		for z_entry in std::fs::read_dir(&self.project_path)? {
			let z_entry = z_entry?;
			let Ok(z) = z_entry.file_name().to_string_lossy().parse::<u32>() else { continue };
			if !z_entry.path().is_dir() {
				continue;
			}
			for file_entry in std::fs::read_dir(z_entry.path())? {
				let file_entry = file_entry?;
				if !file_entry.path().is_file() {
					continue;
				}
				let name = file_entry.file_name();
				let Some((row, col)) = parse_filename(&name.to_string_lossy()) else { continue };
				items.push(CatmaidReplayItem { path: file_entry.path(), row, col, z });
			}
		}
		items.sort_by_key(|i| (i.z, i.row, i.col));
		Ok(items)
	}

	#[context("replaying CATMAID tile {}", item.path.display())]
	fn create_mipmaps(&self, item: &CatmaidReplayItem) -> Result<Vec<Tile>> {
		let image = image::open(&item.path).with_context(|| format!("opening {}", item.path.display()))?;
		let (width, height) = (image.width(), image.height());

		let output_dir = self.mipmap_path.join(item.z.to_string()).join(format!("{:0p$}x{:0p$}", item.row, item.col, p = FILENAME_PADDING));
		let pyramid: ImagePyramid = write_pyramid(&image, &output_dir, "tile")?;

		let axes = [Axis::unit(0.0, width as f64, (item.col * width) as f64), Axis::unit(0.0, height as f64, (item.row * height) as f64)];
		let layout = TileLayout {
			scope_id: String::new(),
			camera_id: None,
			section_id: self.stack_name.clone(),
			image_row: item.row,
			image_col: item.col,
			pixel_size: 1.0,
			stage_x: 0.0,
			stage_y: 0.0,
		};
		let acquisition_time = AcquisitionTime::Synthetic(format!("{}_{}_{}", item.z, item.row, item.col));
		Ok(vec![Tile::new(&self.stack_name, item.z, axes, acquisition_time, 0.0, 255.0, pyramid, layout, vec![], width, height)])
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::Path;
	use tempfile::tempdir;

	fn write_png(path: &Path, width: u32, height: u32) {
		std::fs::create_dir_all(path.parent().unwrap()).unwrap();
		let image = image::GrayImage::from_pixel(width, height, image::Luma([128]));
		image::DynamicImage::ImageLuma8(image).save(path).unwrap();
	}

	#[test]
	fn parses_row_col_from_filename() {
		assert_eq!(parse_filename("003_007_0.png"), Some((3, 7)));
		assert_eq!(parse_filename("not_a_tile.png"), None);
	}

	#[test]
	fn finds_files_under_z_directories() {
		let project = tempdir().unwrap();
		write_png(&project.path().join("0/000_000_0.png"), 64, 64);
		write_png(&project.path().join("1/000_001_0.png"), 64, 64);
		let mipmaps = tempdir().unwrap();
		let adaptor = CatmaidReplayAdaptor::new(project.path(), mipmaps.path());
		let items = adaptor.find_files().unwrap();
		assert_eq!(items.len(), 2);
	}

	#[test]
	fn creates_a_tile_with_grid_placement() {
		let project = tempdir().unwrap();
		write_png(&project.path().join("0/002_003_0.png"), 32, 32);
		let mipmaps = tempdir().unwrap();
		let adaptor = CatmaidReplayAdaptor::new(project.path(), mipmaps.path());
		let items = adaptor.find_files().unwrap();
		let tiles = adaptor.create_mipmaps(&items[0]).unwrap();
		assert_eq!(tiles.len(), 1);
		assert_eq!(tiles[0].axes[0].position, 3.0 * 32.0);
		assert_eq!(tiles[0].axes[1].position, 2.0 * 32.0);
	}
}
