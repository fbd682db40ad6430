//! FASTEM ingest: raw `{row}_{col}_0.tiff` tiles plus a `mega_field_meta_data.yaml` sidecar,
//! with tile placement coming from `positions.txt` when present and a no-overlap grid
//! otherwise.

use crate::ingest::PositionSource;
use crate::mipmap::{IngestAdaptor, write_pyramid};
use anyhow::{Context, Result, bail};
use image::GenericImageView;
use render_pipeline_core::utils::sanitize_stack_name;
use render_pipeline_derive::context;
use render_pipeline_geometry::axis::Axis;
use render_pipeline_geometry::pyramid::ImagePyramid;
use render_pipeline_geometry::tile::{AcquisitionTime, Tile, TileLayout};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use time::format_description::well_known::Iso8601;
use time::PrimitiveDateTime;

pub const SCOPE_ID: &str = "FASTEM";
pub const METADATA_FILENAME: &str = "mega_field_meta_data.yaml";
pub const POSITIONS_FILENAME: &str = "positions.txt";
pub const CORRECTIONS_DIR: &str = "corrected";

static FILENAME_RX: LazyLock<regex::Regex> = LazyLock::new(|| regex::Regex::new(r"^(\d{3})_(\d{3})_0\.tiff$").unwrap());
static POSITIONS_LINE_RX: LazyLock<regex::Regex> = LazyLock::new(|| regex::Regex::new(r"^(\d{3}_\d{3}_0\.tiff) at (\d+), (\d+)$").unwrap());

#[derive(Debug, Deserialize)]
struct MegaFieldMetadata {
	pixel_size: f64,
}

/// One raw tiff found directly inside the project directory.
#[derive(Debug, Clone)]
pub struct FastemItem {
	pub path: PathBuf,
	pub row: u32,
	pub col: u32,
}

pub struct FastemAdaptor {
	project_path: PathBuf,
	mipmap_path: PathBuf,
	positions: PositionSource,
	section_name: String,
	stack_name: String,
	is_corrected: bool,
}

impl FastemAdaptor {
	/// Builds the adaptor for `project_path`, reading `positions.txt` from the project
	/// directory (or its `corrected/` sibling) when `use_positions` is set.
	///
	/// `section_name` identifies the physical section this project directory belongs to;
	/// the uploaded stack name is derived from it (with `_corrected` appended under the
	/// `corrected/` sub-directory), sanitised to the render server's tile-name charset.
	#[context("setting up FASTEM ingest for {}", project_path.display())]
	pub fn new(project_path: impl Into<PathBuf>, mipmap_path: impl Into<PathBuf>, section_name: &str, use_positions: bool) -> Result<Self> {
		let project_path = project_path.into();
		let is_corrected = project_path.file_name().map(|n| n == CORRECTIONS_DIR).unwrap_or(false);

		let positions = if use_positions { find_positions(&project_path)? } else { PositionSource::Grid };

		let stack_name = if is_corrected { format!("{section_name}_{CORRECTIONS_DIR}") } else { section_name.to_string() };

		Ok(FastemAdaptor { project_path, mipmap_path: mipmap_path.into(), positions, section_name: section_name.to_string(), stack_name: sanitize_stack_name(&stack_name), is_corrected })
	}
}

/// Looks for `positions.txt` directly in `project_path`, falling back to its `corrected/`
/// sub-directory. Returns [`PositionSource::Grid`] if neither exists.
fn find_positions(project_path: &Path) -> Result<PositionSource> {
	let candidate = project_path.join(POSITIONS_FILENAME);
	let path = if candidate.exists() { candidate } else { project_path.join(CORRECTIONS_DIR).join(POSITIONS_FILENAME) };
	if !path.exists() {
		return Ok(PositionSource::Grid);
	}

	let body = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
	let mut positions = BTreeMap::new();
	for line in body.lines().skip(1) {
		if line.trim().is_empty() {
			continue;
		}
		let captures = POSITIONS_LINE_RX.captures(line).ok_or_else(|| anyhow::anyhow!("unparseable positions.txt line: {line:?}"))?;
		let filename = captures[1].to_string();
		let x: f64 = captures[2].parse()?;
		let y: f64 = captures[3].parse()?;
		positions.insert(filename, (x, y));
	}
	Ok(PositionSource::FromFile(positions))
}

fn read_date_time(path: &Path) -> Result<PrimitiveDateTime> {
	let file = std::fs::File::open(path).with_context(|| format!("opening {} to read DateTime tag", path.display()))?;
	let mut decoder = tiff::decoder::Decoder::new(file).with_context(|| format!("decoding tiff headers for {}", path.display()))?;
	let raw = decoder.get_tag_ascii_string(tiff::tags::Tag::DateTime).with_context(|| format!("reading DateTime tag from {}", path.display()))?;
	PrimitiveDateTime::parse(raw.trim(), &Iso8601::DEFAULT).with_context(|| format!("parsing DateTime {raw:?} from {}", path.display()))
}

/// Corrected tiffs (in the `corrected/` sub-directory) drop the `DateTime` tag; this borrows
/// it from the raw tiff one directory level up, which shares the same file name.
fn raw_counterpart(path: &Path) -> Option<PathBuf> {
	let section_dir = path.parent()?.parent()?;
	Some(section_dir.join(path.file_name()?))
}

impl IngestAdaptor for FastemAdaptor {
	type Item = FastemItem;

	#[context("scanning FASTEM project at {}", self.project_path.display())]
	fn find_files(&self) -> Result<Vec<FastemItem>> {
		let metadata_path = self.project_path.join(METADATA_FILENAME);
		if !metadata_path.exists() {
			bail!("missing {METADATA_FILENAME} in {}", self.project_path.display());
		}

		let mut items = Vec::new();
		for entry in std::fs::read_dir(&self.project_path)? {
			let entry = entry?;
			if !entry.path().is_file() {
				continue;
			}
			let name = entry.file_name();
			let Some(captures) = FILENAME_RX.captures(&name.to_string_lossy()) else { continue };
			let row: u32 = captures[1].parse()?;
			let col: u32 = captures[2].parse()?;
			items.push(FastemItem { path: entry.path(), row, col });
		}
		items.sort_by_key(|i| (i.row, i.col));
		Ok(items)
	}

	#[context("mipmapping FASTEM tile {}", item.path.display())]
	fn create_mipmaps(&self, item: &FastemItem) -> Result<Vec<Tile>> {
		let metadata_path = self.project_path.join(METADATA_FILENAME);
		let metadata: MegaFieldMetadata = serde_yaml_ng::from_str(&std::fs::read_to_string(&metadata_path)?).with_context(|| format!("parsing {}", metadata_path.display()))?;
		let pixel_size = metadata.pixel_size / 1000.0;

		let image = image::open(&item.path).with_context(|| format!("opening {}", item.path.display()))?;
		let (width, height) = (image.width(), image.height());

		let date_time_path = if self.is_corrected { raw_counterpart(&item.path).unwrap_or_else(|| item.path.clone()) } else { item.path.clone() };
		let time = read_date_time(&date_time_path)?;

		let (x, y) = match &self.positions {
			PositionSource::Grid => ((item.col * width) as f64, (item.row * height) as f64),
			PositionSource::FromFile(map) => {
				let name = item.path.file_name().expect("path from find_files always has a file name").to_string_lossy().into_owned();
				*map.get(&name).ok_or_else(|| anyhow::anyhow!("file {name} was not found in positions.txt"))?
			}
		};

		let axes = [Axis::unit(0.0, width as f64, x), Axis::unit(0.0, height as f64, y)];
		let layout = TileLayout { scope_id: SCOPE_ID.to_string(), camera_id: None, section_id: self.section_name.clone(), image_row: item.row, image_col: item.col, pixel_size, stage_x: x, stage_y: y };
		let pyramid: ImagePyramid = write_pyramid(&image, &self.mipmap_path.join(format!("{:03}x{:03}", item.row, item.col)), "tile")?;

		Ok(vec![Tile::new(&self.stack_name, 0, axes, AcquisitionTime::DateTime(time.assume_utc()), 0.0, 65535.0, pyramid, layout, vec![], width, height)])
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn parses_positions_file() {
		let dir = tempdir().unwrap();
		std::fs::write(dir.path().join(POSITIONS_FILENAME), "file x y\n000_001_0.tiff at 10, 20\n001_000_0.tiff at 30, 40\n").unwrap();
		let positions = find_positions(dir.path()).unwrap();
		let PositionSource::FromFile(map) = positions else { panic!("expected FromFile") };
		assert_eq!(map.get("000_001_0.tiff"), Some(&(10.0, 20.0)));
	}

	#[test]
	fn missing_positions_file_falls_back_to_grid() {
		let dir = tempdir().unwrap();
		let positions = find_positions(dir.path()).unwrap();
		assert!(matches!(positions, PositionSource::Grid));
	}

	#[test]
	fn rejects_unparseable_positions_line() {
		let dir = tempdir().unwrap();
		std::fs::write(dir.path().join(POSITIONS_FILENAME), "header\nnot a valid line\n").unwrap();
		assert!(find_positions(dir.path()).is_err());
	}

	#[test]
	fn finds_raw_counterpart_one_level_up() {
		let corrected = Path::new("/proj/S001/corrected/000_001_0.tiff");
		assert_eq!(raw_counterpart(corrected), Some(PathBuf::from("/proj/S001/000_001_0.tiff")));
	}
}
