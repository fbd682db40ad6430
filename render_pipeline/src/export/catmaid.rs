//! CATMAID tile-tree export: box-renders a stack z-level by z-level through an external
//! client, resorts the result into a flat `{z}/{row}_{col}_{zoom}.{fmt}` tree, generates a
//! content-cropped thumbnail per section, and writes a `project.yaml` describing the whole
//! set of exported stacks.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use render_pipeline_client::{RenderClient, StackBounds};
use render_pipeline_core::progress::get_progress_bar;
use render_pipeline_derive::context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

const MAX_WORKERS: usize = 15;

/// Per-stack parameters for one CATMAID box-render invocation, mirroring
/// `CatmaidBoxesParameters`'s `to_java_args`.
#[derive(Debug, Clone)]
pub struct CatmaidExportParams {
	pub stack: String,
	pub root_directory: PathBuf,
	pub width: u32,
	pub height: u32,
	pub max_level: u32,
	pub fmt: String,
	pub host: String,
	pub owner: String,
	pub project: String,
}

/// `max_level` such that the full section fits in view when fully zoomed out: the smallest
/// zoom level whose tile covers the stack's largest world-space dimension.
pub fn compute_max_level(bounds: &StackBounds, tile_size: u32) -> u32 {
	let widest = (bounds.max_x - bounds.min_x).max(bounds.max_y - bounds.min_y);
	let ratio = widest / f64::from(tile_size);
	if ratio <= 1.0 {
		return 0;
	}
	ratio.log2().ceil() as u32
}

/// Abstracts over the render-ws box-render client (a Java tool with no Rust binding): one
/// call renders every tile of one z-level at every zoom level down to `params.max_level`.
#[async_trait]
pub trait BoxRenderer: Send + Sync {
	async fn render_boxes(&self, z: f64, params: &CatmaidExportParams) -> Result<()>;
}

/// Shells out to a `render_catmaid_boxes`-style client script, passing it the z-level and
/// the export parameters as positional arguments.
#[derive(Debug, Clone)]
pub struct ExternalBoxRenderer {
	executable: PathBuf,
}

impl ExternalBoxRenderer {
	pub fn new(executable: impl Into<PathBuf>) -> Self {
		ExternalBoxRenderer { executable: executable.into() }
	}
}

#[async_trait]
impl BoxRenderer for ExternalBoxRenderer {
	async fn render_boxes(&self, z: f64, params: &CatmaidExportParams) -> Result<()> {
		let status = Command::new(&self.executable)
			.arg(format!("{z:.0}"))
			.arg("--stack")
			.arg(&params.stack)
			.arg("--rootDirectory")
			.arg(&params.root_directory)
			.arg("--width")
			.arg(params.width.to_string())
			.arg("--height")
			.arg(params.height.to_string())
			.arg("--maxLevel")
			.arg(params.max_level.to_string())
			.arg("--format")
			.arg(&params.fmt)
			.arg("--baseDataUrl")
			.arg(&params.host)
			.arg("--owner")
			.arg(&params.owner)
			.arg("--project")
			.arg(&params.project)
			.stdin(Stdio::null())
			.status()
			.await
			.with_context(|| format!("spawning box-render client {:?}", self.executable))?;
		if !status.success() {
			bail!("box-render client {:?} exited with {status} for z={z}", self.executable);
		}
		Ok(())
	}
}

/// Exports `stacks` from `client`'s project into a CATMAID tile tree rooted at
/// `catmaid_dir`, returning the path of the `project.yaml` it wrote.
#[context("exporting {} stack(s) to CATMAID format in {}", stacks.len(), catmaid_dir.display())]
#[allow(clippy::too_many_arguments)]
pub async fn export_catmaid(client: &RenderClient, project: &str, stacks: &[String], catmaid_dir: &Path, tile_size: u32, fmt: &str, parallel: usize, renderer: &dyn BoxRenderer) -> Result<PathBuf> {
	if stacks.is_empty() {
		bail!("no stacks given to export");
	}

	let mut max_level = 0;
	let mut z_values_by_stack = Vec::with_capacity(stacks.len());
	for stack in stacks {
		let bounds = client.get_stack_bounds(stack).await?;
		max_level = max_level.max(compute_max_level(&bounds, tile_size));
		let z_values = client.get_z_values(stack).await?;
		z_values_by_stack.push(z_values);
	}
	log::info!("exporting {} stack(s) to CATMAID at max_level={max_level}", stacks.len());

	let mut jobs = Vec::new();
	for (stack, z_values) in stacks.iter().zip(&z_values_by_stack) {
		let params = Arc::new(CatmaidExportParams {
			stack: stack.clone(),
			root_directory: catmaid_dir.to_path_buf(),
			width: tile_size,
			height: tile_size,
			max_level,
			fmt: fmt.to_string(),
			host: client.host().to_string(),
			owner: client.owner().to_string(),
			project: project.to_string(),
		});
		for &z in z_values {
			jobs.push((params.clone(), z));
		}
	}

	let total = jobs.len() as u64;
	let mut progress = get_progress_bar("rendering CATMAID boxes", total);
	let concurrency = parallel.min(MAX_WORKERS).max(1);
	let mut results = stream::iter(jobs.iter().map(|(params, z)| renderer.render_boxes(*z, params))).buffer_unordered(concurrency);
	while let Some(result) = results.next().await {
		result?;
		progress.inc(1);
	}
	drop(results);
	progress.finish();

	for (stack, z_values) in stacks.iter().zip(&z_values_by_stack) {
		resort_tiles(catmaid_dir, stack, z_values, tile_size, fmt)?;
		make_thumbnails(client, catmaid_dir, stack, z_values, tile_size, fmt).await?;
	}

	create_project_file(client, project, catmaid_dir, stacks, max_level, tile_size, fmt).await
}

fn min_z(z_values: &[f64]) -> f64 {
	z_values.iter().cloned().fold(f64::INFINITY, f64::min)
}

/// Walks `{catmaid_dir}/{stack}/{width}x{height}/{zoom}/{z}/{row}/{col}.{fmt}` and renames
/// each tile to `{catmaid_dir}/{stack}/{z - min_z}/{row}_{col}_{zoom}.{fmt}`, then removes the
/// now-empty `{width}x{height}` tree.
#[context("resorting exported tiles for stack '{stack}'")]
fn resort_tiles(catmaid_dir: &Path, stack: &str, z_values: &[f64], tile_size: u32, fmt: &str) -> Result<()> {
	let source_root = catmaid_dir.join(stack).join(format!("{tile_size}x{tile_size}"));
	if !source_root.is_dir() {
		bail!("box-render client did not produce {}", source_root.display());
	}
	let base_z = min_z(z_values) as i64;

	for zoom_entry in std::fs::read_dir(&source_root).with_context(|| format!("reading {}", source_root.display()))? {
		let zoom_dir = zoom_entry?.path();
		let Some(zoom) = dir_name_as_u32(&zoom_dir) else { continue };
		for z_entry in std::fs::read_dir(&zoom_dir)? {
			let z_dir = z_entry?.path();
			let Some(z) = dir_name_as_u32(&z_dir) else { continue };
			let rebased_z = i64::from(z) - base_z;
			for row_entry in std::fs::read_dir(&z_dir)? {
				let row_dir = row_entry?.path();
				let Some(row) = dir_name_as_u32(&row_dir) else { continue };
				for col_entry in std::fs::read_dir(&row_dir)? {
					let col_path = col_entry?.path();
					let Some(col) = col_path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<u32>().ok()) else { continue };
					let dest_dir = catmaid_dir.join(stack).join(rebased_z.to_string());
					std::fs::create_dir_all(&dest_dir).with_context(|| format!("creating {}", dest_dir.display()))?;
					let dest = dest_dir.join(format!("{row}_{col}_{zoom}.{fmt}"));
					std::fs::rename(&col_path, &dest).with_context(|| format!("renaming {} to {}", col_path.display(), dest.display()))?;
				}
			}
		}
	}
	std::fs::remove_dir_all(&source_root).with_context(|| format!("removing {}", source_root.display()))?;
	Ok(())
}

fn dir_name_as_u32(path: &Path) -> Option<u32> {
	path.file_name()?.to_str()?.parse().ok()
}

/// Loads the most-zoomed-out tile (`0_0_{max_level}`), resizes it so its long edge
/// corresponds to the stack's full world width, crops to non-zero content, and resizes that
/// crop to a fixed 192x192 thumbnail.
async fn make_thumbnails(client: &RenderClient, catmaid_dir: &Path, stack: &str, z_values: &[f64], tile_size: u32, fmt: &str) -> Result<()> {
	let bounds = client.get_stack_bounds(stack).await?;
	let width_ds = bounds.max_x - bounds.min_x;
	let base_z = min_z(z_values) as i64;
	let stack_dir = catmaid_dir.join(stack);

	for &z in z_values {
		let rebased_z = (z as i64) - base_z;
		let section_dir = stack_dir.join(rebased_z.to_string());
		let (overview_path, zoom) = find_overview_tile(&section_dir, fmt)?;
		let stack_dir = stack_dir.clone();
		let fmt = fmt.to_string();
		tokio::task::spawn_blocking(move || crop_and_save_thumbnail(&overview_path, zoom, width_ds, tile_size, &stack_dir, rebased_z, &fmt))
			.await
			.map_err(|e| anyhow!("thumbnail task panicked: {e}"))??;
	}
	Ok(())
}

fn find_overview_tile(section_dir: &Path, fmt: &str) -> Result<(PathBuf, u32)> {
	let mut best: Option<(u32, PathBuf)> = None;
	for entry in std::fs::read_dir(section_dir).with_context(|| format!("reading {}", section_dir.display()))? {
		let path = entry?.path();
		let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
		let Some(rest) = stem.strip_prefix("0_0_") else { continue };
		let Some(zoom) = rest.parse::<u32>().ok() else { continue };
		if path.extension().and_then(|e| e.to_str()) != Some(fmt) {
			continue;
		}
		if best.as_ref().is_none_or(|(best_zoom, _)| zoom > *best_zoom) {
			best = Some((zoom, path));
		}
	}
	best.map(|(zoom, path)| (path, zoom)).ok_or_else(|| anyhow!("no overview tile found under {}", section_dir.display()))
}

fn crop_and_save_thumbnail(overview_path: &Path, zoom: u32, width_ds: f64, tile_size: u32, stack_dir: &Path, rebased_z: i64, fmt: &str) -> Result<()> {
	let image = image::open(overview_path).with_context(|| format!("opening {}", overview_path.display()))?.to_luma8();
	let width_rs = (192.0 / (width_ds / 2f64.powi(zoom as i32))) * f64::from(tile_size);
	let width_rs = width_rs.round().max(1.0) as u32;
	let resized = image::imageops::resize(&image, width_rs, width_rs, image::imageops::FilterType::Triangle);

	let (crop_x0, crop_y0, crop_w, crop_h) = content_bounds(&resized);
	let cropped = image::imageops::crop_imm(&resized, crop_x0, crop_y0, crop_w, crop_h).to_image();
	let thumb = image::imageops::resize(&cropped, 192, 192, image::imageops::FilterType::Triangle);

	let dest = stack_dir.join(rebased_z.to_string()).join(format!("small.{fmt}"));
	thumb.save(&dest).with_context(|| format!("writing thumbnail to {}", dest.display()))?;
	Ok(())
}

/// Finds the tight bounding box of non-zero pixels, mirroring
/// `image_rs[np.ix_((image_rs > 0).any(1), (image_rs > 0).any(0))]`.
fn content_bounds(image: &image::GrayImage) -> (u32, u32, u32, u32) {
	let (width, height) = image.dimensions();
	let mut min_x = width;
	let mut max_x = 0;
	let mut min_y = height;
	let mut max_y = 0;
	for (x, y, pixel) in image.enumerate_pixels() {
		if pixel.0[0] > 0 {
			min_x = min_x.min(x);
			max_x = max_x.max(x);
			min_y = min_y.min(y);
			max_y = max_y.max(y);
		}
	}
	if max_x < min_x || max_y < min_y {
		return (0, 0, width, height);
	}
	(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
}

#[derive(Debug, Serialize)]
struct MirrorDto {
	title: String,
	tile_width: u32,
	tile_height: u32,
	tile_source_type: u32,
	fileextension: String,
	url: String,
}

#[derive(Debug, Serialize)]
struct StackEntryDto {
	title: String,
	dimension: String,
	resolution: String,
	zoomlevels: String,
	metadata: String,
	mirrors: Vec<MirrorDto>,
}

#[derive(Debug, Serialize)]
struct ProjectInnerDto {
	title: String,
	stacks: Vec<StackEntryDto>,
}

#[derive(Debug, Serialize)]
struct ProjectFileDto {
	project: ProjectInnerDto,
}

#[allow(clippy::too_many_arguments)]
async fn create_project_file(client: &RenderClient, project: &str, catmaid_dir: &Path, stacks: &[String], max_level: u32, tile_size: u32, fmt: &str) -> Result<PathBuf> {
	let mut entries = Vec::with_capacity(stacks.len());
	for stack in stacks {
		let bounds = client.get_stack_bounds(stack).await?;
		let width = ((bounds.max_x - bounds.min_x) * 1.1) as i64;
		let height = ((bounds.max_y - bounds.min_y) * 1.1) as i64;
		let depth = (bounds.max_z - bounds.min_z) as i64 + 1;

		let metadata = client.get_stack_metadata(stack).await?;

		let specs = client.get_tile_specs_for_stack(stack).await?;
		let description = if let Some(spec) = specs.first() { read_image_description(&spec.pyramid).unwrap_or_default() } else { String::new() };

		entries.push(StackEntryDto {
			title: stack.clone(),
			dimension: format!("({width}, {height}, {depth})"),
			resolution: format!("({:.5}, {:.5}, {:.5})", metadata.resolution_x, metadata.resolution_y, metadata.resolution_z),
			zoomlevels: format!("{}", max_level + 1),
			metadata: description,
			mirrors: vec![MirrorDto {
				title: format!("{project}_{}", stack.split('_').next().unwrap_or(stack)),
				tile_width: tile_size,
				tile_height: tile_size,
				tile_source_type: 1,
				fileextension: fmt.to_string(),
				url: catmaid_dir.join(stack).to_string_lossy().into_owned(),
			}],
		});
	}

	let project_file = ProjectFileDto { project: ProjectInnerDto { title: project.to_string(), stacks: entries } };
	let path = catmaid_dir.join("project.yaml");
	let yaml = serde_yaml_ng::to_string(&project_file).context("serialising project.yaml")?;
	std::fs::write(&path, yaml).with_context(|| format!("writing {}", path.display()))?;
	log::info!("wrote {}", path.display());
	Ok(path)
}

/// Reads the `ImageDescription` tiff tag off a tile's level-0 image, the acquisition
/// metadata blob `project.yaml` carries per stack.
fn read_image_description(pyramid: &render_pipeline_geometry::ImagePyramid) -> Result<String> {
	let url = pyramid.get(0).ok_or_else(|| anyhow!("tile spec has no level-0 image"))?;
	let path = Path::new(url.trim_start_matches("file://"));
	let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
	let mut decoder = tiff::decoder::Decoder::new(file).with_context(|| format!("decoding tiff headers for {}", path.display()))?;
	decoder.get_tag_ascii_string(tiff::tags::Tag::ImageDescription).with_context(|| format!("reading ImageDescription tag from {}", path.display()))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn bounds(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> StackBounds {
		StackBounds { min_x, min_y, max_x, max_y, min_z: 0.0, max_z: 0.0 }
	}

	#[test]
	fn max_level_covers_full_section() {
		let b = bounds(0.0, 0.0, 4096.0, 4096.0);
		assert_eq!(compute_max_level(&b, 1024), 2);
	}

	#[test]
	fn max_level_zero_when_tile_covers_section() {
		let b = bounds(0.0, 0.0, 500.0, 500.0);
		assert_eq!(compute_max_level(&b, 1024), 0);
	}

	#[test]
	fn content_bounds_crops_to_nonzero_region() {
		let mut image = image::GrayImage::new(10, 10);
		image.put_pixel(2, 3, image::Luma([200]));
		image.put_pixel(5, 6, image::Luma([100]));
		assert_eq!(content_bounds(&image), (2, 3, 4, 4));
	}

	#[test]
	fn content_bounds_falls_back_to_whole_image_when_empty() {
		let image = image::GrayImage::new(4, 4);
		assert_eq!(content_bounds(&image), (0, 0, 4, 4));
	}
}
