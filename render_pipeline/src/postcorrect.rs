//! Background-artefact removal across a megafield of raw acquisition tiles.
//!
//! A handful of tiles in every section come out corrupted (a dust speck on the sensor, a
//! stray reflection); naively mipmapping them bakes the artefact into the render. This module
//! estimates a per-section background from the tiles that agree with the rest of the
//! acquisition and subtracts it from every tile in the section, falling back to a
//! neighbouring section's background when a section has too few uncorrupted tiles of its own.

use anyhow::{Context, Result, bail};
use rand::seq::SliceRandom;
use render_pipeline_core::utils::{median, median_absolute_deviation, percentile};
use render_pipeline_derive::context;
use std::fs;
use std::path::{Path, PathBuf};

pub const METADATA_FILENAME: &str = "mega_field_meta_data.yaml";
pub const POST_CORRECTION_DIR: &str = "postcorrection";
const SUM_OF_FILES_NAME: &str = "sum_of_files.tiff";

/// Tuning knobs for background estimation, all with the reference implementation's defaults.
#[derive(Debug, Clone, Copy)]
pub struct PostCorrectParams {
	/// How many raw tiles to sample per section when building the global median/MAD.
	pub sample_size: usize,
	/// Percentile (0..100) used to summarise one tile down to a scalar.
	pub percentile: f64,
	/// `a` in `[MED - a*MAD, MED + a*MAD]`.
	pub mad_multiplier: f64,
	/// A section with fewer clean tiles than this is marked failed.
	pub min_clean: usize,
	/// Restored mean level added back after background subtraction.
	pub restore_mean_level: f64,
}

impl Default for PostCorrectParams {
	fn default() -> Self {
		PostCorrectParams { sample_size: 10, percentile: 0.1, mad_multiplier: 3.0, min_clean: 20, restore_mean_level: 32768.0 }
	}
}

/// One section's raw tiles, as a plain directory of tiffs matching the FAST-EM naming
/// convention `{row:03}_{col:03}_0.tiff`.
#[derive(Debug, Clone)]
pub struct SectionInput {
	pub index: usize,
	pub dir: PathBuf,
}

/// What happened to one section's post-correction.
#[derive(Debug, Clone)]
pub enum SectionOutcome {
	Corrected { index: usize, clean_count: usize, total_count: usize },
	Failed { index: usize, clean_count: usize, total_count: usize },
}

/// Finds every raw tile tiff directly inside `dir`, matching `{3 digits}_{3 digits}_0.tiff`.
pub fn find_section_files(dir: &Path) -> Result<Vec<PathBuf>> {
	let mut files = Vec::new();
	for entry in fs::read_dir(dir).with_context(|| format!("reading section directory {}", dir.display()))? {
		let entry = entry?;
		let name = entry.file_name();
		let name = name.to_string_lossy();
		if is_raw_tile_name(&name) {
			files.push(entry.path());
		}
	}
	files.sort();
	Ok(files)
}

fn is_raw_tile_name(name: &str) -> bool {
	let Some(stripped) = name.strip_suffix("_0.tiff") else { return false };
	let parts: Vec<&str> = stripped.split('_').collect();
	parts.len() == 2 && parts.iter().all(|p| p.len() == 3 && p.chars().all(|c| c.is_ascii_digit()))
}

/// A tile's raw 16-bit pixel data plus its path, loaded once and reused across the median/MAD
/// sample pass, the clean/dirty classification pass, and (for clean tiles) the background
/// accumulation pass.
struct LoadedTile {
	path: PathBuf,
	image: image::ImageBuffer<image::Luma<u16>, Vec<u16>>,
}

fn load_tile(path: &Path) -> Result<LoadedTile> {
	let image = image::open(path).with_context(|| format!("opening raw tile {}", path.display()))?.into_luma16();
	Ok(LoadedTile { path: path.to_path_buf(), image })
}

/// Summarises one tile's intensity as the configured low percentile of its coarsest Gaussian
/// pyramid level, matching the reference implementation's "lowest-resolution page" sample.
fn tile_percentile(image: &image::ImageBuffer<image::Luma<u16>, Vec<u16>>, params: &PostCorrectParams) -> f64 {
	let dynamic = image::DynamicImage::ImageLuma16(image.clone());
	let levels = render_pipeline_image::build_gaussian_pyramid(&dynamic).expect("pyramid construction on an in-memory tile never fails");
	let coarsest = levels.last().expect("pyramid always has at least one level");
	let values: Vec<f64> = coarsest.image.to_luma16().pixels().map(|p| p.0[0] as f64).collect();
	percentile(&values, params.percentile)
}

/// Runs post-correction over every section in `sections` (in the given order, which also
/// determines neighbour-fallback adjacency), writing corrected tiles and a persisted
/// `sum_of_files.tiff` background into each section's `postcorrection/` sub-directory.
#[context("post-correcting {} section(s)", sections.len())]
pub fn post_correct_sections(sections: &[SectionInput], params: &PostCorrectParams) -> Result<Vec<SectionOutcome>> {
	let mut rng = rand::rng();

	// Pass 1: load every raw tile once, and draw the per-section sample used for the global
	// median/MAD.
	let mut section_tiles: Vec<Vec<LoadedTile>> = Vec::with_capacity(sections.len());
	let mut global_sample: Vec<f64> = Vec::new();

	for section in sections {
		let paths = find_section_files(&section.dir)?;
		let mut tiles = Vec::with_capacity(paths.len());
		for path in &paths {
			tiles.push(load_tile(path)?);
		}

		let mut sample_indices: Vec<usize> = (0..tiles.len()).collect();
		sample_indices.shuffle(&mut rng);
		sample_indices.truncate(params.sample_size.min(tiles.len()));
		for &index in &sample_indices {
			global_sample.push(tile_percentile(&tiles[index].image, params));
		}

		section_tiles.push(tiles);
	}

	if global_sample.is_empty() {
		bail!("no raw tiles found across {} section(s)", sections.len());
	}

	let med = median(&global_sample);
	let mad = median_absolute_deviation(&global_sample, med);
	let lower = med - params.mad_multiplier * mad;
	let upper = med + params.mad_multiplier * mad;

	// Pass 2: classify every tile in every section and correct the sections with enough clean
	// tiles.
	let mut outcomes = Vec::with_capacity(sections.len());
	for (section, tiles) in sections.iter().zip(section_tiles.iter()) {
		let clean_indices: Vec<usize> = (0..tiles.len())
			.filter(|&i| {
				let p = tile_percentile(&tiles[i].image, params);
				p >= lower && p <= upper
			})
			.collect();

		if clean_indices.len() < params.min_clean {
			outcomes.push(SectionOutcome::Failed { index: section.index, clean_count: clean_indices.len(), total_count: tiles.len() });
			continue;
		}

		let background = average_images(tiles, &clean_indices)?;
		write_corrected_section(&section.dir, tiles, &background, params)?;
		outcomes.push(SectionOutcome::Corrected { index: section.index, clean_count: clean_indices.len(), total_count: tiles.len() });
	}

	// Neighbour fallback: failed sections borrow the nearest already-corrected (or
	// already-fallen-back) neighbour's persisted background, searching outward
	// i-1, i+1, i-2, i+2, ...
	for offset in 0..outcomes.len() {
		let Some(SectionOutcome::Failed { index, clean_count, total_count }) = outcomes.get(offset).cloned() else { continue };
		let Some(background) = find_neighbour_background(sections, offset) else {
			log::warn!("section {index} has only {clean_count}/{total_count} clean tiles and no neighbour background to borrow");
			continue;
		};
		write_corrected_section(&sections[offset].dir, &section_tiles[offset], &background, params)?;
		log::info!("section {index} corrected using a borrowed neighbour background");
	}

	Ok(outcomes)
}

fn find_neighbour_background(sections: &[SectionInput], failed_offset: usize) -> Option<image::ImageBuffer<image::Luma<u16>, Vec<u16>>> {
	let n = sections.len() as i64;
	let failed_offset = failed_offset as i64;
	for step in 1..n {
		for candidate in [failed_offset - step, failed_offset + step] {
			if candidate < 0 || candidate >= n {
				continue;
			}
			let path = sections[candidate as usize].dir.join(POST_CORRECTION_DIR).join(SUM_OF_FILES_NAME);
			if path.exists() {
				if let Ok(image) = image::open(&path) {
					return Some(image.into_luma16());
				}
			}
		}
	}
	None
}

fn average_images(tiles: &[LoadedTile], indices: &[usize]) -> Result<image::ImageBuffer<image::Luma<u16>, Vec<u16>>> {
	let (width, height) = tiles[indices[0]].image.dimensions();
	let mut sums = vec![0.0f64; (width * height) as usize];
	for &index in indices {
		let tile = &tiles[index].image;
		if tile.dimensions() != (width, height) {
			bail!("tile has dimensions {:?}, expected {:?}", tile.dimensions(), (width, height));
		}
		for (sum, pixel) in sums.iter_mut().zip(tile.pixels()) {
			*sum += pixel.0[0] as f64;
		}
	}
	let count = indices.len() as f64;
	let data: Vec<u16> = sums.iter().map(|s| (s / count).round().clamp(0.0, 65535.0) as u16).collect();
	image::ImageBuffer::from_raw(width, height, data).context("assembling background image")
}

fn write_corrected_section(
	section_dir: &Path,
	tiles: &[LoadedTile],
	background: &image::ImageBuffer<image::Luma<u16>, Vec<u16>>,
	params: &PostCorrectParams,
) -> Result<()> {
	let output_dir = section_dir.join(POST_CORRECTION_DIR);
	fs::create_dir_all(&output_dir).with_context(|| format!("creating {}", output_dir.display()))?;

	let metadata_src = section_dir.join(METADATA_FILENAME);
	if metadata_src.exists() {
		fs::copy(&metadata_src, output_dir.join(METADATA_FILENAME))?;
	}

	for tile in tiles {
		let corrected = subtract_background(&tile.image, background, params.restore_mean_level)?;
		let file_name = tile.path.file_name().expect("tile path has a file name");
		let out_path = output_dir.join(file_name);
		image::DynamicImage::ImageLuma16(corrected).save(&out_path).with_context(|| format!("writing corrected tile {}", out_path.display()))?;
	}

	image::DynamicImage::ImageLuma16(background.clone())
		.save(output_dir.join(SUM_OF_FILES_NAME))
		.context("writing persisted background")?;

	Ok(())
}

fn subtract_background(
	raw: &image::ImageBuffer<image::Luma<u16>, Vec<u16>>,
	background: &image::ImageBuffer<image::Luma<u16>, Vec<u16>>,
	restore_mean_level: f64,
) -> Result<image::ImageBuffer<image::Luma<u16>, Vec<u16>>> {
	if raw.dimensions() != background.dimensions() {
		bail!("tile dimensions {:?} do not match background dimensions {:?}", raw.dimensions(), background.dimensions());
	}
	let (width, height) = raw.dimensions();
	let data: Vec<u16> = raw
		.pixels()
		.zip(background.pixels())
		.map(|(r, b)| (r.0[0] as f64 - b.0[0] as f64 + restore_mean_level).round().clamp(0.0, 65535.0) as u16)
		.collect();
	image::ImageBuffer::from_raw(width, height, data).context("assembling corrected image")
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::Luma;
	use tempfile::tempdir;

	fn write_tile(dir: &Path, row: u32, col: u32, value: u16) {
		let image = image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_pixel(32, 32, Luma([value]));
		image::DynamicImage::ImageLuma16(image).save(dir.join(format!("{row:03}_{col:03}_0.tiff"))).unwrap();
	}

	#[test]
	fn finds_only_raw_tile_names() {
		assert!(is_raw_tile_name("000_001_0.tiff"));
		assert!(!is_raw_tile_name("sum_of_files.tiff"));
		assert!(!is_raw_tile_name("000_001_0.png"));
	}

	#[test]
	fn corrects_section_with_enough_clean_tiles() {
		let dir = tempdir().unwrap();
		for i in 0..25u32 {
			write_tile(dir.path(), 0, i, 30000);
		}
		let section = SectionInput { index: 0, dir: dir.path().to_path_buf() };
		let outcomes = post_correct_sections(&[section], &PostCorrectParams::default()).unwrap();
		assert!(matches!(outcomes[0], SectionOutcome::Corrected { clean_count: 25, total_count: 25, .. }));
		assert!(dir.path().join(POST_CORRECTION_DIR).join("sum_of_files.tiff").exists());
	}

	#[test]
	fn marks_section_failed_without_enough_clean_tiles() {
		let dir = tempdir().unwrap();
		for i in 0..5u32 {
			write_tile(dir.path(), 0, i, 30000);
		}
		let section = SectionInput { index: 0, dir: dir.path().to_path_buf() };
		let outcomes = post_correct_sections(&[section], &PostCorrectParams::default()).unwrap();
		assert!(matches!(outcomes[0], SectionOutcome::Failed { .. }));
	}

	#[test]
	fn falls_back_to_neighbour_background() {
		let good_dir = tempdir().unwrap();
		for i in 0..25u32 {
			write_tile(good_dir.path(), 0, i, 30000);
		}
		let bad_dir = tempdir().unwrap();
		for i in 0..5u32 {
			write_tile(bad_dir.path(), 0, i, 30000);
		}
		let sections = vec![SectionInput { index: 0, dir: good_dir.path().to_path_buf() }, SectionInput { index: 1, dir: bad_dir.path().to_path_buf() }];
		let outcomes = post_correct_sections(&sections, &PostCorrectParams::default()).unwrap();
		assert!(matches!(outcomes[0], SectionOutcome::Corrected { .. }));
		assert!(bad_dir.path().join(POST_CORRECTION_DIR).join("sum_of_files.tiff").exists());
	}
}
