//! Per-tilepair seam matching: fetches the overlap imagery for one tilepair, finds SIFT
//! keypoints on each side, matches descriptors, and fits a rigid transform by RANSAC.

use crate::stitch::discover::{Direction, TilePair};
use anyhow::Result;
use image::{DynamicImage, GrayImage};
use imageproc::filter::gaussian_blur_f32;
use render_pipeline_client::{MatchesDto, PointMatchDto, RenderClient};
use render_pipeline_derive::context;
use render_pipeline_image::{Keypoint, MatchParams, RansacParams, SiftParams, detect_and_extract, equalize_adapthist, match_descriptors, ransac_euclidean};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Tuning knobs for one pairmatch, all with the reference stitcher's defaults.
#[derive(Debug, Clone)]
pub struct PairMatchParams {
	/// Half-width of the seam crop requested from the server, in pixels.
	pub overlap: u32,
	/// Upper bound on the keypoints kept per image after bucketing.
	pub max_keypoints: usize,
	/// Whether to run CLAHE on the seam crop before SIFT.
	pub clahe: bool,
	pub sift: SiftParams,
	pub match_params: MatchParams,
	pub ransac: RansacParams,
}

impl Default for PairMatchParams {
	fn default() -> Self {
		let overlap = 400;
		PairMatchParams {
			overlap,
			max_keypoints: 400,
			clahe: true,
			sift: SiftParams::default(),
			match_params: MatchParams { max_ratio: 0.8, cross_check: true, max_distance: Some(overlap as f32) },
			ransac: RansacParams::default(),
		}
	}
}

/// Fetches the seam crop for `pair`, matches it, and returns the resulting pointmatch, or
/// `None` if the pair did not yield enough evidence to accept (SIFT found nothing, too few
/// matches, or too few RANSAC inliers). Network/server errors are propagated as `Err`.
#[context("matching tilepair '{}' - '{}' at z={z}", pair.p_id, pair.q_id)]
pub async fn match_pair(client: &RenderClient, stack: &str, z: f64, pair: &TilePair, size: f64, params: &PairMatchParams, image_limit: &Mutex<()>) -> Result<Option<PointMatchDto>> {
	let overlap = params.overlap;
	let (box_x, box_y, box_w, box_h) = match pair.direction {
		Direction::Horizontal => (pair.match_x - overlap as f64, pair.match_y, overlap * 2, size as u32),
		Direction::Vertical => (pair.match_x, pair.match_y - overlap as f64, size as u32, overlap * 2),
	};

	let raw = {
		let _guard = image_limit.lock().await;
		client.get_bb_image(stack, box_x, box_y, z, box_w, box_h, 1.0).await?
	};

	let (p_image, q_image) = split_seam_image(&raw, box_w, box_h, pair.direction, overlap);

	let p_image = preprocess(p_image, params);
	let q_image = preprocess(q_image, params);

	let (p_keypoints, p_descriptors) = detect_and_extract(&p_image, &params.sift);
	let (q_keypoints, q_descriptors) = detect_and_extract(&q_image, &params.sift);
	if p_keypoints.is_empty() || q_keypoints.is_empty() {
		log::debug!("{} - {}: SIFT found no features", pair.p_id, pair.q_id);
		return Ok(None);
	}

	let p_keep = filter_keypoints(&p_keypoints, overlap as f32, params.max_keypoints);
	let q_keep = filter_keypoints(&q_keypoints, overlap as f32, params.max_keypoints);
	if p_keep.is_empty() || q_keep.is_empty() {
		log::debug!("{} - {}: no keypoints left after bucketing", pair.p_id, pair.q_id);
		return Ok(None);
	}

	let p_desc: Vec<_> = p_keep.iter().map(|&i| p_descriptors[i]).collect();
	let q_desc: Vec<_> = q_keep.iter().map(|&i| q_descriptors[i]).collect();

	let descriptor_matches = match_descriptors(&p_desc, &q_desc, &params.match_params);
	let min_samples = ((descriptor_matches.len() as f64 * 0.05).round() as usize).max(7);
	if descriptor_matches.len() < min_samples {
		log::debug!("{} - {}: only {} descriptor matches, need {min_samples}", pair.p_id, pair.q_id, descriptor_matches.len());
		return Ok(None);
	}

	let points_p: Vec<[f64; 2]> = descriptor_matches.iter().map(|&(i, _)| [p_keypoints[p_keep[i]].x as f64, p_keypoints[p_keep[i]].y as f64]).collect();
	let points_q: Vec<[f64; 2]> = descriptor_matches.iter().map(|&(_, j)| [q_keypoints[q_keep[j]].x as f64, q_keypoints[q_keep[j]].y as f64]).collect();

	let Some((_, mask)) = ransac_euclidean(&points_p, &points_q, min_samples, &params.ransac) else {
		log::debug!("{} - {}: RANSAC could not fit a model", pair.p_id, pair.q_id);
		return Ok(None);
	};

	let total_inliers = mask.iter().filter(|&&m| m).count();
	if total_inliers < min_samples {
		log::debug!("{} - {}: only {total_inliers}/{min_samples} inliers", pair.p_id, pair.q_id);
		return Ok(None);
	}

	let adjusted = size - overlap as f64;
	let mut p_xs = Vec::with_capacity(total_inliers);
	let mut p_ys = Vec::with_capacity(total_inliers);
	let mut q_xs = Vec::with_capacity(total_inliers);
	let mut q_ys = Vec::with_capacity(total_inliers);
	for (index, &is_inlier) in mask.iter().enumerate() {
		if !is_inlier {
			continue;
		}
		let [mut px, mut py] = points_p[index];
		let [qx, qy] = points_q[index];
		match pair.direction {
			Direction::Horizontal => px += adjusted,
			Direction::Vertical => py += adjusted,
		}
		p_xs.push(px);
		p_ys.push(py);
		q_xs.push(qx);
		q_ys.push(qy);
	}

	log::info!("{} - {}: accepted {total_inliers} inlier matches", pair.p_id, pair.q_id);
	Ok(Some(PointMatchDto {
		p_group_id: pair.section_id.clone(),
		q_group_id: pair.section_id.clone(),
		p_id: pair.p_id.clone(),
		q_id: pair.q_id.clone(),
		matches: MatchesDto { p: [p_xs, p_ys], q: [q_xs, q_ys], w: vec![1.0; total_inliers] },
	}))
}

/// Splits the raw seam crop (row-major, single-channel) into `p`'s and `q`'s halves.
fn split_seam_image(raw: &[u8], width: u32, height: u32, direction: Direction, overlap: u32) -> (DynamicImage, DynamicImage) {
	match direction {
		Direction::Horizontal => {
			let mut p = Vec::with_capacity((overlap * height) as usize);
			let mut q = Vec::with_capacity((overlap * height) as usize);
			for row in 0..height {
				let start = (row * width) as usize;
				p.extend_from_slice(&raw[start..start + overlap as usize]);
				q.extend_from_slice(&raw[start + overlap as usize..start + 2 * overlap as usize]);
			}
			(to_dynamic(p, overlap, height), to_dynamic(q, overlap, height))
		}
		Direction::Vertical => {
			let split = (overlap * width) as usize;
			(to_dynamic(raw[..split].to_vec(), width, overlap), to_dynamic(raw[split..2 * split].to_vec(), width, overlap))
		}
	}
}

fn to_dynamic(data: Vec<u8>, width: u32, height: u32) -> DynamicImage {
	DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, data).expect("seam half has the expected byte length"))
}

/// Runs CLAHE with a pre-blur, matching `match.py`'s `get_images`, if enabled.
fn preprocess(image: DynamicImage, params: &PairMatchParams) -> DynamicImage {
	if !params.clahe {
		return image;
	}
	let blurred = gaussian_blur_f32(&image.to_luma8(), 2.0);
	equalize_adapthist(&DynamicImage::ImageLuma8(blurred), params.overlap as f64 / 16.0, 0.02)
}

/// Partitions keypoints into `overlap`-sized spatial bins and keeps, per bin, the
/// lowest-`sigma` (finest-scale) keypoints, distributing `max_keypoints` evenly across bins.
fn filter_keypoints(keypoints: &[Keypoint], overlap: f32, max_keypoints: usize) -> Vec<usize> {
	let mut pools: HashMap<(i64, i64), Vec<(f32, usize)>> = HashMap::new();
	for (index, keypoint) in keypoints.iter().enumerate() {
		let bin = ((keypoint.x / overlap).floor() as i64, (keypoint.y / overlap).floor() as i64);
		pools.entry(bin).or_default().push((keypoint.sigma, index));
	}

	let per_pool = max_keypoints / pools.len().max(1);
	let mut keep = Vec::new();
	for pool in pools.values_mut() {
		pool.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("sigma is never NaN"));
		keep.extend(pool.iter().take(per_pool).map(|&(_, index)| index));
	}
	keep
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn splits_horizontal_seam_by_column() {
		let width = 4;
		let height = 2;
		let raw: Vec<u8> = (0..width * height).map(|i| i as u8).collect();
		let (p, q) = split_seam_image(&raw, width, height, Direction::Horizontal, 2);
		assert_eq!(p.to_luma8().into_raw(), vec![0, 1, 4, 5]);
		assert_eq!(q.to_luma8().into_raw(), vec![2, 3, 6, 7]);
	}

	#[test]
	fn splits_vertical_seam_by_row() {
		let width = 4;
		let height = 4;
		let raw: Vec<u8> = (0..width * height).map(|i| i as u8).collect();
		let (p, q) = split_seam_image(&raw, width, height, Direction::Vertical, 2);
		assert_eq!(p.to_luma8().into_raw(), (0..8).collect::<Vec<u8>>());
		assert_eq!(q.to_luma8().into_raw(), (8..16).collect::<Vec<u8>>());
	}

	#[test]
	fn buckets_keep_finest_scale_keypoints() {
		let keypoints = vec![Keypoint { x: 1.0, y: 1.0, sigma: 3.0 }, Keypoint { x: 1.0, y: 1.0, sigma: 1.0 }, Keypoint { x: 500.0, y: 500.0, sigma: 2.0 }];
		let keep = filter_keypoints(&keypoints, 400.0, 1);
		assert_eq!(keep.len(), 2);
		assert!(keep.contains(&1));
		assert!(keep.contains(&2));
	}
}
