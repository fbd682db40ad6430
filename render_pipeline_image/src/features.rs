use image::{DynamicImage, GenericImageView, GrayImage};
use imageproc::filter::gaussian_blur_f32;

/// A 128-dimensional gradient-orientation-histogram descriptor: 4x4 spatial cells, each an
/// 8-bin orientation histogram, L2-normalised.
pub type Descriptor = [f32; 128];

/// A scale-space extremum found in the difference-of-Gaussians pyramid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
	pub x: f32,
	pub y: f32,
	pub sigma: f32,
}

/// Parameters for building the octave/scale difference-of-Gaussians pyramid, matching the
/// montage stitcher's tuned defaults.
#[derive(Debug, Clone, Copy)]
pub struct SiftParams {
	pub n_octaves: u32,
	pub n_scales: u32,
	pub sigma_min: f32,
	pub sigma_in: f32,
	/// Minimum DoG response magnitude for a keypoint to be kept.
	pub c_dog: f32,
	/// Maximum principal-curvature ratio; rejects responses along edges rather than corners.
	pub c_edge: f32,
}

impl Default for SiftParams {
	fn default() -> Self {
		SiftParams { n_octaves: 4, n_scales: 3, sigma_min: 2.6, sigma_in: 0.5, c_dog: 0.025, c_edge: 4.5 }
	}
}

struct ScaleSpaceImage {
	width: usize,
	height: usize,
	sigma: f32,
	data: Vec<f32>,
}

impl ScaleSpaceImage {
	fn at(&self, x: i64, y: i64) -> f32 {
		let x = x.clamp(0, self.width as i64 - 1) as usize;
		let y = y.clamp(0, self.height as i64 - 1) as usize;
		self.data[y * self.width + x]
	}
}

/// Detects scale-space extrema in `image` and extracts a gradient-histogram descriptor at
/// each. Octaves halve the image resolution; within an octave, `n_scales + 1` Gaussian-blurred
/// copies are built and consecutive pairs differenced into the DoG stack that extrema are
/// found in, then mapped back up to the original image's coordinate frame.
pub fn detect_and_extract(image: &DynamicImage, params: &SiftParams) -> (Vec<Keypoint>, Vec<Descriptor>) {
	let mut keypoints = Vec::new();
	let mut descriptors = Vec::new();

	let mut octave_image = image.to_luma8();
	let mut scale_factor = 1.0f32;

	for _ in 0..params.n_octaves {
		if octave_image.width() < 8 || octave_image.height() < 8 {
			break;
		}

		let gray_levels = build_gaussian_scales(&octave_image, params);
		let dog_stack = build_dog_stack(&gray_levels);
		for (kp, desc) in find_extrema(&dog_stack, &gray_levels, params) {
			keypoints.push(Keypoint { x: kp.x * scale_factor, y: kp.y * scale_factor, sigma: kp.sigma * scale_factor });
			descriptors.push(desc);
		}

		octave_image = image::imageops::resize(&octave_image, (octave_image.width() / 2).max(1), (octave_image.height() / 2).max(1), image::imageops::FilterType::Triangle);
		scale_factor *= 2.0;
	}

	(keypoints, descriptors)
}

fn build_gaussian_scales(image: &GrayImage, params: &SiftParams) -> Vec<ScaleSpaceImage> {
	let (width, height) = (image.width() as usize, image.height() as usize);
	(0..=params.n_scales)
		.map(|s| {
			let sigma = params.sigma_min * 2f32.powf(s as f32 / params.n_scales as f32);
			let effective = (sigma.powi(2) - params.sigma_in.powi(2)).max(0.01).sqrt();
			let blurred = gaussian_blur_f32(image, effective);
			let data = blurred.pixels().map(|p| p.0[0] as f32 / 255.0).collect();
			ScaleSpaceImage { width, height, sigma, data }
		})
		.collect()
}

fn build_dog_stack(scales: &[ScaleSpaceImage]) -> Vec<ScaleSpaceImage> {
	scales
		.windows(2)
		.map(|pair| {
			let (lo, hi) = (&pair[0], &pair[1]);
			let data = lo.data.iter().zip(hi.data.iter()).map(|(a, b)| b - a).collect();
			ScaleSpaceImage { width: lo.width, height: lo.height, sigma: hi.sigma, data }
		})
		.collect()
}

/// Finds pixels that are a local extremum (min or max) among their 8 spatial neighbours and
/// both adjacent DoG scales, rejects weak and edge-like responses, and builds a descriptor
/// from the Gaussian scale nearest to the keypoint.
fn find_extrema(dog_stack: &[ScaleSpaceImage], gray_levels: &[ScaleSpaceImage], params: &SiftParams) -> Vec<(Keypoint, Descriptor)> {
	let mut found = Vec::new();
	if dog_stack.len() < 3 {
		return found;
	}

	for scale_index in 1..dog_stack.len() - 1 {
		let (below, here, above) = (&dog_stack[scale_index - 1], &dog_stack[scale_index], &dog_stack[scale_index + 1]);
		for y in 1..(here.height as i64 - 1) {
			for x in 1..(here.width as i64 - 1) {
				let value = here.at(x, y);
				if value.abs() < params.c_dog {
					continue;
				}
				if !is_spatial_extremum(here, x, y, value) {
					continue;
				}
				if !is_scale_extremum(below, above, x, y, value) {
					continue;
				}
				if edge_response_ratio(here, x, y) > params.c_edge {
					continue;
				}

				let gray = &gray_levels[scale_index];
				let descriptor = build_descriptor(gray, x, y);
				found.push((Keypoint { x: x as f32, y: y as f32, sigma: here.sigma }, descriptor));
			}
		}
	}

	found
}

fn is_spatial_extremum(image: &ScaleSpaceImage, x: i64, y: i64, value: f32) -> bool {
	let mut is_max = true;
	let mut is_min = true;
	for dy in -1..=1 {
		for dx in -1..=1 {
			if dx == 0 && dy == 0 {
				continue;
			}
			let neighbour = image.at(x + dx, y + dy);
			if neighbour >= value {
				is_max = false;
			}
			if neighbour <= value {
				is_min = false;
			}
		}
	}
	is_max || is_min
}

fn is_scale_extremum(below: &ScaleSpaceImage, above: &ScaleSpaceImage, x: i64, y: i64, value: f32) -> bool {
	let mut is_max = true;
	let mut is_min = true;
	for dy in -1..=1 {
		for dx in -1..=1 {
			let b = below.at(x + dx, y + dy);
			let a = above.at(x + dx, y + dy);
			if b >= value || a >= value {
				is_max = false;
			}
			if b <= value || a <= value {
				is_min = false;
			}
		}
	}
	is_max || is_min
}

/// Ratio of principal curvatures of the local Hessian, used to reject edge-like (as opposed
/// to corner-like) responses the same way Lowe's original SIFT does.
fn edge_response_ratio(image: &ScaleSpaceImage, x: i64, y: i64) -> f32 {
	let dxx = image.at(x + 1, y) - 2.0 * image.at(x, y) + image.at(x - 1, y);
	let dyy = image.at(x, y + 1) - 2.0 * image.at(x, y) + image.at(x, y - 1);
	let dxy = (image.at(x + 1, y + 1) - image.at(x + 1, y - 1) - image.at(x - 1, y + 1) + image.at(x - 1, y - 1)) / 4.0;

	let trace = dxx + dyy;
	let det = dxx * dyy - dxy * dxy;
	if det <= 0.0 {
		return f32::INFINITY;
	}
	trace * trace / det
}

/// A 4x4 grid of 8-bin gradient-orientation histograms around `(x, y)`, L2-normalised.
fn build_descriptor(image: &ScaleSpaceImage, x: i64, y: i64) -> Descriptor {
	let mut descriptor = [0f32; 128];
	let cell_size = 4i64;

	for cell_y in 0..4 {
		for cell_x in 0..4 {
			let base_x = x - 8 + cell_x * cell_size;
			let base_y = y - 8 + cell_y * cell_size;
			let mut histogram = [0f32; 8];

			for dy in 0..cell_size {
				for dx in 0..cell_size {
					let px = base_x + dx;
					let py = base_y + dy;
					let gx = image.at(px + 1, py) - image.at(px - 1, py);
					let gy = image.at(px, py + 1) - image.at(px, py - 1);
					let magnitude = (gx * gx + gy * gy).sqrt();
					let angle = gy.atan2(gx).rem_euclid(std::f32::consts::TAU);
					let bin = ((angle / std::f32::consts::TAU) * 8.0) as usize % 8;
					histogram[bin] += magnitude;
				}
			}

			let cell_index = (cell_y * 4 + cell_x) as usize * 8;
			descriptor[cell_index..cell_index + 8].copy_from_slice(&histogram);
		}
	}

	let norm = descriptor.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
	for v in &mut descriptor {
		*v /= norm;
	}
	descriptor
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::{GrayImage, Luma};

	#[test]
	fn flat_image_yields_no_keypoints() {
		let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([128])));
		let (keypoints, descriptors) = detect_and_extract(&image, &SiftParams::default());
		assert!(keypoints.is_empty());
		assert!(descriptors.is_empty());
	}

	#[test]
	fn textured_image_yields_descriptors_with_unit_norm() {
		let image = DynamicImage::ImageLuma8(GrayImage::from_fn(128, 128, |x, y| {
			let v = (((x / 8) % 2) ^ ((y / 8) % 2)) as u8;
			Luma([v * 255])
		}));
		let (_, descriptors) = detect_and_extract(&image, &SiftParams::default());
		for descriptor in &descriptors {
			let norm: f32 = descriptor.iter().map(|v| v * v).sum::<f32>().sqrt();
			assert!((norm - 1.0).abs() < 1e-3 || norm == 0.0);
		}
	}
}
