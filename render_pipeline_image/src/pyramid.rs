use anyhow::Result;
use fast_image_resize::{FilterType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, GenericImageView};
use imageproc::filter::gaussian_blur_f32;

pub const DOWNSCALE: u32 = 2;
pub const MAX_LAYER: u32 = 8;

/// One level of a constructed pyramid.
#[derive(Clone)]
pub struct PyramidLevel {
	pub level: u32,
	pub image: DynamicImage,
}

/// Builds a Gaussian pyramid from `base`, matching `pyramid_gaussian(image, downscale=2,
/// max_layer=8, preserve_range=True)`: each level is Gaussian-smoothed (sigma `2 *
/// downscale / 6`, the same anti-aliasing sigma used upstream) and then downsampled by
/// `downscale`, stopping once `max_layer` additional levels have been produced or either
/// dimension would drop below one pixel.
pub fn build_gaussian_pyramid(base: &DynamicImage) -> Result<Vec<PyramidLevel>> {
	let sigma = 2.0 * DOWNSCALE as f32 / 6.0;
	let mut levels = Vec::with_capacity(MAX_LAYER as usize + 1);
	levels.push(PyramidLevel { level: 0, image: base.clone() });

	let mut current = base.clone();
	for level in 1..=MAX_LAYER {
		let (width, height) = current.dimensions();
		let next_width = width / DOWNSCALE;
		let next_height = height / DOWNSCALE;
		if next_width == 0 || next_height == 0 {
			break;
		}

		let blurred = blur(&current, sigma);
		let mut dst = DynamicImage::new(next_width, next_height, blurred.color());
		Resizer::new().resize(&blurred, &mut dst, &ResizeOptions::default().resize_alg(ResizeAlg::Convolution(FilterType::Box)))?;

		levels.push(PyramidLevel { level, image: dst.clone() });
		current = dst;
	}

	Ok(levels)
}

fn blur(image: &DynamicImage, sigma: f32) -> DynamicImage {
	match image {
		DynamicImage::ImageLuma16(buf) => DynamicImage::ImageLuma16(gaussian_blur_f32(buf, sigma)),
		DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(gaussian_blur_f32(buf, sigma)),
		other => DynamicImage::ImageLuma16(gaussian_blur_f32(&other.to_luma16(), sigma)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::{GrayImage, Luma};

	#[test]
	fn stops_once_max_layer_reached() {
		let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(512, 512, Luma([128])));
		let levels = build_gaussian_pyramid(&image).unwrap();
		assert_eq!(levels.len(), (MAX_LAYER + 1) as usize);
		assert_eq!(levels[0].image.dimensions(), (512, 512));
		assert_eq!(levels[1].image.dimensions(), (256, 256));
	}

	#[test]
	fn stops_early_when_dimensions_hit_zero() {
		let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 3, Luma([128])));
		let levels = build_gaussian_pyramid(&image).unwrap();
		assert_eq!(levels.len(), 2);
		assert_eq!(levels[1].image.dimensions(), (1, 1));
	}
}
