use image::{DynamicImage, GenericImageView, GrayImage, ImageBuffer, Luma};

const BINS: usize = 256;

/// Contrast-limited adaptive histogram equalization over a grid of roughly `kernel_size`
/// square tiles, with bilinear interpolation between neighbouring tiles' mappings to avoid
/// blocking artefacts at tile borders.
///
/// Grayscale tiles pulled from an EM/CLEM montage have low, locally-varying contrast; running
/// SIFT directly on them misses weak features near the dim end of the dynamic range. `clip_limit`
/// is the fraction of a tile's pixels a single histogram bin may hold before its excess is
/// redistributed across the other bins, matching the `clip_limit` of the adaptive-histogram
/// routine this mirrors.
pub fn equalize_adapthist(image: &DynamicImage, kernel_size: f64, clip_limit: f64) -> DynamicImage {
	let (width, height) = image.dimensions();
	let gray = image.to_luma8();

	let tiles_x = ((width as f64 / kernel_size).round() as u32).max(1);
	let tiles_y = ((height as f64 / kernel_size).round() as u32).max(1);
	let tile_w = width.div_ceil(tiles_x).max(1);
	let tile_h = height.div_ceil(tiles_y).max(1);

	let luts = build_tile_luts(&gray, tiles_x, tiles_y, tile_w, tile_h, clip_limit);

	let mut out: ImageBuffer<Luma<u8>, Vec<u8>> = ImageBuffer::new(width, height);
	for y in 0..height {
		for x in 0..width {
			let bin = gray.get_pixel(x, y).0[0] as usize;
			let value = interpolate(&luts, tiles_x, tiles_y, tile_w, tile_h, x, y, bin);
			out.put_pixel(x, y, Luma([(value * 255.0).round().clamp(0.0, 255.0) as u8]));
		}
	}

	DynamicImage::ImageLuma8(out)
}

/// Per-tile cumulative-distribution lookup tables, each mapping a histogram bin to a
/// normalised intensity in `[0, 1]`.
#[allow(clippy::too_many_arguments)]
fn build_tile_luts(gray: &GrayImage, tiles_x: u32, tiles_y: u32, tile_w: u32, tile_h: u32, clip_limit: f64) -> Vec<[f64; BINS]> {
	let (width, height) = gray.dimensions();
	let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);

	for ty in 0..tiles_y {
		for tx in 0..tiles_x {
			let x0 = tx * tile_w;
			let y0 = ty * tile_h;
			let x1 = (x0 + tile_w).min(width);
			let y1 = (y0 + tile_h).min(height);

			let mut histogram = [0u32; BINS];
			let mut count = 0u32;
			for y in y0..y1 {
				for x in x0..x1 {
					histogram[gray.get_pixel(x, y).0[0] as usize] += 1;
					count += 1;
				}
			}

			if count == 0 {
				luts.push([0.0; BINS]);
				continue;
			}

			let clip = ((clip_limit * count as f64).round() as u32).max(1);
			let mut excess = 0u32;
			for bin in &mut histogram {
				if *bin > clip {
					excess += *bin - clip;
					*bin = clip;
				}
			}
			let redistribute = excess / BINS as u32;
			for bin in &mut histogram {
				*bin += redistribute;
			}

			let mut lut = [0.0; BINS];
			let mut cumulative = 0u32;
			for (bin, value) in histogram.iter().zip(lut.iter_mut()) {
				cumulative += bin;
				*value = cumulative as f64 / count as f64;
			}
			luts.push(lut);
		}
	}

	luts
}

#[allow(clippy::too_many_arguments)]
fn interpolate(luts: &[[f64; BINS]], tiles_x: u32, tiles_y: u32, tile_w: u32, tile_h: u32, x: u32, y: u32, bin: usize) -> f64 {
	let tile_index = |tx: i64, ty: i64| -> usize {
		let tx = tx.clamp(0, tiles_x as i64 - 1) as usize;
		let ty = ty.clamp(0, tiles_y as i64 - 1) as usize;
		ty * tiles_x as usize + tx
	};

	let fx = x as f64 / tile_w as f64 - 0.5;
	let fy = y as f64 / tile_h as f64 - 0.5;
	let tx0 = fx.floor() as i64;
	let ty0 = fy.floor() as i64;
	let wx = fx - tx0 as f64;
	let wy = fy - ty0 as f64;

	let v00 = luts[tile_index(tx0, ty0)][bin];
	let v10 = luts[tile_index(tx0 + 1, ty0)][bin];
	let v01 = luts[tile_index(tx0, ty0 + 1)][bin];
	let v11 = luts[tile_index(tx0 + 1, ty0 + 1)][bin];

	let top = v00 * (1.0 - wx) + v10 * wx;
	let bottom = v01 * (1.0 - wx) + v11 * wx;
	top * (1.0 - wy) + bottom * wy
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::Luma;

	#[test]
	fn flat_image_stays_flat() {
		let gray = GrayImage::from_pixel(64, 64, Luma([100]));
		let out = equalize_adapthist(&DynamicImage::ImageLuma8(gray), 16.0, 0.02);
		let out = out.to_luma8();
		let first = out.get_pixel(0, 0).0[0];
		assert!(out.pixels().all(|p| p.0[0] == first));
	}

	#[test]
	fn preserves_dimensions() {
		let gray = GrayImage::from_fn(40, 30, |x, y| Luma([((x + y) % 256) as u8]));
		let out = equalize_adapthist(&DynamicImage::ImageLuma8(gray), 8.0, 0.02);
		assert_eq!(out.dimensions(), (40, 30));
	}
}
