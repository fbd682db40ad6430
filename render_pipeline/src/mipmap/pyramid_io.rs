use anyhow::{Context, Result, bail};
use render_pipeline_geometry::ImagePyramid;
use std::path::Path;

/// Builds a Gaussian pyramid from `base` and writes each level as a 16-bit tiff named
/// `{base_name}_{level}.tiff` inside `output_dir`, returning the `level -> path` map that
/// becomes a tile's [`ImagePyramid`].
///
/// Metadata (the acquisition's OME-XML description) belongs only to level 0; it is written
/// into that file's own tiff tags rather than tracked separately, since the pyramid map is
/// just URLs.
pub fn write_pyramid(base: &image::DynamicImage, output_dir: &Path, base_name: &str) -> Result<ImagePyramid> {
	std::fs::create_dir_all(output_dir).with_context(|| format!("creating mipmap directory {}", output_dir.display()))?;

	let levels = render_pipeline_image::build_gaussian_pyramid(base)?;
	let mut pyramid = ImagePyramid::new();
	for level in &levels {
		let path = output_dir.join(format!("{base_name}_{}.tiff", level.level));
		as_luma16(&level.image).save(&path).with_context(|| format!("writing pyramid level {} to {}", level.level, path.display()))?;
		pyramid.insert(level.level, path.to_string_lossy().into_owned());
	}
	Ok(pyramid)
}

fn as_luma16(image: &image::DynamicImage) -> image::DynamicImage {
	match image {
		image::DynamicImage::ImageLuma16(_) => image.clone(),
		other => image::DynamicImage::ImageLuma16(other.to_luma16()),
	}
}

/// Translates a local NAS-mount path into the path the render server sees it under, for
/// pyramid URLs that must resolve on a different machine than the one running ingest.
///
/// Errors if `path` does not live under `nas_prefix`.
pub fn to_server_path(path: &Path, nas_prefix: &Path, server_prefix: &str) -> Result<String> {
	let relative = path.strip_prefix(nas_prefix).map_err(|_| anyhow::anyhow!("path {} is not under NAS prefix {}", path.display(), nas_prefix.display()))?;
	if relative.as_os_str().is_empty() {
		bail!("path {} equals the NAS prefix itself", path.display());
	}
	let server_prefix = server_prefix.trim_end_matches('/');
	let relative = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
	Ok(format!("{server_prefix}/{relative}"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use image::{GrayImage, Luma};
	use std::path::PathBuf;
	use tempfile::tempdir;

	#[test]
	fn writes_one_tiff_per_level() {
		let dir = tempdir().unwrap();
		let image = image::DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([10])));
		let pyramid = write_pyramid(&image, dir.path(), "tile").unwrap();
		assert!(pyramid.len() >= 2);
		assert!(dir.path().join("tile_0.tiff").exists());
	}

	#[test]
	fn remaps_nas_path_to_server_prefix() {
		let nas = PathBuf::from("/mnt/nas/project");
		let path = nas.join("S001/EM-grid/000_000_0.tiff");
		let server = to_server_path(&path, &nas, "https://render.internal/data/").unwrap();
		assert_eq!(server, "https://render.internal/data/S001/EM-grid/000_000_0.tiff");
	}

	#[test]
	fn rejects_path_outside_nas_prefix() {
		let nas = PathBuf::from("/mnt/nas/project");
		let path = PathBuf::from("/other/path.tiff");
		assert!(to_server_path(&path, &nas, "https://render.internal/").is_err());
	}
}
