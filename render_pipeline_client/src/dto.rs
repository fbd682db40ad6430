use anyhow::{Context, Result};
use render_pipeline_core::utils::float_to_int;
use render_pipeline_geometry::tile::{TileLayout, TileSpec};
use render_pipeline_geometry::{AffineTransform, ImagePyramid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub(crate) struct LayoutDto {
	#[serde(rename = "sectionId")]
	section_id: String,
	#[serde(rename = "scopeId")]
	scope_id: String,
	#[serde(rename = "cameraId", skip_serializing_if = "Option::is_none")]
	camera_id: Option<String>,
	#[serde(rename = "imageRow")]
	image_row: u32,
	#[serde(rename = "imageCol")]
	image_col: u32,
	#[serde(rename = "stageX")]
	stage_x: f64,
	#[serde(rename = "stageY")]
	stage_y: f64,
	#[serde(rename = "pixelsize")]
	pixel_size: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct MipmapLevelDto {
	#[serde(rename = "imageUrl")]
	image_url: String,
}

/// `mpicbg.trakem2.transform.AffineModel2D`'s wire encoding: six numbers, row-major, applied
/// as `x' = m00*x + m01*y + b0`, `y' = m10*x + m11*y + b1`.
#[derive(Debug, Serialize)]
pub(crate) struct TransformSpecDto {
	#[serde(rename = "type")]
	kind: &'static str,
	#[serde(rename = "className")]
	class_name: &'static str,
	#[serde(rename = "dataString")]
	data_string: String,
}

impl From<&AffineTransform> for TransformSpecDto {
	fn from(t: &AffineTransform) -> Self {
		TransformSpecDto {
			kind: "leaf",
			class_name: "mpicbg.trakem2.transform.AffineModel2D",
			data_string: format!("{} {} {} {} {} {}", t.m00, t.m10, t.m01, t.m11, t.b0, t.b1),
		}
	}
}

#[derive(Debug, Serialize)]
pub(crate) struct TransformListDto {
	#[serde(rename = "type")]
	kind: &'static str,
	#[serde(rename = "specList")]
	spec_list: Vec<TransformSpecDto>,
}

impl From<&[AffineTransform]> for TransformListDto {
	fn from(transforms: &[AffineTransform]) -> Self {
		TransformListDto { kind: "list", spec_list: transforms.iter().map(TransformSpecDto::from).collect() }
	}
}

#[derive(Debug, Serialize)]
pub(crate) struct TileSpecDto {
	#[serde(rename = "tileId")]
	tile_id: String,
	z: u32,
	width: u32,
	height: u32,
	#[serde(rename = "minX")]
	min_x: f64,
	#[serde(rename = "minY")]
	min_y: f64,
	#[serde(rename = "maxX")]
	max_x: f64,
	#[serde(rename = "maxY")]
	max_y: f64,
	#[serde(rename = "minIntensity")]
	min_intensity: f64,
	#[serde(rename = "maxIntensity")]
	max_intensity: f64,
	layout: LayoutDto,
	#[serde(rename = "mipmapLevels")]
	mipmap_levels: BTreeMap<String, MipmapLevelDto>,
	transforms: TransformListDto,
}

fn pyramid_to_mipmap_levels(pyramid: &ImagePyramid) -> BTreeMap<String, MipmapLevelDto> {
	pyramid.iter().map(|(level, url)| (level.to_string(), MipmapLevelDto { image_url: url.to_string() })).collect()
}

impl From<&TileSpec> for TileSpecDto {
	fn from(spec: &TileSpec) -> Self {
		TileSpecDto {
			tile_id: spec.tile_id.clone(),
			z: spec.z_value,
			width: spec.width,
			height: spec.height,
			min_x: spec.min_x,
			min_y: spec.min_y,
			max_x: spec.max_x,
			max_y: spec.max_y,
			min_intensity: spec.min_intensity,
			max_intensity: spec.max_intensity,
			layout: LayoutDto {
				section_id: spec.layout.section_id.clone(),
				scope_id: spec.layout.scope_id.clone(),
				camera_id: spec.layout.camera_id.clone(),
				image_row: spec.layout.image_row,
				image_col: spec.layout.image_col,
				stage_x: spec.layout.stage_x,
				stage_y: spec.layout.stage_y,
				pixel_size: spec.layout.pixel_size,
			},
			mipmap_levels: pyramid_to_mipmap_levels(&spec.pyramid),
			transforms: TransformListDto::from(spec.transforms.as_slice()),
		}
	}
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateStackDto {
	#[serde(rename = "stackResolutionX")]
	pub resolution_x: f64,
	#[serde(rename = "stackResolutionY")]
	pub resolution_y: f64,
	#[serde(rename = "stackResolutionZ")]
	pub resolution_z: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StackBounds {
	#[serde(rename = "minX")]
	pub min_x: f64,
	#[serde(rename = "minY")]
	pub min_y: f64,
	#[serde(rename = "maxX")]
	pub max_x: f64,
	#[serde(rename = "maxY")]
	pub max_y: f64,
	#[serde(rename = "minZ")]
	pub min_z: f64,
	#[serde(rename = "maxZ")]
	pub max_z: f64,
}

/// One accepted correspondence between two tiles, ready for `import_pointmatches`.
#[derive(Debug, Clone, Serialize)]
pub struct PointMatchDto {
	#[serde(rename = "pGroupId")]
	pub p_group_id: String,
	#[serde(rename = "pId")]
	pub p_id: String,
	#[serde(rename = "qGroupId")]
	pub q_group_id: String,
	#[serde(rename = "qId")]
	pub q_id: String,
	#[serde(rename = "matches")]
	pub matches: MatchesDto,
}

/// render-ws stores correspondences as `[xs, ys]` rather than a list of points.
#[derive(Debug, Clone, Serialize)]
pub struct MatchesDto {
	pub p: [Vec<f64>; 2],
	pub q: [Vec<f64>; 2],
	pub w: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct FullStackMetadataDto {
	#[serde(rename = "currentVersion")]
	current_version: StackMetadata,
}

/// The resolution a stack was created with, as reported by `/stack/{stack}/currentVersion`.
#[derive(Debug, Clone, Deserialize)]
pub struct StackMetadata {
	#[serde(rename = "stackResolutionX")]
	pub resolution_x: f64,
	#[serde(rename = "stackResolutionY")]
	pub resolution_y: f64,
	#[serde(rename = "stackResolutionZ")]
	pub resolution_z: f64,
}

impl StackMetadata {
	pub(crate) fn from_full_stack_metadata(body: &str) -> Result<StackMetadata> {
		let full: FullStackMetadataDto = serde_json::from_str(body).context("parsing stack metadata response")?;
		Ok(full.current_version)
	}
}

/// One tile's bounding box as reported by `/section/{z}/bounds` or `/stack/{stack}/bounds`.
#[derive(Debug, Clone, Deserialize)]
pub struct TileBounds {
	#[serde(rename = "tileId")]
	pub tile_id: String,
	#[serde(rename = "sectionId")]
	pub section_id: String,
	#[serde(rename = "minX")]
	pub min_x: f64,
	#[serde(rename = "minY")]
	pub min_y: f64,
	#[serde(rename = "maxX")]
	pub max_x: f64,
	#[serde(rename = "maxY")]
	pub max_y: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct LayoutReadDto {
	#[serde(rename = "sectionId")]
	section_id: String,
	#[serde(rename = "scopeId", default)]
	scope_id: String,
	#[serde(rename = "cameraId", default)]
	camera_id: Option<String>,
	#[serde(rename = "imageRow", default)]
	image_row: u32,
	#[serde(rename = "imageCol", default)]
	image_col: u32,
	#[serde(rename = "stageX", default)]
	stage_x: f64,
	#[serde(rename = "stageY", default)]
	stage_y: f64,
	#[serde(rename = "pixelsize", default)]
	pixel_size: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct MipmapLevelReadDto {
	#[serde(rename = "imageUrl")]
	image_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TransformSpecReadDto {
	#[serde(rename = "dataString")]
	data_string: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TransformListReadDto {
	#[serde(rename = "specList", default)]
	spec_list: Vec<TransformSpecReadDto>,
}

/// Wire shape of a tile-spec as the render server returns it from
/// `/stack/{stack}/tile/{tileId}` and `/stack/{stack}/z/{z}/tile-specs`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TileSpecReadDto {
	#[serde(rename = "tileId")]
	tile_id: String,
	z: f64,
	width: u32,
	height: u32,
	#[serde(rename = "minX")]
	min_x: f64,
	#[serde(rename = "minY")]
	min_y: f64,
	#[serde(rename = "maxX")]
	max_x: f64,
	#[serde(rename = "maxY")]
	max_y: f64,
	#[serde(rename = "minIntensity", default)]
	min_intensity: f64,
	#[serde(rename = "maxIntensity", default)]
	max_intensity: f64,
	layout: LayoutReadDto,
	#[serde(rename = "mipmapLevels", default)]
	mipmap_levels: BTreeMap<String, MipmapLevelReadDto>,
	#[serde(default)]
	transforms: TransformListReadDto,
}

impl Default for TransformListReadDto {
	fn default() -> Self {
		TransformListReadDto { spec_list: Vec::new() }
	}
}

/// Parses the `"m00 m10 m01 m11 b0 b1"` encoding `TransformSpecDto` writes back into an
/// [`AffineTransform`].
fn parse_affine(data_string: &str) -> Result<AffineTransform> {
	let values: Vec<f64> = data_string
		.split_whitespace()
		.map(|s| s.parse::<f64>().with_context(|| format!("parsing affine component {s:?} in {data_string:?}")))
		.collect::<Result<_>>()?;
	let [m00, m10, m01, m11, b0, b1]: [f64; 6] = values.try_into().map_err(|v: Vec<f64>| anyhow::anyhow!("affine transform dataString has {} components, expected 6: {data_string:?}", v.len()))?;
	Ok(AffineTransform::new(m00, m01, m10, m11, b0, b1))
}

impl TileSpecReadDto {
	pub(crate) fn into_tile_spec(self, stack_name: &str) -> Result<TileSpec> {
		let z_value: u32 = float_to_int(self.z).with_context(|| format!("converting z={} to an integer section index", self.z))?;
		let pyramid: ImagePyramid = self.mipmap_levels.into_iter().filter_map(|(level, dto)| level.parse::<u32>().ok().map(|level| (level, dto.image_url))).collect();
		let transforms = self.transforms.spec_list.iter().map(|spec| parse_affine(&spec.data_string)).collect::<Result<Vec<_>>>().context("parsing tile-spec transforms")?;
		Ok(TileSpec {
			tile_id: self.tile_id,
			stack_name: stack_name.to_string(),
			z_value,
			min_x: self.min_x,
			min_y: self.min_y,
			max_x: self.max_x,
			max_y: self.max_y,
			width: self.width,
			height: self.height,
			min_intensity: self.min_intensity,
			max_intensity: self.max_intensity,
			pyramid,
			layout: TileLayout {
				scope_id: self.layout.scope_id,
				camera_id: self.layout.camera_id,
				section_id: self.layout.section_id,
				image_row: self.layout.image_row,
				image_col: self.layout.image_col,
				pixel_size: self.layout.pixel_size,
				stage_x: self.layout.stage_x,
				stage_y: self.layout.stage_y,
			},
			transforms,
		})
	}
}

pub(crate) fn parse_tile_specs(body: &str, stack_name: &str) -> Result<Vec<TileSpec>> {
	let dtos: Vec<TileSpecReadDto> = serde_json::from_str(body).context("parsing tile-specs response")?;
	dtos.into_iter().map(|dto| dto.into_tile_spec(stack_name)).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_affine_data_string() {
		let t = parse_affine("1 0 0 1 5.5 -2").unwrap();
		assert_eq!(t.apply_point([0.0, 0.0]), [5.5, -2.0]);
	}

	#[test]
	fn rejects_wrong_component_count() {
		assert!(parse_affine("1 0 0 1").is_err());
	}

	#[test]
	fn round_trips_a_tile_spec_through_the_wire_format() {
		let body = r#"[{
			"tileId": "t0",
			"z": 3.0,
			"width": 100,
			"height": 200,
			"minX": 0.0,
			"minY": 0.0,
			"maxX": 100.0,
			"maxY": 200.0,
			"minIntensity": 0.0,
			"maxIntensity": 65535.0,
			"layout": {
				"sectionId": "s3",
				"scopeId": "scope",
				"imageRow": 0,
				"imageCol": 0,
				"stageX": 10.0,
				"stageY": 20.0,
				"pixelsize": 4.0
			},
			"mipmapLevels": {"0": {"imageUrl": "file:///tile.tiff"}},
			"transforms": {"type": "list", "specList": [{"dataString": "1 0 0 1 0 0"}]}
		}]"#;
		let specs = parse_tile_specs(body, "stack0").unwrap();
		assert_eq!(specs.len(), 1);
		assert_eq!(specs[0].tile_id, "t0");
		assert_eq!(specs[0].z_value, 3);
		assert_eq!(specs[0].stack_name, "stack0");
		assert_eq!(specs[0].pyramid.get(0), Some("file:///tile.tiff"));
		assert_eq!(specs[0].transforms.len(), 1);
	}
}
