use crate::axis::Axis;
use crate::pyramid::ImagePyramid;
use crate::transform::AffineTransform;
use render_pipeline_core::utils::sanitize_stack_name;
use std::fmt;
use time::OffsetDateTime;

/// Total-ordered acquisition marker. Real acquisitions carry a wall-clock timestamp;
/// CATMAID-replay ingest has no timestamp to recover and instead derives a synthetic,
/// per-tile-unique marker from the tile's grid position. The two variants are never mixed
/// within a single ingest run, so the derived `Ord` (by variant, then by value) is only ever
/// exercised within one variant at a time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AcquisitionTime {
	DateTime(OffsetDateTime),
	Synthetic(String),
}

impl fmt::Display for AcquisitionTime {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AcquisitionTime::DateTime(dt) => write!(f, "{dt}"),
			AcquisitionTime::Synthetic(s) => write!(f, "{s}"),
		}
	}
}

/// Layout metadata carried alongside a tile's image data: scope/camera identity, its grid
/// position within the section, and the physical stage coordinates it was captured at.
#[derive(Debug, Clone)]
pub struct TileLayout {
	pub scope_id: String,
	pub camera_id: Option<String>,
	pub section_id: String,
	pub image_row: u32,
	pub image_col: u32,
	pub pixel_size: f64,
	pub stage_x: f64,
	pub stage_y: f64,
}

/// One image at one `(stack, z)` coordinate, mutable until it is sealed into a [`Section`].
///
/// [`Section`]: crate::section::Section
#[derive(Debug, Clone)]
pub struct Tile {
	pub stack_name: String,
	pub z_value: u32,
	pub axes: [Axis; 2],
	pub acquisition_time: AcquisitionTime,
	pub min_intensity: f64,
	pub max_intensity: f64,
	pub pyramid: ImagePyramid,
	pub layout: TileLayout,
	pub local_transforms: Vec<AffineTransform>,
	pub width: u32,
	pub height: u32,
}

impl Tile {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		stack_name: &str,
		z_value: u32,
		axes: [Axis; 2],
		acquisition_time: AcquisitionTime,
		min_intensity: f64,
		max_intensity: f64,
		pyramid: ImagePyramid,
		layout: TileLayout,
		local_transforms: Vec<AffineTransform>,
		width: u32,
		height: u32,
	) -> Self {
		Tile {
			stack_name: sanitize_stack_name(stack_name),
			z_value,
			axes,
			acquisition_time,
			min_intensity,
			max_intensity,
			pyramid,
			layout,
			local_transforms,
			width,
			height,
		}
	}

	/// The tile's physical pixel size, as reported by the ingest adaptor.
	///
	/// This is independent of the axes' own `pixel_size`, which only scales `position` into
	/// `pixel_position` for placement and is `1.0` whenever an adaptor's stage coordinates are
	/// already pixel-valued (FASTEM, CATMAID-replay).
	pub fn pixel_size(&self) -> f64 {
		self.layout.pixel_size
	}
}

/// An immutable, sealed tile record ready for upload to the render server.
#[derive(Debug, Clone)]
pub struct TileSpec {
	pub tile_id: String,
	pub stack_name: String,
	pub z_value: u32,
	pub min_x: f64,
	pub min_y: f64,
	pub max_x: f64,
	pub max_y: f64,
	pub width: u32,
	pub height: u32,
	pub min_intensity: f64,
	pub max_intensity: f64,
	pub pyramid: ImagePyramid,
	pub layout: TileLayout,
	pub transforms: Vec<AffineTransform>,
}
