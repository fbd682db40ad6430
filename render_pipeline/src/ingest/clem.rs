//! CLEM ingest: correlative light-EM acquisitions stored as multi-page OME-TIFFs under
//! `S###` section directories, one sub-directory per detector grid (`CLEM-grid`, `EM-grid`).
//!
//! Every tiff page is one channel of one tile; each page's OME-XML description (plus a
//! handful of tags on the page itself) carries everything needed to place it in world space.

use crate::mipmap::{IngestAdaptor, write_pyramid};
use anyhow::{Context, Result, anyhow, bail};
use render_pipeline_derive::context;
use render_pipeline_geometry::axis::Axis;
use render_pipeline_geometry::pyramid::ImagePyramid;
use render_pipeline_geometry::tile::{AcquisitionTime, Tile, TileLayout};
use render_pipeline_geometry::transform::{AffineTransform, compose_all};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use time::PrimitiveDateTime;
use time::format_description::well_known::Iso8601;

/// CLEM stage positions are reported in metres despite the OME spec mandating micrometres;
/// the acquisition software never fixed this, so every position is scaled up unconditionally.
pub const CLEM_STAGE_POSITION_SCALE: f64 = 1e6;

/// The acquisition's coordinate origin is the bottom-left corner; world space expects
/// top-left, so the y stage position is negated unconditionally.
pub const CLEM_Y_AXIS_INVERTED: bool = true;

const SECTION_DIR_PREFIX: &str = "S";
static TIFFILE_RX: LazyLock<regex::Regex> = LazyLock::new(|| regex::Regex::new(r"^tile-(\d{5})x(\d{5})\.tif$").unwrap());

/// Maps a datatype sub-directory name to the stack name its electron-microscopy channel
/// (`Secondary electrons`) is uploaded under. Fluorescence channels get their own
/// `exc_{wavelength}nm` stack regardless of this mapping.
fn stack_for_datatype(datatype_dir: &str) -> Option<&'static str> {
	match datatype_dir {
		"CLEM-grid" => Some("EM_lomag"),
		"EM-grid" => Some("EM_himag"),
		_ => None,
	}
}

const DATATYPE_DIRS: [&str; 2] = ["CLEM-grid", "EM-grid"];

/// One tiff file found under a section's datatype directory; every page inside becomes a
/// separate [`Tile`] when mipmapped.
#[derive(Debug, Clone)]
pub struct ClemItem {
	pub path: PathBuf,
	pub section_name: String,
	pub z_value: u32,
	pub datatype_dir: &'static str,
	pub image_col: u32,
	pub image_row: u32,
}

pub struct ClemAdaptor {
	project_path: PathBuf,
	mipmap_path: PathBuf,
}

impl ClemAdaptor {
	pub fn new(project_path: impl Into<PathBuf>, mipmap_path: impl Into<PathBuf>) -> Self {
		ClemAdaptor { project_path: project_path.into(), mipmap_path: mipmap_path.into() }
	}
}

impl IngestAdaptor for ClemAdaptor {
	type Item = ClemItem;

	#[context("scanning CLEM project at {}", self.project_path.display())]
	fn find_files(&self) -> Result<Vec<ClemItem>> {
		let mut section_dirs: Vec<PathBuf> = std::fs::read_dir(&self.project_path)?
			.filter_map(|e| e.ok())
			.map(|e| e.path())
			.filter(|p| p.is_dir() && p.file_name().is_some_and(|n| n.to_string_lossy().starts_with(SECTION_DIR_PREFIX)))
			.collect();
		section_dirs.sort();
		if section_dirs.is_empty() {
			bail!("no section directories found at {}", self.project_path.display());
		}

		let mut items = Vec::new();
		let mut first_z: Option<i64> = None;
		for section_dir in &section_dirs {
			let section_name = section_dir.file_name().expect("dir entry has a name").to_string_lossy().into_owned();
			let digits: String = section_name.chars().filter(char::is_ascii_digit).collect();
			let raw_z: i64 = digits.parse().with_context(|| format!("deriving z value from section directory name {section_name}"))?;
			let z_value = match first_z {
				None => {
					first_z = Some(raw_z);
					0
				}
				Some(first) => (raw_z - first) as u32,
			};

			for datatype_dir in DATATYPE_DIRS {
				let dir = section_dir.join(datatype_dir);
				if !dir.exists() {
					continue;
				}
				for entry in std::fs::read_dir(&dir)? {
					let entry = entry?;
					let name = entry.file_name();
					let Some(captures) = TIFFILE_RX.captures(&name.to_string_lossy()) else { continue };
					let image_col: u32 = captures[1].parse()?;
					let image_row: u32 = captures[2].parse()?;
					items.push(ClemItem { path: entry.path(), section_name: section_name.clone(), z_value, datatype_dir, image_col, image_row });
				}
			}
		}
		items.sort_by(|a, b| (a.z_value, &a.section_name, a.datatype_dir, a.image_col, a.image_row).cmp(&(b.z_value, &b.section_name, b.datatype_dir, b.image_col, b.image_row)));
		Ok(items)
	}

	#[context("reading OME-TIFF pages from {}", item.path.display())]
	fn create_mipmaps(&self, item: &ClemItem) -> Result<Vec<Tile>> {
		let pages = read_ome_pages(&item.path)?;
		let document = parse_ome_document(&pages[0].description)?;

		let mut tiles = Vec::with_capacity(pages.len());
		for page in &pages {
			tiles.push(self.tile_from_page(item, page, &document)?);
		}
		Ok(tiles)
	}
}

impl ClemAdaptor {
	fn tile_from_page(&self, item: &ClemItem, page: &OmePage, document: &OmeDocument) -> Result<Tile> {
		let image = document.images.get(&page.channel).ok_or_else(|| anyhow!("channel {:?} has no matching Image element in {}", page.channel, item.path.display()))?;

		let (stack_name, invert) = if page.channel == "Secondary electrons" {
			let stack = stack_for_datatype(item.datatype_dir).ok_or_else(|| anyhow!("unrecognised datatype directory {:?}", item.datatype_dir))?;
			(stack.to_string(), true)
		} else if page.channel.starts_with("Filtered colour ") && item.datatype_dir == "CLEM-grid" {
			let wavelength = image.excitation_wavelength.as_deref().ok_or_else(|| anyhow!("channel {:?} missing ExcitationWavelength", page.channel))?;
			(format!("exc_{wavelength}nm"), false)
		} else {
			bail!("found unexpected channel {:?} in {}", page.channel, item.path.display());
		};

		let mut local_transforms = Vec::new();
		if let Some(t) = image.transform {
			local_transforms.push(AffineTransform::new(t[0], t[1], t[2], t[3], t[4], t[5]));
		}
		let y_corrected = image.pixel_size_y / image.pixel_size_x;
		local_transforms.push(AffineTransform::scale_y(y_corrected));

		let stage_x = image.position_x * CLEM_STAGE_POSITION_SCALE;
		let stage_y = image.position_y * CLEM_STAGE_POSITION_SCALE * if CLEM_Y_AXIS_INVERTED { -1.0 } else { 1.0 };

		let bbox = compose_all(&local_transforms).bounding_box(page.width as f64, page.height as f64);
		let axes = [
			Axis::new(bbox.0, bbox.2, stage_x, image.pixel_size_x),
			Axis::new(bbox.1, bbox.3, stage_y, image.pixel_size_x),
		];

		let time = PrimitiveDateTime::parse(image.acquisition_date.trim(), &Iso8601::DEFAULT).with_context(|| format!("parsing AcquisitionDate {:?}", image.acquisition_date))?;

		let detector_name = document.detector_by_objective.get(&image.objective_id).cloned().ok_or_else(|| anyhow!("no detector found for objective {}", image.objective_id))?;

		let layout = TileLayout {
			scope_id: "SECOM".to_string(),
			camera_id: Some(detector_name),
			section_id: item.section_name.clone(),
			image_row: item.image_row,
			image_col: item.image_col,
			pixel_size: image.pixel_size_x,
			stage_x,
			stage_y,
		};

		let (lo, hi) = percentile_pair(&page.pixels, if invert { (1.0, 99.0) } else { (30.0, 99.0) });
		let pixels = if invert { invert_u16(&page.pixels) } else { page.pixels.clone() };

		let output_dir = self.mipmap_path.join(&stack_name).join(&item.section_name).join(format!("{:05}x{:05}", item.image_col, item.image_row)).join(&page.channel.replace(' ', "_"));
		let image_buf = image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_raw(page.width, page.height, pixels).context("assembling page pixel buffer")?;
		let pyramid: ImagePyramid = write_pyramid(&image::DynamicImage::ImageLuma16(image_buf), &output_dir, "tile")?;

		Ok(Tile::new(&stack_name, item.z_value, axes, AcquisitionTime::DateTime(time.assume_utc()), lo, hi, pyramid, layout, local_transforms, page.width, page.height))
	}
}

fn invert_u16(data: &[u16]) -> Vec<u16> {
	data.iter().map(|v| u16::MAX - v).collect()
}

fn percentile_pair(data: &[u16], (lo, hi): (f64, f64)) -> (f64, f64) {
	let values: Vec<f64> = data.iter().map(|v| *v as f64).collect();
	(render_pipeline_core::utils::percentile(&values, lo), render_pipeline_core::utils::percentile(&values, hi))
}

/// One decoded tiff page: its channel name (the `PageName` tag), dimensions, raw 16-bit pixel
/// data, and (page 0 only) the full OME-XML description it carries.
struct OmePage {
	channel: String,
	width: u32,
	height: u32,
	pixels: Vec<u16>,
	description: String,
}

fn read_ome_pages(path: &Path) -> Result<Vec<OmePage>> {
	let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
	let mut decoder = tiff::decoder::Decoder::new(file).with_context(|| format!("decoding tiff headers for {}", path.display()))?;

	let mut pages = Vec::new();
	loop {
		let width = decoder.get_tag_u32(tiff::tags::Tag::ImageWidth)?;
		let height = decoder.get_tag_u32(tiff::tags::Tag::ImageLength)?;
		let channel = decoder.get_tag_ascii_string(tiff::tags::Tag::PageName).with_context(|| format!("reading PageName tag from {}", path.display()))?;
		let description = if pages.is_empty() {
			decoder.get_tag_ascii_string(tiff::tags::Tag::ImageDescription).with_context(|| format!("reading ImageDescription tag from {}", path.display()))?
		} else {
			String::new()
		};

		let pixels = match decoder.read_image()? {
			tiff::decoder::DecodingResult::U16(data) => data,
			tiff::decoder::DecodingResult::U8(data) => data.into_iter().map(u16::from).collect(),
			_ => bail!("unexpected tiff sample format in {}", path.display()),
		};

		pages.push(OmePage { channel: channel.trim().to_string(), width, height, pixels, description });

		if !decoder.more_images() {
			break;
		}
		decoder.next_image()?;
	}

	if pages.is_empty() {
		bail!("found empty tifffile: {}", path.display());
	}
	Ok(pages)
}

/// The subset of one tiff's OME-XML metadata the CLEM adaptor needs, indexed by `Image/@Name`.
struct OmeImageMeta {
	pixel_size_x: f64,
	pixel_size_y: f64,
	position_x: f64,
	position_y: f64,
	objective_id: String,
	acquisition_date: String,
	excitation_wavelength: Option<String>,
	transform: Option<[f64; 6]>,
}

struct OmeDocument {
	images: HashMap<String, OmeImageMeta>,
	detector_by_objective: HashMap<String, String>,
}

/// Parses the OME-XML carried in a page-0 `ImageDescription` tag into the handful of fields
/// the CLEM adaptor needs, keyed by image name so a page's `PageName` can look itself up.
///
/// Some acquisitions prepend a handful of non-XML lines (ImageJ banner text) before the XML
/// declaration; if the first parse fails, those lines are stripped and parsing is retried.
fn parse_ome_document(description: &str) -> Result<OmeDocument> {
	match parse_ome_document_inner(description) {
		Ok(doc) => Ok(doc),
		Err(_) => {
			let stripped: String = description.splitn(8, '\n').last().unwrap_or(description).to_string();
			parse_ome_document_inner(&stripped).context("parsing OME-XML description (after stripping leading non-XML lines)")
		}
	}
}

fn parse_ome_document_inner(xml: &str) -> Result<OmeDocument> {
	use quick_xml::events::Event;
	use quick_xml::reader::Reader;

	let mut reader = Reader::from_str(xml);
	reader.config_mut().trim_text(true);

	let mut images = HashMap::new();
	let mut detector_by_objective = HashMap::new();
	let mut stack: Vec<String> = Vec::new();

	// Per-Image scratch state, reset whenever a new <Image> element starts.
	let mut current_name: Option<String> = None;
	let mut pixel_size_x = 1.0;
	let mut pixel_size_y = 1.0;
	let mut position_x = 0.0;
	let mut position_y = 0.0;
	let mut objective_id = String::new();
	let mut acquisition_date = String::new();
	let mut excitation_wavelength = None;
	let mut transform = None;
	let mut text_buf = String::new();

	let mut buf = Vec::new();
	loop {
		match reader.read_event_into(&mut buf)? {
			Event::Start(e) | Event::Empty(e) => {
				let name = local_name(e.name().as_ref());
				let attrs = read_attrs(&e);

				match name.as_str() {
					"Image" => {
						current_name = attrs.get("Name").cloned();
						pixel_size_x = 1.0;
						pixel_size_y = 1.0;
						position_x = 0.0;
						position_y = 0.0;
						objective_id.clear();
						acquisition_date.clear();
						excitation_wavelength = None;
						transform = None;
					}
					"Pixels" => {
						if let Some(v) = attrs.get("PhysicalSizeX") {
							pixel_size_x = v.parse().unwrap_or(1.0);
						}
						if let Some(v) = attrs.get("PhysicalSizeY") {
							pixel_size_y = v.parse().unwrap_or(1.0);
						}
					}
					"Channel" => {
						excitation_wavelength = attrs.get("ExcitationWavelength").cloned();
					}
					"Plane" => {
						if let Some(v) = attrs.get("PositionX") {
							position_x = v.parse().unwrap_or(0.0);
						}
						if let Some(v) = attrs.get("PositionY") {
							position_y = v.parse().unwrap_or(0.0);
						}
					}
					"ObjectiveSettings" => {
						if let Some(id) = attrs.get("ID") {
							objective_id = id.rsplit(':').next().unwrap_or(id).to_string();
						}
					}
					"Transform" => {
						let parse = |key: &str| attrs.get(key).and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0);
						transform = Some([parse("A00"), parse("A01"), parse("A10"), parse("A11"), parse("A02"), parse("A12")]);
					}
					"Detector" => {
						if let (Some(id), Some(model)) = (attrs.get("ID"), attrs.get("Model")) {
							let short_id = id.rsplit(':').next().unwrap_or(id).to_string();
							detector_by_objective.insert(short_id, model.clone());
						}
					}
					_ => {}
				}

				if matches!(e.name().as_ref(), b"AcquisitionDate") {
					text_buf.clear();
				}
				stack.push(name);
			}
			Event::Text(t) => {
				if stack.last().map(String::as_str) == Some("AcquisitionDate") {
					text_buf.push_str(&t.unescape()?);
				}
			}
			Event::End(e) => {
				let name = local_name(e.name().as_ref());
				if name == "AcquisitionDate" {
					acquisition_date = text_buf.clone();
				}
				if name == "Image" {
					if let Some(image_name) = current_name.take() {
						images.insert(
							image_name,
							OmeImageMeta { pixel_size_x, pixel_size_y, position_x, position_y, objective_id: objective_id.clone(), acquisition_date: acquisition_date.clone(), excitation_wavelength: excitation_wavelength.clone(), transform },
						);
					}
				}
				stack.pop();
			}
			Event::Eof => break,
			_ => {}
		}
		buf.clear();
	}

	Ok(OmeDocument { images, detector_by_objective })
}

fn local_name(qualified: &[u8]) -> String {
	let s = String::from_utf8_lossy(qualified);
	s.rsplit(':').next().unwrap_or(&s).to_string()
}

fn read_attrs(e: &quick_xml::events::BytesStart) -> HashMap<String, String> {
	let mut out = HashMap::new();
	for attr in e.attributes().flatten() {
		let key = local_name(attr.key.as_ref());
		if let Ok(value) = attr.unescape_value() {
			out.insert(key, value.into_owned());
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE_XML: &str = r#"<?xml version="1.0"?>
<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2012-06">
  <Instrument ID="Instrument:0">
    <Detector ID="Detector:0:1" Model="SE-detector"/>
  </Instrument>
  <Image Name="Secondary electrons">
    <AcquisitionDate>2024-01-02T03:04:05</AcquisitionDate>
    <ObjectiveSettings ID="ObjectiveSettings:1"/>
    <Pixels PhysicalSizeX="0.004" PhysicalSizeY="0.004" SizeX="100" SizeY="100">
      <Plane PositionX="0.0001" PositionY="0.0002"/>
    </Pixels>
  </Image>
</OME>
"#;

	#[test]
	fn parses_image_and_detector_metadata() {
		let doc = parse_ome_document(SAMPLE_XML).unwrap();
		let image = doc.images.get("Secondary electrons").unwrap();
		assert_eq!(image.pixel_size_x, 0.004);
		assert_eq!(image.objective_id, "1");
		assert_eq!(image.acquisition_date, "2024-01-02T03:04:05");
		assert_eq!(doc.detector_by_objective.get("1"), Some(&"SE-detector".to_string()));
	}

	#[test]
	fn strips_leading_non_xml_banner_lines() {
		let banner: String = (0..7).map(|i| format!("ImageJ banner line {i}\n")).collect();
		let prefixed = format!("{banner}{SAMPLE_XML}");
		let doc = parse_ome_document(&prefixed).unwrap();
		assert!(doc.images.contains_key("Secondary electrons"));
	}

	#[test]
	fn matches_tile_filename_pattern() {
		let captures = TIFFILE_RX.captures("tile-00012x00034.tif").unwrap();
		assert_eq!(&captures[1], "00012");
		assert_eq!(&captures[2], "00034");
	}
}
