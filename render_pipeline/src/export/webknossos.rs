//! WebKnossos export: reuses (or produces) a CATMAID tile tree, then hands it to an external
//! cubing script that converts it into a WebKnossos dataset.
//!
//! There is no direct render → WK writer: the cubing step always goes through an on-disk
//! CATMAID tree, the way the reference pipeline treats CATMAID export as WK export's first
//! stage rather than duplicating the box-render logic.

use crate::export::catmaid::{BoxRenderer, export_catmaid};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use render_pipeline_client::RenderClient;
use render_pipeline_derive::context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Voxel size in nanometres, the unit the cubing script expects as `x,y,z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelSize {
	pub x: u32,
	pub y: u32,
	pub z: u32,
}

/// Abstracts over the external CATMAID-to-WebKnossos cubing script (no Rust binding exists
/// for it, the same reasoning as [`crate::stitch::MontageSolver`]).
#[async_trait]
pub trait WkCuber: Send + Sync {
	async fn cube(&self, input_directory: &Path, dataset_name: &str, layer_name: &str, voxel_size: VoxelSize) -> Result<()>;
}

/// Shells out to a cubing script taking `(input_directory, dataset_name, layer_name,
/// "x,y,z")` as positional arguments.
#[derive(Debug, Clone)]
pub struct ExternalWkCuber {
	executable: PathBuf,
}

impl ExternalWkCuber {
	pub fn new(executable: impl Into<PathBuf>) -> Self {
		ExternalWkCuber { executable: executable.into() }
	}
}

#[async_trait]
impl WkCuber for ExternalWkCuber {
	async fn cube(&self, input_directory: &Path, dataset_name: &str, layer_name: &str, voxel_size: VoxelSize) -> Result<()> {
		let status = Command::new(&self.executable)
			.arg(input_directory)
			.arg(dataset_name)
			.arg(layer_name)
			.arg(format!("{},{},{}", voxel_size.x, voxel_size.y, voxel_size.z))
			.status()
			.await
			.with_context(|| format!("spawning wk-cuber script {:?}", self.executable))?;
		if !status.success() {
			bail!("wk-cuber script {:?} exited with {status}", self.executable);
		}
		Ok(())
	}
}

#[derive(Debug, Deserialize)]
struct ProjectFileDto {
	project: ProjectInnerDto,
}

#[derive(Debug, Deserialize)]
struct ProjectInnerDto {
	stacks: Vec<StackEntryDto>,
}

#[derive(Debug, Deserialize)]
struct StackEntryDto {
	title: String,
	resolution: String,
}

/// Parses `project.yaml`'s `"(x, y, z)"`-formatted resolution string for `stack`, truncating
/// each component to an integer nanometre voxel size (mirroring the reference's
/// `tuple(map(int, ...))`).
fn voxel_size_for_stack(project_yaml: &Path, stack: &str) -> Result<VoxelSize> {
	let body = std::fs::read_to_string(project_yaml).with_context(|| format!("reading {}", project_yaml.display()))?;
	let project: ProjectFileDto = serde_yaml_ng::from_str(&body).with_context(|| format!("parsing {}", project_yaml.display()))?;
	let entry = project.project.stacks.iter().find(|s| s.title == stack).ok_or_else(|| anyhow::anyhow!("stack '{stack}' not found in {}", project_yaml.display()))?;

	let trimmed = entry.resolution.trim().trim_start_matches('(').trim_end_matches(')');
	let components: Vec<f64> = trimmed.split(',').map(|s| s.trim().parse::<f64>().with_context(|| format!("parsing resolution component {s:?}"))).collect::<Result<_>>()?;
	let [x, y, z]: [f64; 3] = components.try_into().map_err(|v: Vec<f64>| anyhow::anyhow!("resolution has {} components, expected 3", v.len()))?;
	Ok(VoxelSize { x: x as u32, y: y as u32, z: z as u32 })
}

/// Exports `stack` to WebKnossos format under `wk_dir`: produces (or reuses) a CATMAID tree
/// at `catmaid_dir`, then invokes `cuber` once with the voxel size read back out of its
/// `project.yaml`. Optionally removes the CATMAID tree afterwards.
#[context("exporting stack '{stack}' to WebKnossos format")]
#[allow(clippy::too_many_arguments)]
pub async fn export_webknossos(
	client: &RenderClient,
	project: &str,
	stack: &str,
	catmaid_dir: &Path,
	tile_size: u32,
	fmt: &str,
	parallel: usize,
	box_renderer: &dyn BoxRenderer,
	cuber: &dyn WkCuber,
	remove_catmaid_dir: bool,
) -> Result<()> {
	let stack_dir = catmaid_dir.join(stack);
	let project_yaml = if stack_dir.is_dir() {
		log::info!("reusing existing CATMAID tree for '{stack}' at {}", stack_dir.display());
		catmaid_dir.join("project.yaml")
	} else {
		let stacks = [stack.to_string()];
		export_catmaid(client, project, &stacks, catmaid_dir, tile_size, fmt, parallel, box_renderer).await?
	};

	let voxel_size = voxel_size_for_stack(&project_yaml, stack)?;
	log::info!("converting '{stack}' to WebKnossos format (voxel size {:?})", voxel_size);
	cuber.cube(&stack_dir, project, stack, voxel_size).await?;
	log::info!("conversion of '{stack}' to WebKnossos complete");

	if remove_catmaid_dir {
		std::fs::remove_dir_all(catmaid_dir).with_context(|| format!("removing CATMAID directory {}", catmaid_dir.display()))?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn parses_voxel_size_from_project_yaml() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("project.yaml");
		std::fs::write(&path, "project:\n  stacks:\n  - title: raw_stitched\n    resolution: \"(4.0, 4.0, 90.0)\"\n").unwrap();
		let voxel = voxel_size_for_stack(&path, "raw_stitched").unwrap();
		assert_eq!(voxel, VoxelSize { x: 4, y: 4, z: 90 });
	}

	#[test]
	fn errors_when_stack_missing_from_project_yaml() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("project.yaml");
		std::fs::write(&path, "project:\n  stacks:\n  - title: other\n    resolution: \"(4.0, 4.0, 90.0)\"\n").unwrap();
		assert!(voxel_size_for_stack(&path, "raw_stitched").is_err());
	}
}
