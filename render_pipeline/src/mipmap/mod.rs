//! Concurrent tile ingest: turns whatever an [`IngestAdaptor`] finds on disk into Gaussian
//! image pyramids and [`Tile`] records, then aggregates the results into sealed [`Stack`]s.

mod pyramid_io;

pub use pyramid_io::{to_server_path, write_pyramid};

use anyhow::{Result, anyhow};
use render_pipeline_core::progress::get_progress_bar;
use render_pipeline_geometry::{Stack, tile::Tile};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A source-specific ingest strategy: enumerates the work items in a project directory and
/// turns each one into the tile(s) it produces.
///
/// Implementors are the CLEM, FASTEM and CATMAID-replay adaptors; the driver here is
/// deliberately ignorant of any of their on-disk layouts.
pub trait IngestAdaptor: Send + Sync + 'static {
	type Item: Send + 'static;

	fn find_files(&self) -> Result<Vec<Self::Item>>;

	/// Produces every tile `item` yields (usually one, sometimes one per fluorescence
	/// channel). Runs on the I/O pool; may block on disk reads and pyramid writes.
	fn create_mipmaps(&self, item: &Self::Item) -> Result<Vec<Tile>>;
}

/// Drives an [`IngestAdaptor`] to completion: submits every work item to a bounded pool,
/// aggregates tiles into their `(stack, z)` sections as they complete, and seals every stack
/// once all items have finished. Any item's failure cancels the rest.
pub struct MipmapDriver<A: IngestAdaptor> {
	adaptor: Arc<A>,
	parallel: usize,
}

impl<A: IngestAdaptor> MipmapDriver<A> {
	pub fn new(adaptor: A, parallel: usize) -> Self {
		MipmapDriver { adaptor: Arc::new(adaptor), parallel: parallel.max(1) }
	}

	pub async fn run(&self) -> Result<Vec<Stack>> {
		let items = self.adaptor.find_files()?;
		let total = items.len() as u64;
		let mut progress = get_progress_bar("mipmapping tiles", total);

		let semaphore = Arc::new(Semaphore::new(self.parallel));
		let mut set = JoinSet::new();
		for item in items {
			let adaptor = self.adaptor.clone();
			let semaphore = semaphore.clone();
			set.spawn(async move {
				let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
				tokio::task::spawn_blocking(move || adaptor.create_mipmaps(&item)).await.map_err(|e| anyhow!("mipmap task panicked: {e}"))?
			});
		}

		let mut stacks: HashMap<String, Stack> = HashMap::new();
		while let Some(joined) = set.join_next().await {
			let tiles = match joined {
				Ok(Ok(tiles)) => tiles,
				Ok(Err(error)) => {
					set.abort_all();
					return Err(error);
				}
				Err(join_error) => {
					set.abort_all();
					return Err(anyhow!("mipmap task failed to join: {join_error}"));
				}
			};
			for tile in tiles {
				let stack = stacks.entry(tile.stack_name.clone()).or_insert_with(|| Stack::new(&tile.stack_name));
				stack.section_mut(tile.z_value).add_tile(tile)?;
			}
			progress.inc(1);
		}

		progress.finish();
		let mut result: Vec<Stack> = stacks.into_values().collect();
		result.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(result)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use render_pipeline_geometry::axis::Axis;
	use render_pipeline_geometry::pyramid::ImagePyramid;
	use render_pipeline_geometry::tile::{AcquisitionTime, TileLayout};

	struct StubAdaptor {
		count: usize,
	}

	fn layout() -> TileLayout {
		TileLayout { scope_id: "scope".into(), camera_id: None, section_id: "s0".into(), image_row: 0, image_col: 0, pixel_size: 1.0, stage_x: 0.0, stage_y: 0.0 }
	}

	impl IngestAdaptor for StubAdaptor {
		type Item = usize;

		fn find_files(&self) -> Result<Vec<usize>> {
			Ok((0..self.count).collect())
		}

		fn create_mipmaps(&self, item: &usize) -> Result<Vec<Tile>> {
			let axes = [Axis::unit(0.0, 10.0, (*item as f64) * 10.0), Axis::unit(0.0, 10.0, 0.0)];
			Ok(vec![Tile::new("stack", 0, axes, AcquisitionTime::Synthetic(item.to_string()), 0.0, 255.0, ImagePyramid::new(), layout(), vec![], 10, 10)])
		}
	}

	#[tokio::test]
	async fn aggregates_tiles_into_one_stack() {
		let driver = MipmapDriver::new(StubAdaptor { count: 5 }, 2);
		let stacks = driver.run().await.unwrap();
		assert_eq!(stacks.len(), 1);
		assert_eq!(stacks[0].z_values().count(), 1);
	}
}
