//! Batch tile-spec upload: turns a sealed [`SealedStack`] into a `COMPLETE` render stack.
//!
//! Stack creation, tile-spec import and the final state transition are three separate RPCs
//! with no transactional wrapper around them (see SPEC_FULL.md §5, "Atomicity"); a crash
//! between them leaves the stack in `LOADING`, which the clobber policy on the next run
//! recovers from.

use anyhow::Result;
use render_pipeline_client::{ClobberPolicy, RenderClient};
use render_pipeline_core::progress::get_progress_bar;
use render_pipeline_derive::context;
use render_pipeline_geometry::stack::SealedStack;

/// Uploads every stack in `stacks` to the render server, one at a time.
///
/// `z_resolution` is the caller-supplied physical z-spacing (the pipeline has no way to
/// derive this from tile geometry alone); it is passed through to every stack's
/// `stackResolutionZ`.
pub async fn upload_stacks(client: &RenderClient, stacks: &[SealedStack], z_resolution: f64, clobber: ClobberPolicy) -> Result<()> {
	let mut progress = get_progress_bar("uploading stacks", stacks.len() as u64);
	for stack in stacks {
		upload_one_stack(client, stack, z_resolution, clobber).await?;
		progress.inc(1);
	}
	progress.finish();
	Ok(())
}

#[context("uploading stack '{}'", stack.name)]
async fn upload_one_stack(client: &RenderClient, stack: &SealedStack, z_resolution: f64, clobber: ClobberPolicy) -> Result<()> {
	client.apply_clobber_policy(&stack.name, clobber).await?;
	client.create_stack(&stack.name, stack.pixel_size, z_resolution).await?;
	client.import_tilespecs(&stack.name, &stack.tile_specs).await?;
	client.set_stack_state(&stack.name, "COMPLETE").await?;
	log::info!("uploaded stack {} ({} tiles)", stack.name, stack.tile_specs.len());
	Ok(())
}
