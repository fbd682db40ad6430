//! Stitches an unaligned, grid-placed stack: finds tile seams, matches them with SIFT+RANSAC,
//! keeps only the tiles reachable from each other through accepted matches, and hands the
//! result to an external montage solver.

mod discover;
mod montage;
mod pairmatch;

pub use discover::{Direction, TilePair, discover_tilepairs};
pub use montage::{ExternalMontageSolver, MontageParams, MontageSolver};
pub use pairmatch::{PairMatchParams, match_pair};

use anyhow::{Result, anyhow, bail};
use render_pipeline_client::{ClobberPolicy, PointMatchDto, RenderClient};
use render_pipeline_core::progress::get_progress_bar;
use render_pipeline_derive::context;
use render_pipeline_geometry::connectivity::{Edge, largest_connected_component};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

/// Stitches `stack`, uploading the surviving tiles to `{stack}_matching`, the surviving
/// pointmatches to `{project}_{stack}_matches`, and invoking `solver` to produce
/// `{stack}_matching_stitched`. Returns the name the solver wrote its result to.
#[context("stitching stack '{stack}'")]
pub async fn stitch_stack(client: Arc<RenderClient>, project: &str, stack: &str, params: &PairMatchParams, parallel: usize, clobber: ClobberPolicy, solver: &dyn MontageSolver) -> Result<String> {
	let z_values = client.get_z_values(stack).await?;
	if z_values.is_empty() {
		bail!("stack '{stack}' has no z values");
	}
	log::info!("stitching {} z-level(s) of stack '{stack}'", z_values.len());

	let mut per_z = Vec::with_capacity(z_values.len());
	for z in &z_values {
		let bounds = client.get_tile_bounds_for_z(stack, *z).await?;
		let (pairs, size) = discover_tilepairs(&bounds)?;
		per_z.push((*z, pairs, size));
	}
	let total_pairs: usize = per_z.iter().map(|(_, pairs, _)| pairs.len()).sum();

	let mut progress = get_progress_bar("matching tilepairs", total_pairs as u64);
	let image_limit = Arc::new(Mutex::new(()));
	let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
	let mut set = JoinSet::new();

	for (z, pairs, size) in per_z {
		for pair in pairs {
			let client = client.clone();
			let image_limit = image_limit.clone();
			let semaphore = semaphore.clone();
			let params = params.clone();
			let stack = stack.to_string();
			set.spawn(async move {
				let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
				let result = match_pair(&client, &stack, z, &pair, size, &params, &image_limit).await;
				(z, pair, result)
			});
		}
	}

	let mut nodes_by_z: HashMap<u64, HashSet<String>> = HashMap::new();
	let mut edges_by_z: HashMap<u64, Vec<Edge<String>>> = HashMap::new();
	let mut matches_by_z: HashMap<u64, Vec<PointMatchDto>> = HashMap::new();

	while let Some(joined) = set.join_next().await {
		let (z, pair, result) = match joined {
			Ok(value) => value,
			Err(join_error) => {
				set.abort_all();
				return Err(anyhow!("tilepair match task failed to join: {join_error}"));
			}
		};
		let outcome = match result {
			Ok(outcome) => outcome,
			Err(error) => {
				set.abort_all();
				return Err(error);
			}
		};
		progress.inc(1);

		match outcome {
			Some(point_match) => {
				let key = z.to_bits();
				nodes_by_z.entry(key).or_default().insert(pair.p_id.clone());
				nodes_by_z.entry(key).or_default().insert(pair.q_id.clone());
				edges_by_z.entry(key).or_default().push(Edge::new(pair.p_id.clone(), pair.q_id.clone()));
				matches_by_z.entry(key).or_default().push(point_match);
			}
			None => log::warn!("dropped tilepair '{}' - '{}' at z={z}: insufficient evidence", pair.p_id, pair.q_id),
		}
	}
	progress.finish();

	let mut good_tile_ids: HashSet<String> = HashSet::new();
	let mut surviving_matches: Vec<PointMatchDto> = Vec::new();
	for (key, nodes) in &nodes_by_z {
		let nodes: Vec<String> = nodes.iter().cloned().collect();
		let edges = edges_by_z.get(key).cloned().unwrap_or_default();
		let kept = largest_connected_component(&nodes, &edges);
		if let Some(matches) = matches_by_z.get(key) {
			surviving_matches.extend(matches.iter().filter(|m| kept.contains(&m.p_id) && kept.contains(&m.q_id)).cloned());
		}
		good_tile_ids.extend(kept);
	}
	if good_tile_ids.is_empty() {
		bail!("stitching '{stack}' produced no surviving tiles");
	}

	let all_specs = client.get_tile_specs_for_stack(stack).await?;
	let good_specs: Vec<_> = all_specs.into_iter().filter(|spec| good_tile_ids.contains(&spec.tile_id)).collect();
	log::info!("kept {}/{} tiles of stack '{stack}' after connectivity filtering", good_specs.len(), good_tile_ids.len());

	let metadata = client.get_stack_metadata(stack).await?;
	let matching_stack = format!("{stack}_matching");
	client.apply_clobber_policy(&matching_stack, clobber).await?;
	client.create_stack(&matching_stack, metadata.resolution_x, metadata.resolution_z).await?;
	client.import_tilespecs(&matching_stack, &good_specs).await?;
	client.set_stack_state(&matching_stack, "COMPLETE").await?;
	log::info!("uploaded '{matching_stack}' ({} tiles)", good_specs.len());

	let collection = format!("{project}_{stack}_matches");
	if clobber == ClobberPolicy::Overwrite {
		client.delete_pointmatch_collection(&collection).await?;
	}
	client.import_pointmatches(&collection, &surviving_matches).await?;
	log::info!("uploaded {} pointmatches into '{collection}'", surviving_matches.len());

	let first_section = z_values.iter().cloned().fold(f64::INFINITY, f64::min);
	let last_section = z_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
	let montage_params = MontageParams::new(client.host(), client.owner(), project, matching_stack.as_str(), collection.as_str(), first_section, last_section);
	let stitched_stack = solver.solve(&montage_params).await?;
	log::info!("stitching for '{stack}' completed: {stitched_stack}");
	Ok(stitched_stack)
}

#[cfg(test)]
mod tests {
	use super::discover::{Direction, TilePair};
	use render_pipeline_geometry::connectivity::{Edge, largest_connected_component};
	use std::collections::HashSet;

	#[test]
	fn connectivity_filter_drops_isolated_tile() {
		let nodes = vec!["a".to_string(), "b".to_string(), "c".to_string()];
		let edges = vec![Edge::new("a".to_string(), "b".to_string())];
		let kept = largest_connected_component(&nodes, &edges);
		assert_eq!(kept, HashSet::from(["a".to_string(), "b".to_string()]));
	}

	#[test]
	fn tilepair_carries_section_and_direction() {
		let pair = TilePair { p_id: "a".into(), q_id: "b".into(), match_x: 10.0, match_y: 0.0, section_id: "s0".into(), direction: Direction::Horizontal };
		assert_eq!(pair.direction, Direction::Horizontal);
		assert_eq!(pair.section_id, "s0");
	}
}
