//! One function per CLI subcommand. `main.rs` only parses arguments and dispatches here; the
//! actual stage drivers live in [`render_pipeline`].

use crate::auth;
use crate::config::RunConfig;
use anyhow::{Context, Result, bail};
use render_pipeline::export::{ExternalBoxRenderer, ExternalWkCuber, export_catmaid, export_webknossos};
use render_pipeline::ingest::catmaid_replay::CatmaidReplayAdaptor;
use render_pipeline::ingest::clem::ClemAdaptor;
use render_pipeline::ingest::fastem::FastemAdaptor;
use render_pipeline::mipmap::{IngestAdaptor, MipmapDriver};
use render_pipeline::postcorrect::{PostCorrectParams, SectionInput, post_correct_sections};
use render_pipeline::stitch::{ExternalMontageSolver, PairMatchParams, stitch_stack};
use render_pipeline::upload::upload_stacks;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which on-disk acquisition layout [`run_mipmap`] should ingest.
#[derive(Debug, Clone)]
pub enum IngestMode {
	Clem,
	Fastem { section_name: String, use_positions: bool },
	CatmaidReplay,
}

pub fn run_auth_save(path: &Path) -> Result<()> {
	let username = prompt_line("username:")?;
	let password = prompt_line("password:")?;
	auth::save_auth(path, &username, &password)?;
	log::info!("saved auth credentials to {}", path.display());
	Ok(())
}

pub fn run_auth_show(path: &Path) -> Result<()> {
	let credentials = auth::load_auth(path)?;
	println!("username:\n{}", credentials.username);
	println!("password:\n{}", credentials.password);
	Ok(())
}

fn prompt_line(prompt: &str) -> Result<String> {
	use std::io::Write;
	print!("{prompt}\n");
	std::io::stdout().flush().ok();
	let mut line = String::new();
	std::io::stdin().read_line(&mut line).context("reading from stdin")?;
	Ok(line.trim().to_string())
}

/// Post-corrects every immediate sub-directory of `root`, in sorted name order (which also
/// fixes the neighbour-fallback adjacency).
pub fn run_post_correct(root: &Path, params: &PostCorrectParams) -> Result<()> {
	let mut entries: Vec<PathBuf> = std::fs::read_dir(root).with_context(|| format!("reading {}", root.display()))?.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_dir()).collect();
	entries.sort();
	if entries.is_empty() {
		bail!("no section directories found under {}", root.display());
	}

	let sections: Vec<SectionInput> = entries.into_iter().enumerate().map(|(index, dir)| SectionInput { index, dir }).collect();
	let outcomes = post_correct_sections(&sections, params)?;
	let failed = outcomes.iter().filter(|o| matches!(o, render_pipeline::postcorrect::SectionOutcome::Failed { .. })).count();
	log::info!("post-corrected {}/{} section(s)", outcomes.len() - failed, outcomes.len());
	Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn run_mipmap(mode: IngestMode, project_path: &Path, mipmap_path: &Path, z_resolution: f64, run: &RunConfig) -> Result<()> {
	match mode {
		IngestMode::Clem => run_mipmap_with(ClemAdaptor::new(project_path, mipmap_path), run, z_resolution).await,
		IngestMode::Fastem { section_name, use_positions } => {
			let adaptor = FastemAdaptor::new(project_path, mipmap_path, &section_name, use_positions)?;
			run_mipmap_with(adaptor, run, z_resolution).await
		}
		IngestMode::CatmaidReplay => run_mipmap_with(CatmaidReplayAdaptor::new(project_path, mipmap_path), run, z_resolution).await,
	}
}

async fn run_mipmap_with<A: IngestAdaptor>(adaptor: A, run: &RunConfig, z_resolution: f64) -> Result<()> {
	let driver = MipmapDriver::new(adaptor, run.cpu_parallel);
	let stacks = driver.run().await?;
	if stacks.is_empty() {
		bail!("ingest produced no tiles");
	}

	let mut sealed = Vec::with_capacity(stacks.len());
	for stack in stacks {
		sealed.push(stack.seal()?);
	}

	let client = run.connect()?;
	upload_stacks(&client, &sealed, z_resolution, run.clobber).await
}

#[allow(clippy::too_many_arguments)]
pub async fn run_stitch(stacks: &[String], overlap: Option<u32>, solver_executable: &Path, run: &RunConfig) -> Result<()> {
	let client = Arc::new(run.connect()?);
	let solver = ExternalMontageSolver::new(solver_executable);

	let mut params = PairMatchParams::default();
	if let Some(overlap) = overlap {
		params.overlap = overlap;
	}

	for stack in stacks {
		let stitched = stitch_stack(client.clone(), &run.project, stack, &params, run.cpu_parallel, run.clobber, &solver).await?;
		log::info!("stack '{stack}' stitched into '{stitched}'");
	}
	Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn run_export_catmaid(stacks: &[String], output_dir: &Path, tile_size: u32, fmt: &str, box_render_executable: &Path, run: &RunConfig) -> Result<()> {
	let client = run.connect()?;
	let renderer = ExternalBoxRenderer::new(box_render_executable);
	let project_yaml = export_catmaid(&client, &run.project, stacks, output_dir, tile_size, fmt, run.parallel, &renderer).await?;
	log::info!("exported {} stack(s) to CATMAID format: {}", stacks.len(), project_yaml.display());
	Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn run_export_webknossos(
	stack: &str,
	catmaid_dir: &Path,
	tile_size: u32,
	fmt: &str,
	box_render_executable: &Path,
	wk_cuber_executable: &Path,
	remove_catmaid_dir: bool,
	run: &RunConfig,
) -> Result<()> {
	let client = run.connect()?;
	let renderer = ExternalBoxRenderer::new(box_render_executable);
	let cuber = ExternalWkCuber::new(wk_cuber_executable);
	export_webknossos(&client, &run.project, stack, catmaid_dir, tile_size, fmt, run.parallel, &renderer, &cuber, remove_catmaid_dir).await
}
