//! Invocation interface for the external montage solver (BigFeta): the rigid-body optimiser
//! that turns a stack's surviving pointmatches into a stitched set of tile transforms.
//!
//! The pipeline has no Rust binding for BigFeta; [`ExternalMontageSolver`] shells out to a
//! user-provided executable fed the solver schema on stdin, the way the ingest adaptors treat
//! their own external strategies as a trait boundary rather than an in-process dependency.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DEFAULT_PARALLEL_JOBS: u32 = 32;

/// Tuning parameters passed to the montage solver, matching `montage.py`'s `fetaschema`
/// defaults.
#[derive(Debug, Clone)]
pub struct MontageParams {
	pub host: String,
	pub owner: String,
	pub project: String,
	pub input_stack: String,
	pub pointmatch_collection: String,
	pub first_section: f64,
	pub last_section: f64,
	/// Transformation model: `"rigid"` (default), `"translation"`, or `"similarity"`.
	pub transformation: String,
	pub cross_pt_weight: f64,
	pub montage_pt_weight: f64,
	pub depth: u32,
	pub npts_min: u32,
	pub npts_max: u32,
	pub default_lambda: f64,
	pub translation_factor: f64,
	pub thinplate_factor: f64,
	pub n_parallel_jobs: u32,
}

impl MontageParams {
	#[allow(clippy::too_many_arguments)]
	pub fn new(host: impl Into<String>, owner: impl Into<String>, project: impl Into<String>, input_stack: impl Into<String>, pointmatch_collection: impl Into<String>, first_section: f64, last_section: f64) -> Self {
		MontageParams {
			host: host.into(),
			owner: owner.into(),
			project: project.into(),
			input_stack: input_stack.into(),
			pointmatch_collection: pointmatch_collection.into(),
			first_section,
			last_section,
			transformation: "rigid".to_string(),
			cross_pt_weight: 1.0,
			montage_pt_weight: 1.0,
			depth: 2,
			npts_min: 5,
			npts_max: 500,
			default_lambda: 0.005,
			translation_factor: 0.005,
			thinplate_factor: 1e-5,
			n_parallel_jobs: DEFAULT_PARALLEL_JOBS,
		}
	}

	/// The stack name the solver writes its result to.
	pub fn output_stack(&self) -> String {
		format!("{}_stitched", self.input_stack)
	}
}

#[derive(Debug, Serialize)]
struct StackRefDto<'a> {
	owner: &'a str,
	project: &'a str,
	name: &'a str,
	host: &'a str,
	collection_type: &'static str,
	db_interface: &'static str,
	use_rest: bool,
}

#[derive(Debug, Serialize)]
struct PointmatchRefDto<'a> {
	owner: &'a str,
	name: &'a str,
	host: &'a str,
	collection_type: &'static str,
	db_interface: &'static str,
}

#[derive(Debug, Serialize)]
struct MatrixAssemblyDto {
	cross_pt_weight: f64,
	depth: u32,
	inverse_dz: bool,
	montage_pt_weight: f64,
	npts_max: u32,
	npts_min: u32,
}

#[derive(Debug, Serialize)]
struct RegularizationDto {
	default_lambda: f64,
	thinplate_factor: f64,
	translation_factor: f64,
}

#[derive(Debug, Serialize)]
struct SolverSchemaDto<'a> {
	close_stack: bool,
	first_section: f64,
	last_section: f64,
	log_level: &'static str,
	output_mode: &'static str,
	solve_type: &'static str,
	transformation: &'a str,
	n_parallel_jobs: u32,
	input_stack: StackRefDto<'a>,
	pointmatch: PointmatchRefDto<'a>,
	output_stack: StackRefDto<'a>,
	matrix_assembly: MatrixAssemblyDto,
	regularization: RegularizationDto,
}

fn build_schema<'a>(params: &'a MontageParams, output_stack: &'a str) -> SolverSchemaDto<'a> {
	SolverSchemaDto {
		close_stack: true,
		first_section: params.first_section,
		last_section: params.last_section,
		log_level: "INFO",
		output_mode: "stack",
		solve_type: "montage",
		transformation: &params.transformation,
		n_parallel_jobs: params.n_parallel_jobs,
		input_stack: StackRefDto { owner: &params.owner, project: &params.project, name: &params.input_stack, host: &params.host, collection_type: "stack", db_interface: "render", use_rest: true },
		pointmatch: PointmatchRefDto { owner: &params.owner, name: &params.pointmatch_collection, host: &params.host, collection_type: "pointmatch", db_interface: "render" },
		output_stack: StackRefDto { owner: &params.owner, project: &params.project, name: output_stack, host: &params.host, collection_type: "stack", db_interface: "render", use_rest: true },
		matrix_assembly: MatrixAssemblyDto { cross_pt_weight: params.cross_pt_weight, depth: params.depth, inverse_dz: true, montage_pt_weight: params.montage_pt_weight, npts_max: params.npts_max, npts_min: params.npts_min },
		regularization: RegularizationDto { default_lambda: params.default_lambda, thinplate_factor: params.thinplate_factor, translation_factor: params.translation_factor },
	}
}

/// Abstracts over the montage solve step so the stitcher never links against the solver
/// directly.
#[async_trait]
pub trait MontageSolver: Send + Sync {
	/// Solves `params` and returns the name of the stack the solver wrote its result to.
	async fn solve(&self, params: &MontageParams) -> Result<String>;
}

/// Runs a montage solver executable, feeding it the solver schema as JSON on stdin.
#[derive(Debug, Clone)]
pub struct ExternalMontageSolver {
	executable: PathBuf,
}

impl ExternalMontageSolver {
	pub fn new(executable: impl Into<PathBuf>) -> Self {
		ExternalMontageSolver { executable: executable.into() }
	}
}

#[async_trait]
impl MontageSolver for ExternalMontageSolver {
	async fn solve(&self, params: &MontageParams) -> Result<String> {
		let output_stack = params.output_stack();
		let schema = build_schema(params, &output_stack);
		let payload = serde_json::to_vec(&schema).context("serialising montage solver schema")?;

		let mut child = Command::new(&self.executable).stdin(Stdio::piped()).spawn().with_context(|| format!("spawning montage solver {:?}", self.executable))?;
		let mut stdin = child.stdin.take().expect("stdin was requested as piped");
		stdin.write_all(&payload).await.context("writing montage solver schema to stdin")?;
		drop(stdin);

		let status = child.wait().await.context("waiting for montage solver to exit")?;
		if !status.success() {
			bail!("montage solver {:?} exited with {status}", self.executable);
		}
		Ok(output_stack)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn output_stack_name_has_stitched_suffix() {
		let params = MontageParams::new("http://render", "flyem", "proj", "raw_matching", "proj_raw_matches", 0.0, 3.0);
		assert_eq!(params.output_stack(), "raw_matching_stitched");
	}

	#[test]
	fn schema_carries_reference_defaults() {
		let params = MontageParams::new("http://render", "flyem", "proj", "raw_matching", "proj_raw_matches", 0.0, 3.0);
		let schema = build_schema(&params, &params.output_stack());
		assert_eq!(schema.transformation, "rigid");
		assert_eq!(schema.matrix_assembly.depth, 2);
		assert_eq!(schema.regularization.default_lambda, 0.005);
		assert_eq!(schema.n_parallel_jobs, 32);
	}
}
