use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use render_pipeline::postcorrect::PostCorrectParams;
use render_pipeline_cli::commands::{self, IngestMode};
use render_pipeline_cli::config::RunConfig;
use render_pipeline_client::ClobberPolicy;
use render_pipeline_core::ConcurrencyLimits;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, disable_help_subcommand = true)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	#[command(flatten)]
	verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Manage the stored HTTP basic-auth credentials used to talk to render-ws
	Auth(AuthArgs),

	/// Remove background artefacts from a megafield of raw acquisition tiles
	PostCorrect(PostCorrectArgs),

	/// Build image pyramids for an acquisition and upload the resulting stack(s)
	Mipmap(MipmapArgs),

	/// Find, match and solve the tile transforms of a grid-placed, unaligned stack
	Stitch(StitchArgs),

	/// Export a finished stack to an external viewer format
	Export(ExportArgs),
}

/// Flags shared by every subcommand that talks to a render-ws project.
#[derive(Args, Debug, Clone)]
struct RenderArgs {
	/// render-ws host, e.g. http://localhost:8080
	#[arg(long, env = "RENDER_HOST")]
	host: String,

	#[arg(long, env = "RENDER_OWNER")]
	owner: String,

	#[arg(long, env = "RENDER_PROJECT")]
	project: String,

	/// Path to the saved basic-auth credentials file (see `auth save`)
	#[arg(long, default_value = ".auth.json")]
	auth_file: PathBuf,

	/// I/O concurrency: network requests and external process fan-out
	#[arg(long, default_value_t = ConcurrencyLimits::default().io_bound)]
	parallel: usize,

	/// CPU concurrency: SIFT/match/RANSAC worker count
	#[arg(long, default_value_t = ConcurrencyLimits::default().cpu_bound)]
	cpu_parallel: usize,

	/// Delete a pre-existing stack/collection with the same name instead of failing
	#[arg(long)]
	clobber: bool,
}

impl RenderArgs {
	fn into_run_config(self) -> RunConfig {
		let clobber = if self.clobber { ClobberPolicy::Overwrite } else { ClobberPolicy::FailIfExists };
		RunConfig { host: self.host, owner: self.owner, project: self.project, auth_file: self.auth_file, parallel: self.parallel, cpu_parallel: self.cpu_parallel, clobber }
	}
}

#[derive(Args, Debug)]
struct AuthArgs {
	#[command(subcommand)]
	action: AuthAction,
}

#[derive(Subcommand, Debug)]
enum AuthAction {
	/// Prompt for a username/password and save them
	Save {
		#[arg(long, default_value = ".auth.json")]
		path: PathBuf,
	},
	/// Print the stored username/password
	Show {
		#[arg(long, default_value = ".auth.json")]
		path: PathBuf,
	},
}

#[derive(Args, Debug)]
struct PostCorrectArgs {
	/// Directory whose immediate subdirectories are the sections to post-correct, in order
	root: PathBuf,

	#[arg(long, default_value_t = PostCorrectParams::default().sample_size)]
	sample_size: usize,

	#[arg(long, default_value_t = PostCorrectParams::default().percentile)]
	percentile: f64,

	#[arg(long, default_value_t = PostCorrectParams::default().mad_multiplier)]
	mad_multiplier: f64,

	#[arg(long, default_value_t = PostCorrectParams::default().min_clean)]
	min_clean: usize,

	#[arg(long, default_value_t = PostCorrectParams::default().restore_mean_level)]
	restore_mean_level: f64,
}

#[derive(Args, Debug)]
struct MipmapArgs {
	#[command(flatten)]
	render: RenderArgs,

	/// Physical z-spacing between sections, in the same units as the stack's pixel size
	#[arg(long)]
	z_resolution: f64,

	#[command(subcommand)]
	source: IngestSource,
}

#[derive(Subcommand, Debug)]
enum IngestSource {
	/// CLEM acquisitions: `S###` section directories of multi-page OME-TIFFs
	Clem { project_path: PathBuf, mipmap_path: PathBuf },

	/// FASTEM acquisitions: raw `{row}_{col}_0.tiff` tiles plus `mega_field_meta_data.yaml`
	Fastem {
		project_path: PathBuf,
		mipmap_path: PathBuf,
		/// Physical section this project directory belongs to
		section_name: String,
		/// Place tiles using `positions.txt` instead of a no-overlap grid
		#[arg(long)]
		use_positions: bool,
	},

	/// Re-imports an existing CATMAID tile tree as a fresh stack
	CatmaidReplay { project_path: PathBuf, mipmap_path: PathBuf },
}

#[derive(Args, Debug)]
struct StitchArgs {
	#[command(flatten)]
	render: RenderArgs,

	/// Stack name(s) to stitch
	#[arg(required = true)]
	stacks: Vec<String>,

	/// Override the seam crop half-width (pixels)
	#[arg(long)]
	overlap: Option<u32>,

	/// Path to the external montage solver executable (BigFeta)
	#[arg(long)]
	solver_executable: PathBuf,
}

#[derive(Args, Debug)]
struct ExportArgs {
	#[command(subcommand)]
	sink: ExportSink,
}

#[derive(Subcommand, Debug)]
enum ExportSink {
	/// Export to a CATMAID tile tree
	Catmaid {
		#[command(flatten)]
		render: RenderArgs,

		/// Stack name(s) to export
		#[arg(required = true)]
		stacks: Vec<String>,

		#[arg(long)]
		output_dir: PathBuf,

		#[arg(long, default_value_t = 1024)]
		tile_size: u32,

		#[arg(long, default_value = "png")]
		fmt: String,

		/// Path to the external box-render client executable
		#[arg(long)]
		box_render_executable: PathBuf,
	},

	/// Export to a WebKnossos dataset, producing (or reusing) a CATMAID tree first
	WebKnossos {
		#[command(flatten)]
		render: RenderArgs,

		/// Stack name to export
		stack: String,

		#[arg(long)]
		catmaid_dir: PathBuf,

		#[arg(long, default_value_t = 1024)]
		tile_size: u32,

		#[arg(long, default_value = "png")]
		fmt: String,

		#[arg(long)]
		box_render_executable: PathBuf,

		/// Path to the external CATMAID-to-WebKnossos cubing script
		#[arg(long)]
		wk_cuber_executable: PathBuf,

		/// Remove the intermediate CATMAID tree once cubing succeeds
		#[arg(long)]
		remove_catmaid_dir: bool,
	},
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	env_logger::Builder::new().filter_level(cli.verbose.log_level_filter()).format_timestamp(None).init();

	tokio::runtime::Builder::new_multi_thread().enable_all().build()?.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
	match cli.command {
		Commands::Auth(args) => match args.action {
			AuthAction::Save { path } => commands::run_auth_save(&path),
			AuthAction::Show { path } => commands::run_auth_show(&path),
		},
		Commands::PostCorrect(args) => {
			let params = PostCorrectParams {
				sample_size: args.sample_size,
				percentile: args.percentile,
				mad_multiplier: args.mad_multiplier,
				min_clean: args.min_clean,
				restore_mean_level: args.restore_mean_level,
			};
			commands::run_post_correct(&args.root, &params)
		}
		Commands::Mipmap(args) => {
			let run = args.render.into_run_config();
			let (mode, project_path, mipmap_path) = match args.source {
				IngestSource::Clem { project_path, mipmap_path } => (IngestMode::Clem, project_path, mipmap_path),
				IngestSource::Fastem { project_path, mipmap_path, section_name, use_positions } => (IngestMode::Fastem { section_name, use_positions }, project_path, mipmap_path),
				IngestSource::CatmaidReplay { project_path, mipmap_path } => (IngestMode::CatmaidReplay, project_path, mipmap_path),
			};
			commands::run_mipmap(mode, &project_path, &mipmap_path, args.z_resolution, &run).await
		}
		Commands::Stitch(args) => {
			let run = args.render.into_run_config();
			commands::run_stitch(&args.stacks, args.overlap, &args.solver_executable, &run).await
		}
		Commands::Export(args) => match args.sink {
			ExportSink::Catmaid { render, stacks, output_dir, tile_size, fmt, box_render_executable } => {
				let run = render.into_run_config();
				commands::run_export_catmaid(&stacks, &output_dir, tile_size, &fmt, &box_render_executable, &run).await
			}
			ExportSink::WebKnossos { render, stack, catmaid_dir, tile_size, fmt, box_render_executable, wk_cuber_executable, remove_catmaid_dir } => {
				let run = render.into_run_config();
				commands::run_export_webknossos(&stack, &catmaid_dir, tile_size, &fmt, &box_render_executable, &wk_cuber_executable, remove_catmaid_dir, &run).await
			}
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::Parser;

	#[test]
	fn help_describes_the_pipeline() {
		let error = Cli::try_parse_from(["render-pipeline"]).unwrap_err().to_string();
		assert!(error.contains("Usage: render-pipeline"));
	}

	#[test]
	fn mipmap_requires_a_z_resolution() {
		let error = Cli::try_parse_from(["render-pipeline", "mipmap", "--host", "h", "--owner", "o", "--project", "p", "clem", "in", "out"]).unwrap_err().to_string();
		assert!(error.contains("z-resolution"));
	}

	#[test]
	fn export_catmaid_parses() {
		let cli = Cli::try_parse_from([
			"render-pipeline",
			"export",
			"catmaid",
			"--host",
			"http://localhost",
			"--owner",
			"flyem",
			"--project",
			"test",
			"stack1",
			"--output-dir",
			"out",
			"--box-render-executable",
			"box-render",
		])
		.unwrap();
		assert!(matches!(cli.command, Commands::Export(_)));
	}
}
