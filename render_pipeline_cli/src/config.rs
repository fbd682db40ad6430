//! Assembles the explicit, validated configuration every stage runs from, replacing the
//! module-level mutable constants the reference scripts read directly (see SPEC_FULL.md's
//! redesign notes on this point).

use crate::auth;
use anyhow::Result;
use render_pipeline_client::{ClobberPolicy, RenderClient, RenderConfig};
use std::path::PathBuf;

/// Everything every stage needs to talk to one render-ws project, built once per invocation
/// from the CLI's shared flags and threaded explicitly into whichever stage runs.
#[derive(Debug, Clone)]
pub struct RunConfig {
	pub host: String,
	pub owner: String,
	pub project: String,
	pub auth_file: PathBuf,
	/// I/O concurrency: network requests, external process fan-out.
	pub parallel: usize,
	/// CPU concurrency: SIFT/match/RANSAC worker count.
	pub cpu_parallel: usize,
	pub clobber: ClobberPolicy,
}

impl RunConfig {
	/// Builds the authenticated [`RenderClient`] this run's stage(s) should use, loading
	/// credentials from [`Self::auth_file`].
	pub fn connect(&self) -> Result<RenderClient> {
		let credentials = auth::load_auth(&self.auth_file)?;
		let config = RenderConfig::new(&self.host, &self.owner, &self.project);
		RenderClient::new(config, Some(credentials))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn connect_fails_fast_when_auth_file_is_missing() {
		let dir = tempdir().unwrap();
		let run = RunConfig {
			host: "http://localhost:8080".into(),
			owner: "flyem".into(),
			project: "test".into(),
			auth_file: dir.path().join("missing.json"),
			parallel: 4,
			cpu_parallel: 4,
			clobber: ClobberPolicy::FailIfExists,
		};
		assert!(run.connect().is_err());
	}
}
