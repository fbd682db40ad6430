//! HTTP basic-auth credential persistence: a 2-element JSON array `[username, password]`
//! written with owner-only permissions, the way `basic_auth.py` stores it next to the
//! pipeline rather than in a system credential store.

use anyhow::{Context, Result};
use render_pipeline_client::Credentials;
use std::fs;
use std::path::Path;

/// Loads credentials from `path`. A missing file is a fatal, actionable error rather than
/// `None`: every stage that needs auth needs it to proceed, so there is no silent
/// unauthenticated fallback.
pub fn load_auth(path: &Path) -> Result<Credentials> {
	let body = fs::read_to_string(path).with_context(|| format!("could not find auth file at {}, create it with `render-pipeline auth save`", path.display()))?;
	let pair: [String; 2] = serde_json::from_str(&body).with_context(|| format!("parsing auth file {}", path.display()))?;
	let [username, password] = pair;
	Ok(Credentials { username, password })
}

/// Saves `username`/`password` to `path` as a 2-element JSON array, creating the file with
/// `0600` permissions on unix (best-effort on other platforms, matching the reference
/// implementation's bare `except OSError: pass`).
pub fn save_auth(path: &Path, username: &str, password: &str) -> Result<()> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
		}
	}

	let body = serde_json::to_string(&[username, password]).context("serialising auth credentials")?;
	fs::write(path, body).with_context(|| format!("writing auth file {}", path.display()))?;
	restrict_permissions(path)?;
	Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
	use std::os::unix::fs::PermissionsExt;
	let permissions = fs::Permissions::from_mode(0o600);
	fs::set_permissions(path, permissions).with_context(|| format!("restricting permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn round_trips_credentials() {
		let dir = tempdir().unwrap();
		let path = dir.path().join(".auth.json");
		save_auth(&path, "alice", "hunter2").unwrap();
		let loaded = load_auth(&path).unwrap();
		assert_eq!(loaded.username, "alice");
		assert_eq!(loaded.password, "hunter2");
	}

	#[test]
	fn missing_file_is_actionable() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("nope.json");
		let error = load_auth(&path).unwrap_err().to_string();
		assert!(error.contains("auth save"));
	}

	#[cfg(unix)]
	#[test]
	fn saved_file_is_owner_only() {
		use std::os::unix::fs::PermissionsExt;
		let dir = tempdir().unwrap();
		let path = dir.path().join(".auth.json");
		save_auth(&path, "alice", "hunter2").unwrap();
		let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
		assert_eq!(mode, 0o600);
	}
}
