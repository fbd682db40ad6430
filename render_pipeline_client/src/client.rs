use crate::clobber::ClobberPolicy;
use crate::config::{Credentials, RenderConfig};
use crate::dto::{CreateStackDto, PointMatchDto, StackBounds, StackMetadata, TileBounds, TileSpecDto, parse_tile_specs};
use anyhow::{Context, Result, bail};
use image::{DynamicImage, GenericImageView};
use render_pipeline_derive::context;
use render_pipeline_geometry::tile::TileSpec;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;

/// A connection to one render-ws project.
///
/// Every fallible method is annotated with [`context`] so failures read as a breadcrumb
/// trail (`while creating stack 'foo': while PUT-ing http://...: 503 Service Unavailable`)
/// rather than a bare reqwest error.
#[derive(Debug)]
pub struct RenderClient {
	http: Client,
	config: RenderConfig,
	credentials: Option<Credentials>,
}

impl RenderClient {
	pub fn new(config: RenderConfig, credentials: Option<Credentials>) -> Result<Self> {
		let http = Client::builder().tcp_keepalive(Duration::from_secs(600)).use_rustls_tls().build()?;
		Ok(RenderClient { http, config, credentials })
	}

	fn auth(&self, builder: RequestBuilder) -> RequestBuilder {
		match &self.credentials {
			Some(Credentials { username, password }) => builder.basic_auth(username, Some(password)),
			None => builder,
		}
	}

	/// The render-ws host this client talks to, needed by callers (the stitcher's montage
	/// solver invocation) that must describe the connection to an external process.
	pub fn host(&self) -> &str {
		&self.config.host
	}

	pub fn owner(&self) -> &str {
		&self.config.owner
	}

	#[context("listing stacks for project '{}'", self.config.project)]
	pub async fn list_stacks(&self) -> Result<Vec<String>> {
		let url = format!("{}/stacks", self.config.project_base());
		let response = self.auth(self.http.get(&url)).send().await?;
		ensure_success(&response, &url)?;
		Ok(response.json::<Vec<StackMetadataDto>>().await?.into_iter().map(|s| s.stack_id.stack).collect())
	}

	/// Applies the upload clobber policy: does nothing if the stack does not exist yet,
	/// deletes it under [`ClobberPolicy::Overwrite`], or fails under
	/// [`ClobberPolicy::FailIfExists`].
	#[context("applying clobber policy to stack '{stack}'")]
	pub async fn apply_clobber_policy(&self, stack: &str, policy: ClobberPolicy) -> Result<()> {
		if !self.list_stacks().await?.iter().any(|s| s == stack) {
			return Ok(());
		}
		match policy {
			ClobberPolicy::FailIfExists => bail!("stack '{stack}' already exists"),
			ClobberPolicy::Overwrite => self.delete_stack(stack).await,
		}
	}

	#[context("creating stack '{stack}'")]
	pub async fn create_stack(&self, stack: &str, pixel_size: f64, z_resolution: f64) -> Result<()> {
		let url = self.config.stack_base(stack);
		let body = CreateStackDto { resolution_x: pixel_size, resolution_y: pixel_size, resolution_z: z_resolution };
		let response = self.auth(self.http.post(&url)).json(&body).send().await?;
		ensure_success(&response, &url)
	}

	/// Deletes a stack, tolerating a 404 (the stack is already gone, which is the desired
	/// end state either way).
	#[context("deleting stack '{stack}'")]
	pub async fn delete_stack(&self, stack: &str) -> Result<()> {
		let url = self.config.stack_base(stack);
		let response = self.auth(self.http.delete(&url)).send().await?;
		if response.status() == StatusCode::NOT_FOUND {
			return Ok(());
		}
		ensure_success(&response, &url)
	}

	#[context("setting state of stack '{stack}' to {state}")]
	pub async fn set_stack_state(&self, stack: &str, state: &str) -> Result<()> {
		let url = format!("{}/state/{state}", self.config.stack_base(stack));
		let response = self.auth(self.http.put(&url)).send().await?;
		ensure_success(&response, &url)
	}

	/// Imports an entire stack's tiles in a single batch request with `deriveData=false`: the
	/// bounding box fields on [`TileSpec`] are sent explicitly, so the server never has to
	/// recompute them from pixel data.
	#[context("importing {} tile specs into stack '{stack}'", tilespecs.len())]
	pub async fn import_tilespecs(&self, stack: &str, tilespecs: &[TileSpec]) -> Result<()> {
		let url = format!("{}/tileSpecs?deriveData=false", self.config.stack_base(stack));
		let dtos: Vec<TileSpecDto> = tilespecs.iter().map(TileSpecDto::from).collect();
		let response = self.auth(self.http.put(&url)).json(&dtos).send().await?;
		ensure_success(&response, &url)
	}

	#[context("getting z values for stack '{stack}'")]
	pub async fn get_z_values(&self, stack: &str) -> Result<Vec<f64>> {
		let url = format!("{}/zValues", self.config.stack_base(stack));
		let response = self.auth(self.http.get(&url)).send().await?;
		ensure_success(&response, &url)?;
		Ok(response.json().await?)
	}

	#[context("getting bounds for stack '{stack}'")]
	pub async fn get_stack_bounds(&self, stack: &str) -> Result<StackBounds> {
		let url = format!("{}/bounds", self.config.stack_base(stack));
		let response = self.auth(self.http.get(&url)).send().await?;
		ensure_success(&response, &url)?;
		Ok(response.json().await?)
	}

	/// Fetches the resolution a stack was created with, needed to carry pixel size forward
	/// into stacks derived from it (the matching collection's montage stack, for instance).
	#[context("getting metadata for stack '{stack}'")]
	pub async fn get_stack_metadata(&self, stack: &str) -> Result<StackMetadata> {
		let url = self.config.stack_base(stack);
		let response = self.auth(self.http.get(&url)).send().await?;
		ensure_success(&response, &url)?;
		let body = response.text().await?;
		StackMetadata::from_full_stack_metadata(&body)
	}

	/// Fetches every tile's bounding box within one section, used to discover which tiles are
	/// spatial neighbours before requesting overlap imagery.
	#[context("getting tile bounds for z={z} in stack '{stack}'")]
	pub async fn get_tile_bounds_for_z(&self, stack: &str, z: f64) -> Result<Vec<TileBounds>> {
		let url = format!("{}/z/{z}/bounds", self.config.stack_base(stack));
		let response = self.auth(self.http.get(&url)).send().await?;
		ensure_success(&response, &url)?;
		Ok(response.json().await?)
	}

	/// Fetches the full tile specs for a stack, needed to carry geometry (size, transforms)
	/// forward when building the matching-collection stack's own tile specs.
	#[context("getting tile specs for stack '{stack}'")]
	pub async fn get_tile_specs_for_stack(&self, stack: &str) -> Result<Vec<TileSpec>> {
		let url = format!("{}/tileSpecs", self.config.stack_base(stack));
		let response = self.auth(self.http.get(&url)).send().await?;
		ensure_success(&response, &url)?;
		let body = response.text().await?;
		parse_tile_specs(&body, stack).context("parsing tile specs")
	}

	/// Fetches a rendered `width x height` box at `(x, y, z)` and returns it as single-channel
	/// intensity data: the server renders grayscale imagery as an RGB PNG and the green
	/// channel carries the actual intensity value.
	#[context("getting bbox image for stack '{stack}' at ({x}, {y}, {z})")]
	pub async fn get_bb_image(&self, stack: &str, x: f64, y: f64, z: f64, width: u32, height: u32, scale: f64) -> Result<Vec<u8>> {
		let url = format!("{}/z/{z}/box/{x},{y},{width},{height},{scale}/png-image", self.config.stack_base(stack));
		let response = self.auth(self.http.get(&url)).send().await?;
		ensure_success(&response, &url)?;
		let bytes = response.bytes().await?;
		let image = image::load_from_memory(&bytes)?;
		Ok(extract_green_channel(&image))
	}

	#[context("importing {} pointmatches into collection '{collection}'", matches.len())]
	pub async fn import_pointmatches(&self, collection: &str, matches: &[PointMatchDto]) -> Result<()> {
		let url = format!(
			"{}/render-ws/v1/owner/{}/matchCollection/{collection}/matches",
			self.config.host.trim_end_matches('/'),
			self.config.owner
		);
		let response = self.auth(self.http.put(&url)).json(matches).send().await?;
		ensure_success(&response, &url)
	}

	/// Deletes an entire pointmatch collection, tolerating a 404.
	#[context("deleting pointmatch collection '{collection}'")]
	pub async fn delete_pointmatch_collection(&self, collection: &str) -> Result<()> {
		let url = format!("{}/render-ws/v1/owner/{}/matchCollection/{collection}", self.config.host.trim_end_matches('/'), self.config.owner);
		let response = self.auth(self.http.delete(&url)).send().await?;
		if response.status() == StatusCode::NOT_FOUND {
			return Ok(());
		}
		ensure_success(&response, &url)
	}
}

fn extract_green_channel(image: &DynamicImage) -> Vec<u8> {
	let (width, height) = image.dimensions();
	let rgb = image.to_rgb8();
	let mut out = Vec::with_capacity((width * height) as usize);
	for pixel in rgb.pixels() {
		out.push(pixel.0[1]);
	}
	out
}

#[derive(serde::Deserialize)]
struct StackMetadataDto {
	#[serde(rename = "stackId")]
	stack_id: StackIdDto,
}

#[derive(serde::Deserialize)]
struct StackIdDto {
	stack: String,
}

fn ensure_success(response: &reqwest::Response, url: &str) -> Result<()> {
	if response.status().is_success() {
		Ok(())
	} else {
		bail!("request to {url} failed with status {}", response.status())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn project_base_trims_trailing_slash() {
		let config = RenderConfig::new("http://localhost:8080/", "flyem", "test");
		assert_eq!(config.project_base(), "http://localhost:8080/render-ws/v1/owner/flyem/project/test");
	}

	#[test]
	fn stack_base_appends_stack_name() {
		let config = RenderConfig::new("http://localhost:8080", "flyem", "test");
		assert_eq!(config.stack_base("stack1"), "http://localhost:8080/render-ws/v1/owner/flyem/project/test/stack/stack1");
	}
}
