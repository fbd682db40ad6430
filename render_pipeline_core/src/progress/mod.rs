//! Progress indicators for long-running, item-counted loops (ingest, post-correction,
//! stitching, upload, export).
//!
//! By default a live terminal bar is used (`cli` feature). Under `test`, or when the `cli`
//! feature is disabled, a no-op drain is used instead so library consumers and test suites
//! never print to stderr.
//!
//! ```rust
//! use render_pipeline_core::progress::get_progress_bar;
//!
//! let mut progress = get_progress_bar("post-correcting sections", 12);
//! progress.set_position(4);
//! progress.inc(1);
//! progress.finish();
//! ```

#[cfg(all(feature = "cli", not(feature = "test")))]
mod progress_bar;
mod progress_drain;
mod traits;

pub use progress_drain::ProgressDrain;
pub use traits::ProgressTrait;

/// Creates a progress indicator appropriate for the current build configuration.
pub fn get_progress_bar(message: &str, max_value: u64) -> Box<dyn ProgressTrait> {
	#[cfg(all(feature = "cli", not(feature = "test")))]
	let mut progress: Box<dyn ProgressTrait> = Box::new(progress_bar::ProgressBar::new());
	#[cfg(not(all(feature = "cli", not(feature = "test"))))]
	let mut progress: Box<dyn ProgressTrait> = Box::new(ProgressDrain::new());
	progress.init(message, max_value);
	progress
}
