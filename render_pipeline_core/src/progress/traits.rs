//! The `ProgressTrait` trait abstracts over whatever progress indicator a run should use:
//! a live terminal bar for interactive CLI use, or a no-op drain under `--quiet` and in tests.

/// Interface for a progress indicator driven by a bulk loop (ingest, post-correction,
/// stitching, upload, export).
pub trait ProgressTrait: Send + Sync {
	/// Creates an uninitialized instance.
	fn new() -> Self
	where
		Self: Sized;

	/// Initializes the progress indicator with a message and the total item count.
	fn init(&mut self, message: &str, max_value: u64);

	/// Sets the absolute position.
	fn set_position(&mut self, value: u64);

	/// Increases the position by `value`.
	fn inc(&mut self, value: u64);

	/// Marks the progress as finished.
	fn finish(&mut self);

	/// Removes the progress indicator from the terminal.
	fn remove(&mut self);
}
