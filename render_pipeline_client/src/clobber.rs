/// What to do when a stack the pipeline is about to create already exists on the server.
///
/// Mirrors the uploader's `clobber` flag: by default a pre-existing stack aborts the run,
/// since silently overwriting render results is rarely what the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClobberPolicy {
	#[default]
	FailIfExists,
	Overwrite,
}
