/// Replaces every character outside `[0-9A-Za-z_]` with `_`.
///
/// Render stack names are used as path segments and database keys; the importer enforces
/// this charset on every stack name it derives from section/project directory names before
/// it ever reaches the server client.
pub fn sanitize_stack_name(name: &str) -> String {
	name.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn leaves_clean_names_alone() {
		assert_eq!(sanitize_stack_name("EM_himag"), "EM_himag");
	}

	#[test]
	fn replaces_bad_characters() {
		assert_eq!(sanitize_stack_name("S001/EM-grid"), "S001_EM_grid");
		assert_eq!(sanitize_stack_name("a.b c"), "a_b_c");
	}
}
