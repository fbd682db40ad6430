use assert_cmd::{Command, cargo};
use predicates::str;
use rstest::rstest;

const BINARY_NAME: &str = "render-pipeline";

#[test]
fn command() {
	Command::new(cargo::cargo_bin!()).assert().failure().code(2).stdout(str::is_empty()).stderr(str::contains(format!("Usage: {BINARY_NAME} [OPTIONS] <COMMAND>")));
}

#[rstest]
#[case("post-correct", "[OPTIONS] <ROOT>")]
#[case("auth", "[OPTIONS] <COMMAND>")]
#[case("export", "[OPTIONS] <COMMAND>")]
fn subcommand(#[case] sub_command: &str, #[case] usage: &str) {
	Command::new(cargo::cargo_bin!())
		.args(sub_command.split(' '))
		.assert()
		.failure()
		.code(2)
		.stdout(str::is_empty())
		.stderr(str::contains(format!("Usage: {BINARY_NAME} {sub_command} {usage}")));
}

#[test]
fn mipmap_without_a_source_fails() {
	Command::new(cargo::cargo_bin!())
		.args(["mipmap", "--host", "h", "--owner", "o", "--project", "p", "--z-resolution", "90"])
		.assert()
		.failure()
		.code(2)
		.stderr(str::contains(format!("Usage: {BINARY_NAME} mipmap")));
}

#[test]
fn auth_show_reports_missing_file() {
	let dir = assert_fs::TempDir::new().unwrap();
	let path = dir.path().join("nope.json");
	Command::new(cargo::cargo_bin!())
		.args(["auth", "show", "--path"])
		.arg(&path)
		.assert()
		.failure()
		.stderr(str::contains("auth save"));
}
