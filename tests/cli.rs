use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

fn linkbak() -> Command {
	let mut cmd = Command::cargo_bin("linkbak").unwrap();
	cmd.env_remove("LINKBAK_LOG");
	cmd
}

fn source_tree(temp: &assert_fs::TempDir) {
	temp.child("src/small.txt").write_str("tiny").unwrap();
	temp.child("src/big.bin")
		.write_binary(&[b'x'; 4096])
		.unwrap();
	temp.child("src/sub/copy.bin")
		.write_binary(&[b'x'; 4096])
		.unwrap();
	temp.child("backup").create_dir_all().unwrap();
}

#[test]
fn version() {
	linkbak()
		.arg("-V")
		.assert()
		.success()
		.stdout(format!("linkbak {}\n", env!("CARGO_PKG_VERSION")));
}

#[test]
fn backup_missing_source() {
	let temp = assert_fs::TempDir::new().unwrap();
	temp.child("backup").create_dir_all().unwrap();

	linkbak()
		.current_dir(&temp)
		.args(["backup", "nonexistent", "backup"])
		.assert()
		.failure()
		.code(exitcode::NOINPUT)
		.stdout("")
		.stderr(predicate::str::contains("does not exist or is not a directory"));
}

#[test]
fn backup_missing_root() {
	let temp = assert_fs::TempDir::new().unwrap();
	temp.child("src/a.txt").write_str("a").unwrap();

	linkbak()
		.current_dir(&temp)
		.args(["backup", "src", "nonexistent"])
		.assert()
		.failure()
		.code(exitcode::NOINPUT)
		.stderr(predicate::str::contains("backup root"));
}

#[test]
fn compare_without_index() {
	let temp = assert_fs::TempDir::new().unwrap();
	source_tree(&temp);

	linkbak()
		.current_dir(&temp)
		.args(["compare", "src", "backup"])
		.assert()
		.failure()
		.code(exitcode::NOINPUT)
		.stderr(predicate::str::contains("has no usable index"));
}

#[test]
fn rebuild_untagged_dir() {
	let temp = assert_fs::TempDir::new().unwrap();
	temp.child("docs/big.bin")
		.write_binary(&[b'x'; 4096])
		.unwrap();

	linkbak()
		.current_dir(&temp)
		.args(["rebuild", "."])
		.assert()
		.failure()
		.code(exitcode::NOINPUT)
		.stdout("")
		.stderr(predicate::str::contains("is not a linkbak backup root"));

	temp.child(".linkbak").assert(predicate::path::missing());
	temp.child("docs/MANIFEST")
		.assert(predicate::path::missing());
}

#[test]
fn invalid_config() {
	let temp = assert_fs::TempDir::new().unwrap();
	source_tree(&temp);
	temp.child("backup/.linkbak/config.toml")
		.write_str("min_dedup_size = \"lots\"\n")
		.unwrap();

	linkbak()
		.current_dir(&temp)
		.args(["backup", "src", "backup"])
		.assert()
		.failure()
		.code(exitcode::CONFIG);
}

#[test]
fn backup_rebuild_compare() {
	let temp = assert_fs::TempDir::new().unwrap();
	source_tree(&temp);

	linkbak()
		.current_dir(&temp)
		.args(["backup", "src", "backup"])
		.assert()
		.success()
		.stdout(
			predicate::str::contains("processed files: 3 (8196 bytes)")
				.and(predicate::str::contains("new files:       2 (4100 bytes)"))
				.and(predicate::str::contains("linked files:    1 (4096 bytes)"))
				.and(predicate::str::contains("errors:          0")),
		)
		.stderr("");

	temp.child("backup/.linkbak/LINKBAK_INDEX.TAG")
		.assert("linkbak index version 1\n");
	temp.child("backup/.linkbak/config.toml")
		.assert(predicate::path::exists());
	temp.child("backup/.linkbak/size-lookup/40/96/4096")
		.assert(predicate::path::exists());

	linkbak()
		.current_dir(&temp)
		.args(["rebuild", "backup"])
		.assert()
		.success()
		.stdout(
			predicate::str::contains("processed files:     2 (8192 bytes)")
				.and(predicate::str::contains("added hash entries:  0"))
				.and(predicate::str::contains("manifest verified:   2"))
				.and(predicate::str::contains("errors:              0")),
		);

	temp.child("src/new.txt").write_str("new").unwrap();

	linkbak()
		.current_dir(&temp)
		.args(["compare", "src", "backup"])
		.assert()
		.success()
		.stdout(
			predicate::str::contains("new in source:        1")
				.and(predicate::str::contains("successful:           3"))
				.and(predicate::str::contains("errors:               0")),
		);
}

#[test]
fn exclude_by_name() {
	let temp = assert_fs::TempDir::new().unwrap();
	source_tree(&temp);
	temp.child("src/cache/junk.bin")
		.write_binary(&[b'j'; 2048])
		.unwrap();

	linkbak()
		.current_dir(&temp)
		.args(["-q", "backup", "src", "backup", "--exclude", "cache"])
		.assert()
		.success()
		.stdout(predicate::str::contains("processed files: 3 (8196 bytes)"));
}
