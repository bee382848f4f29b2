//! The three whole-tree operations: backup (ingestion), rebuild and compare

pub mod backup;
pub mod compare;
pub mod rebuild;

use std::{
	fs,
	path::{Path, PathBuf},
};

use crate::{
	error::{Error, Result},
	util::ext::IoResultExt,
};

pub use self::{
	backup::{backup, BackupSummary},
	compare::{compare, CompareSummary},
	rebuild::{rebuild, RebuildSummary},
};

/// Canonical path of the source directory and its final component, which names its snapshots
fn source_dir_and_name(source: &Path) -> Result<(PathBuf, std::ffi::OsString)> {
	if !source.is_dir() {
		return Err(Error::Setup(format!(
			"source {source:?} does not exist or is not a directory"
		)));
	}
	let source = fs::canonicalize(source).at(source)?;
	let name = source
		.file_name()
		.ok_or_else(|| Error::Setup(format!("source {source:?} has no name")))?
		.to_os_string();
	Ok((source, name))
}
