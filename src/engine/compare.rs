//! Read-only diff of a live source tree against its newest snapshot. The only thing written is a
//! report file in the index directory.

use std::{
	ffi::OsStr,
	fmt,
	fs::{self, File, OpenOptions},
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
};

use chrono::Local;
use log::{debug, info, warn};

use super::source_dir_and_name;
use crate::{
	config::Config,
	error::{Error, Result},
	file::{
		hash_file,
		walk::{EntryKind, WalkEntry, Walker},
	},
	interrupt::Interrupt,
	repo::{manifest, snapshot, BackupRoot},
	store::{HashLookup, SizeLookup},
	util::ext::IoResultExt,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompareSummary {
	pub total_file_count: u64,
	pub total_size: u64,
	pub src_file_new_count: u64,
	pub file_size_missmatch: u64,
	pub file_hash_missmatch: u64,
	pub small_file_count: u64,
	pub size_db_missing_count: u64,
	pub hash_db_missing_count: u64,
	/// Files whose content matches the snapshot and which are fully indexed
	pub successful_file_count: u64,
	pub error_count: u64,
}

impl fmt::Display for CompareSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(
			f,
			"source files:         {} ({} bytes)",
			self.total_file_count, self.total_size
		)?;
		writeln!(f, "new in source:        {}", self.src_file_new_count)?;
		writeln!(f, "size mismatches:      {}", self.file_size_missmatch)?;
		writeln!(f, "hash mismatches:      {}", self.file_hash_missmatch)?;
		writeln!(f, "small files:          {}", self.small_file_count)?;
		writeln!(f, "missing size entries: {}", self.size_db_missing_count)?;
		writeln!(f, "missing hash entries: {}", self.hash_db_missing_count)?;
		writeln!(f, "successful:           {}", self.successful_file_count)?;
		write!(f, "errors:               {}", self.error_count)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Finding {
	NewInSource,
	SizeMismatch,
	HashMismatch,
	Small,
	SizeEntryMissing,
	HashEntryMissing,
	SizeAndHashEntryMissing,
	Ok,
}

impl Finding {
	fn label(self) -> Option<&'static str> {
		match self {
			Finding::NewInSource => Some("new"),
			Finding::SizeMismatch => Some("size-mismatch"),
			Finding::HashMismatch => Some("hash-mismatch"),
			Finding::SizeEntryMissing => Some("size-entry-missing"),
			Finding::HashEntryMissing => Some("hash-entry-missing"),
			Finding::SizeAndHashEntryMissing => Some("size-and-hash-entry-missing"),
			Finding::Small | Finding::Ok => None,
		}
	}
}

impl CompareSummary {
	fn count(&mut self, finding: Finding) {
		match finding {
			Finding::NewInSource => self.src_file_new_count += 1,
			Finding::SizeMismatch => self.file_size_missmatch += 1,
			Finding::HashMismatch => self.file_hash_missmatch += 1,
			Finding::Small => {
				self.small_file_count += 1;
				self.successful_file_count += 1;
			}
			Finding::SizeEntryMissing => self.size_db_missing_count += 1,
			Finding::HashEntryMissing => self.hash_db_missing_count += 1,
			Finding::SizeAndHashEntryMissing => {
				self.size_db_missing_count += 1;
				self.hash_db_missing_count += 1;
			}
			Finding::Ok => self.successful_file_count += 1,
		}
	}
}

/// Compares `source` against its newest snapshot in `root`. Returns the summary and the path of
/// the report listing every divergent file.
pub fn compare(
	source: &Path,
	root: &BackupRoot,
	excludes: &[String],
	cfg: &Config,
	interrupt: &Interrupt,
) -> Result<(CompareSummary, PathBuf)> {
	let (source, source_name) = source_dir_and_name(source)?;
	root.require_index()?;

	let snapshot = root.latest_snapshot(&source_name)?.ok_or_else(|| {
		Error::Setup(format!(
			"{:?} has no snapshot of {source_name:?} to compare against",
			root.0
		))
	})?;
	info!("comparing {source:?} with {:?}", snapshot.0);

	let (mut report, report_path) = create_report(&root.index_path())?;
	writeln!(report, "source {source:?}\nsnapshot {:?}", snapshot.0).at(&report_path)?;

	let sizes = root.size_store(cfg);
	let hashes = root.hash_store();
	let mut summary = CompareSummary::default();

	let walker = Walker::new(&source)
		.exclude_names(cfg.excludes.iter().chain(excludes).cloned())
		.exclude_dir(&root.0);
	for res in walker.entries() {
		interrupt.check()?;

		let entry = match res {
			Ok(entry) => entry,
			Err(e) => {
				warn!("{e}");
				summary.error_count += 1;
				continue;
			}
		};
		if entry.kind != EntryKind::File {
			debug!("not comparing symlink {:?}", entry.path);
			continue;
		}
		if entry.path.file_name() == Some(OsStr::new(manifest::NAME)) {
			debug!("not comparing {:?}, backups never contain it", entry.path);
			continue;
		}

		summary.total_file_count += 1;
		summary.total_size += entry.size;

		let backup_file = snapshot.0.join(&entry.rel_path);
		match compare_file(&entry, &backup_file, cfg, &sizes, &hashes, interrupt) {
			Ok(finding) => {
				summary.count(finding);
				if let Some(label) = finding.label() {
					debug!("{label}: {:?}", entry.rel_path);
					note(&mut report, &report_path, label, &entry.rel_path)?;
				}
			}
			Err(e) if e.is_fatal() => return Err(e),
			Err(e) => {
				warn!("unable to compare {:?}: {e}", entry.path);
				summary.error_count += 1;
				note(&mut report, &report_path, "error", &entry.rel_path)?;
			}
		}
	}

	writeln!(report, "--\n{summary}").at(&report_path)?;
	info!("compare done, report written to {report_path:?}");
	Ok((summary, report_path))
}

/// `compare-<timestamp>.log`, with a `-<n>` suffix if that name is taken
fn create_report(dir: &Path) -> Result<(File, PathBuf)> {
	let stamp = Local::now().format(snapshot::NAME_FORMAT).to_string();
	let mut suffix = 0u32;
	loop {
		let path = match suffix {
			0 => dir.join(format!("compare-{stamp}.log")),
			n => dir.join(format!("compare-{stamp}-{n}.log")),
		};
		match OpenOptions::new().write(true).create_new(true).open(&path) {
			Ok(file) => return Ok((file, path)),
			Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
			Err(e) => return Err(e).at(path),
		}
	}
}

fn note(report: &mut File, report_path: &Path, label: &str, rel_path: &Path) -> Result<()> {
	writeln!(report, "{label} {rel_path:?}").at(report_path)
}

fn compare_file(
	entry: &WalkEntry,
	backup_file: &Path,
	cfg: &Config,
	sizes: &dyn SizeLookup,
	hashes: &dyn HashLookup,
	interrupt: &Interrupt,
) -> Result<Finding> {
	let backup_md = match fs::symlink_metadata(backup_file) {
		Ok(md) => md,
		Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Finding::NewInSource),
		Err(e) => return Err(e).at(backup_file),
	};
	if !backup_md.is_file() || backup_md.len() != entry.size {
		return Ok(Finding::SizeMismatch);
	}

	let (src_hash, _) = hash_file(&entry.path, cfg, interrupt)?;
	let (backup_hash, _) = hash_file(backup_file, cfg, interrupt)?;
	if src_hash != backup_hash {
		return Ok(Finding::HashMismatch);
	}

	if entry.size < cfg.min_dedup_size {
		return Ok(Finding::Small);
	}

	let size_missing = !sizes.contains(entry.size)?;
	let hash_missing = hashes.peek(&src_hash)?.is_none();
	Ok(match (size_missing, hash_missing) {
		(false, false) => Finding::Ok,
		(true, false) => Finding::SizeEntryMissing,
		(false, true) => Finding::HashEntryMissing,
		(true, true) => Finding::SizeAndHashEntryMissing,
	})
}
