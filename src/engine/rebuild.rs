//! Reconstructs the lookup stores and MANIFEST files from the snapshots already in a backup root,
//! verifying existing MANIFEST lines on the way. Entries are only ever added; mismatches are
//! reported, not corrected.
//!
//! The root has to carry an index tag already, so pointing rebuild at an arbitrary directory
//! fails before anything is hashed or written.

use std::{
	collections::HashMap,
	ffi::{OsStr, OsString},
	fmt,
	path::{Path, PathBuf},
};

use log::{debug, info, warn};

use crate::{
	config::Config,
	error::Result,
	file::{
		hash_file,
		walk::{EntryKind, WalkEntry, Walker},
	},
	interrupt::Interrupt,
	repo::{
		manifest::{self, Manifest},
		BackupRoot,
	},
	store::{HashLookup, SizeLookup},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebuildSummary {
	pub process_count: u64,
	pub process_size: u64,
	pub added_size_count: u64,
	pub added_hash_count: u64,
	pub hash_verified_count: u64,
	pub hash_mismatch_count: u64,
	pub hash_not_found_count: u64,
	pub error_count: u64,
}

impl fmt::Display for RebuildSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(
			f,
			"processed files:     {} ({} bytes)",
			self.process_count, self.process_size
		)?;
		writeln!(f, "added size entries:  {}", self.added_size_count)?;
		writeln!(f, "added hash entries:  {}", self.added_hash_count)?;
		writeln!(f, "manifest verified:   {}", self.hash_verified_count)?;
		writeln!(f, "manifest mismatches: {}", self.hash_mismatch_count)?;
		writeln!(f, "manifest added:      {}", self.hash_not_found_count)?;
		write!(f, "errors:              {}", self.error_count)
	}
}

/// The MANIFEST of the directory processed last. Walking in name order keeps the files of one
/// directory mostly together, so this avoids re-reading a manifest per file.
#[derive(Default)]
struct ManifestCache {
	dir: Option<PathBuf>,
	entries: HashMap<OsString, String>,
}

impl ManifestCache {
	fn get(&mut self, dir: &Path) -> Result<&mut HashMap<OsString, String>> {
		if self.dir.as_deref() != Some(dir) {
			self.entries = Manifest::in_dir(dir).to_map()?;
			self.dir = Some(dir.to_path_buf());
		}
		Ok(&mut self.entries)
	}
}

pub fn rebuild(root: &BackupRoot, cfg: &Config, interrupt: &Interrupt) -> Result<RebuildSummary> {
	root.repair_index()?;
	info!("rebuilding index of {:?}", root.0);

	let sizes = root.size_store(cfg);
	let hashes = root.hash_store();
	let mut manifests = ManifestCache::default();
	let mut summary = RebuildSummary::default();

	let walker = Walker::new(&root.0).exclude_dir(&root.index_path());
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

		if entry.kind != EntryKind::File
			|| entry.size < cfg.min_dedup_size
			|| entry.path.file_name() == Some(OsStr::new(manifest::NAME))
		{
			continue;
		}

		if let Err(e) = rebuild_file(
			&entry,
			root,
			cfg,
			&sizes,
			&hashes,
			&mut manifests,
			interrupt,
			&mut summary,
		) {
			if e.is_fatal() {
				return Err(e);
			}
			warn!("skipping {:?}: {e}", entry.path);
			summary.error_count += 1;
		}
	}

	info!("rebuild of {:?} done", root.0);
	Ok(summary)
}

#[allow(clippy::too_many_arguments)]
fn rebuild_file(
	entry: &WalkEntry,
	root: &BackupRoot,
	cfg: &Config,
	sizes: &dyn SizeLookup,
	hashes: &dyn HashLookup,
	manifests: &mut ManifestCache,
	interrupt: &Interrupt,
	summary: &mut RebuildSummary,
) -> Result<()> {
	debug!("rebuilding {:?}", entry.path);
	let (hash, bytes) = hash_file(&entry.path, cfg, interrupt)?;
	summary.process_count += 1;
	summary.process_size += bytes;

	if !sizes.contains(entry.size)? {
		sizes.add(entry.size)?;
		summary.added_size_count += 1;
	}

	if hashes.get(&hash)?.is_none() {
		hashes.set(&hash, &root.relative(&entry.path)?)?;
		summary.added_hash_count += 1;
	}

	let dir = entry.path.parent().expect("walked files have a parent");
	let file_name = entry.path.file_name().expect("walked files have a name");
	let recorded = manifests.get(dir)?;
	match recorded.get(file_name) {
		Some(known) if *known == hash => summary.hash_verified_count += 1,
		Some(known) => {
			warn!(
				"{:?} has hash {hash}, but its MANIFEST records {known}",
				entry.path
			);
			summary.hash_mismatch_count += 1;
		}
		None => {
			Manifest::in_dir(dir).append(&hash, file_name)?;
			recorded.insert(file_name.to_os_string(), hash);
			summary.hash_not_found_count += 1;
		}
	}
	Ok(())
}
