//! Ingestion of a source tree into a new snapshot.
//!
//! Per regular file, in order of preference:
//!
//! 1. below `min_dedup_size`: plain copy, no hashing, no index traffic
//! 2. fast path: unchanged size and mtime against an intact file of the previous completed
//!    snapshot, hardlink to it without hashing
//! 3. size never seen: copy while hashing (one read), register size and hash
//! 4. size seen: hash, hardlink to the HashStore holder on a hit, copy and register otherwise
//!
//! A failed hardlink always degrades to a copy. Every hashed or linked file gets a MANIFEST line
//! once its destination is complete.

use std::{
	ffi::OsStr,
	fmt, fs, io,
	os::unix::fs::symlink,
	path::Path,
};

use chrono::Local;
use log::{debug, info, warn};

use super::source_dir_and_name;
use crate::{
	config::Config,
	error::{Error, Result},
	file::{
		copy::copy,
		hash_file,
		walk::{EntryKind, WalkEntry, Walker},
	},
	interrupt::Interrupt,
	repo::{
		history::{FileRecord, History},
		manifest::{self, Manifest},
		snapshot::Snapshot,
		BackupRoot,
	},
	store::{HashLookup, SizeLookup},
	util::ext::IoResultExt,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackupSummary {
	/// Regular files that ended up in the snapshot
	pub processed_count: u64,
	pub processed_bytes: u64,
	/// Regular files whose content was written out, small files included
	pub new_count: u64,
	pub new_bytes: u64,
	/// Regular files hardlinked to content already in the backup root
	pub linked_count: u64,
	pub linked_bytes: u64,
	pub symlink_count: u64,
	pub error_count: u64,
}

impl BackupSummary {
	fn count(&mut self, outcome: &Outcome) {
		match *outcome {
			Outcome::Symlink => self.symlink_count += 1,
			Outcome::Copied { bytes, .. } => {
				self.processed_count += 1;
				self.processed_bytes += bytes;
				self.new_count += 1;
				self.new_bytes += bytes;
			}
			Outcome::Linked { bytes, .. } => {
				self.processed_count += 1;
				self.processed_bytes += bytes;
				self.linked_count += 1;
				self.linked_bytes += bytes;
			}
		}
	}
}

impl fmt::Display for BackupSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(
			f,
			"processed files: {} ({} bytes)",
			self.processed_count, self.processed_bytes
		)?;
		writeln!(
			f,
			"new files:       {} ({} bytes)",
			self.new_count, self.new_bytes
		)?;
		writeln!(
			f,
			"linked files:    {} ({} bytes)",
			self.linked_count, self.linked_bytes
		)?;
		writeln!(f, "symlinks:        {}", self.symlink_count)?;
		write!(f, "errors:          {}", self.error_count)
	}
}

enum Outcome {
	Symlink,
	Copied { hash: Option<String>, bytes: u64 },
	Linked { hash: String, bytes: u64 },
}

impl Outcome {
	fn hash(&self) -> Option<&str> {
		match self {
			Outcome::Symlink => None,
			Outcome::Copied { hash, .. } => hash.as_deref(),
			Outcome::Linked { hash, .. } => Some(hash),
		}
	}
}

/// The previous completed snapshot, as far as fast-compare is concerned
struct Previous {
	snapshot: Snapshot,
	latest_mtime: i64,
}

struct Ingest<'a, 'h> {
	cfg: &'a Config,
	root: &'a BackupRoot,
	snapshot: Snapshot,
	previous: Option<Previous>,
	sizes: &'a dyn SizeLookup,
	hashes: &'a dyn HashLookup,
	history: &'a mut (dyn History + 'h),
	interrupt: &'a Interrupt,
}

/// Backs up `source` into a new snapshot below `root`. Directories named in `excludes` or
/// `cfg.excludes` are skipped, as is `root` itself when it lies inside `source`.
///
/// Per-file failures are counted in the summary. Setup failures and interruption abort the run,
/// leaving the snapshot marked incomplete in `history`.
pub fn backup(
	source: &Path,
	root: &BackupRoot,
	excludes: &[String],
	cfg: &Config,
	history: &mut dyn History,
	interrupt: &Interrupt,
) -> Result<(Snapshot, BackupSummary)> {
	let (source, source_name) = source_dir_and_name(source)?;
	root.init_index()?;

	let previous = match history.latest_completed(&source_name)? {
		Some(snapshot) => history
			.latest_mtime(&snapshot)?
			.map(|latest_mtime| Previous {
				snapshot,
				latest_mtime,
			}),
		None => None,
	};
	match &previous {
		Some(prev) => info!("fast-comparing against {:?}", prev.snapshot.0),
		None => info!("no previous completed snapshot, hashing every file"),
	}

	let snapshot = Snapshot::create(&root.source_dir(&source_name), &Local::now())?;
	info!("backing up {source:?} into {:?}", snapshot.0);
	history.begin(&snapshot)?;

	let mut summary = BackupSummary::default();

	let walker = Walker::new(&source)
		.exclude_names(cfg.excludes.iter().chain(excludes).cloned())
		.exclude_dir(&root.0);
	let mut entries = Vec::new();
	for res in walker.entries() {
		match res {
			Ok(entry) => entries.push(entry),
			Err(e) => {
				warn!("{e}");
				summary.error_count += 1;
			}
		}
	}
	// Newest first; ties in name order to stay deterministic
	entries.sort_by(|a, b| {
		b.mtime_ns
			.cmp(&a.mtime_ns)
			.then_with(|| a.rel_path.cmp(&b.rel_path))
	});
	info!("{} entries to back up", entries.len());

	let sizes = root.size_store(cfg);
	let hashes = root.hash_store();
	let mut ingest = Ingest {
		cfg,
		root,
		snapshot,
		previous,
		sizes: &sizes,
		hashes: &hashes,
		history,
		interrupt,
	};

	for entry in &entries {
		interrupt.check()?;
		match ingest.process(entry) {
			Ok(outcome) => summary.count(&outcome),
			Err(e) if e.is_fatal() => return Err(e),
			Err(e) => {
				warn!("skipping {:?}: {e}", entry.path);
				summary.error_count += 1;
			}
		}
	}

	ingest.history.complete(&ingest.snapshot)?;
	info!("backup of {source:?} done");
	Ok((ingest.snapshot, summary))
}

impl Ingest<'_, '_> {
	fn process(&mut self, entry: &WalkEntry) -> Result<Outcome> {
		let file_name = entry
			.rel_path
			.file_name()
			.expect("walked entries below the root have names");
		if file_name == OsStr::new(manifest::NAME) {
			return Err(Error::ReservedName(entry.path.clone()));
		}

		let dst = self.snapshot.0.join(&entry.rel_path);
		let parent = dst.parent().expect("destination has a parent");
		fs::create_dir_all(parent).at(parent)?;

		let outcome = match entry.kind {
			EntryKind::Symlink => {
				let target = fs::read_link(&entry.path).at(&entry.path)?;
				debug!("symlink {dst:?} -> {target:?}");
				symlink(&target, &dst).at(&dst)?;
				Outcome::Symlink
			}
			EntryKind::File if entry.size < self.cfg.min_dedup_size => {
				debug!("copying small file {:?}", entry.path);
				let (_, bytes) = copy(&entry.path, &dst, None, self.cfg, self.interrupt)?;
				Outcome::Copied { hash: None, bytes }
			}
			EntryKind::File => match self.fast_link(entry, &dst)? {
				Some(outcome) => outcome,
				None => self.ingest(entry, &dst)?,
			},
		};

		if let Some(hash) = outcome.hash() {
			Manifest::in_dir(parent).append(hash, file_name)?;
		}

		self.history.record(
			&self.snapshot,
			&FileRecord {
				rel_path: entry.rel_path.clone(),
				kind: entry.kind,
				size: entry.size,
				mtime_ns: entry.mtime_ns,
				hash: outcome.hash().map(str::to_owned),
				linkable: entry.kind == EntryKind::File,
			},
		)?;

		Ok(outcome)
	}

	/// Hardlinks `dst` to the same file of the previous snapshot if size and mtime show it's
	/// unchanged. `None` means the full path has to decide.
	fn fast_link(&mut self, entry: &WalkEntry, dst: &Path) -> Result<Option<Outcome>> {
		let Some(prev) = &self.previous else {
			return Ok(None);
		};
		if entry.mtime_ns > prev.latest_mtime {
			return Ok(None);
		}

		let Some(record) = self.history.lookup(&prev.snapshot, &entry.rel_path)? else {
			return Ok(None);
		};
		if !record.linkable || record.size != entry.size || record.mtime_ns != entry.mtime_ns {
			return Ok(None);
		}
		let Some(hash) = record.hash else {
			return Ok(None);
		};

		let prev_file = prev.snapshot.0.join(&entry.rel_path);
		let intact = fs::symlink_metadata(&prev_file)
			.is_ok_and(|md| md.is_file() && md.len() == record.size);
		if !intact {
			warn!("{prev_file:?} is missing or was modified, no longer linking to it");
			self.history
				.mark_unlinkable(&prev.snapshot, &entry.rel_path)?;
			return Ok(None);
		}

		match fs::hard_link(&prev_file, dst) {
			Ok(()) => {
				debug!("unchanged, linked {dst:?} to {prev_file:?}");
				Ok(Some(Outcome::Linked {
					hash,
					bytes: entry.size,
				}))
			}
			Err(e) => {
				if too_many_links(&e) {
					info!("{prev_file:?} reached the hardlink limit, falling back to hashing");
				} else {
					warn!("unable to link {dst:?} to {prev_file:?} ({e}), falling back to hashing");
				}
				self.history
					.mark_unlinkable(&prev.snapshot, &entry.rel_path)?;
				Ok(None)
			}
		}
	}

	fn ingest(&mut self, entry: &WalkEntry, dst: &Path) -> Result<Outcome> {
		let algorithm = Some(self.cfg.hash_algorithm);

		if !self.sizes.contains(entry.size)? {
			debug!("first file of size {}, copying {:?}", entry.size, entry.path);
			let (hash, bytes) = copy(&entry.path, dst, algorithm, self.cfg, self.interrupt)?;
			let hash = hash.expect("copy hashes when asked to");
			self.sizes.add(entry.size)?;
			self.register(&hash, dst)?;
			return Ok(Outcome::Copied {
				hash: Some(hash),
				bytes,
			});
		}

		let (hash, _) = hash_file(&entry.path, self.cfg, self.interrupt)?;
		if let Some(existing) = self.hashes.get(&hash)? {
			let existing = self.root.0.join(existing);
			let plausible =
				fs::symlink_metadata(&existing).is_ok_and(|md| md.len() == entry.size);
			if plausible {
				match fs::hard_link(&existing, dst) {
					Ok(()) => {
						debug!("duplicate content, linked {dst:?} to {existing:?}");
						return Ok(Outcome::Linked {
							hash,
							bytes: entry.size,
						});
					}
					Err(e) if too_many_links(&e) => {
						info!("{existing:?} reached the hardlink limit, copying {:?}", entry.path)
					}
					Err(e) => warn!("unable to link {dst:?} to {existing:?} ({e}), copying"),
				}
			} else {
				warn!("{existing:?} no longer has the size of hash {hash}, copying");
			}

			// The existing entry stays: first writer wins
			let (_, bytes) = copy(&entry.path, dst, None, self.cfg, self.interrupt)?;
			return Ok(Outcome::Copied {
				hash: Some(hash),
				bytes,
			});
		}

		debug!("new content, copying {:?}", entry.path);
		let (copied_hash, bytes) = copy(&entry.path, dst, algorithm, self.cfg, self.interrupt)?;
		let copied_hash = copied_hash.expect("copy hashes when asked to");
		if copied_hash != hash {
			warn!("{:?} changed while being backed up", entry.path);
		}
		self.register(&copied_hash, dst)?;
		Ok(Outcome::Copied {
			hash: Some(copied_hash),
			bytes,
		})
	}

	fn register(&self, hash: &str, dst: &Path) -> Result<()> {
		let rel_path = self.root.relative(dst)?;
		match self.hashes.set(hash, &rel_path) {
			Err(Error::HashConflict { existing, .. }) => {
				warn!("hash {hash} is already held by {existing:?}, keeping that entry");
				Ok(())
			}
			res => res,
		}
	}
}

fn too_many_links(e: &io::Error) -> bool {
	e.raw_os_error() == Some(libc::EMLINK)
}
