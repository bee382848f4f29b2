use std::{
	collections::HashSet,
	ffi::OsString,
	path::{Path, PathBuf},
};

use log::{info, trace};
use walkdir::DirEntry;

use super::{filekey::FileKey, mtime_ns};
use crate::{
	error::{Error, Result},
	util::ext::IoResultExt,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
	File,
	Symlink,
}

#[derive(Clone, Debug)]
pub struct WalkEntry {
	pub path: PathBuf,
	/// Path relative to the walk root
	pub rel_path: PathBuf,
	pub kind: EntryKind,
	pub size: u64,
	pub mtime_ns: i64,
}

/// Enumerates regular files and symlinks below a root directory. Symlinks are reported, never
/// followed. Excluded directories are pruned before descending into them.
pub struct Walker {
	root: PathBuf,
	excluded_names: HashSet<OsString>,
	excluded_dirs: HashSet<FileKey>,
}

impl Walker {
	pub fn new<P: AsRef<Path>>(root: P) -> Self {
		Walker {
			root: root.as_ref().to_path_buf(),
			excluded_names: HashSet::new(),
			excluded_dirs: HashSet::new(),
		}
	}

	/// Prunes every directory with one of these names, at any depth
	pub fn exclude_names<I, S>(mut self, names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		self.excluded_names
			.extend(names.into_iter().map(Into::into));
		self
	}

	/// Prunes one specific directory, identified by device and inode. A nonexistent `dir` can't
	/// be inside the tree, so it's ignored.
	pub fn exclude_dir(mut self, dir: &Path) -> Self {
		match FileKey::from_path(dir) {
			Ok(key) => {
				self.excluded_dirs.insert(key);
			}
			Err(e) => trace!("not excluding {dir:?}: {e}"),
		}
		self
	}

	fn is_included(&self, entry: &DirEntry) -> bool {
		if entry.depth() == 0 || !entry.file_type().is_dir() {
			return true;
		}

		if self.excluded_names.contains(entry.file_name()) {
			info!("excluding {:?} by name", entry.path());
			return false;
		}

		if !self.excluded_dirs.is_empty() {
			if let Ok(md) = entry.metadata() {
				if self.excluded_dirs.contains(&FileKey::from_metadata(&md)) {
					info!("excluding {:?}", entry.path());
					return false;
				}
			}
		}

		true
	}

	/// Entries in file name order. Errors for single entries (e.g. unreadable directories) are
	/// yielded in place, so callers can count them and carry on.
	pub fn entries(&self) -> impl Iterator<Item = Result<WalkEntry>> + '_ {
		walkdir::WalkDir::new(&self.root)
			.follow_links(false)
			.sort_by_file_name()
			.into_iter()
			.filter_entry(|entry| self.is_included(entry))
			.filter_map(move |res| match res {
				Err(e) => {
					let path = e
						.path()
						.map(Path::to_path_buf)
						.unwrap_or_else(|| self.root.clone());
					Some(Err(Error::Io {
						path,
						source: e.into(),
					}))
				}
				Ok(entry) => self.to_walk_entry(entry).transpose(),
			})
	}

	fn to_walk_entry(&self, entry: DirEntry) -> Result<Option<WalkEntry>> {
		let file_type = entry.file_type();
		let kind = if file_type.is_file() {
			EntryKind::File
		} else if file_type.is_symlink() {
			EntryKind::Symlink
		} else {
			if !file_type.is_dir() {
				info!("skipping special file {:?}", entry.path());
			}
			return Ok(None);
		};

		let md = entry
			.metadata()
			.map_err(std::io::Error::from)
			.at(entry.path())?;

		let rel_path = entry
			.path()
			.strip_prefix(&self.root)
			.expect("walkdir yields paths below its root")
			.to_path_buf();

		Ok(Some(WalkEntry {
			rel_path,
			kind,
			size: md.len(),
			mtime_ns: mtime_ns(&md),
			path: entry.into_path(),
		}))
	}
}
