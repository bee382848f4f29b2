pub mod history;
pub mod manifest;
pub mod snapshot;
pub mod tag_file;

use std::{
	ffi::OsStr,
	fs,
	path::{Path, PathBuf},
};

use log::{debug, info};

use self::{history::FileHistory, snapshot::Snapshot, tag_file::TagStatus};
use crate::{
	config::{config_file, Config},
	error::{Error, Result},
	store::{HashStore, SizeStore},
	util::ext::IoResultExt,
};

pub const INDEX_DIR_NAME: &str = ".linkbak";
pub const SIZE_LOOKUP_NAME: &str = "size-lookup";
pub const HASH_LOOKUP_NAME: &str = "hash-lookup";
pub const HISTORY_NAME: &str = "history";

/// A backup root: `<root>/.linkbak/` for the indexes, `<root>/<source name>/<snapshot>/` for
/// the mirrored trees
#[derive(Debug)]
pub struct BackupRoot(pub PathBuf);

impl BackupRoot {
	/// Fails with `Error::Setup` unless `path` is an existing directory
	pub fn open(path: &Path) -> Result<BackupRoot> {
		if !path.is_dir() {
			return Err(Error::Setup(format!(
				"backup root {path:?} does not exist or is not a directory"
			)));
		}
		Ok(BackupRoot(fs::canonicalize(path).at(path)?))
	}

	pub fn index_path(&self) -> PathBuf {
		self.0.join(INDEX_DIR_NAME)
	}

	pub fn config_path(&self) -> PathBuf {
		self.index_path().join(config_file::NAME)
	}

	pub fn has_index(&self) -> bool {
		let index = self.index_path();
		tag_file::status(&index.join(tag_file::NAME)).ok() == Some(TagStatus::Current)
			&& index.join(SIZE_LOOKUP_NAME).is_dir()
			&& index.join(HASH_LOOKUP_NAME).is_dir()
	}

	/// Fails with `Error::Setup` if the index is missing or incomplete
	pub fn require_index(&self) -> Result<()> {
		if self.has_index() {
			Ok(())
		} else {
			Err(Error::Setup(format!(
				"{:?} has no usable index, run `linkbak backup` into it first",
				self.0
			)))
		}
	}

	/// Creates whatever parts of the index are missing, including a template config file.
	/// Refuses to touch an index tagged with an unknown version.
	pub fn init_index(&self) -> Result<()> {
		self.prepare_index(true)
	}

	/// Like [`Self::init_index`], but only for a directory that is already tagged as a backup root.
	/// Fails with `Error::Setup` otherwise, before anything is written.
	pub fn repair_index(&self) -> Result<()> {
		self.prepare_index(false)
	}

	fn prepare_index(&self, create_tag: bool) -> Result<()> {
		let index = self.index_path();
		let tag = index.join(tag_file::NAME);
		let tag_status = tag_file::status(&tag).at(&tag)?;
		match tag_status {
			TagStatus::Unrecognised => {
				return Err(Error::Setup(format!(
					"{tag:?} is not a version this linkbak understands"
				)))
			}
			TagStatus::Missing if !create_tag => {
				return Err(Error::Setup(format!(
					"{:?} is not a linkbak backup root, {tag:?} is missing",
					self.0
				)))
			}
			_ => {}
		}

		if !index.is_dir() {
			info!("creating index directory {index:?}");
		}
		for dir in [SIZE_LOOKUP_NAME, HASH_LOOKUP_NAME, HISTORY_NAME].map(|d| index.join(d)) {
			fs::create_dir_all(&dir).at(&dir)?;
		}

		if tag_status == TagStatus::Missing {
			tag_file::create_in(&index).at(&index)?;
		}

		let config = self.config_path();
		if !config.exists() {
			debug!("writing config template {config:?}");
			fs::write(&config, config_file::DATA).at(&config)?;
		}
		Ok(())
	}

	pub fn config(&self) -> Result<Config> {
		Config::load(&self.config_path())
	}

	pub fn size_store(&self, cfg: &Config) -> SizeStore {
		SizeStore::new(
			self.index_path().join(SIZE_LOOKUP_NAME),
			cfg.min_dedup_size,
		)
	}

	pub fn hash_store(&self) -> HashStore {
		HashStore::new(self.index_path().join(HASH_LOOKUP_NAME), &self.0)
	}

	pub fn history(&self) -> FileHistory {
		FileHistory::new(self.index_path().join(HISTORY_NAME), &self.0)
	}

	pub fn source_dir(&self, source_name: &OsStr) -> PathBuf {
		self.0.join(source_name)
	}

	/// Chronologically newest snapshot of `source_name` (see [`snapshot::order_key`]), finished or
	/// not
	pub fn latest_snapshot(&self, source_name: &OsStr) -> Result<Option<Snapshot>> {
		Ok(Snapshot::list(&self.source_dir(source_name))?.pop())
	}

	/// Path of `abs_path` relative to the backup root
	pub fn relative(&self, abs_path: &Path) -> Result<PathBuf> {
		pathdiff::diff_paths(abs_path, &self.0)
			.filter(|rel| !rel.starts_with(".."))
			.ok_or_else(|| {
				Error::Setup(format!("{abs_path:?} is not inside backup root {:?}", self.0))
			})
	}
}
