use std::{
	fs::{self, OpenOptions},
	io::ErrorKind,
	path::{Path, PathBuf},
};

use log::trace;

use super::{shard_path, SizeLookup};
use crate::{
	error::{Error, Result},
	util::ext::IoResultExt,
};

/// Sizes are recorded as empty marker files
pub struct SizeStore {
	dir: PathBuf,
	min_size: u64,
}

impl SizeStore {
	pub fn new<P: AsRef<Path>>(dir: P, min_size: u64) -> Self {
		SizeStore {
			dir: dir.as_ref().to_path_buf(),
			min_size,
		}
	}

	fn entry_path(&self, size: u64) -> Result<PathBuf> {
		if size < self.min_size {
			return Err(Error::BelowThreshold {
				size,
				min: self.min_size,
			});
		}
		Ok(shard_path(&self.dir, &size.to_string()))
	}
}

impl SizeLookup for SizeStore {
	fn contains(&self, size: u64) -> Result<bool> {
		let path = self.entry_path(size)?;
		match fs::symlink_metadata(&path) {
			Ok(_) => Ok(true),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
			Err(e) => Err(e).at(path),
		}
	}

	fn add(&self, size: u64) -> Result<()> {
		let path = self.entry_path(size)?;
		let parent = path.parent().expect("shard path has a parent");
		fs::create_dir_all(parent).at(parent)?;

		trace!("adding size entry {path:?}");
		OpenOptions::new()
			.write(true)
			.create(true)
			.open(&path)
			.at(&path)?;
		Ok(())
	}
}
