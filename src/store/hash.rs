use std::{
	ffi::OsString,
	fs::{self, OpenOptions},
	io::{ErrorKind, Write},
	os::unix::prelude::{OsStrExt, OsStringExt},
	path::{Component, Path, PathBuf},
};

use log::{trace, warn};

use super::{shard_path, HashLookup};
use crate::{
	error::{Error, Result},
	util::{ext::IoResultExt, hex},
};

/// Each entry is a file named after the hash, containing the raw bytes of a path relative to the
/// backup root
pub struct HashStore {
	dir: PathBuf,
	backup_root: PathBuf,
}

impl HashStore {
	pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(dir: P, backup_root: Q) -> Self {
		HashStore {
			dir: dir.as_ref().to_path_buf(),
			backup_root: backup_root.as_ref().to_path_buf(),
		}
	}

	fn entry_path(&self, hash: &str) -> PathBuf {
		assert!(
			hash.len() >= 4 && hex::is_lower_hex(hash),
			"not a hex digest: {hash:?}"
		);
		shard_path(&self.dir, hash)
	}

	/// Reads the stored relative path. `None` if there's no entry.
	fn read_entry(&self, entry: &Path) -> Result<Option<PathBuf>> {
		let bytes = match fs::read(entry) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e).at(entry),
		};

		let rel_path = PathBuf::from(OsString::from_vec(bytes));
		let is_plain_relative = rel_path
			.components()
			.all(|c| matches!(c, Component::Normal(_)));
		if rel_path.as_os_str().is_empty() || !is_plain_relative {
			return Err(Error::Corrupt {
				path: entry.to_path_buf(),
				reason: format!("{rel_path:?} is not a path inside the backup root"),
			});
		}
		Ok(Some(rel_path))
	}
}

impl HashLookup for HashStore {
	fn get(&self, hash: &str) -> Result<Option<PathBuf>> {
		let entry = self.entry_path(hash);
		let Some(rel_path) = self.read_entry(&entry)? else {
			return Ok(None);
		};

		let target = self.backup_root.join(&rel_path);
		match fs::symlink_metadata(&target) {
			Ok(_) => Ok(Some(rel_path)),
			Err(e) if e.kind() == ErrorKind::NotFound => {
				warn!("{target:?} no longer exists, dropping hash entry {hash}");
				match fs::remove_file(&entry) {
					Ok(()) => Ok(None),
					Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
					Err(e) => Err(e).at(entry),
				}
			}
			Err(e) => Err(e).at(target),
		}
	}

	fn peek(&self, hash: &str) -> Result<Option<PathBuf>> {
		let entry = self.entry_path(hash);
		let Some(rel_path) = self.read_entry(&entry)? else {
			return Ok(None);
		};
		Ok(self.backup_root.join(&rel_path).exists().then_some(rel_path))
	}

	fn set(&self, hash: &str, rel_path: &Path) -> Result<()> {
		assert!(rel_path.is_relative(), "{rel_path:?} must be relative");

		let entry = self.entry_path(hash);
		let parent = entry.parent().expect("shard path has a parent");
		fs::create_dir_all(parent).at(parent)?;

		// create_new makes check-and-insert a single atomic step
		let mut file = match OpenOptions::new().write(true).create_new(true).open(&entry) {
			Ok(file) => file,
			Err(e) if e.kind() == ErrorKind::AlreadyExists => {
				let existing = self.read_entry(&entry)?.unwrap_or_default();
				return Err(Error::HashConflict {
					hash: hash.to_owned(),
					existing,
				});
			}
			Err(e) => return Err(e).at(entry),
		};

		trace!("adding hash entry {hash} -> {rel_path:?}");
		if let Err(e) = file.write_all(rel_path.as_os_str().as_bytes()) {
			drop(file);
			let _ = fs::remove_file(&entry);
			return Err(e).at(entry);
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use assert_fs::prelude::*;

	use super::*;

	const HASH: &str = "534659321d2eea6b13aea4f4c94c3b4f624622295da31506722b47a8eb9d726c";

	fn store(temp: &assert_fs::TempDir) -> HashStore {
		HashStore::new(temp.path().join(".idx/hash-lookup"), temp.path())
	}

	#[test]
	fn set_then_get() {
		let temp = assert_fs::TempDir::new().unwrap();
		temp.child("src/2026-01-01-000000/a.bin")
			.write_str("content")
			.unwrap();
		let hashes = store(&temp);

		assert_eq!(hashes.get(HASH).unwrap(), None);
		let rel = Path::new("src/2026-01-01-000000/a.bin");
		hashes.set(HASH, rel).unwrap();

		assert_eq!(hashes.get(HASH).unwrap(), Some(rel.to_path_buf()));
		temp.child(format!(".idx/hash-lookup/53/46/{HASH}"))
			.assert("src/2026-01-01-000000/a.bin");
	}

	#[test]
	fn second_set_conflicts_and_keeps_first() {
		let temp = assert_fs::TempDir::new().unwrap();
		temp.child("first").write_str("x").unwrap();
		temp.child("second").write_str("x").unwrap();
		let hashes = store(&temp);

		hashes.set(HASH, Path::new("first")).unwrap();
		match hashes.set(HASH, Path::new("second")) {
			Err(Error::HashConflict { hash, existing }) => {
				assert_eq!(hash, HASH);
				assert_eq!(existing, PathBuf::from("first"));
			}
			other => panic!("expected conflict, got {other:?}"),
		}
		assert_eq!(hashes.get(HASH).unwrap(), Some(PathBuf::from("first")));
	}

	#[test]
	fn stale_entry_heals_on_get() {
		let temp = assert_fs::TempDir::new().unwrap();
		let file = temp.child("gone");
		file.write_str("x").unwrap();
		let hashes = store(&temp);
		hashes.set(HASH, Path::new("gone")).unwrap();

		fs::remove_file(file.path()).unwrap();

		assert_eq!(hashes.peek(HASH).unwrap(), None);
		// peek leaves the entry alone
		temp.child(format!(".idx/hash-lookup/53/46/{HASH}"))
			.assert(predicates::path::exists());

		assert_eq!(hashes.get(HASH).unwrap(), None);
		temp.child(format!(".idx/hash-lookup/53/46/{HASH}"))
			.assert(predicates::path::missing());

		// the slot is free again
		temp.child("new").write_str("x").unwrap();
		hashes.set(HASH, Path::new("new")).unwrap();
		assert_eq!(hashes.get(HASH).unwrap(), Some(PathBuf::from("new")));
	}

	#[test]
	fn escaping_entry_is_corrupt() {
		let temp = assert_fs::TempDir::new().unwrap();
		temp.child(format!(".idx/hash-lookup/53/46/{HASH}"))
			.write_str("../outside")
			.unwrap();
		let hashes = store(&temp);

		assert!(matches!(hashes.get(HASH), Err(Error::Corrupt { .. })));
	}
}
