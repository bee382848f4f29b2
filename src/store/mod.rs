//! Directory-sharded lookup stores. Every query is a filesystem existence check or a small read,
//! so memory use stays flat no matter how many sizes and hashes a backup root has seen.
//!
//! A key's first two characters pick the first directory level and the next two the second, e.g.
//! size `1234567890` lives at `12/34/1234567890`. Shard directories are created on demand.

pub mod hash;
pub mod size;

use std::path::{Path, PathBuf};

use crate::error::Result;

pub use self::{hash::HashStore, size::SizeStore};

/// "Has this file size been seen before", without payload
pub trait SizeLookup {
	fn contains(&self, size: u64) -> Result<bool>;
	fn add(&self, size: u64) -> Result<()>;
}

/// Content hash to the backup-root-relative path of a file currently holding that content
pub trait HashLookup {
	/// Entries whose file has vanished are removed and reported as absent
	fn get(&self, hash: &str) -> Result<Option<PathBuf>>;

	/// Like `get`, but never modifies the store
	fn peek(&self, hash: &str) -> Result<Option<PathBuf>>;

	/// Fails with `Error::HashConflict` if `hash` already has an entry
	fn set(&self, hash: &str, rel_path: &Path) -> Result<()>;
}

fn shard_path(base: &Path, key: &str) -> PathBuf {
	debug_assert!(key.is_ascii());
	let (first, rest) = key.split_at(key.len().min(2));
	let second = &rest[..rest.len().min(2)];

	let mut path = base.to_path_buf();
	for level in [first, second] {
		if !level.is_empty() {
			path.push(level);
		}
	}
	path.push(key);
	path
}
