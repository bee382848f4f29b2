use std::{os::unix::prelude::MetadataExt, path::Path};

/// Identity of a directory entry on its filesystem. Used to recognise the backup root when it
/// lives inside the tree being walked, regardless of how the path was spelled.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FileKey {
	pub dev: u64,
	pub ino: u64,
}

impl FileKey {
	pub fn from_path(path: &Path) -> std::io::Result<FileKey> {
		std::fs::symlink_metadata(path).map(|md| FileKey::from_metadata(&md))
	}

	pub fn from_metadata(md: &std::fs::Metadata) -> FileKey {
		FileKey {
			dev: md.dev(),
			ino: md.ino(),
		}
	}
}
