//! `LINKBAK_INDEX.TAG` marks a directory as a linkbak index and records its format version in the
//! first line.

use std::{
	fs::{self, File},
	io::{self, ErrorKind, Read},
	path::Path,
};

// TODO: (P) switch to std::sync::LazyLock once the MSRV allows it

use log::debug;
use once_cell::sync::Lazy;

// Use macro to work around include_str not accepting string constants
macro_rules! NAME_MACRO {
	() => {
		"LINKBAK_INDEX.TAG"
	};
}

pub static NAME: &str = NAME_MACRO!();

static DATA: &str = include_str!(concat!("../../templates/", NAME_MACRO!()));

static VERSION_LINE: Lazy<&[u8]> = Lazy::new(|| {
	DATA.lines()
		.next()
		.expect("tag file should have at least one line")
		.as_bytes()
});

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagStatus {
	Missing,
	Current,
	/// Some other version or not a linkbak tag at all
	Unrecognised,
}

pub fn status(path: &Path) -> io::Result<TagStatus> {
	let mut file = match File::open(path) {
		Ok(file) => file,
		Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TagStatus::Missing),
		Err(e) => return Err(e),
	};

	let mut buf = vec![0u8; VERSION_LINE.len()];
	match file.read_exact(&mut buf) {
		Ok(()) if buf == *VERSION_LINE => Ok(TagStatus::Current),
		Ok(()) => Ok(TagStatus::Unrecognised),
		Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(TagStatus::Unrecognised),
		Err(e) => Err(e),
	}
}

pub fn create_in(dir: &Path) -> io::Result<()> {
	let path = dir.join(NAME);

	debug!("creating tag file {path:?}");
	fs::write(path, DATA)
}

#[cfg(test)]
mod test {
	use assert_fs::prelude::*;

	use super::*;

	#[test]
	fn created_tag_is_current() {
		let temp = assert_fs::TempDir::new().unwrap();
		let tag = temp.child(NAME);

		assert_eq!(status(tag.path()).unwrap(), TagStatus::Missing);
		create_in(temp.path()).unwrap();
		assert_eq!(status(tag.path()).unwrap(), TagStatus::Current);
	}

	#[test]
	fn other_versions_unrecognised() {
		let temp = assert_fs::TempDir::new().unwrap();
		let tag = temp.child(NAME);

		tag.write_str("linkbak index version 2\n").unwrap();
		assert_eq!(status(tag.path()).unwrap(), TagStatus::Unrecognised);

		tag.write_str("short").unwrap();
		assert_eq!(status(tag.path()).unwrap(), TagStatus::Unrecognised);
	}
}
