use std::{
	fs::{self, File, OpenOptions},
	io::{ErrorKind, Read, Write},
	path::Path,
};

use log::{debug, warn};

use super::ContentHasher;
use crate::{
	config::{Config, HashAlgorithm},
	error::Result,
	interrupt::Interrupt,
	util::ext::IoResultExt,
};

/// Removes a destination file on drop unless it was committed, so neither an I/O error nor an
/// interrupt can leave a truncated copy in a snapshot.
struct PartialFile<'a> {
	path: &'a Path,
	committed: bool,
}

impl Drop for PartialFile<'_> {
	fn drop(&mut self) {
		if self.committed {
			return;
		}
		debug!("removing partial copy {:?}", self.path);
		if let Err(e) = fs::remove_file(self.path) {
			warn!("unable to remove partial copy {:?}: {e}", self.path);
		}
	}
}

/// Copies `src` to the not yet existing `dst` in a single read pass, hashing the content on the
/// way when `algorithm` is given. Permission bits and modification time are carried over.
///
/// Returns the digest (if requested) and the number of bytes copied.
pub fn copy(
	src: &Path,
	dst: &Path,
	algorithm: Option<HashAlgorithm>,
	cfg: &Config,
	interrupt: &Interrupt,
) -> Result<(Option<String>, u64)> {
	let mut reader = File::open(src).at(src)?;
	let src_md = reader.metadata().at(src)?;

	let mut writer = OpenOptions::new()
		.write(true)
		.create_new(true)
		.open(dst)
		.at(dst)?;
	let mut partial = PartialFile {
		path: dst,
		committed: false,
	};

	let mut hasher = algorithm.map(ContentHasher::new);
	let mut buffer = vec![0; cfg.chunk_size];
	let mut total = 0u64;
	loop {
		interrupt.check()?;
		let n = match reader.read(&mut buffer) {
			Ok(0) => break,
			Ok(n) => n,
			Err(e) if e.kind() == ErrorKind::Interrupted => continue,
			Err(e) => return Err(e).at(src),
		};
		if let Some(hasher) = hasher.as_mut() {
			hasher.update(&buffer[..n]);
		}
		writer.write_all(&buffer[..n]).at(dst)?;
		total += n as u64;
	}

	writer.set_permissions(src_md.permissions()).at(dst)?;
	writer.set_modified(src_md.modified().at(src)?).at(dst)?;
	drop(writer);

	partial.committed = true;
	Ok((hasher.map(ContentHasher::finalize), total))
}

#[cfg(test)]
mod test {
	use std::os::unix::fs::PermissionsExt;

	use assert_fs::prelude::*;

	use super::*;
	use crate::{error::Error, file::hash_file};

	#[test]
	fn copies_content_mode_and_mtime() {
		let temp = assert_fs::TempDir::new().unwrap();
		let src = temp.child("src");
		src.write_str("some content").unwrap();
		fs::set_permissions(src.path(), fs::Permissions::from_mode(0o640)).unwrap();
		let dst = temp.child("dst");

		let cfg = Config::default();
		let interrupt = Interrupt::new();
		let (hash, len) = copy(
			src.path(),
			dst.path(),
			Some(cfg.hash_algorithm),
			&cfg,
			&interrupt,
		)
		.unwrap();

		dst.assert("some content");
		assert_eq!(len, 12);
		assert_eq!(
			hash.unwrap(),
			hash_file(src.path(), &cfg, &interrupt).unwrap().0
		);

		let src_md = fs::metadata(src.path()).unwrap();
		let dst_md = fs::metadata(dst.path()).unwrap();
		assert_eq!(dst_md.permissions().mode() & 0o777, 0o640);
		assert_eq!(dst_md.modified().unwrap(), src_md.modified().unwrap());
	}

	#[test]
	fn without_hash() {
		let temp = assert_fs::TempDir::new().unwrap();
		let src = temp.child("src");
		src.write_str("tiny").unwrap();
		let dst = temp.child("dst");

		let (hash, len) = copy(
			src.path(),
			dst.path(),
			None,
			&Config::default(),
			&Interrupt::new(),
		)
		.unwrap();
		assert_eq!(hash, None);
		assert_eq!(len, 4);
		dst.assert("tiny");
	}

	#[test]
	fn refuses_existing_destination() {
		let temp = assert_fs::TempDir::new().unwrap();
		let src = temp.child("src");
		src.write_str("new").unwrap();
		let dst = temp.child("dst");
		dst.write_str("old").unwrap();

		let res = copy(
			src.path(),
			dst.path(),
			None,
			&Config::default(),
			&Interrupt::new(),
		);
		assert!(matches!(res, Err(Error::Io { .. })));
		// the pre-existing file is not ours to clean up
		dst.assert("old");
	}

	#[test]
	fn interrupt_leaves_no_partial_file() {
		let temp = assert_fs::TempDir::new().unwrap();
		let src = temp.child("src");
		src.write_binary(&vec![1u8; 4096]).unwrap();
		let dst = temp.child("dst");

		let interrupt = Interrupt::new();
		interrupt.trigger();
		let res = copy(
			src.path(),
			dst.path(),
			Some(HashAlgorithm::Blake3),
			&Config::default(),
			&interrupt,
		);
		assert!(matches!(res, Err(Error::Interrupted)));
		dst.assert(predicates::path::missing());
	}
}
