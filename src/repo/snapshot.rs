use std::{
	ffi::OsStr,
	io::ErrorKind,
	os::unix::prelude::OsStrExt,
	path::{Path, PathBuf},
};

use chrono::{DateTime, TimeZone};

use crate::{error::Result, util::ext::IoResultExt};

/// `strftime` format of snapshot directory names. Sorts chronologically.
pub const NAME_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Length of a name formatted with [`NAME_FORMAT`], before any `-<n>` suffix
const BASE_LEN: usize = "2026-01-01-000000".len();

/// Chronological ordering key of a snapshot name: the timestamp part, then the numeric collision
/// suffix, so `...-10` sorts after `...-9`.
pub fn order_key(name: &OsStr) -> (&[u8], u32) {
	let bytes = name.as_bytes();
	if bytes.len() > BASE_LEN + 1 && bytes[BASE_LEN] == b'-' {
		let suffix = std::str::from_utf8(&bytes[BASE_LEN + 1..])
			.ok()
			.and_then(|s| s.parse().ok());
		if let Some(n) = suffix {
			return (&bytes[..BASE_LEN], n);
		}
	}
	(bytes, 0)
}

/// A snapshot directory, `<backup_root>/<source name>/<snapshot name>`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot(pub PathBuf);

impl Snapshot {
	pub fn name(&self) -> &OsStr {
		self.0.file_name().expect("snapshot path has a name")
	}

	pub fn source_name(&self) -> &OsStr {
		self.0
			.parent()
			.and_then(Path::file_name)
			.expect("snapshot path has a source directory")
	}

	/// Creates a fresh snapshot directory named after `now` below `source_dir`. A `-<n>` suffix
	/// is appended if a snapshot with that name already exists.
	pub fn create<Tz: TimeZone>(source_dir: &Path, now: &DateTime<Tz>) -> Result<Snapshot>
	where
		Tz::Offset: std::fmt::Display,
	{
		std::fs::create_dir_all(source_dir).at(source_dir)?;

		let base = now.format(NAME_FORMAT).to_string();
		let mut suffix = 0u32;
		loop {
			let name = match suffix {
				0 => base.clone(),
				n => format!("{base}-{n}"),
			};
			let path = source_dir.join(name);
			match std::fs::create_dir(&path) {
				Ok(()) => return Ok(Snapshot(path)),
				Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
				Err(e) => return Err(e).at(path),
			}
		}
	}

	/// Snapshot directories below `source_dir`, oldest first. Empty if `source_dir` doesn't exist.
	pub fn list(source_dir: &Path) -> Result<Vec<Snapshot>> {
		let iter = match source_dir.read_dir() {
			Ok(iter) => iter,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e).at(source_dir),
		};

		let mut snapshots = Vec::new();
		for dentry in iter {
			let dentry = dentry.at(source_dir)?;
			if dentry.file_type().at(dentry.path())?.is_dir() {
				snapshots.push(Snapshot(dentry.path()));
			}
		}
		snapshots.sort_by(|a, b| order_key(a.name()).cmp(&order_key(b.name())));
		Ok(snapshots)
	}
}
