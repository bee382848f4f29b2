//! Per-file records of past snapshots, consumed by the fast-compare path of the next backup.
//!
//! [`History`] is the seam to whatever keeps snapshot bookkeeping. [`FileHistory`] implements it
//! with one append-only log per snapshot at `<history dir>/<source name>/<snapshot name>.log`:
//!
//! ```text
//! file <size> <mtime_ns> <hash or -> <linkable 0/1> <tagged path>
//! symlink <size> <mtime_ns> - 0 <tagged path>
//! unlinkable <tagged path>
//! complete
//! ```
//!
//! Paths use the tagged raw/hex encoding from [`crate::util::hex::tagged_rawhex`]. A snapshot
//! counts as completed once its log has a `complete` line. A malformed last line without its
//! newline is what a killed run leaves behind, so it is dropped instead of failing the whole log.

use std::{
	collections::HashMap,
	ffi::{OsStr, OsString},
	fs::{self, File, OpenOptions},
	io::{BufRead, BufReader, ErrorKind, Write},
	os::unix::prelude::{OsStrExt, OsStringExt},
	path::{Path, PathBuf},
};

use log::{debug, warn};

use super::snapshot::{self, Snapshot};
use crate::{
	error::{Error, Result},
	file::walk::EntryKind,
	util::{ext::IoResultExt, hex::tagged_rawhex},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
	/// Relative to the snapshot directory
	pub rel_path: PathBuf,
	pub kind: EntryKind,
	pub size: u64,
	pub mtime_ns: i64,
	/// `None` for files copied without hashing and for symlinks
	pub hash: Option<String>,
	/// Whether the backed up file may still serve as a hardlink source
	pub linkable: bool,
}

impl FileRecord {
	pub fn directory(&self) -> &Path {
		self.rel_path.parent().unwrap_or(Path::new(""))
	}

	pub fn file_name(&self) -> Option<&OsStr> {
		self.rel_path.file_name()
	}
}

pub trait History {
	/// Newest snapshot of `source_name` whose run finished
	fn latest_completed(&mut self, source_name: &OsStr) -> Result<Option<Snapshot>>;

	/// Newest modification time recorded for any regular file of `snap`
	fn latest_mtime(&mut self, snap: &Snapshot) -> Result<Option<i64>>;

	fn lookup(&mut self, snap: &Snapshot, rel_path: &Path) -> Result<Option<FileRecord>>;

	/// Stops `rel_path` of `snap` from being offered as a hardlink source again
	fn mark_unlinkable(&mut self, snap: &Snapshot, rel_path: &Path) -> Result<()>;

	fn begin(&mut self, snap: &Snapshot) -> Result<()>;
	fn record(&mut self, snap: &Snapshot, record: &FileRecord) -> Result<()>;
	fn complete(&mut self, snap: &Snapshot) -> Result<()>;
}

mod line {
	pub const FILE: &[u8] = b"file";
	pub const SYMLINK: &[u8] = b"symlink";
	pub const UNLINKABLE: &[u8] = b"unlinkable";
	pub const COMPLETE: &[u8] = b"complete";
}

#[derive(Debug, Default)]
struct LoadedLog {
	records: HashMap<PathBuf, FileRecord>,
	latest_mtime: Option<i64>,
	complete: bool,
}

pub struct FileHistory {
	dir: PathBuf,
	backup_root: PathBuf,
	loaded: Option<(PathBuf, LoadedLog)>,
	writer: Option<(PathBuf, File)>,
}

impl FileHistory {
	pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(dir: P, backup_root: Q) -> Self {
		FileHistory {
			dir: dir.as_ref().to_path_buf(),
			backup_root: backup_root.as_ref().to_path_buf(),
			loaded: None,
			writer: None,
		}
	}

	fn log_path(&self, snap: &Snapshot) -> PathBuf {
		let mut name = snap.name().to_os_string();
		name.push(".log");
		self.dir.join(snap.source_name()).join(name)
	}

	/// Parses the log of `snap`, caching the most recently used one
	fn load(&mut self, snap: &Snapshot) -> Result<&mut LoadedLog> {
		let path = self.log_path(snap);
		if self.loaded.as_ref().map(|(p, _)| p) != Some(&path) {
			debug!("loading history {path:?}");
			let log = parse_log(&path)?;
			self.loaded = Some((path, log));
		}
		Ok(&mut self.loaded.as_mut().expect("loaded above").1)
	}

	fn append(path: &Path, line: &[u8]) -> Result<()> {
		OpenOptions::new()
			.append(true)
			.open(path)
			.and_then(|mut file| file.write_all(line))
			.at(path)
	}

	fn writer_for(&mut self, snap: &Snapshot) -> Result<&mut File> {
		let path = self.log_path(snap);
		match &mut self.writer {
			Some((p, file)) if *p == path => Ok(file),
			_ => Err(Error::Setup(format!(
				"history for {:?} was not started",
				snap.0
			))),
		}
	}
}

impl History for FileHistory {
	fn latest_completed(&mut self, source_name: &OsStr) -> Result<Option<Snapshot>> {
		let logs_dir = self.dir.join(source_name);
		let iter = match logs_dir.read_dir() {
			Ok(iter) => iter,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e).at(logs_dir),
		};

		let mut names = Vec::new();
		for dentry in iter {
			let path = dentry.at(&logs_dir)?.path();
			if path.extension() == Some(OsStr::new("log")) {
				if let Some(stem) = path.file_stem() {
					names.push(stem.to_os_string());
				}
			}
		}
		names.sort_by(|a, b| snapshot::order_key(a).cmp(&snapshot::order_key(b)));

		for name in names.iter().rev() {
			let snap = Snapshot(self.backup_root.join(source_name).join(name));
			if !snap.0.is_dir() {
				debug!("snapshot {:?} no longer exists, skipping its history", snap.0);
				continue;
			}
			match self.load(&snap) {
				Ok(log) if log.complete => return Ok(Some(snap)),
				Ok(_) => {}
				Err(e @ Error::Corrupt { .. }) => {
					warn!("not using {:?} for fast-compare: {e}", snap.0);
					continue;
				}
				Err(e) => return Err(e),
			}
			debug!("snapshot {:?} never completed", snap.0);
		}
		Ok(None)
	}

	fn latest_mtime(&mut self, snap: &Snapshot) -> Result<Option<i64>> {
		Ok(self.load(snap)?.latest_mtime)
	}

	fn lookup(&mut self, snap: &Snapshot, rel_path: &Path) -> Result<Option<FileRecord>> {
		Ok(self.load(snap)?.records.get(rel_path).cloned())
	}

	fn mark_unlinkable(&mut self, snap: &Snapshot, rel_path: &Path) -> Result<()> {
		let path = self.log_path(snap);
		let mut line = [line::UNLINKABLE, b" "].concat();
		line.extend(tagged_rawhex::encode(false, rel_path.as_os_str().as_bytes()));
		line.push(b'\n');
		Self::append(&path, &line)?;

		if let Some(record) = self.load(snap)?.records.get_mut(rel_path) {
			record.linkable = false;
		}
		Ok(())
	}

	fn begin(&mut self, snap: &Snapshot) -> Result<()> {
		let path = self.log_path(snap);
		let parent = path.parent().expect("log path has a parent");
		fs::create_dir_all(parent).at(parent)?;

		let file = OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(&path)
			.at(&path)?;
		self.writer = Some((path, file));
		Ok(())
	}

	fn record(&mut self, snap: &Snapshot, record: &FileRecord) -> Result<()> {
		let line = format_record(record);
		let path = self.log_path(snap);
		self.writer_for(snap)?.write_all(&line).at(path)
	}

	fn complete(&mut self, snap: &Snapshot) -> Result<()> {
		let path = self.log_path(snap);
		let file = self.writer_for(snap)?;
		file.write_all(&[line::COMPLETE, b"\n"].concat())
			.and_then(|()| file.sync_all())
			.at(&path)?;
		self.writer = None;
		Ok(())
	}
}

fn format_record(record: &FileRecord) -> Vec<u8> {
	let mut line = match record.kind {
		EntryKind::File => line::FILE.to_vec(),
		EntryKind::Symlink => line::SYMLINK.to_vec(),
	};
	line.extend(
		format!(
			" {} {} {} {} ",
			record.size,
			record.mtime_ns,
			record.hash.as_deref().unwrap_or("-"),
			u8::from(record.linkable)
		)
		.into_bytes(),
	);
	line.extend(tagged_rawhex::encode(
		false,
		record.rel_path.as_os_str().as_bytes(),
	));
	line.push(b'\n');
	line
}

fn parse_record(line: &[u8]) -> Option<FileRecord> {
	let mut fields = line.splitn(6, |b| *b == b' ');
	let kind = match fields.next()? {
		line::FILE => EntryKind::File,
		line::SYMLINK => EntryKind::Symlink,
		_ => return None,
	};

	fn text(field: &[u8]) -> Option<&str> {
		std::str::from_utf8(field).ok()
	}

	let size = text(fields.next()?)?.parse().ok()?;
	let mtime_ns = text(fields.next()?)?.parse().ok()?;
	let hash = match text(fields.next()?)? {
		"-" => None,
		h => Some(h.to_owned()),
	};
	let linkable = match fields.next()? {
		b"0" => false,
		b"1" => true,
		_ => return None,
	};
	let rel_path = PathBuf::from(OsString::from_vec(tagged_rawhex::decode(
		fields.next()?,
	)?));

	Some(FileRecord {
		rel_path,
		kind,
		size,
		mtime_ns,
		hash,
		linkable,
	})
}

fn parse_log(path: &Path) -> Result<LoadedLog> {
	let file = match File::open(path) {
		Ok(file) => file,
		Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LoadedLog::default()),
		Err(e) => return Err(e).at(path),
	};

	let mut log = LoadedLog::default();
	let mut reader = BufReader::new(file);
	let mut line = Vec::new();
	for number in 1.. {
		line.clear();
		if reader.read_until(b'\n', &mut line).at(path)? == 0 {
			break;
		}
		let torn = line.last() != Some(&b'\n');
		if !torn {
			line.pop();
		}

		if apply_line(&mut log, &line, path, number).is_none() {
			if torn {
				warn!("{path:?}: ignoring incomplete last line {number}");
				break;
			}
			return Err(Error::Corrupt {
				path: path.to_path_buf(),
				reason: format!("malformed line {number}"),
			});
		}
	}
	Ok(log)
}

/// `None` if `line` is malformed
fn apply_line(log: &mut LoadedLog, line: &[u8], path: &Path, number: usize) -> Option<()> {
	if line == line::COMPLETE {
		log.complete = true;
	} else if let Some(rest) = line.strip_prefix(line::UNLINKABLE) {
		let rel_path = rest.strip_prefix(b" ").and_then(tagged_rawhex::decode)?;
		match log.records.get_mut(Path::new(OsStr::from_bytes(&rel_path))) {
			Some(record) => record.linkable = false,
			None => warn!("{path:?}: unlinkable mark for unknown file on line {number}"),
		}
	} else {
		let record = parse_record(line)?;
		if record.kind == EntryKind::File {
			log.latest_mtime = log.latest_mtime.max(Some(record.mtime_ns));
		}
		log.records.insert(record.rel_path.clone(), record);
	}
	Some(())
}

#[cfg(test)]
mod test {
	use assert_fs::prelude::*;

	use super::*;

	const HASH: &str = "534659321d2eea6b13aea4f4c94c3b4f624622295da31506722b47a8eb9d726c";

	fn record(rel_path: &str, mtime_ns: i64) -> FileRecord {
		FileRecord {
			rel_path: rel_path.into(),
			kind: EntryKind::File,
			size: 1500,
			mtime_ns,
			hash: Some(HASH.into()),
			linkable: true,
		}
	}

	fn snapshot(temp: &assert_fs::TempDir, name: &str) -> Snapshot {
		let child = temp.child("root/src").child(name);
		child.create_dir_all().unwrap();
		Snapshot(child.path().to_path_buf())
	}

	fn history(temp: &assert_fs::TempDir) -> FileHistory {
		FileHistory::new(temp.path().join("root/.idx/history"), temp.path().join("root"))
	}

	#[test]
	fn record_line_format() {
		let mut rec = record("dir/a file", 42);
		rec.hash = None;
		assert_eq!(
			format_record(&rec),
			b"file 1500 42 - 1 r-10 dir/a file\n".to_vec()
		);
	}

	#[test]
	fn record_and_lookup() {
		let temp = assert_fs::TempDir::new().unwrap();
		let snap = snapshot(&temp, "2026-01-01-000000");
		let mut hist = history(&temp);

		hist.begin(&snap).unwrap();
		hist.record(&snap, &record("a/b.bin", 10)).unwrap();
		hist.record(&snap, &record("odd\nname", 30)).unwrap();
		hist.record(&snap, &record("c.bin", 20)).unwrap();
		hist.complete(&snap).unwrap();

		let mut hist = history(&temp);
		assert_eq!(
			hist.lookup(&snap, Path::new("a/b.bin")).unwrap(),
			Some(record("a/b.bin", 10))
		);
		assert_eq!(
			hist.lookup(&snap, Path::new("odd\nname")).unwrap(),
			Some(record("odd\nname", 30))
		);
		assert_eq!(hist.lookup(&snap, Path::new("missing")).unwrap(), None);
		assert_eq!(hist.latest_mtime(&snap).unwrap(), Some(30));

		let rec = record("a/b.bin", 10);
		assert_eq!(rec.directory(), Path::new("a"));
		assert_eq!(rec.file_name(), Some(OsStr::new("b.bin")));
	}

	#[test]
	fn only_completed_snapshots_are_offered() {
		let temp = assert_fs::TempDir::new().unwrap();
		let done = snapshot(&temp, "2026-01-01-000000");
		let unfinished = snapshot(&temp, "2026-01-02-000000");
		let mut hist = history(&temp);

		assert_eq!(hist.latest_completed(OsStr::new("src")).unwrap(), None);

		hist.begin(&done).unwrap();
		hist.record(&done, &record("f", 1)).unwrap();
		hist.complete(&done).unwrap();

		hist.begin(&unfinished).unwrap();
		hist.record(&unfinished, &record("f", 2)).unwrap();

		assert_eq!(
			history(&temp).latest_completed(OsStr::new("src")).unwrap(),
			Some(done)
		);
	}

	#[test]
	fn deleted_snapshot_is_skipped() {
		let temp = assert_fs::TempDir::new().unwrap();
		let older = snapshot(&temp, "2026-01-01-000000");
		let newer = snapshot(&temp, "2026-01-02-000000");
		let mut hist = history(&temp);
		for snap in [&older, &newer] {
			hist.begin(snap).unwrap();
			hist.complete(snap).unwrap();
		}

		fs::remove_dir(&newer.0).unwrap();
		assert_eq!(
			history(&temp).latest_completed(OsStr::new("src")).unwrap(),
			Some(older)
		);
	}

	#[test]
	fn unlinkable_mark_persists() {
		let temp = assert_fs::TempDir::new().unwrap();
		let snap = snapshot(&temp, "2026-01-01-000000");
		let mut hist = history(&temp);
		hist.begin(&snap).unwrap();
		hist.record(&snap, &record("f", 1)).unwrap();
		hist.complete(&snap).unwrap();

		hist.mark_unlinkable(&snap, Path::new("f")).unwrap();
		assert!(!hist.lookup(&snap, Path::new("f")).unwrap().unwrap().linkable);

		let mut reloaded = history(&temp);
		assert!(!reloaded.lookup(&snap, Path::new("f")).unwrap().unwrap().linkable);
		assert!(reloaded
			.latest_completed(OsStr::new("src"))
			.unwrap()
			.is_some());
	}

	#[test]
	fn record_without_begin_fails() {
		let temp = assert_fs::TempDir::new().unwrap();
		let snap = snapshot(&temp, "2026-01-01-000000");
		assert!(matches!(
			history(&temp).record(&snap, &record("f", 1)),
			Err(Error::Setup(_))
		));
	}

	#[test]
	fn symlinks_dont_raise_latest_mtime() {
		let temp = assert_fs::TempDir::new().unwrap();
		let snap = snapshot(&temp, "2026-01-01-000000");
		let mut hist = history(&temp);
		let link = FileRecord {
			kind: EntryKind::Symlink,
			hash: None,
			linkable: false,
			..record("link", 99)
		};

		hist.begin(&snap).unwrap();
		hist.record(&snap, &record("f", 10)).unwrap();
		hist.record(&snap, &link).unwrap();
		hist.complete(&snap).unwrap();

		let mut hist = history(&temp);
		assert_eq!(hist.latest_mtime(&snap).unwrap(), Some(10));
		assert_eq!(hist.lookup(&snap, Path::new("link")).unwrap(), Some(link));
	}

	#[test]
	fn torn_last_line_is_dropped() {
		let temp = assert_fs::TempDir::new().unwrap();
		let done = snapshot(&temp, "2026-01-01-000000");
		let killed = snapshot(&temp, "2026-01-02-000000");
		let mut hist = history(&temp);
		hist.begin(&done).unwrap();
		hist.record(&done, &record("f", 1)).unwrap();
		hist.complete(&done).unwrap();

		let mut line = format_record(&record("g", 2));
		line.extend_from_slice(b"file 2000 16");
		temp.child("root/.idx/history/src/2026-01-02-000000.log")
			.write_binary(&line)
			.unwrap();

		let mut hist = history(&temp);
		assert_eq!(
			hist.lookup(&killed, Path::new("g")).unwrap(),
			Some(record("g", 2))
		);
		assert_eq!(hist.latest_mtime(&killed).unwrap(), Some(2));
		assert_eq!(
			hist.latest_completed(OsStr::new("src")).unwrap(),
			Some(done)
		);
	}

	#[test]
	fn corrupt_log_is_not_offered() {
		let temp = assert_fs::TempDir::new().unwrap();
		let done = snapshot(&temp, "2026-01-01-000000");
		snapshot(&temp, "2026-01-02-000000");
		let mut hist = history(&temp);
		hist.begin(&done).unwrap();
		hist.complete(&done).unwrap();

		temp.child("root/.idx/history/src/2026-01-02-000000.log")
			.write_str("garbage\ncomplete\n")
			.unwrap();

		assert_eq!(
			history(&temp).latest_completed(OsStr::new("src")).unwrap(),
			Some(done)
		);
	}

	#[test]
	fn garbage_is_corrupt() {
		let temp = assert_fs::TempDir::new().unwrap();
		let snap = snapshot(&temp, "2026-01-01-000000");
		temp.child("root/.idx/history/src/2026-01-01-000000.log")
			.write_str("file 12 x - 1 r-1 f\n")
			.unwrap();

		assert!(matches!(
			history(&temp).lookup(&snap, Path::new("f")),
			Err(Error::Corrupt { .. })
		));
	}
}
