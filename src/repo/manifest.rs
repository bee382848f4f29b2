//! Per-directory hash manifests, `<hash>  <filename>` per line, in the format `sha256sum -c` and
//! `b3sum -c` understand. Names containing a backslash or newline use the GNU escaped form: the
//! line starts with `\` and those characters are written as `\\` and `\n`.

use std::{
	collections::HashMap,
	ffi::{OsStr, OsString},
	fs::{File, OpenOptions},
	io::{BufRead, BufReader, ErrorKind, Write},
	os::unix::prelude::{OsStrExt, OsStringExt},
	path::{Path, PathBuf},
};

use crate::{
	error::{Error, Result},
	util::{ext::IoResultExt, hex},
};

pub const NAME: &str = "MANIFEST";

#[derive(Debug, PartialEq, Eq)]
pub struct Entry {
	pub hash: String,
	pub file_name: OsString,
}

#[derive(Debug)]
pub struct Manifest(pub PathBuf);

impl Manifest {
	pub fn in_dir(dir: &Path) -> Self {
		Manifest(dir.join(NAME))
	}

	/// Appends one line with a single write, so an interrupted run never leaves half a line
	pub fn append(&self, hash: &str, file_name: &OsStr) -> Result<()> {
		let line = format_line(hash, file_name);
		OpenOptions::new()
			.append(true)
			.create(true)
			.open(&self.0)
			.and_then(|mut file| file.write_all(&line))
			.at(&self.0)
	}

	/// All entries in file order. A missing manifest has no entries.
	pub fn entries(&self) -> Result<Vec<Entry>> {
		let file = match File::open(&self.0) {
			Ok(file) => file,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e).at(&self.0),
		};

		let mut entries = Vec::new();
		for (idx, line) in BufReader::new(file).split(b'\n').enumerate() {
			let line = line.at(&self.0)?;
			if line.is_empty() {
				continue;
			}
			entries.push(parse_line(&line).ok_or_else(|| Error::Corrupt {
				path: self.0.clone(),
				reason: format!("malformed line {}", idx + 1),
			})?);
		}
		Ok(entries)
	}

	/// File name to hash. Later lines win over earlier ones for the same name.
	pub fn to_map(&self) -> Result<HashMap<OsString, String>> {
		Ok(self
			.entries()?
			.into_iter()
			.map(|e| (e.file_name, e.hash))
			.collect())
	}
}

pub fn format_line(hash: &str, file_name: &OsStr) -> Vec<u8> {
	let name = file_name.as_bytes();
	let escape = name.iter().any(|b| *b == b'\\' || *b == b'\n');

	let mut line = Vec::with_capacity(hash.len() + name.len() + 4);
	if escape {
		line.push(b'\\');
	}
	line.extend(hash.as_bytes());
	line.extend(b"  ");
	for byte in name {
		match byte {
			b'\\' if escape => line.extend(b"\\\\"),
			b'\n' => line.extend(b"\\n"),
			b => line.push(*b),
		}
	}
	line.push(b'\n');
	line
}

fn parse_line(line: &[u8]) -> Option<Entry> {
	let (escaped, line) = match line.strip_prefix(b"\\") {
		Some(rest) => (true, rest),
		None => (false, line),
	};

	let sep = line.windows(2).position(|w| w == b"  ")?;
	let hash = std::str::from_utf8(&line[..sep]).ok()?;
	if !hex::is_lower_hex(hash) {
		return None;
	}

	let raw_name = &line[sep + 2..];
	let name = if escaped {
		let mut name = Vec::with_capacity(raw_name.len());
		let mut bytes = raw_name.iter();
		while let Some(byte) = bytes.next() {
			match byte {
				b'\\' => match bytes.next()? {
					b'\\' => name.push(b'\\'),
					b'n' => name.push(b'\n'),
					_ => return None,
				},
				b => name.push(*b),
			}
		}
		name
	} else {
		raw_name.to_vec()
	};

	if name.is_empty() {
		return None;
	}

	Some(Entry {
		hash: hash.to_owned(),
		file_name: OsString::from_vec(name),
	})
}

#[cfg(test)]
mod test {
	use assert_fs::prelude::*;

	use super::*;

	const TEST_HASH: &str = "534659321d2eea6b13aea4f4c94c3b4f624622295da31506722b47a8eb9d726c";
	const TEST_NAME: &str = "Sales Report Jul-1.202X (final).ver2.FINAL!!.docx         .exe";

	#[test]
	fn plain_line() {
		assert_eq!(
			format_line(TEST_HASH, OsStr::new("a b.txt")),
			format!("{TEST_HASH}  a b.txt\n").into_bytes()
		);
	}

	#[test]
	fn escaped_line() {
		let line = format_line(TEST_HASH, OsStr::new("odd\\name\nhere"));
		assert_eq!(
			line,
			format!("\\{TEST_HASH}  odd\\\\name\\nhere\n").into_bytes()
		);
		assert_eq!(
			parse_line(&line[..line.len() - 1]).unwrap().file_name,
			OsString::from("odd\\name\nhere")
		);
	}

	#[test]
	fn append_and_read_back() {
		let temp = assert_fs::TempDir::new().unwrap();
		let manifest = Manifest::in_dir(temp.path());

		assert!(manifest.entries().unwrap().is_empty());
		manifest.append(TEST_HASH, OsStr::new(TEST_NAME)).unwrap();
		manifest.append(TEST_HASH, OsStr::new("second")).unwrap();

		temp.child(NAME).assert(format!(
			"{TEST_HASH}  {TEST_NAME}\n{TEST_HASH}  second\n"
		));
		assert_eq!(
			manifest.entries().unwrap(),
			vec![
				Entry {
					hash: TEST_HASH.into(),
					file_name: TEST_NAME.into()
				},
				Entry {
					hash: TEST_HASH.into(),
					file_name: "second".into()
				},
			]
		);
	}

	#[test]
	fn malformed_line_is_corrupt() {
		let temp = assert_fs::TempDir::new().unwrap();
		temp.child(NAME).write_str("not a manifest line\n").unwrap();

		assert!(matches!(
			Manifest::in_dir(temp.path()).entries(),
			Err(Error::Corrupt { .. })
		));
	}

	#[test]
	fn later_lines_win_in_map() {
		let temp = assert_fs::TempDir::new().unwrap();
		let manifest = Manifest::in_dir(temp.path());
		manifest.append("aaaa", OsStr::new("f")).unwrap();
		manifest.append("bbbb", OsStr::new("f")).unwrap();

		assert_eq!(manifest.to_map().unwrap()[OsStr::new("f")], "bbbb");
	}
}
