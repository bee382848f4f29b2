pub mod copy;
pub mod filekey;
pub mod walk;

use std::{
	fs::File,
	io::{ErrorKind, Read},
	os::unix::prelude::MetadataExt,
	path::Path,
};

use sha2::Digest;

use crate::{
	config::{Config, HashAlgorithm},
	error::Result,
	interrupt::Interrupt,
	util::{ext::IoResultExt, hex},
};

/// Incremental content hasher for the configured algorithm
pub enum ContentHasher {
	Blake3(Box<blake3::Hasher>),
	Sha256(sha2::Sha256),
}

impl ContentHasher {
	pub fn new(algorithm: HashAlgorithm) -> Self {
		match algorithm {
			HashAlgorithm::Blake3 => ContentHasher::Blake3(Box::new(blake3::Hasher::new())),
			HashAlgorithm::Sha256 => ContentHasher::Sha256(sha2::Sha256::new()),
		}
	}

	pub fn update(&mut self, data: &[u8]) {
		match self {
			ContentHasher::Blake3(hasher) => {
				hasher.update(data);
			}
			ContentHasher::Sha256(hasher) => hasher.update(data),
		}
	}

	/// Lowercase hex digest
	pub fn finalize(self) -> String {
		match self {
			ContentHasher::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
			ContentHasher::Sha256(hasher) => {
				String::from_utf8(hex::encode(&hasher.finalize())).expect("hex is ascii")
			}
		}
	}
}

/// Hashes the content of `path` in `cfg.chunk_size` reads. Returns the hex digest and the number
/// of bytes read.
pub fn hash_file(path: &Path, cfg: &Config, interrupt: &Interrupt) -> Result<(String, u64)> {
	let mut file = File::open(path).at(path)?;
	let mut hasher = ContentHasher::new(cfg.hash_algorithm);
	let mut buffer = vec![0; cfg.chunk_size];
	let mut total = 0u64;
	loop {
		interrupt.check()?;
		match file.read(&mut buffer) {
			Ok(0) => return Ok((hasher.finalize(), total)),
			Ok(n) => {
				hasher.update(&buffer[..n]);
				total += n as u64;
			}
			Err(e) if e.kind() == ErrorKind::Interrupted => continue,
			Err(e) => return Err(e).at(path),
		}
	}
}

/// Modification time in nanoseconds since the epoch
pub fn mtime_ns(md: &std::fs::Metadata) -> i64 {
	ns_since_epoch(md.mtime(), md.mtime_nsec())
}

/// Saturates outside of roughly 1678..2262, the range an i64 of nanoseconds covers
fn ns_since_epoch(secs: i64, nsec: i64) -> i64 {
	secs.saturating_mul(1_000_000_000).saturating_add(nsec)
}
