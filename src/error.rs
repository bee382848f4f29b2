//! Error type shared by the stores and engines

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("{path:?}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// The HashStore never replaces an entry. Callers are expected to `get` first and hardlink
	/// to the existing holder on a hit.
	#[error("hash {hash} is already recorded for {existing:?}")]
	HashConflict { hash: String, existing: PathBuf },

	#[error("size {size} is below the deduplication threshold of {min} bytes")]
	BelowThreshold { size: u64, min: u64 },

	#[error("{0:?} uses the name reserved for hash manifests")]
	ReservedName(PathBuf),

	#[error("interrupted")]
	Interrupted,

	/// Precondition failures detected before any work is done
	#[error("{0}")]
	Setup(String),

	#[error("invalid configuration: {0}")]
	Config(#[from] toml::de::Error),

	#[error("invalid configuration: {0}")]
	ConfigValue(String),

	#[error("{path:?} is corrupt: {reason}")]
	Corrupt { path: PathBuf, reason: String },
}

impl Error {
	/// Errors that must abort a whole run instead of being counted against a single file
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			Error::Interrupted | Error::Setup(_) | Error::Config(_) | Error::ConfigValue(_)
		)
	}
}
