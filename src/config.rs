use std::{fs, io::ErrorKind, path::Path};

use log::debug;
use serde::Deserialize;

use crate::{
	error::{Error, Result},
	util::ext::IoResultExt,
};

pub mod config_file {
	pub const NAME: &str = "config.toml";

	// Use macro to work around include_str not accepting string constants
	macro_rules! TEMPLATE_NAME_MACRO {
		() => {
			"config.toml"
		};
	}

	pub static DATA: &str = include_str!(concat!("../templates/", TEMPLATE_NAME_MACRO!()));
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
	#[default]
	Blake3,
	Sha256,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
	pub hash_algorithm: HashAlgorithm,
	pub chunk_size: usize,
	pub min_dedup_size: u64,
	pub excludes: Vec<String>,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			hash_algorithm: HashAlgorithm::Blake3,
			chunk_size: 64 * 1024,
			min_dedup_size: 1000,
			excludes: Vec::new(),
		}
	}
}

impl Config {
	/// Reads `path` if it exists, falling back to defaults otherwise
	pub fn load(path: &Path) -> Result<Config> {
		let text = match fs::read_to_string(path) {
			Ok(text) => text,
			Err(e) if e.kind() == ErrorKind::NotFound => {
				debug!("no config at {path:?}, using defaults");
				return Ok(Config::default());
			}
			Err(e) => return Err(e).at(path),
		};

		debug!("loading config from {path:?}");
		toml::from_str::<Config>(&text)?.validated()
	}

	pub fn validated(self) -> Result<Config> {
		if self.chunk_size == 0 {
			return Err(Error::ConfigValue("chunk_size must be greater than zero".into()));
		}
		if self.min_dedup_size == 0 {
			return Err(Error::ConfigValue(
				"min_dedup_size must be greater than zero".into(),
			));
		}
		Ok(self)
	}
}
