use std::{
	ffi::OsString,
	io,
	os::unix::prelude::{OsStrExt, OsStringExt},
	path::{Path, PathBuf},
};

use crate::error::{Error, Result};

pub trait PathExt {
	fn tilde_expand(&self) -> PathBuf;
}

impl PathExt for Path {
	fn tilde_expand(&self) -> PathBuf {
		OsString::from_vec(tilde_expand::tilde_expand(self.as_os_str().as_bytes())).into()
	}
}

/// Attaches the offending path to I/O errors, so per-file warnings say which file failed
pub trait IoResultExt<T> {
	fn at<P: AsRef<Path>>(self, path: P) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
	fn at<P: AsRef<Path>>(self, path: P) -> Result<T> {
		self.map_err(|source| Error::Io {
			path: path.as_ref().to_path_buf(),
			source,
		})
	}
}
