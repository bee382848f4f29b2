//! Cooperative cancellation. Signal handlers only flip a flag; the copy loop and the engines poll
//! it and unwind through `Error::Interrupted` after removing any partial output.

use std::{
	io,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
	/// A handle that is only ever triggered programmatically
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers SIGINT and SIGTERM to trigger the returned handle
	pub fn install() -> io::Result<Self> {
		let interrupt = Self::new();
		signal_hook::flag::register(SIGINT, Arc::clone(&interrupt.0))?;
		signal_hook::flag::register(SIGTERM, Arc::clone(&interrupt.0))?;
		Ok(interrupt)
	}

	pub fn trigger(&self) {
		self.0.store(true, Ordering::Release);
	}

	pub fn is_set(&self) -> bool {
		self.0.load(Ordering::Acquire)
	}

	pub fn check(&self) -> Result<()> {
		if self.is_set() {
			Err(Error::Interrupted)
		} else {
			Ok(())
		}
	}
}
