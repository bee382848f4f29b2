//! Contains the argument handling and main logic of the CLI

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use exitcode::{ExitCode, CONFIG, DATAERR, NOINPUT, SOFTWARE};
use log::{error, info};

use crate::{
	config::Config,
	engine,
	error::Error,
	interrupt::Interrupt,
	repo::BackupRoot,
	util::ext::PathExt,
};

/// Exit code after SIGINT or SIGTERM, as a shell would report it for SIGINT
pub const INTERRUPTED: ExitCode = 130;

// Structure based on the recommendations in
// https://rust-cli-recommendations.sunshowers.io/handling-arguments.html

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    long_about,
    after_long_help = "\
    1. Logging: is controlled via the LINKBAK_LOG environment variable. Set LINKBAK_LOG to error, \
    warn, info, debug or trace to adjust verbosity. For examples, see RUST_LOG mentions in \
    https://docs.rs/env_logger/0.10.0/env_logger/\
    \n\
    \n\
    2. Layout: snapshots of a source directory named `docs` end up in \
    `<BACKUP_ROOT>/docs/<YYYY-MM-DD-HHMMSS>/`. The lookup indexes, history logs, compare reports \
    and `config.toml` live in `<BACKUP_ROOT>/.linkbak/`.\
    \n\
    \n\
    3. Excludes: match single path components by exact name, e.g. `--exclude node_modules` \
    skips every directory called `node_modules`. Entries from the `excludes` list in \
    `config.toml` always apply too."
)]
pub struct Linkbak {
	#[clap(flatten)]
	pub global_opts: GlobalOpts,

	#[clap(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Back up a source directory into a new snapshot below the backup root
	Backup(TreeArgs),

	/// Recreate the lookup indexes and MANIFEST files from the snapshots in a backup root
	Rebuild {
		/// Backup root to rebuild the index of
		backup_root: PathBuf,
	},

	/// Compare a source directory against its newest snapshot without changing anything but a
	/// report file
	Compare(TreeArgs),
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
	/// Verbosity level, can be specified multiple times, equivalent to LINKBAK_LOG={info,debug,trace}
	#[arg(group="verbosity", long, short, global=true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Quiet mode, equivalent to LINKBAK_LOG=error
	#[arg(group = "verbosity", long, short, global = true)]
	pub quiet: bool,

	/// Silent mode, equivalent to LINKBAK_LOG=off
	#[arg(group = "verbosity", long, short, global = true)]
	pub silent: bool,
}

#[derive(Debug, Args)]
struct TreeArgs {
	/// Directory to back up. Its final component names the snapshot directory
	source: PathBuf,

	/// Directory holding the snapshots and the `.linkbak` index
	backup_root: PathBuf,

	/// Skip directories with this name, can be specified multiple times
	#[arg(long, value_name = "NAME")]
	exclude: Vec<String>,
}

impl Linkbak {
	pub fn exec(self) -> anyhow::Result<()> {
		self.init_logging();

		info!("version {} starting up", env!("CARGO_PKG_VERSION"));
		info!("log level set to {}", log::max_level());

		let interrupt = Interrupt::install().context("unable to install signal handlers")?;

		use Command::*;
		let res = match self.command {
			Backup(args) => Self::backup(args, &interrupt),
			Rebuild { backup_root } => Self::rebuild(&backup_root, &interrupt),
			Compare(args) => Self::compare(args, &interrupt),
		};

		if let Err(e) = res {
			die(exit_code(&e), &e.to_string())
		}

		info!("process exiting successfully");
		Ok(())
	}

	fn init_logging(&self) {
		let mut logging_builder = env_logger::Builder::new();

		logging_builder
			.filter_level(log::LevelFilter::Warn)
			.format_timestamp_nanos()
			.parse_env("LINKBAK_LOG");

		// Not using https://crates.io/crates/clap-verbosity-flag as the documentation suggests
		// it may not work with the [default -> env -> cli-args] override path
		let override_log_level = if self.global_opts.silent {
			Some(log::LevelFilter::Off)
		} else if self.global_opts.quiet {
			Some(log::LevelFilter::Error)
		} else {
			match self.global_opts.verbose {
				0 => None,
				1 => Some(log::LevelFilter::Info),
				2 => Some(log::LevelFilter::Debug),
				_ => Some(log::LevelFilter::Trace),
			}
		};

		if let Some(new_level) = override_log_level {
			logging_builder.filter_level(new_level);
		}

		logging_builder.init();
	}

	fn backup(args: TreeArgs, interrupt: &Interrupt) -> Result<(), Error> {
		let (root, cfg) = open_root(&args.backup_root)?;
		let mut history = root.history();

		let (snapshot, summary) = engine::backup(
			&args.source.tilde_expand(),
			&root,
			&args.exclude,
			&cfg,
			&mut history,
			interrupt,
		)?;

		println!("snapshot:        {}", snapshot.0.display());
		println!("{summary}");
		Ok(())
	}

	fn rebuild(backup_root: &Path, interrupt: &Interrupt) -> Result<(), Error> {
		let (root, cfg) = open_root(backup_root)?;
		let summary = engine::rebuild(&root, &cfg, interrupt)?;

		println!("{summary}");
		Ok(())
	}

	fn compare(args: TreeArgs, interrupt: &Interrupt) -> Result<(), Error> {
		let (root, cfg) = open_root(&args.backup_root)?;
		let (summary, report) = engine::compare(
			&args.source.tilde_expand(),
			&root,
			&args.exclude,
			&cfg,
			interrupt,
		)?;

		println!("report:               {}", report.display());
		println!("{summary}");
		Ok(())
	}
}

fn open_root(path: &Path) -> Result<(BackupRoot, Config), Error> {
	let root = BackupRoot::open(&path.tilde_expand())?;
	let cfg = root.config()?;
	Ok((root, cfg))
}

fn exit_code(e: &Error) -> ExitCode {
	match e {
		Error::Interrupted => INTERRUPTED,
		Error::Setup(_) => NOINPUT,
		Error::Config(_) | Error::ConfigValue(_) => CONFIG,
		Error::Corrupt { .. } => DATAERR,
		_ => SOFTWARE,
	}
}

pub fn die(code: ExitCode, msg: &str) -> ! {
	error!("{}", msg);
	std::process::exit(code)
}
