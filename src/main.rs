use clap::Parser;

use linkbak::cli::Linkbak;

fn main() -> anyhow::Result<()> {
	Linkbak::parse().exec()
}
