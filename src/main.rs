//! Indexflow CLI: index a catalog for one index type; --show-status lists build statuses.

use anyhow::Result;
use clap::Parser;
use indexflow::engine::arg_parser::Cli;
use indexflow::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
