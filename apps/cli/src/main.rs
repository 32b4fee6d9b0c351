//! CourseBuilder CLI: turn PDF textbooks into structured e-learning courses.
//!
//! Runs the full generation pipeline or its individual stages, and drives the
//! segment task queue from separate worker processes.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
