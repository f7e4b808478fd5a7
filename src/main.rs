//! Command-line entry point: serve a ZIP archive until interrupted.

use anyhow::Result;
use clap::Parser;

use zipserve::{Cli, ServeConfig, ShutdownSignal, SystemBrowser, lifecycle, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let config = ServeConfig::from(&cli);
    lifecycle::run(&config, &SystemBrowser, ShutdownSignal::with_os_signals()).await?;
    Ok(())
}
