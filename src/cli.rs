use clap::Parser;

use crate::config::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(name = "zipserve")]
#[command(version)]
#[command(about = "Serve the contents of a ZIP file over HTTP", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipserve site.zip                     serve site.zip, prefix read from its .prefix file\n  \
  zipserve -q docs -d build/html site.zip   serve build/html under /docs/\n  \
  zipserve -n https://example.com/site.zip  serve a remote archive without opening a browser")]
pub struct Cli {
    /// ZIP file path or HTTP URL containing the web site
    #[arg(value_name = "ZIPFILE")]
    pub file: String,

    /// Port number
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to listen on
    #[arg(short = 'b', long, value_name = "ADDRESS", default_value = "0.0.0.0")]
    pub bind: String,

    /// Path prefix. If not set, the prefix is read from the .prefix file inside the zip file
    #[arg(short = 'q', long)]
    pub prefix: Option<String>,

    /// Directory to serve in the zip file. If not set, the directory containing the .prefix file is used
    #[arg(short = 'd', long)]
    pub directory: Option<String>,

    /// Do not open the browser automatically
    #[arg(short = 'n', long)]
    pub skip_browser: bool,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}
