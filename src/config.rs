//! Run configuration and defaults.

use std::time::Duration;

use crate::cli::Cli;

/// Port used when none is given.
pub const DEFAULT_PORT: u16 = 8080;

/// Name of the marker file designating the site root and its URL prefix.
pub const MARKER_FILE: &str = ".prefix";

/// Document served for directory requests.
pub const INDEX_FILE: &str = "index.html";

/// Upper bound for draining in-flight requests on shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a serve run needs to know.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// Local path or `http(s)://` URL of the archive
    pub location: String,
    pub bind: String,
    pub port: u16,
    /// Explicit URL prefix; empty means read it from the marker file
    pub prefix: String,
    /// Explicit directory inside the archive; empty means search for the marker file
    pub directory: String,
    pub skip_browser: bool,
    pub shutdown_timeout: Duration,
}

impl ServeConfig {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            prefix: String::new(),
            directory: String::new(),
            skip_browser: false,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }

    /// `host:port` the listener binds.
    pub fn listen_addr(&self) -> String {
        if self.bind.contains(':') && !self.bind.starts_with('[') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }
}

impl From<&Cli> for ServeConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            location: cli.file.clone(),
            bind: cli.bind.clone(),
            port: cli.port,
            prefix: cli.prefix.clone().unwrap_or_default(),
            directory: cli.directory.clone().unwrap_or_default(),
            skip_browser: cli.skip_browser,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }
}
