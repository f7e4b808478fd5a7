//! Opening the served site in a browser.

use std::io;

/// Something that can show a URL to the user.
pub trait Browser: Send + Sync {
    fn open(&self, url: &str) -> io::Result<()>;
}

/// The desktop's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        tracing::debug!("Opening {} in the default browser", url);
        open::that(url)
    }
}
