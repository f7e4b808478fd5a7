//! HTTP serving of an archive view.

pub mod listing;
mod mount;
mod server;
mod shutdown;

pub use mount::{HttpResponse, Mount};
pub use server::Server;
pub use shutdown::ShutdownSignal;
