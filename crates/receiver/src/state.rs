//! Shared application state for the Axum ingestion server.

use std::sync::Arc;

use mass_notify_queue::Publisher;

use crate::directory::DirectoryLookup;

/// Application state shared across all route handlers via Axum `State`.
///
/// Both handles are safe for concurrent use: the directory is a connection
/// pool and the publisher sits on the multiplexed broker connection.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<dyn DirectoryLookup>,
    pub publisher: Arc<dyn Publisher>,
}

impl AppState {
    pub fn new(directory: Arc<dyn DirectoryLookup>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            directory,
            publisher,
        }
    }
}
