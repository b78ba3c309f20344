//! Notification ingestion service.
//!
//! Endpoints:
//! - POST /api/add-notification resolves recipients and queues a notification
//! - GET  /health is a liveness probe

pub mod directory;
pub mod ingest;
pub mod routes;
pub mod state;
