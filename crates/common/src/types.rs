use serde::{Deserialize, Serialize};

/// Name of the durable queue shared by the receiver (producer) and the notifier (consumer).
pub const NOTIFICATION_QUEUE: &str = "notification_queue";

/// Sigil that marks a recipient handle in ingestion requests (`@username`).
pub const HANDLE_SIGIL: char = '@';

/// A notification flowing through the delivery pipeline.
///
/// On the ingestion side `recipients` holds handles; once published it only ever
/// holds resolved chat identities (decimal strings).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    #[serde(rename = "recipientsId")]
    pub recipients: Vec<String>,
}

impl Notification {
    pub fn new(message: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            message: message.into(),
            recipients,
        }
    }
}
