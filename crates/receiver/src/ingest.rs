//! Notification ingestion: resolve recipient handles, then publish.
//!
//! Unknown handles are reported back to the caller and left out of the queued
//! notification. Only resolved chat identities ever reach the queue.

use mass_notify_common::error::AppError;
use mass_notify_common::types::{HANDLE_SIGIL, Notification};
use mass_notify_queue::{Publisher, publish_json};

use crate::directory::DirectoryLookup;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecipient {
    pub handle: String,
    pub id: i64,
}

/// Partition of the requested handles. Every distinct requested handle lands
/// in exactly one of the two lists, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionResult {
    pub resolved: Vec<ResolvedRecipient>,
    pub unresolved: Vec<String>,
}

impl ResolutionResult {
    pub fn resolved_handles(&self) -> Vec<String> {
        self.resolved.iter().map(|r| r.handle.clone()).collect()
    }

    /// Notification addressed to the resolved identities only.
    pub fn notification(&self, message: &str) -> Notification {
        Notification::new(
            message,
            self.resolved.iter().map(|r| r.id.to_string()).collect(),
        )
    }
}

/// Username part of a handle, `None` if it lacks the sigil or is empty.
pub fn strip_sigil(handle: &str) -> Option<&str> {
    handle
        .strip_prefix(HANDLE_SIGIL)
        .filter(|name| !name.trim().is_empty())
}

/// Look up each distinct handle in the directory, sequentially.
///
/// A directory error aborts the whole resolution; there is no retry here.
pub async fn resolve_recipients<D>(
    directory: &D,
    handles: &[String],
) -> Result<ResolutionResult, AppError>
where
    D: DirectoryLookup + ?Sized,
{
    let mut result = ResolutionResult::default();
    let mut seen = std::collections::HashSet::new();

    for handle in handles {
        if !seen.insert(handle.as_str()) {
            continue;
        }

        let Some(username) = strip_sigil(handle) else {
            tracing::debug!(handle = %handle, "Recipient is not a handle");
            result.unresolved.push(handle.clone());
            continue;
        };

        match directory.get_user(username).await? {
            Some(id) => result.resolved.push(ResolvedRecipient {
                handle: handle.clone(),
                id,
            }),
            None => result.unresolved.push(handle.clone()),
        }
    }

    Ok(result)
}

/// Resolve the recipients of `message` and publish the resulting notification.
///
/// The notification is published even when no recipient resolved. Nothing is
/// published if resolution fails.
pub async fn ingest<D, P>(
    directory: &D,
    publisher: &P,
    message: &str,
    handles: &[String],
) -> Result<ResolutionResult, AppError>
where
    D: DirectoryLookup + ?Sized,
    P: Publisher + ?Sized,
{
    let resolution = resolve_recipients(directory, handles).await?;
    let notification = resolution.notification(message);

    publish_json(publisher, &notification).await?;

    tracing::info!(
        recipients = notification.recipients.len(),
        unresolved = resolution.unresolved.len(),
        "Notification queued"
    );
    Ok(resolution)
}
