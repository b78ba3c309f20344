//! Notification ingestion route.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use mass_notify_common::error::AppError;

use crate::ingest::{ResolutionResult, ingest};
use crate::state::AppState;

pub const ALL_AUTHORIZED: &str = "Notifications successfully added to the queue!";
pub const SOME_UNAUTHORIZED: &str = "Some users are not authorized in the telegram bot";

pub fn router() -> Router<AppState> {
    Router::new().route("/api/add-notification", post(add_notification))
}

/// Request body for queuing a notification.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddNotificationRequest {
    pub message: String,
    /// Recipient handles, e.g. `@username`
    pub recipients_id: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddNotificationResponse {
    pub message: String,
    pub authorized_users: Vec<String>,
    pub not_authorized_users: Vec<String>,
}

impl From<ResolutionResult> for AddNotificationResponse {
    fn from(resolution: ResolutionResult) -> Self {
        let message = if resolution.unresolved.is_empty() {
            ALL_AUTHORIZED
        } else {
            SOME_UNAUTHORIZED
        };

        Self {
            message: message.to_string(),
            authorized_users: resolution.resolved_handles(),
            not_authorized_users: resolution.unresolved,
        }
    }
}

/// POST /api/add-notification: resolve recipient handles and queue the notification.
///
/// Unknown handles are listed in `notAuthorizedUsers` and do not receive the message.
async fn add_notification(
    State(state): State<AppState>,
    payload: Result<Json<AddNotificationRequest>, JsonRejection>,
) -> Result<Json<AddNotificationResponse>, AppError> {
    let Json(request) = payload
        .map_err(|e| AppError::Validation(format!("failed to decode request: {}", e.body_text())))?;

    tracing::info!(
        recipients = request.recipients_id.len(),
        "Received a new notification"
    );

    let resolution = ingest(
        state.directory.as_ref(),
        state.publisher.as_ref(),
        &request.message,
        &request.recipients_id,
    )
    .await?;

    Ok(Json(resolution.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ResolvedRecipient;

    #[test]
    fn test_response_all_authorized() {
        let resolution = ResolutionResult {
            resolved: vec![ResolvedRecipient {
                handle: "@alice".to_string(),
                id: 100,
            }],
            unresolved: vec![],
        };
        let response = AddNotificationResponse::from(resolution);
        assert_eq!(response.message, ALL_AUTHORIZED);
        assert_eq!(response.authorized_users, vec!["@alice".to_string()]);
        assert!(response.not_authorized_users.is_empty());
    }

    #[test]
    fn test_response_serializes_empty_lists() {
        let response = AddNotificationResponse::from(ResolutionResult::default());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["message"], ALL_AUTHORIZED);
        assert_eq!(json["authorizedUsers"], serde_json::json!([]));
        assert_eq!(json["notAuthorizedUsers"], serde_json::json!([]));
    }

    #[test]
    fn test_request_requires_recipients() {
        let result: Result<AddNotificationRequest, _> =
            serde_json::from_str(r#"{"message":"hi"}"#);
        assert!(result.is_err());
    }
}
