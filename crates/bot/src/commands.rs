//! Bot commands: registration and access management.
//!
//! - `/start` registers the chat under its Telegram username, which is what
//!   the receiver resolves `@handles` against.
//! - `/grant_access @user` and `/remove_access @user` edit the list of users
//!   allowed to send notifications to the caller.
//!
//! Every command produces exactly one reply text; failures are reported to
//! the user, never propagated.

use mass_notify_common::types::HANDLE_SIGIL;

use crate::repository::{AccessRepository, RepositoryError};

pub const MISSING_USERNAME: &str = "You must specify a username for your profile in the telegram settings.\n\n\
     Open Telegram -> Settings -> Edit profile -> Enter username";
pub const ALREADY_LOGGED_IN: &str = "You already logged in.";
pub const INTERNAL_ERROR: &str = "An internal error has occurred";
pub const LOGIN_SUCCESSFUL: &str = "Login successful.";
pub const NOT_REGISTERED: &str = "You are not logged in. Send /start first.";
pub const HELP: &str = "Command list:\n\n\
     /start - join the list of active users.\n\n\
     /grant_access @username - let user @username send me notifications.\n\n\
     /remove_access @username - prevent user @username from sending me notifications.";

fn incorrect_usage(verb: &str, command: &str) -> String {
    format!(
        "Incorrect use of the command!\n\n\
         You must specify only the user you want to {} access to - /{} @username\n\n",
        verb, command
    )
}

fn not_logged_in(username: &str) -> String {
    format!("@{} not logged in.", username)
}

fn already_has_access(username: &str) -> String {
    format!("@{} already has access to send you notifications.", username)
}

fn can_send(username: &str) -> String {
    format!("@{} can now send you notifications", username)
}

fn has_no_access(username: &str) -> String {
    format!("@{} does not have access to send you notifications.", username)
}

fn can_no_longer_send(username: &str) -> String {
    format!("@{} can no longer send you notifications", username)
}

/// Command name of a message, without the slash and any `@BotName` suffix.
pub fn command_name(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    let command = first.strip_prefix('/')?;
    command.split('@').next().filter(|c| !c.is_empty())
}

/// The single `@username` argument of an access command, without the sigil.
pub fn target_username(text: &str) -> Option<&str> {
    let mut tokens = text.split_whitespace().skip(1);
    let target = tokens.next()?;
    if tokens.next().is_some() {
        return None;
    }
    target
        .strip_prefix(HANDLE_SIGIL)
        .filter(|name| !name.is_empty())
}

pub struct CommandParser<R> {
    repo: R,
}

impl<R: AccessRepository> CommandParser<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Reply to a message from chat `chat_id`, whose owner has the Telegram
    /// username `username` (if any).
    pub async fn handle(&self, chat_id: i64, username: Option<&str>, text: &str) -> String {
        match command_name(text) {
            Some("start") => self.start(chat_id, username).await,
            Some("grant_access") => self.grant_access(chat_id, text).await,
            Some("remove_access") => self.remove_access(chat_id, text).await,
            _ => HELP.to_string(),
        }
    }

    pub async fn start(&self, chat_id: i64, username: Option<&str>) -> String {
        let Some(username) = username.filter(|u| !u.is_empty()) else {
            return MISSING_USERNAME.to_string();
        };

        match self.repo.insert_user(chat_id, username).await {
            Ok(()) => {
                tracing::info!(chat_id, username, "User registered");
                LOGIN_SUCCESSFUL.to_string()
            }
            Err(RepositoryError::AlreadyExists) => ALREADY_LOGGED_IN.to_string(),
            Err(e) => {
                tracing::error!(chat_id, error = %e, "Failed to register user");
                INTERNAL_ERROR.to_string()
            }
        }
    }

    pub async fn grant_access(&self, chat_id: i64, text: &str) -> String {
        let Some(target) = target_username(text) else {
            return incorrect_usage("give", "grant_access");
        };
        if let Some(reply) = self.require_registered(target).await {
            return reply;
        }

        match self.repo.add_notification_access(chat_id, target).await {
            Ok(()) => {
                tracing::info!(chat_id, username = target, "Notification access granted");
                can_send(target)
            }
            Err(RepositoryError::AlreadyExists) => already_has_access(target),
            Err(RepositoryError::NotRegistered) => NOT_REGISTERED.to_string(),
            Err(e) => {
                tracing::error!(chat_id, error = %e, "Failed to add notification access");
                INTERNAL_ERROR.to_string()
            }
        }
    }

    pub async fn remove_access(&self, chat_id: i64, text: &str) -> String {
        let Some(target) = target_username(text) else {
            return incorrect_usage("deny", "remove_access");
        };
        if let Some(reply) = self.require_registered(target).await {
            return reply;
        }

        match self.repo.remove_notification_access(chat_id, target).await {
            Ok(()) => {
                tracing::info!(chat_id, username = target, "Notification access removed");
                can_no_longer_send(target)
            }
            Err(RepositoryError::NotExists) => has_no_access(target),
            Err(e) => {
                tracing::error!(chat_id, error = %e, "Failed to remove notification access");
                INTERNAL_ERROR.to_string()
            }
        }
    }

    /// The reply to send instead when `username` is not registered.
    async fn require_registered(&self, username: &str) -> Option<String> {
        match self.repo.get_user(username).await {
            Ok(Some(_)) => None,
            Ok(None) => Some(not_logged_in(username)),
            Err(e) => {
                tracing::error!(username, error = %e, "Failed to look up user");
                Some(INTERNAL_ERROR.to_string())
            }
        }
    }
}
