//! Notification delivery worker.
//!
//! Consumes the durable notification queue one message at a time and delivers
//! each notification to its recipients through the Telegram Bot API.

pub mod consumer;
pub mod sender;
pub mod telegram;
