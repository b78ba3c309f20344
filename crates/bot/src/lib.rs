//! Registration bot.
//!
//! Chat users send `/start` to register their username with the directory the
//! receiver resolves recipients against, and manage who may notify them with
//! `/grant_access` and `/remove_access`.

pub mod commands;
pub mod poller;
pub mod repository;
