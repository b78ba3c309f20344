//! Shared configuration, error and data types for the notification pipeline.

pub mod config;
pub mod db;
pub mod error;
pub mod redis_pool;
pub mod types;
