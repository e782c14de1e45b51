//! Persistent job database (SQLite via sqlx).
//!
//! One row per download job; enumeration of active rows drives crash
//! recovery on startup.

pub mod db;
pub mod types;

pub use db::DownloadStore;
pub use types::*;
