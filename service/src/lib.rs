//! Process-level concerns shared by the sync client: configuration and logging.

pub mod config;
pub mod logging;
