//! # Roster Common Library
//!
//! Shared code for the Roster attendance engine:
//! - Error type and result alias
//! - Engine configuration loading
//! - Database initialization, migrations and row models
//! - Event types and the EventBus
//! - Time and UUID helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;
pub mod uuid_utils;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use events::{EngineEvent, EventBus};
