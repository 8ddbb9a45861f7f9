//! # DSW Common Library
//!
//! Shared code for the disaster spike watch services:
//! - Data model (posts, events, alerts, verifications, subscribers, ledger)
//! - Event types (PipelineEvent enum) and the EventBus
//! - Configuration loading
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{Error, Result};
