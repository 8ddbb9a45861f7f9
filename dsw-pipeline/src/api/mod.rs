//! HTTP surface: health and statistics only

pub mod health;

pub use health::{health_check, health_routes, stats_snapshot};
