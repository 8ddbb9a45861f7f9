//! Test Helper Utilities
//!
//! Shared utilities for testing dsw-pipeline

#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;
pub mod fixtures;

pub use db_utils::{count_rows, create_test_repository, store_event};
pub use fakes::{
    FailingSignals, RecordingSender, ScriptedAnalyzer, ScriptedFeed, StaticSignals, UnavailableLedger,
};
pub use fixtures::{event_at, feed_item, post, subscriber, Harness};
