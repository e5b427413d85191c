//! Flash oracle — round lifecycle scheduler for timed BTC prediction rounds.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod clock;
pub mod config;
pub mod engine;
pub mod executor;
pub mod feed;
pub mod storage;
pub mod types;
