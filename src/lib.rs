//! GMX/Allora agent: trades GMX perpetuals from Allora price predictions.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod signal;
pub mod onchain;
pub mod wallet;
pub mod strategy;
pub mod engine;
pub mod storage;
pub mod dashboard;
