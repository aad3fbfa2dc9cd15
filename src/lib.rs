//! VEGA — Volatility Earnings Gap Analyzer
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod cache;
pub mod config;
pub mod types;
pub mod net;
pub mod providers;
pub mod vol;
pub mod engine;
