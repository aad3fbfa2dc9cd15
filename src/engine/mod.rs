//! Scan orchestration.
//!
//! The scanner wires the calendar, market data provider, volatility
//! engine, cache, and OTC filter into the full earnings-scan pipeline.

pub mod scanner;
