//! Integration test binary: the scan pipeline end to end, driven by
//! deterministic in-memory market data.

mod mock_provider;
mod scan_flow;
