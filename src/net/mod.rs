//! Networking layer — proxy discovery, proxy-bound sessions, and the
//! retry-with-rotation policy shared by every provider call.

pub mod proxy;
pub mod retry;
pub mod session;
