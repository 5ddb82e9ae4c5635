//! System utilities module
//!
//! Log sink fan-out, reused for per-instance live log tailing.

mod sink;

pub use sink::SinkPool;
