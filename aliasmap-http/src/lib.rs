//! aliasmap HTTP layer
//!
//! Provides the network side of probing:
//! - reqwest transport with browser headers and optional proxy
//! - Per-site prober with pre-probe hooks
//! - Status-code triage for shortlisting sites

pub mod client;
pub mod prober;
pub mod triage;

pub use client::*;
pub use prober::*;
pub use triage::*;
