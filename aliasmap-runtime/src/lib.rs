//! aliasmap runtime
//!
//! Wires the registry, prober, validator and tracker into [`Scanner`],
//! which streams scan events for one handle at a time.

pub mod scanner;

pub use scanner::*;
