//! aliasmap core - site registry and verdict model for handle probing
//!
//! This crate provides the engine's building blocks:
//! - Declarative site specs and the builtin registry
//! - Evidence extraction from profile pages
//! - Four-state classification with per-site capability hooks
//! - Precision tracking over scan history
//! - The HTTP transport seam and in-memory fakes

pub mod transport;
pub mod evidence;
pub mod result;
pub mod site;
pub mod registry;
pub mod extract;
pub mod hooks;
pub mod classify;
pub mod tracker;
pub mod fakes;

pub use transport::*;
pub use evidence::*;
pub use result::*;
pub use site::*;
pub use registry::*;
pub use extract::*;
pub use hooks::*;
pub use classify::*;
pub use tracker::*;

/// Placeholder substituted with the handle in URL templates and patterns
pub const HANDLE_PLACEHOLDER: &str = "{handle}";

/// Probe timeout for sites that do not declare one
pub const DEFAULT_TIMEOUT_MS: u64 = 3500;

/// Desktop browser user agent sent with every probe
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

/// `Accept-Language` sent with every probe
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
