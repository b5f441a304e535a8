//! aliasmap secondary validation
//!
//! Independent checks that corroborate or dispute a primary verdict:
//! - **canonical**: canonical link matches the expected profile URL
//! - **meta**: Open Graph, touch icon and schema.org hints
//! - **mentions**: whole-word handle mentions in the page
//! - **head**: HEAD status consistency
//! - **redirect**: where an unfollowed redirect points
//! - **headers**: plausibility of response headers
//! - **json_api**: conventional JSON endpoints next to the profile
//!
//! [`SecondaryValidator`] runs them concurrently and maps the aggregated
//! confidence onto the final status.

pub mod checks;
pub mod validator;

pub use checks::*;
pub use validator::*;
