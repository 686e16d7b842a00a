//! Anti-detection measures injected into every page.
//!
//! The evasion payload runs in each document's global scope before any site
//! script, rewriting the introspectable surface to match the session
//! fingerprint and scrubbing automation artifacts.

pub mod evasions;

pub use evasions::{build_init_script, Evasion, EVASIONS};
