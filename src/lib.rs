//! Stealth browser automation engine.
//!
//! Launches Chrome configured to resist automation-detection heuristics,
//! drives it through human-like interaction sequences, and rotates egress
//! proxies across sessions. The engine synthesizes one internally-consistent
//! device fingerprint per session, injects an evasion script into every page
//! before site code runs, and reproduces input timing that resembles a human
//! operator rather than a script.

pub mod api;
pub mod behavior;
pub mod error;
pub mod fingerprint;
pub mod proxy;
pub mod session;
pub mod stealth;

pub use api::{CallResult, Engine};
pub use behavior::HumanBehavior;
pub use error::EngineError;
pub use fingerprint::SessionFingerprint;
pub use proxy::{ProxyDescriptor, ProxyRotator, ProxyScheme};
pub use session::{LaunchOptions, Session};
