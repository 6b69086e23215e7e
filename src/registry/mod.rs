//! The OCI registry subsystem: content-addressed storage (C1), the HTTP
//! surface (C2), and the rate limiter that guards it.

pub mod digest;
pub mod protocol;
pub mod rate_limit;
pub mod store;

pub use digest::Digest;
pub use protocol::{router, RegistryState};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use store::{Manifest, Reference, Store};
