//! Forge (GitHub) API access: app authentication, a process-wide
//! rate-limited client with an ETag-aware response cache, webhook signature
//! verification, and the derived operations the engine consumes.

pub mod auth;
pub mod cache;
pub mod client;
pub mod operations;
pub mod signature;
pub mod types;

pub use auth::AppAuth;
pub use cache::RequestCache;
pub use client::{ClientLimits, ForgeClient};
pub use signature::verify_signature;
