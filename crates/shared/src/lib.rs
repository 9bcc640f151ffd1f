pub mod config;
pub mod errors;

pub use config::{init_tracing, Settings};
pub use errors::ApiError;
