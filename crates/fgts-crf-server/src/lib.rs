//! FGTS CRF server: HTTP boundary and CLI around the lookup pipeline.

pub mod config;
pub mod transport;
pub mod types;

pub use config::{ConfigOverrides, ServerConfig};
pub use transport::{router, AppState, HttpTransport};
