//! Transport layer for the lookup API.

pub mod http;

pub use http::{router, AppState, HttpTransport};
