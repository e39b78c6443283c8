//! Request, response and error types of the HTTP API.

pub mod error;
pub mod message;

pub use error::*;
pub use message::*;
