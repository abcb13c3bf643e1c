//! Core types for mqstack
//!
//! Wire-level error codes and request ids shared by the queue engine and
//! the server binary.

pub mod error;
pub mod request_id;

pub use error::{ApiError, ErrorCode};
pub use request_id::RequestId;
