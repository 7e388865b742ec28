//! Success envelope shared by JSON handlers.
//!
//! Successful JSON bodies are always wrapped as `{ "data": ... }`; errors use
//! the `{ "error", "code" }` shape from [`crate::error::AppError`].

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
