//! Axum HTTP handlers. Thin wrappers: validation and status mapping here,
//! all behavior in the library modules.

pub mod admin;
pub mod search;
pub mod update;

use axum::http::StatusCode;

use crate::error::CoreError;

/// Map a core error onto an HTTP response tuple. Validation problems are
/// the caller's fault; configuration and I/O problems are ours.
pub(crate) fn error_response(err: CoreError) -> (StatusCode, String) {
    let status = match &err {
        CoreError::Parse(_) => StatusCode::BAD_REQUEST,
        CoreError::Conflict { .. } => StatusCode::CONFLICT,
        CoreError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::Provider(_) => StatusCode::BAD_GATEWAY,
        CoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
