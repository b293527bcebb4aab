//! Error types for the decode boundary
//!
//! Errors raised while turning wire-level records into typed updates.

use thiserror::Error;

/// Schema conversion errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("Unknown update kind code: {0}")]
    UnknownUpdateKind(i64),
}
