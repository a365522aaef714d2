//! Errors surfaced to the host.
//!
//! The engine itself never fails a step; these cover placement requests
//! and encoding at the crate boundary.

use crate::grid::GridPos;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BeltError {
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid segment configuration: {0}")]
    InvalidConfig(String),

    #[error("cell {0} is already occupied")]
    Occupied(GridPos),

    #[error("no segment at {0}")]
    NoSegment(GridPos),

    #[error("no storage at {0}")]
    NoStorage(GridPos),

    #[error("tail of the segment at {0} is blocked")]
    TailBlocked(GridPos),
}

pub type Result<T> = std::result::Result<T, BeltError>;
