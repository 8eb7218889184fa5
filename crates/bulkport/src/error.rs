//! 💀 The error taxonomy: the four ways an import can go sideways, typed.
//!
//! Plumbing inside the crate stays on `anyhow` with context strings. The public
//! operations raise one of these wrapped in `anyhow::Error`, so a caller that
//! cares can `downcast_ref::<ImportError>()` and branch on the variant.
//!
//! Row-level duplicate violations are NOT here. They are
//! [`RowValidationError`](crate::validation::RowValidationError) values that get
//! folded into the import history and never propagate.

use thiserror::Error;

/// 🏷️ Everything that can abort an import (or a removal) as a whole.
#[derive(Debug, Error)]
pub enum ImportError {
    /// 📛 Bad request shape: wrong file type, unknown history, unknown column.
    #[error("fatal input: {0}")]
    FatalInput(String),

    /// 📡 Reading the source failed (disk, S3, or the CSV bytes themselves).
    #[error("transport failure: {0}")]
    Transport(String),

    /// 🧵 A dispatched worker failed. Already-completed batches stay committed.
    #[error("worker failure: {0}")]
    Worker(String),

    /// 🛑 Workers were removed while this one was in flight.
    #[error("import was cancelled")]
    Cancelled,
}

impl ImportError {
    pub(crate) fn fatal(msg: impl Into<String>) -> Self {
        Self::FatalInput(msg.into())
    }

    pub(crate) fn transport(err: &anyhow::Error) -> Self {
        // 🧅 `{:#}` flattens the whole context chain onto one line
        Self::Transport(format!("{err:#}"))
    }

    pub(crate) fn worker(err: &anyhow::Error) -> Self {
        Self::Worker(format!("{err:#}"))
    }
}
