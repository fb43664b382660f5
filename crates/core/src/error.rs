//! Error taxonomy for pipeline stages.
//!
//! Every stage returns `Result<T, StageError>`; the orchestrator decides
//! whether a failure halts the run (fatal) or degrades to a warning
//! (recoverable). Empty-but-valid outcomes are NOT errors and are
//! represented as empty typed results by the stages themselves.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the orchestrator must react to a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// No usable data can be produced; halt and never fabricate output.
    Fatal,
    /// A non-critical stage failed; capture as a warning, keep going.
    Recoverable,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("imagery provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("no scenes matched the query: {0}")]
    NoScenes(String),

    #[error("band download failed: {0}")]
    DownloadFailed(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("raster '{name}' has unsupported dimensionality {ndim} (expected 2 or 3)")]
    BadRasterShape { name: String, ndim: usize },

    #[error("raster shape mismatch: '{name}' is {got:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        got: (usize, usize),
        expected: (usize, usize),
    },

    #[error("feature tensor is empty: {0}")]
    EmptyFeatures(String),

    #[error("required component missing: {0}")]
    MissingComponent(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StageError {
    /// Fatal errors halt the run; everything else degrades to a warning.
    pub fn class(&self) -> ErrorClass {
        match self {
            StageError::ProviderUnavailable(_)
            | StageError::NoScenes(_)
            | StageError::DownloadFailed(_)
            | StageError::InvalidRequest(_)
            | StageError::BadRasterShape { .. }
            | StageError::ShapeMismatch { .. }
            | StageError::EmptyFeatures(_)
            | StageError::MissingComponent(_) => ErrorClass::Fatal,
            StageError::Export(_) | StageError::Io(_) | StageError::Serialize(_) => {
                ErrorClass::Recoverable
            }
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}
