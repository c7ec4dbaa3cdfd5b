// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use thiserror::Error;

use crate::select::SelectError;

/// Errors surfaced by the frame renderer.
///
/// Stale or suboptimal presentation results and zero-sized windows are not
/// errors; they travel as [`crate::AcquireOutcome`], [`crate::PresentOutcome`]
/// and [`crate::SkipReason`] values.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no suitable GPU: {0}")]
    NoSuitableDevice(#[from] SelectError),

    #[error("required extension {name} is not available")]
    MissingExtension { name: String },

    #[error("GPU device lost")]
    DeviceLost,

    #[error("failed to read shader {path}: {source}")]
    ShaderUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out waiting for frame slot {slot} to release its image")]
    FenceTimeout { slot: usize },

    #[error("presentation chain recreation already in progress")]
    RecreateInProgress,

    #[error("{0} used before initialisation")]
    NotInitialized(&'static str),

    #[error("{op} failed: {code}")]
    Backend { op: &'static str, code: String },
}

impl RenderError {
    pub fn backend(op: &'static str, code: impl std::fmt::Display) -> Self {
        RenderError::Backend {
            op,
            code: code.to_string(),
        }
    }

    /// Fatal errors abort initialisation or the process; nothing retries them.
    pub fn is_fatal(&self) -> bool {
        match self {
            RenderError::NoSuitableDevice(_)
            | RenderError::MissingExtension { .. }
            | RenderError::DeviceLost
            | RenderError::ShaderUnreadable { .. }
            | RenderError::NotInitialized(_)
            | RenderError::Backend { .. } => true,
            RenderError::FenceTimeout { .. } | RenderError::RecreateInProgress => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_not_fatal() {
        assert!(!RenderError::RecreateInProgress.is_fatal());
        assert!(!RenderError::FenceTimeout { slot: 1 }.is_fatal());
        assert!(RenderError::DeviceLost.is_fatal());
        assert!(RenderError::from(SelectError::NoDevices).is_fatal());
    }
}
