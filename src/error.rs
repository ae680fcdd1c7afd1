//! Error taxonomy for ABI governance operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::exports::ExportError;

/// Error type for every fallible library operation.
///
/// Classification results and policy violations are *not* errors: they are
/// data on the report. Only conditions that prevent a result from being
/// computed end up here.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing configuration, unknown target, invalid pattern.
    ///
    /// Always raised before any target work begins.
    #[error("configuration error: {0}")]
    Config(String),

    /// A header or binding source could not be read. Fatal for one target only.
    #[error("extraction failed for target '{target}': {reason}")]
    Extraction { target: String, reason: String },

    /// A snapshot file could not be read or does not satisfy the snapshot invariants.
    #[error("invalid snapshot '{}': {reason}", path.display())]
    Snapshot { path: PathBuf, reason: String },

    /// The binary export reader failed.
    #[error(transparent)]
    Export(#[from] ExportError),

    /// A generator could not be spawned or exited with an unexpected status.
    #[error("generator '{name}' failed: {reason}")]
    Generator { name: String, reason: String },

    /// A snapshot or report could not be encoded.
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing an artifact failed.
    #[error("failed to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Process exit code the CLI reports for this error.
    ///
    /// `2` for usage/configuration problems, `1` for target-level failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::Snapshot { .. } => 2,
            _ => 1,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub(crate) fn extraction(target: &str, reason: impl Into<String>) -> Self {
        Error::Extraction {
            target: target.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience result type for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_and_snapshot_errors_are_usage_failures() {
        assert_eq!(Error::config("missing targets").exit_code(), 2);
        let snapshot = Error::Snapshot {
            path: PathBuf::from("abi/baselines/demo.json"),
            reason: "not json".into(),
        };
        assert_eq!(snapshot.exit_code(), 2);
    }

    #[test]
    fn extraction_errors_fail_the_target() {
        let err = Error::extraction("demo", "header not found");
        assert_eq!(err.exit_code(), 1);
        assert_eq!(
            err.to_string(),
            "extraction failed for target 'demo': header not found"
        );
    }
}
