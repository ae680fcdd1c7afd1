pub mod bindings;
pub mod canonical;
pub mod classify;
pub mod config;
pub mod crosscheck;
pub mod diff;
pub mod error;
pub mod exports;
pub mod expr;
pub mod generator;
pub mod header;
pub mod logging;
pub mod normalize;
pub mod process;
pub mod registry;
pub mod report;
pub mod semver;
pub mod snapshot;
pub mod store;

pub use canonical::{AbiVersion, Snapshot};
pub use classify::{Classification, ClassificationResult, RequiredBump};
pub use config::{AbiConfig, TargetConfig};
pub use diff::{Change, ChangeKind};
pub use error::{Error, Result};
pub use registry::AbiRegistry;
pub use report::{AggregateReport, ReportStatus, VerifyReport};
pub use semver::PolicyOutcome;

/// Generates the surface fingerprint of a serialized snapshot.
///
/// The fingerprint is a SHA-256 hash of the snapshot's canonical surface:
/// the ABI version plus functions, enums and structs sorted by name. It is
/// insensitive to timestamps, tool version, warnings and the order elements
/// appear in the file.
///
/// # Arguments
///
/// * `snapshot_json` - The content of a snapshot file.
///
/// # Returns
///
/// The hex-encoded SHA-256 fingerprint, or an error if the content is not a
/// valid snapshot.
pub fn generate_fingerprint(snapshot_json: &str) -> Result<String> {
    let mut snapshot: Snapshot = serde_json::from_str(snapshot_json)?;
    snapshot.canonicalize();
    snapshot.fingerprint()
}
