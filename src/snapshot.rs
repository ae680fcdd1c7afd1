//! Composition of extractor outputs into one [`Snapshot`].

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};

use crate::bindings::BindingExtractor;
use crate::canonical::{Snapshot, SnapshotPolicy};
use crate::config::{TargetConfig, resolve_path};
use crate::error::{Error, Result};
use crate::exports::ExportReader;
use crate::header::HeaderExtractor;

/// Version recorded in every snapshot this build produces.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Per-invocation knobs of a snapshot run.
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    /// Read exports from this binary instead of the configured one.
    pub binary_override: Option<PathBuf>,
    /// Leave `binary_exports` out entirely.
    pub skip_binary: bool,
}

/// Builds snapshots of configured targets.
pub struct SnapshotBuilder<'a> {
    repo_root: &'a Path,
    exports: &'a dyn ExportReader,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(repo_root: &'a Path, exports: &'a dyn ExportReader) -> Self {
        Self { repo_root, exports }
    }

    /// Extracts the header, the bindings and (unless skipped) the binary
    /// exports of one target.
    pub fn build(
        &self,
        name: &str,
        target: &TargetConfig,
        options: &SnapshotOptions,
    ) -> Result<Snapshot> {
        let header_path = resolve_path(self.repo_root, &target.header.path);
        info!(target_name = name, header = %header_path.display(), "building snapshot");

        let header = HeaderExtractor::new(&target.header)?.extract_file(name, &header_path)?;
        let mut warnings = header.warnings;

        let binding_symbols = match &target.bindings {
            Some(bindings) => {
                let surface = BindingExtractor::new(bindings, &target.header.symbol_prefix)?
                    .extract(name, self.repo_root)?;
                warnings.extend(surface.warnings);
                Some(surface.symbols)
            }
            None => None,
        };

        let mut policy = SnapshotPolicy {
            symbol_prefix: target.header.symbol_prefix.clone(),
            struct_tail_addition_is_breaking: target.header.types.struct_tail_addition_is_breaking,
            allow_non_prefixed_exports: false,
        };

        let binary_path = if options.skip_binary {
            None
        } else if let Some(path) = &options.binary_override {
            Some(resolve_path(self.repo_root, &path.to_string_lossy()))
        } else {
            target.binary.as_ref().map(|binary| {
                policy.allow_non_prefixed_exports = binary.allow_non_prefixed_exports;
                resolve_path(self.repo_root, &binary.path)
            })
        };

        let binary_exports = match binary_path {
            Some(path) if path.exists() => Some(self.exports.read_exports(&path)?),
            Some(path) => {
                warnings.push(format!(
                    "binary '{}' not found; export checks skipped",
                    path.display()
                ));
                None
            }
            None => None,
        };

        for warning in &warnings {
            warn!(target_name = name, "{warning}");
        }

        let mut snapshot = Snapshot {
            target: name.to_string(),
            tool_version: TOOL_VERSION.to_string(),
            generated_at_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            abi_version: header.abi_version,
            policy,
            functions: header.functions,
            enums: header.enums,
            structs: header.structs,
            binding_symbols,
            binary_exports,
            warnings,
        };
        snapshot.canonicalize();
        snapshot
            .check_invariants()
            .map_err(|reason| Error::extraction(name, reason))?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BinaryConfig, HeaderConfig, TypesConfig, VersionMacros};
    use crate::exports::ExportError;
    use std::collections::BTreeSet;

    struct FixedExports(Vec<&'static str>);

    impl ExportReader for FixedExports {
        fn read_exports(&self, _path: &Path) -> std::result::Result<BTreeSet<String>, ExportError> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    const HEADER: &str = r#"
#define MY_ABI_MAJOR 1
#define MY_ABI_MINOR 4
#define MY_ABI_PATCH 0
MY_API int MY_CALL my_open(const char *path);
MY_API void MY_CALL my_close(int handle);
"#;

    fn target(binary: Option<&str>) -> TargetConfig {
        TargetConfig {
            baseline_path: None,
            header: HeaderConfig {
                path: "include/demo.h".into(),
                api_macro: "MY_API".into(),
                call_macro: "MY_CALL".into(),
                symbol_prefix: "my_".into(),
                version_macros: VersionMacros {
                    major: "MY_ABI_MAJOR".into(),
                    minor: "MY_ABI_MINOR".into(),
                    patch: "MY_ABI_PATCH".into(),
                },
                types: TypesConfig::default(),
            },
            bindings: None,
            binary: binary.map(|path| BinaryConfig {
                path: path.into(),
                allow_non_prefixed_exports: true,
            }),
            generators: vec![],
        }
    }

    fn repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("include")).unwrap();
        std::fs::write(dir.path().join("include/demo.h"), HEADER).unwrap();
        dir
    }

    #[test]
    fn builds_sorted_snapshot_with_metadata() {
        let dir = repo();
        let exports = FixedExports(vec![]);
        let snapshot = SnapshotBuilder::new(dir.path(), &exports)
            .build("demo", &target(None), &SnapshotOptions::default())
            .unwrap();

        assert_eq!(snapshot.target, "demo");
        assert_eq!(snapshot.tool_version, TOOL_VERSION);
        assert_eq!(snapshot.abi_version.to_string(), "1.4.0");
        assert_eq!(snapshot.function_names().into_iter().collect::<Vec<_>>(), vec!["my_close", "my_open"]);
        assert!(snapshot.generated_at_utc.ends_with('Z'));
        assert!(snapshot.binding_symbols.is_none());
        assert!(snapshot.binary_exports.is_none());
        assert_eq!(snapshot.policy.symbol_prefix, "my_");
    }

    #[test]
    fn configured_binary_is_read() {
        let dir = repo();
        std::fs::write(dir.path().join("libdemo.so"), b"").unwrap();
        let exports = FixedExports(vec!["my_open", "my_close"]);
        let snapshot = SnapshotBuilder::new(dir.path(), &exports)
            .build("demo", &target(Some("libdemo.so")), &SnapshotOptions::default())
            .unwrap();

        assert_eq!(snapshot.binary_exports.unwrap().len(), 2);
        assert!(snapshot.policy.allow_non_prefixed_exports);
    }

    #[test]
    fn skip_binary_omits_exports() {
        let dir = repo();
        std::fs::write(dir.path().join("libdemo.so"), b"").unwrap();
        let exports = FixedExports(vec!["my_open"]);
        let options = SnapshotOptions {
            skip_binary: true,
            ..SnapshotOptions::default()
        };
        let snapshot = SnapshotBuilder::new(dir.path(), &exports)
            .build("demo", &target(Some("libdemo.so")), &options)
            .unwrap();
        assert!(snapshot.binary_exports.is_none());
    }

    #[test]
    fn override_binary_uses_strict_prefix_policy() {
        let dir = repo();
        let lib = dir.path().join("other.so");
        std::fs::write(&lib, b"").unwrap();
        let exports = FixedExports(vec!["my_open"]);
        let options = SnapshotOptions {
            binary_override: Some(lib),
            skip_binary: false,
        };
        let snapshot = SnapshotBuilder::new(dir.path(), &exports)
            .build("demo", &target(Some("libdemo.so")), &options)
            .unwrap();
        assert!(snapshot.binary_exports.is_some());
        assert!(!snapshot.policy.allow_non_prefixed_exports);
    }

    #[test]
    fn relative_override_resolves_against_repo_root() {
        let dir = repo();
        std::fs::create_dir_all(dir.path().join("build")).unwrap();
        std::fs::write(dir.path().join("build/libother.so"), b"").unwrap();
        let exports = FixedExports(vec!["my_open", "my_close"]);
        let options = SnapshotOptions {
            binary_override: Some(PathBuf::from("build/libother.so")),
            skip_binary: false,
        };
        let snapshot = SnapshotBuilder::new(dir.path(), &exports)
            .build("demo", &target(None), &options)
            .unwrap();
        assert_eq!(snapshot.binary_exports.unwrap().len(), 2);
        assert!(snapshot.warnings.is_empty());
    }

    #[test]
    fn missing_binary_is_a_warning() {
        let dir = repo();
        let exports = FixedExports(vec![]);
        let snapshot = SnapshotBuilder::new(dir.path(), &exports)
            .build("demo", &target(Some("build/libdemo.so")), &SnapshotOptions::default())
            .unwrap();
        assert!(snapshot.binary_exports.is_none());
        assert!(snapshot.warnings.iter().any(|w| w.contains("not found")));
    }

    #[test]
    fn missing_header_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let exports = FixedExports(vec![]);
        let err = SnapshotBuilder::new(dir.path(), &exports)
            .build("demo", &target(None), &SnapshotOptions::default())
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Extraction { .. }));
    }
}
