//! Cross-checks between the header surface, the binding declarations and
//! the binary export table.
//!
//! Everything here runs on snapshot data alone, so a report computed from
//! two snapshot files yields the same discrepancies as a live verify.

use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;

use crate::canonical::Snapshot;
use crate::exports::canonicalize_export;

/// Kind of mismatch between two views of the ABI surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// The header exports a function that no binding declares.
    MissingBinding,
    /// A binding declares a function the header does not export.
    UnknownBinding,
    /// The header declares a function the binary does not export.
    MissingExport,
    /// The binary exports a prefixed symbol the header does not declare.
    UnexpectedExport,
    /// The binary exports a symbol outside the ABI prefix.
    NonPrefixedExport,
    /// An export carries stdcall-style decoration.
    DecoratedExport,
}

impl DiscrepancyKind {
    pub fn id(&self) -> &'static str {
        match self {
            DiscrepancyKind::MissingBinding => "missing_binding",
            DiscrepancyKind::UnknownBinding => "unknown_binding",
            DiscrepancyKind::MissingExport => "missing_export",
            DiscrepancyKind::UnexpectedExport => "unexpected_export",
            DiscrepancyKind::NonPrefixedExport => "non_prefixed_export",
            DiscrepancyKind::DecoratedExport => "decorated_export",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::all().into_iter().find(|kind| kind.id() == id)
    }

    pub fn all() -> Vec<Self> {
        vec![
            DiscrepancyKind::MissingBinding,
            DiscrepancyKind::UnknownBinding,
            DiscrepancyKind::MissingExport,
            DiscrepancyKind::UnexpectedExport,
            DiscrepancyKind::NonPrefixedExport,
            DiscrepancyKind::DecoratedExport,
        ]
    }
}

impl std::fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl std::str::FromStr for DiscrepancyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s).ok_or_else(|| format!("Unknown discrepancy kind: {s}"))
    }
}

/// Whether a discrepancy fails verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// A named mismatch attached to a verify report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub symbol: String,
    pub severity: Severity,
    pub detail: String,
}

impl Discrepancy {
    fn new(kind: DiscrepancyKind, symbol: &str, severity: Severity, detail: String) -> Self {
        Self {
            kind,
            symbol: symbol.to_string(),
            severity,
            detail,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Compares the binding declarations with the header functions.
///
/// Returns nothing when the snapshot carries no binding data.
pub fn check_bindings(snapshot: &Snapshot) -> Vec<Discrepancy> {
    let Some(bindings) = &snapshot.binding_symbols else {
        return Vec::new();
    };
    let header = snapshot.function_names();
    let mut found = Vec::new();

    for name in &header {
        if !bindings.contains_key(*name) {
            found.push(Discrepancy::new(
                DiscrepancyKind::MissingBinding,
                name,
                Severity::Warning,
                format!("header exports '{name}' but no binding declares it"),
            ));
        }
    }

    for (name, files) in bindings {
        if !header.contains(name.as_str()) {
            let files: Vec<&str> = files.iter().map(String::as_str).collect();
            found.push(Discrepancy::new(
                DiscrepancyKind::UnknownBinding,
                name,
                Severity::Error,
                format!(
                    "declared in {} but not exported by the header",
                    files.join(", ")
                ),
            ));
        }
    }

    found
}

/// Compares the binary export table with the header functions.
///
/// Returns nothing when the snapshot carries no export data.
pub fn check_exports(snapshot: &Snapshot) -> Vec<Discrepancy> {
    let Some(raw_exports) = &snapshot.binary_exports else {
        return Vec::new();
    };
    let policy = &snapshot.policy;
    let header = snapshot.function_names();
    let mut found = Vec::new();
    let mut exported = BTreeSet::new();

    for raw in raw_exports {
        let export = canonicalize_export(raw);
        if export.decorated {
            found.push(Discrepancy::new(
                DiscrepancyKind::DecoratedExport,
                &export.name,
                Severity::Warning,
                format!("exported as '{raw}'; calling convention may have drifted"),
            ));
        }

        if !policy.symbol_prefix.is_empty() && !export.name.starts_with(&policy.symbol_prefix) {
            if !policy.allow_non_prefixed_exports {
                found.push(Discrepancy::new(
                    DiscrepancyKind::NonPrefixedExport,
                    &export.name,
                    Severity::Error,
                    format!("does not start with '{}'", policy.symbol_prefix),
                ));
            }
        } else if !header.contains(export.name.as_str()) {
            found.push(Discrepancy::new(
                DiscrepancyKind::UnexpectedExport,
                &export.name,
                Severity::Error,
                "exported by the binary but not declared in the header".to_string(),
            ));
        }

        exported.insert(export.name);
    }

    for name in &header {
        if !exported.contains(*name) {
            found.push(Discrepancy::new(
                DiscrepancyKind::MissingExport,
                name,
                Severity::Error,
                "declared in the header but missing from the binary".to_string(),
            ));
        }
    }

    found
}

/// Runs every applicable check, ordered by kind then symbol.
pub fn cross_check(snapshot: &Snapshot) -> Vec<Discrepancy> {
    let mut found = check_bindings(snapshot);
    found.extend(check_exports(snapshot));
    found.sort_by(|a, b| (a.kind, &a.symbol).cmp(&(b.kind, &b.symbol)));
    found.dedup();
    found
}
