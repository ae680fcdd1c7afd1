//! Verification reports and their renderings.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::canonical::{AbiVersion, Snapshot};
use crate::classify::{Classification, ClassificationResult, classify};
use crate::crosscheck::{Discrepancy, cross_check};
use crate::diff::diff;
use crate::error::Result;
use crate::semver::{PolicyOutcome, enforce, recommended_version};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pass,
    Fail,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportStatus::Pass => write!(f, "pass"),
            ReportStatus::Fail => write!(f, "fail"),
        }
    }
}

/// Outcome of comparing one target against its baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub target: String,
    /// `fail` on a policy violation or an error-level discrepancy.
    pub status: ReportStatus,
    pub baseline_version: AbiVersion,
    pub current_version: AbiVersion,
    pub classification: ClassificationResult,
    pub policy: PolicyOutcome,
    pub recommended_version: AbiVersion,
    pub discrepancies: Vec<Discrepancy>,
    pub warnings: Vec<String>,
    pub baseline_fingerprint: String,
    pub current_fingerprint: String,
}

impl VerifyReport {
    /// Diffs, classifies, enforces the version policy and cross-checks.
    ///
    /// The tail-addition policy comes from the current snapshot.
    pub fn compare(baseline: &Snapshot, current: &Snapshot) -> Result<Self> {
        let classification = classify(
            diff(baseline, current),
            current.policy.struct_tail_addition_is_breaking,
        );
        let policy = enforce(
            baseline.abi_version,
            current.abi_version,
            classification.required_bump,
        );
        let discrepancies = cross_check(current);

        let status = if policy.passed() && !discrepancies.iter().any(Discrepancy::is_error) {
            ReportStatus::Pass
        } else {
            ReportStatus::Fail
        };

        Ok(Self {
            target: current.target.clone(),
            status,
            baseline_version: baseline.abi_version,
            current_version: current.abi_version,
            recommended_version: recommended_version(
                baseline.abi_version,
                classification.required_bump,
            ),
            classification,
            policy,
            discrepancies,
            warnings: current.warnings.clone(),
            baseline_fingerprint: baseline.fingerprint()?,
            current_fingerprint: current.fingerprint()?,
        })
    }

    /// Whether the CLI should exit successfully.
    ///
    /// A breaking classification fails unless explicitly allowed, even when
    /// the version bump covers it.
    pub fn passes(&self, allow_breaking: bool) -> bool {
        self.status == ReportStatus::Pass && (allow_breaking || !self.classification.is_breaking())
    }

    fn reasons(&self, severity: Classification) -> Vec<String> {
        self.classification
            .changes
            .iter()
            .filter(|c| c.severity == severity)
            .map(|c| {
                let change = &c.change;
                if change.detail.is_empty() {
                    format!("{} {}", change.kind, change.subject)
                } else {
                    format!("{} {}: {}", change.kind, change.subject, change.detail)
                }
            })
            .collect()
    }

    fn errors(&self) -> Vec<String> {
        let mut errors: Vec<String> = self.policy.violation().map(|v| v.to_string()).into_iter().collect();
        errors.extend(
            self.discrepancies
                .iter()
                .filter(|d| d.is_error())
                .map(|d| format!("{} {}: {}", d.kind, d.symbol, d.detail)),
        );
        errors
    }

    fn all_warnings(&self) -> Vec<String> {
        let mut warnings = self.warnings.clone();
        warnings.extend(
            self.discrepancies
                .iter()
                .filter(|d| !d.is_error())
                .map(|d| format!("{} {}: {}", d.kind, d.symbol, d.detail)),
        );
        warnings
    }

    /// Plain-text summary for terminals.
    pub fn render_text(&self) -> String {
        let c = &self.classification;
        let mut out = String::new();
        let _ = writeln!(out, "ABI check for '{}': {}", self.target, self.status);
        let _ = writeln!(out, "Baseline version: {}", self.baseline_version);
        let _ = writeln!(out, "Current version: {}", self.current_version);
        let _ = writeln!(out, "Classification: {}", c.overall);
        let _ = writeln!(out, "Required bump: {}", c.required_bump);
        let _ = writeln!(out, "Recommended version: {}", self.recommended_version);
        let _ = writeln!(
            out,
            "Changes: {} breaking, {} additive",
            c.count(Classification::Breaking),
            c.count(Classification::Additive)
        );
        for change in &c.changes {
            let _ = writeln!(
                out,
                "  [{}] {} {} {}",
                change.severity, change.change.kind, change.change.subject, change.change.detail
            );
        }
        for (title, items) in [("Warnings", self.all_warnings()), ("Errors", self.errors())] {
            if !items.is_empty() {
                let _ = writeln!(out, "{title}:");
                for item in items {
                    let _ = writeln!(out, "  - {item}");
                }
            }
        }
        out
    }

    pub fn render_markdown(&self) -> String {
        let c = &self.classification;
        let mut out = String::new();
        let _ = writeln!(out, "# ABI Report: {} ({})", self.target, self.status);
        let _ = writeln!(out);
        let _ = writeln!(out, "- Baseline ABI version: `{}`", self.baseline_version);
        let _ = writeln!(out, "- Current ABI version: `{}`", self.current_version);
        let _ = writeln!(out, "- Change classification: `{}`", c.overall);
        let _ = writeln!(out, "- Required bump: `{}`", c.required_bump);
        let _ = writeln!(out, "- Recommended next version: `{}`", self.recommended_version);
        let _ = writeln!(out, "- Breaking changes: `{}`", c.count(Classification::Breaking));
        let _ = writeln!(out, "- Additive changes: `{}`", c.count(Classification::Additive));
        let _ = writeln!(out, "- Surface fingerprint: `{}`", self.current_fingerprint);
        let _ = writeln!(out);

        let sections = [
            ("Breaking Changes", self.reasons(Classification::Breaking)),
            ("Additive Changes", self.reasons(Classification::Additive)),
            ("Warnings", self.all_warnings()),
            ("Errors", self.errors()),
        ];
        for (title, items) in sections {
            if items.is_empty() {
                continue;
            }
            let _ = writeln!(out, "## {title}");
            for item in items {
                let _ = writeln!(out, "- {item}");
            }
            let _ = writeln!(out);
        }
        out
    }
}

//==============================================================================
// Aggregate
//==============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub targets: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub warnings: usize,
    /// Number of targets per overall classification.
    pub classifications: BTreeMap<String, usize>,
}

/// Result of verifying several targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub status: ReportStatus,
    pub generated_at_utc: String,
    pub results: Vec<VerifyReport>,
    /// Targets that produced no report, with the reason.
    pub errors: BTreeMap<String, String>,
    pub summary: AggregateSummary,
}

impl AggregateReport {
    /// Builds the aggregate from per-target results, sorted by target name.
    pub fn new(
        mut results: Vec<VerifyReport>,
        errors: BTreeMap<String, String>,
        allow_breaking: bool,
        generated_at_utc: String,
    ) -> Self {
        results.sort_by(|a, b| a.target.cmp(&b.target));

        let mut summary = AggregateSummary {
            targets: results.len() + errors.len(),
            errored: errors.len(),
            ..AggregateSummary::default()
        };
        for class in Classification::all() {
            summary.classifications.insert(class.id().to_string(), 0);
        }
        for report in &results {
            if report.passes(allow_breaking) {
                summary.passed += 1;
            } else {
                summary.failed += 1;
            }
            summary.warnings += report.all_warnings().len();
            *summary
                .classifications
                .entry(report.classification.overall.id().to_string())
                .or_default() += 1;
        }

        let status = if summary.failed == 0 && summary.errored == 0 {
            ReportStatus::Pass
        } else {
            ReportStatus::Fail
        };

        Self {
            status,
            generated_at_utc,
            results,
            errors,
            summary,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ReportStatus::Pass
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for report in &self.results {
            let _ = writeln!(
                out,
                "{}: {} ({}, required bump {})",
                report.target, report.status, report.classification.overall, report.classification.required_bump
            );
        }
        for (target, error) in &self.errors {
            let _ = writeln!(out, "{target}: error ({error})");
        }
        let s = &self.summary;
        let _ = writeln!(
            out,
            "{} targets: {} passed, {} failed, {} errored, {} warnings",
            s.targets, s.passed, s.failed, s.errored, s.warnings
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{FunctionSymbol, SnapshotPolicy};
    use crate::semver::ViolationKind;

    fn snapshot(version: AbiVersion, functions: &[&str]) -> Snapshot {
        Snapshot {
            target: "demo".into(),
            tool_version: "test".into(),
            generated_at_utc: String::new(),
            abi_version: version,
            policy: SnapshotPolicy::default(),
            functions: functions
                .iter()
                .map(|name| FunctionSymbol {
                    name: name.to_string(),
                    return_type: "int".into(),
                    parameters: vec![],
                })
                .collect(),
            enums: vec![],
            structs: vec![],
            binding_symbols: None,
            binary_exports: None,
            warnings: vec![],
        }
    }

    #[test]
    fn unchanged_surface_passes() {
        let s = snapshot(AbiVersion::new(1, 0, 0), &["my_open"]);
        let report = VerifyReport::compare(&s, &s).unwrap();
        assert_eq!(report.status, ReportStatus::Pass);
        assert!(report.passes(false));
        assert_eq!(report.baseline_fingerprint, report.current_fingerprint);
    }

    #[test]
    fn covered_breaking_change_needs_allow_flag() {
        let baseline = snapshot(AbiVersion::new(1, 0, 0), &["my_close", "my_open"]);
        let current = snapshot(AbiVersion::new(2, 0, 0), &["my_open"]);
        let report = VerifyReport::compare(&baseline, &current).unwrap();

        assert_eq!(report.status, ReportStatus::Pass);
        assert!(!report.passes(false));
        assert!(report.passes(true));
    }

    #[test]
    fn insufficient_bump_fails_and_renders() {
        let baseline = snapshot(AbiVersion::new(1, 2, 3), &["my_close", "my_open"]);
        let current = snapshot(AbiVersion::new(1, 2, 4), &["my_open"]);
        let report = VerifyReport::compare(&baseline, &current).unwrap();

        assert_eq!(report.status, ReportStatus::Fail);
        assert!(!report.passes(true));
        assert_eq!(
            report.policy.violation().unwrap().kind,
            ViolationKind::InsufficientBump
        );
        assert_eq!(report.recommended_version, AbiVersion::new(2, 0, 0));

        let md = report.render_markdown();
        assert!(md.starts_with("# ABI Report: demo (fail)"));
        assert!(md.contains("## Breaking Changes\n- function_removed my_close: int my_close(void)"));
        assert!(md.contains("## Errors\n- major bump required"));

        let text = report.render_text();
        assert!(text.contains("Recommended version: 2.0.0"));
    }

    #[test]
    fn aggregate_counts_results_and_errors() {
        let s = snapshot(AbiVersion::new(1, 0, 0), &["my_open"]);
        let mut other = s.clone();
        other.target = "alpha".into();
        let results = vec![
            VerifyReport::compare(&s, &s).unwrap(),
            VerifyReport::compare(&other, &other).unwrap(),
        ];
        let mut errors = BTreeMap::new();
        errors.insert("broken".to_string(), "header missing".to_string());

        let aggregate = AggregateReport::new(results, errors, false, "now".into());
        assert_eq!(aggregate.results[0].target, "alpha");
        assert_eq!(aggregate.summary.targets, 3);
        assert_eq!(aggregate.summary.passed, 2);
        assert_eq!(aggregate.summary.errored, 1);
        assert_eq!(aggregate.summary.classifications["none"], 2);
        assert!(!aggregate.passed());
        assert!(aggregate.render_text().contains("broken: error (header missing)"));
    }
}
