//! Version policy: the declared version delta must cover the required bump.

use serde::{Deserialize, Serialize};

use crate::canonical::AbiVersion;
use crate::classify::RequiredBump;

/// The bump actually declared between two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActualBump {
    None,
    Patch,
    Minor,
    Major,
}

impl ActualBump {
    pub fn id(&self) -> &'static str {
        match self {
            ActualBump::None => "none",
            ActualBump::Patch => "patch",
            ActualBump::Minor => "minor",
            ActualBump::Major => "major",
        }
    }

    /// Whether this bump is at least as severe as `required`.
    pub fn satisfies(&self, required: RequiredBump) -> bool {
        let needed = match required {
            RequiredBump::None => ActualBump::None,
            RequiredBump::Minor => ActualBump::Minor,
            RequiredBump::Major => ActualBump::Major,
        };
        *self >= needed
    }
}

impl std::fmt::Display for ActualBump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Highest component that increased from `baseline` to `current`.
pub fn actual_bump(baseline: AbiVersion, current: AbiVersion) -> ActualBump {
    if current.major > baseline.major {
        ActualBump::Major
    } else if current.major == baseline.major && current.minor > baseline.minor {
        ActualBump::Minor
    } else if current.major == baseline.major
        && current.minor == baseline.minor
        && current.patch > baseline.patch
    {
        ActualBump::Patch
    } else {
        ActualBump::None
    }
}

/// `baseline` with the required component incremented and lower ones reset.
pub fn recommended_version(baseline: AbiVersion, required: RequiredBump) -> AbiVersion {
    match required {
        RequiredBump::None => baseline,
        RequiredBump::Minor => AbiVersion::new(baseline.major, baseline.minor.saturating_add(1), 0),
        RequiredBump::Major => AbiVersion::new(baseline.major.saturating_add(1), 0, 0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The declared bump is lower than the classification requires.
    InsufficientBump,
    /// The declared version is lower than the baseline version.
    VersionRegressed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub kind: ViolationKind,
    pub required_bump: RequiredBump,
    pub actual_bump: ActualBump,
    pub baseline: AbiVersion,
    pub current: AbiVersion,
    pub recommended: AbiVersion,
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ViolationKind::VersionRegressed => write!(
                f,
                "version regressed from {} to {}; expected at least {}",
                self.baseline, self.current, self.recommended
            ),
            ViolationKind::InsufficientBump => write!(
                f,
                "{} bump required but {} -> {} is a {} bump; expected at least {}",
                self.required_bump, self.baseline, self.current, self.actual_bump, self.recommended
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PolicyOutcome {
    Pass,
    Fail(PolicyViolation),
}

impl PolicyOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, PolicyOutcome::Pass)
    }

    pub fn violation(&self) -> Option<&PolicyViolation> {
        match self {
            PolicyOutcome::Pass => None,
            PolicyOutcome::Fail(violation) => Some(violation),
        }
    }
}

/// Checks the declared version delta against the required bump.
///
/// A regressed version fails whatever the requirement. Over-bumping passes.
pub fn enforce(baseline: AbiVersion, current: AbiVersion, required: RequiredBump) -> PolicyOutcome {
    let actual = actual_bump(baseline, current);
    let recommended = recommended_version(baseline, required);
    let violation = |kind| {
        PolicyOutcome::Fail(PolicyViolation {
            kind,
            required_bump: required,
            actual_bump: actual,
            baseline,
            current,
            recommended,
        })
    };

    if current < baseline {
        violation(ViolationKind::VersionRegressed)
    } else if !actual.satisfies(required) {
        violation(ViolationKind::InsufficientBump)
    } else {
        PolicyOutcome::Pass
    }
}
