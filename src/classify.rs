//! Reduction of a change list to one classification and a required bump.

use serde::{Deserialize, Serialize};

use crate::diff::{Change, ChangeKind};

/// Severity class of a change or of a whole comparison.
///
/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    None,
    Additive,
    Breaking,
}

impl Classification {
    pub fn id(&self) -> &'static str {
        match self {
            Classification::None => "none",
            Classification::Additive => "additive",
            Classification::Breaking => "breaking",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Classification::None => "No change to the ABI surface.",
            Classification::Additive => "Backward-compatible additions to the ABI surface.",
            Classification::Breaking => "Changes that break existing consumers of the ABI.",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::all().into_iter().find(|c| c.id() == id)
    }

    pub fn all() -> Vec<Self> {
        vec![
            Classification::None,
            Classification::Additive,
            Classification::Breaking,
        ]
    }

    /// The version component a comparison of this class must bump.
    pub fn required_bump(&self) -> RequiredBump {
        match self {
            Classification::None => RequiredBump::None,
            Classification::Additive => RequiredBump::Minor,
            Classification::Breaking => RequiredBump::Major,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl std::str::FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s).ok_or_else(|| format!("Unknown classification: {s}"))
    }
}

/// Version bump demanded by a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredBump {
    None,
    Minor,
    Major,
}

impl RequiredBump {
    pub fn id(&self) -> &'static str {
        match self {
            RequiredBump::None => "none",
            RequiredBump::Minor => "minor",
            RequiredBump::Major => "major",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::all().into_iter().find(|b| b.id() == id)
    }

    pub fn all() -> Vec<Self> {
        vec![RequiredBump::None, RequiredBump::Minor, RequiredBump::Major]
    }
}

impl std::fmt::Display for RequiredBump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl std::str::FromStr for RequiredBump {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s).ok_or_else(|| format!("Unknown bump: {s}"))
    }
}

/// A change together with its severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedChange {
    #[serde(flatten)]
    pub change: Change,
    pub severity: Classification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub overall: Classification,
    pub required_bump: RequiredBump,
    pub changes: Vec<ClassifiedChange>,
}

impl ClassificationResult {
    pub fn is_breaking(&self) -> bool {
        self.overall == Classification::Breaking
    }

    /// Number of changes with the given severity.
    pub fn count(&self, severity: Classification) -> usize {
        self.changes.iter().filter(|c| c.severity == severity).count()
    }
}

/// Severity of a single change kind.
///
/// Tail field additions follow the target's policy flag.
pub fn severity(kind: ChangeKind, tail_addition_is_breaking: bool) -> Classification {
    match kind {
        ChangeKind::FunctionRemoved
        | ChangeKind::FunctionSignatureChanged
        | ChangeKind::EnumRemoved
        | ChangeKind::EnumMemberRemoved
        | ChangeKind::EnumMemberValueChanged
        | ChangeKind::StructRemoved
        | ChangeKind::StructFieldReordered
        | ChangeKind::StructFieldTypeChanged => Classification::Breaking,
        ChangeKind::FunctionAdded
        | ChangeKind::EnumAdded
        | ChangeKind::EnumMemberAdded
        | ChangeKind::StructAdded => Classification::Additive,
        ChangeKind::StructTailFieldAdded if tail_addition_is_breaking => Classification::Breaking,
        ChangeKind::StructTailFieldAdded => Classification::Additive,
    }
}

/// Classifies a change list. An empty list classifies as `none`.
pub fn classify(changes: Vec<Change>, tail_addition_is_breaking: bool) -> ClassificationResult {
    let changes: Vec<ClassifiedChange> = changes
        .into_iter()
        .map(|change| ClassifiedChange {
            severity: severity(change.kind, tail_addition_is_breaking),
            change,
        })
        .collect();
    let overall = changes
        .iter()
        .map(|c| c.severity)
        .max()
        .unwrap_or(Classification::None);

    ClassificationResult {
        overall,
        required_bump: overall.required_bump(),
        changes,
    }
}
