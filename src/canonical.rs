use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::Result;
use crate::normalize::type_key;

//==============================================================================
// Surface Elements
//==============================================================================

/// A function parameter. Names are recorded but never compared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub variadic: bool,
}

impl Parameter {
    pub fn variadic() -> Self {
        Self {
            name: "...".to_string(),
            ty: "...".to_string(),
            variadic: true,
        }
    }
}

/// An exported function as declared in the header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionSymbol {
    pub name: String,
    pub return_type: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

/// Comparison key of a function signature: the return type key followed by
/// one `(type key, variadic)` pair per parameter.
pub type SignatureKey = (String, Vec<(String, bool)>);

impl FunctionSymbol {
    pub fn signature_key(&self) -> SignatureKey {
        let params = self
            .parameters
            .iter()
            .map(|p| (type_key(&p.ty), p.variadic))
            .collect();
        (type_key(&self.return_type), params)
    }

    /// `ret name(type, type)` rendering used in reports.
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self.parameters.iter().map(|p| p.ty.as_str()).collect();
        let params = if params.is_empty() {
            "void".to_string()
        } else {
            params.join(", ")
        };
        format!("{} {}({})", self.return_type, self.name, params)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    /// `None` when the initialiser could not be folded to a constant.
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnumType {
    pub name: String,
    pub members: Vec<EnumMember>,
}

/// A struct field. `ty` is the declarator with the field name removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<StructField>,
}

//==============================================================================
// Versions and Policy
//==============================================================================

/// ABI version triple read from the header's version macros.
///
/// Field order makes the derived ordering the usual tuple comparison.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct AbiVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl AbiVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The parts of a target's configuration a comparison needs when it runs
/// from serialized snapshots alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotPolicy {
    #[serde(default)]
    pub symbol_prefix: String,
    #[serde(default = "default_true")]
    pub struct_tail_addition_is_breaking: bool,
    #[serde(default)]
    pub allow_non_prefixed_exports: bool,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            symbol_prefix: String::new(),
            struct_tail_addition_is_breaking: true,
            allow_non_prefixed_exports: false,
        }
    }
}

fn default_true() -> bool {
    true
}

//==============================================================================
// Snapshot
//==============================================================================

/// Canonical description of one target's ABI surface at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub target: String,
    pub tool_version: String,
    pub generated_at_utc: String,
    pub abi_version: AbiVersion,
    #[serde(default)]
    pub policy: SnapshotPolicy,
    #[serde(default)]
    pub functions: Vec<FunctionSymbol>,
    #[serde(default)]
    pub enums: Vec<EnumType>,
    #[serde(default)]
    pub structs: Vec<StructType>,
    /// Symbols declared by the bindings, each with its declaring files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_symbols: Option<BTreeMap<String, BTreeSet<String>>>,
    /// Raw export names as listed by the export tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_exports: Option<BTreeSet<String>>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// The fingerprinted part of a snapshot.
#[derive(Serialize)]
struct Surface<'a> {
    abi_version: &'a AbiVersion,
    functions: &'a [FunctionSymbol],
    enums: &'a [EnumType],
    structs: &'a [StructType],
}

impl Snapshot {
    /// Sorts functions, enums and structs by name.
    pub fn canonicalize(&mut self) {
        self.functions.sort_by(|a, b| a.name.cmp(&b.name));
        self.enums.sort_by(|a, b| a.name.cmp(&b.name));
        self.structs.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Checks the uniqueness invariants. Returns a description of the first
    /// violation.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        fn unique<'a>(
            kind: &str,
            names: impl Iterator<Item = &'a str>,
        ) -> std::result::Result<(), String> {
            let mut seen = BTreeSet::new();
            for name in names {
                if !seen.insert(name) {
                    return Err(format!("duplicate {kind} '{name}'"));
                }
            }
            Ok(())
        }

        unique("function", self.functions.iter().map(|f| f.name.as_str()))?;
        unique("enum", self.enums.iter().map(|e| e.name.as_str()))?;
        unique("struct", self.structs.iter().map(|s| s.name.as_str()))?;
        for e in &self.enums {
            unique(
                &format!("member of enum {}", e.name),
                e.members.iter().map(|m| m.name.as_str()),
            )?;
        }
        for s in &self.structs {
            unique(
                &format!("field of struct {}", s.name),
                s.fields.iter().map(|f| f.name.as_str()),
            )?;
        }
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSymbol> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_names(&self) -> BTreeSet<&str> {
        self.functions.iter().map(|f| f.name.as_str()).collect()
    }

    /// SHA-256 over the canonical JSON of the version and the surface.
    ///
    /// Timestamps, tool version, warnings and cross-check inputs do not
    /// contribute.
    pub fn fingerprint(&self) -> Result<String> {
        let surface = Surface {
            abi_version: &self.abi_version,
            functions: &self.functions,
            enums: &self.enums,
            structs: &self.structs,
        };
        let json = serde_json::to_vec(&surface)?;
        Ok(format!("{:x}", Sha256::digest(&json)))
    }
}
