//! Target configuration: the serde model of the config file, loading from
//! JSON or YAML, and validation that runs before any target is processed.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use glob::Pattern;
use regex::Regex;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::bindings::is_glob;
use crate::error::{Error, Result};
use crate::generator::{PLACEHOLDER, PLACEHOLDERS};
use crate::store;

/// Root of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbiConfig {
    #[serde(default, deserialize_with = "deserialize_targets")]
    pub targets: BTreeMap<String, TargetConfig>,
}

/// One governed ABI surface: a header, its bindings and optionally its binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_path: Option<String>,
    pub header: HeaderConfig,
    #[serde(default, alias = "pinvoke", skip_serializing_if = "Option::is_none")]
    pub bindings: Option<BindingsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<BinaryConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generators: Vec<GeneratorConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderConfig {
    pub path: String,
    pub api_macro: String,
    pub call_macro: String,
    #[serde(default)]
    pub symbol_prefix: String,
    pub version_macros: VersionMacros,
    #[serde(default)]
    pub types: TypesConfig,
}

/// Names of the `#define`s carrying the ABI version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMacros {
    pub major: String,
    pub minor: String,
    pub patch: String,
}

/// Which enums and structs of the header are part of the governed surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypesConfig {
    #[serde(default = "default_true")]
    pub enable_enums: bool,
    #[serde(default = "default_true")]
    pub enable_structs: bool,
    /// Defaults to `^<escaped symbol prefix>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_name_pattern: Option<String>,
    /// Defaults to `^<escaped symbol prefix>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub struct_name_pattern: Option<String>,
    #[serde(default)]
    pub ignore_enums: Vec<String>,
    #[serde(default)]
    pub ignore_structs: Vec<String>,
    #[serde(default = "default_true")]
    pub struct_tail_addition_is_breaking: bool,
}

impl Default for TypesConfig {
    fn default() -> Self {
        Self {
            enable_enums: true,
            enable_structs: true,
            enum_name_pattern: None,
            struct_name_pattern: None,
            ignore_enums: Vec::new(),
            ignore_structs: Vec::new(),
            struct_tail_addition_is_breaking: true,
        }
    }
}

impl TypesConfig {
    /// Defaults spelled out in full, the way `init-target` writes them.
    pub fn explicit_for_prefix(symbol_prefix: &str) -> Self {
        Self {
            enum_name_pattern: Some(default_name_pattern(symbol_prefix)),
            struct_name_pattern: Some(default_name_pattern(symbol_prefix)),
            ..Self::default()
        }
    }

    pub fn enum_pattern(&self, symbol_prefix: &str) -> String {
        self.enum_name_pattern
            .clone()
            .unwrap_or_else(|| default_name_pattern(symbol_prefix))
    }

    pub fn struct_pattern(&self, symbol_prefix: &str) -> String {
        self.struct_name_pattern
            .clone()
            .unwrap_or_else(|| default_name_pattern(symbol_prefix))
    }
}

/// Foreign-function declaration sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingsConfig {
    /// Files, directories or glob patterns relative to the repository root.
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryConfig {
    pub path: String,
    #[serde(default)]
    pub allow_non_prefixed_exports: bool,
}

/// A source-code generator run after a passing verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub name: String,
    /// Program and arguments; never interpreted by a shell.
    pub command: Vec<String>,
    #[serde(default)]
    pub expected_exit_code: i32,
}

fn default_true() -> bool {
    true
}

/// `^` followed by the regex-escaped prefix.
pub fn default_name_pattern(symbol_prefix: &str) -> String {
    format!("^{}", regex::escape(symbol_prefix))
}

/// Resolves a configured path against the repository root.
pub fn resolve_path(repo_root: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        repo_root.join(path)
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn deserialize_targets<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, TargetConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TargetsVisitor;

    impl<'de> Visitor<'de> for TargetsVisitor {
        type Value = BTreeMap<String, TargetConfig>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of target names to target configurations")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut targets = BTreeMap::new();
            while let Some(name) = map.next_key::<String>()? {
                if targets.contains_key(&name) {
                    return Err(de::Error::custom(format!("duplicate target '{name}'")));
                }
                let target = map.next_value::<TargetConfig>()?;
                targets.insert(name, target);
            }
            Ok(targets)
        }
    }

    deserializer.deserialize_map(TargetsVisitor)
}

impl AbiConfig {
    /// Loads a configuration file; YAML for `.yaml`/`.yml`, JSON otherwise.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::config(format!("cannot read config '{}': {err}", path.display()))
        })?;
        if is_yaml(path) {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| Error::config(format!("invalid config: {err}")))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|err| Error::config(format!("invalid config: {err}")))
    }

    /// Writes the configuration atomically, in the format its extension names.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = if is_yaml(path) {
            serde_yaml::to_string(self)
                .map_err(|err| Error::config(format!("cannot encode config: {err}")))?
        } else {
            let mut json = serde_json::to_string_pretty(self)?;
            json.push('\n');
            json
        };
        store::write_atomic(path, text.as_bytes())
    }

    /// Looks a target up by name.
    pub fn target(&self, name: &str) -> Result<&TargetConfig> {
        self.targets
            .get(name)
            .ok_or_else(|| Error::config(format!("unknown target '{name}'")))
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }

    /// Checks every target and reports all problems at once.
    pub fn validate(&self, repo_root: &Path) -> Result<()> {
        let mut problems = Vec::new();
        for (name, target) in &self.targets {
            if name.trim().is_empty() {
                problems.push("target names must not be empty".to_string());
            }
            target.collect_problems(name, repo_root, &mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::config(format!(
                "invalid configuration:\n  - {}",
                problems.join("\n  - ")
            )))
        }
    }
}

impl TargetConfig {
    fn collect_problems(&self, name: &str, repo_root: &Path, problems: &mut Vec<String>) {
        let header = &self.header;
        let required = [
            ("header.path", &header.path),
            ("header.api_macro", &header.api_macro),
            ("header.call_macro", &header.call_macro),
            ("header.version_macros.major", &header.version_macros.major),
            ("header.version_macros.minor", &header.version_macros.minor),
            ("header.version_macros.patch", &header.version_macros.patch),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                problems.push(format!("{name}: {field} must not be empty"));
            }
        }

        if !header.path.trim().is_empty() {
            let resolved = resolve_path(repo_root, &header.path);
            let parent_exists = resolved.parent().is_some_and(Path::is_dir);
            if !parent_exists {
                problems.push(format!(
                    "{name}: header directory of '{}' does not exist",
                    header.path
                ));
            }
        }

        let prefix = &header.symbol_prefix;
        for (field, pattern) in [
            ("enum_name_pattern", header.types.enum_pattern(prefix)),
            ("struct_name_pattern", header.types.struct_pattern(prefix)),
        ] {
            if let Err(err) = Regex::new(&pattern) {
                problems.push(format!("{name}: invalid {field} '{pattern}': {err}"));
            }
        }

        if self
            .baseline_path
            .as_ref()
            .is_some_and(|baseline| baseline.trim().is_empty())
        {
            problems.push(format!("{name}: baseline_path must not be empty when set"));
        }

        if let Some(bindings) = &self.bindings {
            for entry in &bindings.paths {
                if entry.trim().is_empty() {
                    problems.push(format!("{name}: binding paths must not be empty"));
                } else if is_glob(entry) {
                    if let Err(err) = Pattern::new(entry) {
                        problems.push(format!("{name}: invalid binding glob '{entry}': {err}"));
                    }
                } else if !resolve_path(repo_root, entry).exists() {
                    problems.push(format!("{name}: binding path '{entry}' does not exist"));
                }
            }
            for pattern in bindings.include.iter().chain(&bindings.exclude) {
                if let Err(err) = Pattern::new(pattern) {
                    problems.push(format!("{name}: invalid glob '{pattern}': {err}"));
                }
            }
        }

        if self
            .binary
            .as_ref()
            .is_some_and(|binary| binary.path.trim().is_empty())
        {
            problems.push(format!("{name}: binary.path must not be empty"));
        }

        for generator in &self.generators {
            if generator.name.trim().is_empty() {
                problems.push(format!("{name}: generator names must not be empty"));
            }
            if generator.command.is_empty() || generator.command[0].trim().is_empty() {
                problems.push(format!(
                    "{name}: generator '{}' has an empty command",
                    generator.name
                ));
            }
            for arg in &generator.command {
                for captures in PLACEHOLDER.captures_iter(arg) {
                    let placeholder = &captures[1];
                    if !PLACEHOLDERS.contains(&placeholder) {
                        problems.push(format!(
                            "{name}: generator '{}' uses unknown placeholder '{{{placeholder}}}'",
                            generator.name
                        ));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "targets": {
            "demo": {
                "header": {
                    "path": "include/demo.h",
                    "api_macro": "MY_API",
                    "call_macro": "MY_CALL",
                    "symbol_prefix": "my_",
                    "version_macros": { "major": "MY_MAJOR", "minor": "MY_MINOR", "patch": "MY_PATCH" }
                }
            }
        }
    }"#;

    #[test]
    fn defaults_apply_to_omitted_fields() {
        let config = AbiConfig::from_json_str(MINIMAL).unwrap();
        let target = config.target("demo").unwrap();
        assert!(target.header.types.enable_enums);
        assert!(target.header.types.enable_structs);
        assert!(target.header.types.struct_tail_addition_is_breaking);
        assert_eq!(target.header.types.enum_pattern("my_"), "^my_");
        assert!(target.bindings.is_none());
        assert!(target.generators.is_empty());
    }

    #[test]
    fn duplicate_targets_are_rejected() {
        let json = r#"{"targets": {
            "a": {"header": {"path": "a.h", "api_macro": "A", "call_macro": "C",
                  "version_macros": {"major": "M", "minor": "N", "patch": "P"}}},
            "a": {"header": {"path": "b.h", "api_macro": "A", "call_macro": "C",
                  "version_macros": {"major": "M", "minor": "N", "patch": "P"}}}
        }}"#;
        let err = AbiConfig::from_json_str(json).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("duplicate target 'a'"));
    }

    #[test]
    fn unknown_target_is_a_config_error() {
        let config = AbiConfig::from_json_str(MINIMAL).unwrap();
        assert!(matches!(config.target("nope"), Err(Error::Config(_))));
    }

    #[test]
    fn pinvoke_key_is_accepted_for_bindings() {
        let yaml = r#"
targets:
  demo:
    header:
      path: demo.h
      api_macro: MY_API
      call_macro: MY_CALL
      symbol_prefix: my_
      version_macros: { major: A, minor: B, patch: C }
    pinvoke:
      paths: [bindings]
"#;
        let config = AbiConfig::from_yaml_str(yaml).unwrap();
        let bindings = config.target("demo").unwrap().bindings.as_ref().unwrap();
        assert_eq!(bindings.paths, vec!["bindings"]);
    }

    #[test]
    fn glob_syntax_follows_glob_patterns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("include")).unwrap();
        let mut config = AbiConfig::from_json_str(MINIMAL).unwrap();
        let target = config.targets.get_mut("demo").unwrap();

        target.bindings = Some(BindingsConfig {
            paths: vec!["gen/[[]x].cs".into()],
            include: vec!["**/[[]*].cs".into()],
            exclude: vec![],
        });
        config.validate(dir.path()).unwrap();

        let target = config.targets.get_mut("demo").unwrap();
        target.bindings = Some(BindingsConfig {
            paths: vec!["gen/***.cs".into()],
            include: vec![],
            exclude: vec!["a**b".into()],
        });
        let message = config.validate(dir.path()).unwrap_err().to_string();
        assert!(message.contains("invalid binding glob 'gen/***.cs'"), "{message}");
        assert!(message.contains("invalid glob 'a**b'"), "{message}");
    }

    #[test]
    fn placeholder_scan_finds_names() {
        let names: Vec<_> = PLACEHOLDER
            .captures_iter("--in={snapshot} --out={repo_root}/gen")
            .map(|c| c[1].to_string())
            .collect();
        assert_eq!(names, vec!["snapshot", "repo_root"]);
    }
}
