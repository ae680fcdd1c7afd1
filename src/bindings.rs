//! Binding declaration extraction.
//!
//! Collects the foreign-function symbols that consumer bindings declare:
//! C# `[DllImport]`/`[LibraryImport]` methods and Rust `extern "C"` blocks.
//! Only the symbol names matter; marshalling details are not compared.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use glob::{MatchOptions, Pattern};
use regex::Regex;
use tracing::debug;

use crate::config::{BindingsConfig, resolve_path};
use crate::error::{Error, Result};
use crate::normalize::{matching_close, split_top_level, strip_comments};

static CSHARP_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)\[\s*(?:DllImport|LibraryImport)(?:Attribute)?\s*\((.*?)\)\s*\]\s*(?:\[[^\]]*\]\s*)*((?:(?:public|internal|private|protected|unsafe|static|extern|partial)\s+)+[^;{]+?\)\s*;)",
    )
    .unwrap()
});
static CSHARP_METHOD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)([A-Za-z_]\w*)\s*\(").unwrap());
static CSHARP_ENTRY_POINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bEntryPoint\s*=\s*"([^"]+)""#).unwrap());
static RUST_EXTERN_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bextern\s+"(?:C|C-unwind|system|system-unwind)"\s*\{"#).unwrap()
});
static RUST_FN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bfn\s+([A-Za-z_]\w*)").unwrap());
static RUST_LINK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"#\[\s*link_name\s*=\s*"([^"]+)"\s*\]"#).unwrap());

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &["bin", "obj", "target"];

/// Source languages recognised by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingLanguage {
    CSharp,
    Rust,
}

impl BindingLanguage {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "cs" => Some(BindingLanguage::CSharp),
            "rs" => Some(BindingLanguage::Rust),
            _ => None,
        }
    }

    /// Symbols declared in `source`, in declaration order.
    pub fn scan(&self, source: &str) -> Vec<String> {
        match self {
            BindingLanguage::CSharp => scan_csharp(source),
            BindingLanguage::Rust => scan_rust(source),
        }
    }
}

/// Symbols of C# P/Invoke declarations. `EntryPoint` wins over the method name.
pub fn scan_csharp(source: &str) -> Vec<String> {
    let source = strip_comments(source);
    CSHARP_IMPORT
        .captures_iter(&source)
        .filter_map(|caps| {
            let entry_point = CSHARP_ENTRY_POINT
                .captures(&caps[1])
                .map(|ep| ep[1].to_string());
            entry_point.or_else(|| {
                CSHARP_METHOD_NAME
                    .captures(&caps[2])
                    .map(|name| name[1].to_string())
            })
        })
        .collect()
}

/// Symbols of functions inside Rust `extern "C"` blocks. `#[link_name]`
/// wins over the declared name.
pub fn scan_rust(source: &str) -> Vec<String> {
    let source = strip_comments(source);
    let mut symbols = Vec::new();
    let mut search_from = 0;

    while let Some(found) = RUST_EXTERN_BLOCK.find_at(&source, search_from) {
        let open = found.end() - 1;
        let Some(close) = matching_close(&source, open, '{', '}') else {
            break;
        };
        for item in split_top_level(&source[open + 1..close], ';') {
            let Some(name) = RUST_FN.captures(&item) else {
                continue;
            };
            let symbol = RUST_LINK_NAME
                .captures(&item)
                .map(|link| link[1].to_string())
                .unwrap_or_else(|| name[1].to_string());
            symbols.push(symbol);
        }
        search_from = close + 1;
    }
    symbols
}

/// True when the entry contains glob metacharacters.
pub fn is_glob(entry: &str) -> bool {
    entry.contains(['*', '?', '['])
}

/// Include/exclude patterns match repository-relative paths; `*` and `?`
/// never cross a `/`.
pub const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Path relative to `root` with `/` separators.
pub(crate) fn relative_slash_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Binding symbols of one target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingSurface {
    /// Symbol → repository-relative files declaring it.
    pub symbols: BTreeMap<String, BTreeSet<String>>,
    pub files: Vec<String>,
    pub warnings: Vec<String>,
}

/// Finds and scans one target's binding sources.
#[derive(Debug, Clone)]
pub struct BindingExtractor {
    roots: Vec<String>,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    symbol_prefix: String,
}

impl BindingExtractor {
    pub fn new(config: &BindingsConfig, symbol_prefix: &str) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p)
                        .map_err(|err| Error::config(format!("invalid glob '{p}': {err}")))
                })
                .collect()
        };
        Ok(Self {
            roots: config.paths.clone(),
            include: compile(&config.include)?,
            exclude: compile(&config.exclude)?,
            symbol_prefix: symbol_prefix.to_string(),
        })
    }

    pub fn extract(&self, target: &str, repo_root: &Path) -> Result<BindingSurface> {
        let files = self.collect_files(target, repo_root)?;
        let mut surface = BindingSurface::default();

        for path in &files {
            let Some(language) = BindingLanguage::from_path(path) else {
                continue;
            };
            let source = std::fs::read_to_string(path).map_err(|err| {
                Error::extraction(
                    target,
                    format!("cannot read binding '{}': {err}", path.display()),
                )
            })?;
            let relative = relative_slash_path(path, repo_root);
            let declared = language.scan(&source);
            debug!(
                target_name = target,
                file = %relative,
                symbols = declared.len(),
                "scanned binding file"
            );
            for symbol in declared {
                if !symbol.starts_with(&self.symbol_prefix) {
                    continue;
                }
                surface
                    .symbols
                    .entry(symbol)
                    .or_default()
                    .insert(relative.clone());
            }
            surface.files.push(relative);
        }

        if surface.symbols.is_empty() {
            surface.warnings.push(format!(
                "no binding symbols with prefix '{}' found in {} file(s)",
                self.symbol_prefix,
                surface.files.len()
            ));
        }
        Ok(surface)
    }

    /// Binding source files, sorted and deduplicated.
    pub fn collect_files(&self, target: &str, repo_root: &Path) -> Result<Vec<PathBuf>> {
        let mut found = BTreeSet::new();

        for entry in &self.roots {
            if is_glob(entry) {
                let pattern = format!(
                    "{}/{entry}",
                    Pattern::escape(&repo_root.to_string_lossy())
                );
                let matches = glob::glob_with(&pattern, GLOB_OPTIONS)
                    .map_err(|err| Error::config(format!("invalid glob '{entry}': {err}")))?;
                for matched in matches {
                    let path = matched.map_err(|err| {
                        Error::extraction(target, format!("cannot list '{entry}': {err}"))
                    })?;
                    collect_path(target, path, &mut found)?;
                }
            } else {
                let path = resolve_path(repo_root, entry);
                if !path.exists() {
                    return Err(Error::extraction(
                        target,
                        format!("binding path '{entry}' does not exist"),
                    ));
                }
                collect_path(target, path, &mut found)?;
            }
        }

        Ok(found
            .into_iter()
            .filter(|path| BindingLanguage::from_path(path).is_some())
            .filter(|path| {
                let relative = relative_slash_path(path, repo_root);
                (self.include.is_empty() || self.include.iter().any(|p| p.matches_with(&relative, GLOB_OPTIONS)))
                    && !self.exclude.iter().any(|p| p.matches_with(&relative, GLOB_OPTIONS))
            })
            .collect())
    }
}

/// Adds a file, or every file below a directory.
fn collect_path(target: &str, path: PathBuf, found: &mut BTreeSet<PathBuf>) -> Result<()> {
    if path.is_dir() {
        let mut candidates = Vec::new();
        walk(target, &path, &mut candidates)?;
        found.extend(candidates);
    } else {
        found.insert(path);
    }
    Ok(())
}

fn walk(target: &str, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let read_error = |err: std::io::Error| {
        Error::extraction(target, format!("cannot list '{}': {err}", dir.display()))
    };
    let mut entries = std::fs::read_dir(dir)
        .map_err(read_error)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(read_error)?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            walk(target, &path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csharp_entry_point_overrides_method_name() {
        let source = r#"
            internal static class Native {
                [DllImport("demo", EntryPoint = "my_open")]
                internal static extern int Open(string path);

                [DllImport("demo", CallingConvention = CallingConvention.Cdecl)]
                [return: MarshalAs(UnmanagedType.I1)]
                public static extern bool my_is_ready(IntPtr ctx);

                // [DllImport("demo")] public static extern void my_commented();

                [LibraryImport("demo")]
                internal static partial void my_close(IntPtr ctx);
            }
        "#;
        assert_eq!(scan_csharp(source), vec!["my_open", "my_is_ready", "my_close"]);
    }

    #[test]
    fn rust_extern_blocks_respect_link_name() {
        let source = r#"
            fn my_not_ffi() {}

            unsafe extern "C" {
                pub fn my_open(path: *const c_char) -> c_int;
                #[link_name = "my_close"]
                pub fn close_handle(ctx: *mut c_void);
                pub static my_global: c_int;
            }
        "#;
        assert_eq!(scan_rust(source), vec!["my_open", "my_close"]);
    }

    #[test]
    fn include_patterns_match_relative_paths() {
        let any_cs = Pattern::new("**/*.cs").unwrap();
        assert!(any_cs.matches_with("Native.cs", GLOB_OPTIONS));
        assert!(any_cs.matches_with("bindings/Interop/Native.cs", GLOB_OPTIONS));
        assert!(!any_cs.matches_with("bindings/native.rs", GLOB_OPTIONS));

        let one_level = Pattern::new("src/*.rs").unwrap();
        assert!(one_level.matches_with("src/ffi.rs", GLOB_OPTIONS));
        assert!(!one_level.matches_with("src/sys/ffi.rs", GLOB_OPTIONS));

        let class = Pattern::new("gen/[!x]?.cs").unwrap();
        assert!(class.matches_with("gen/ab.cs", GLOB_OPTIONS));
        assert!(!class.matches_with("gen/xb.cs", GLOB_OPTIONS));

        let literal_bracket = Pattern::new("gen/[[]x].cs").unwrap();
        assert!(literal_bracket.matches_with("gen/[x].cs", GLOB_OPTIONS));
    }

    #[test]
    fn glob_roots_select_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for file in ["gen/[x].cs", "gen/y.cs", "gen/sub/Native.cs", "gen/sub/ffi.rs"] {
            let path = root.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "").unwrap();
        }
        let extractor = |paths: &[&str]| {
            BindingExtractor::new(
                &BindingsConfig {
                    paths: paths.iter().map(|p| p.to_string()).collect(),
                    exclude: vec!["**/*.rs".into()],
                    ..Default::default()
                },
                "my_",
            )
            .unwrap()
        };

        let files = extractor(&["gen/[[]x].cs"]).collect_files("demo", root).unwrap();
        assert_eq!(files, vec![root.join("gen/[x].cs")]);

        let files = extractor(&["gen/s*"]).collect_files("demo", root).unwrap();
        assert_eq!(files, vec![root.join("gen/sub/Native.cs")]);

        let err = extractor(&["gen/***.cs"]).collect_files("demo", root).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn walk_skips_build_and_hidden_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for file in ["a/Native.cs", "a/bin/Gen.cs", "a/.cache/Hidden.cs", "a/obj/X.cs"] {
            let path = root.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "").unwrap();
        }
        let extractor = BindingExtractor::new(
            &BindingsConfig {
                paths: vec!["a".into()],
                ..Default::default()
            },
            "my_",
        )
        .unwrap();
        let files = extractor.collect_files("demo", root).unwrap();
        assert_eq!(files, vec![root.join("a/Native.cs")]);
    }
}
