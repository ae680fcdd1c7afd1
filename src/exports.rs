//! Binary export listing.
//!
//! The engine only depends on [`ExportReader`]. The shipped implementation,
//! [`ToolExportReader`], asks the platform's symbol tools for the dynamic
//! export table and parses whichever output format the first working tool
//! produces.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::process::{CommandSpec, ProcessRunner, SystemRunner};

static DUMPBIN_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+\d+\s+[0-9A-Fa-f]+\s+[0-9A-Fa-f]+\s+(\S+)(?:\s+=\s+\S+)?(?:\s+\(.*\))?$").unwrap()
});

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("binary '{}' does not exist", path.display())]
    MissingBinary { path: PathBuf },

    #[error("no export listing tool available for '{}' (tried: {})", path.display(), tried.join(", "))]
    NoTool { path: PathBuf, tried: Vec<String> },

    #[error("export listing failed for '{}': {}", path.display(), failures.join(" | "))]
    ToolFailed { path: PathBuf, failures: Vec<String> },
}

/// Lists the symbols a native binary exports.
pub trait ExportReader: Send + Sync {
    /// Raw export names, exactly as the binary format spells them.
    fn read_exports(&self, path: &Path) -> Result<BTreeSet<String>, ExportError>;
}

/// Output formats of the supported tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Nm,
    Readelf,
    Objdump,
    Dumpbin,
}

impl ExportFormat {
    pub fn parse(&self, output: &str) -> BTreeSet<String> {
        match self {
            ExportFormat::Nm => parse_nm(output),
            ExportFormat::Readelf => parse_readelf(output),
            ExportFormat::Objdump => parse_objdump(output),
            ExportFormat::Dumpbin => parse_dumpbin(output),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }

    /// Candidate tools in preference order.
    pub fn export_tools(&self) -> &'static [(&'static str, &'static [&'static str], ExportFormat)] {
        match self {
            Platform::Linux => &[
                ("nm", &["-D", "--defined-only"], ExportFormat::Nm),
                ("llvm-nm", &["-D", "--defined-only"], ExportFormat::Nm),
                ("readelf", &["-Ws"], ExportFormat::Readelf),
                ("objdump", &["-T"], ExportFormat::Objdump),
            ],
            Platform::MacOs => &[
                ("nm", &["-gU"], ExportFormat::Nm),
                ("llvm-nm", &["-gU"], ExportFormat::Nm),
            ],
            Platform::Windows => &[
                ("dumpbin", &["/exports"], ExportFormat::Dumpbin),
                ("llvm-nm", &["-g", "--defined-only"], ExportFormat::Nm),
                ("nm", &["-g", "--defined-only"], ExportFormat::Nm),
            ],
        }
    }
}

/// [`ExportReader`] backed by `nm`, `llvm-nm`, `readelf`, `objdump` or
/// `dumpbin`, whichever is installed first.
#[derive(Debug, Clone)]
pub struct ToolExportReader<R = SystemRunner> {
    runner: R,
    platform: Platform,
}

impl Default for ToolExportReader<SystemRunner> {
    fn default() -> Self {
        Self::new(SystemRunner, Platform::current())
    }
}

impl<R: ProcessRunner> ToolExportReader<R> {
    pub fn new(runner: R, platform: Platform) -> Self {
        Self { runner, platform }
    }
}

impl<R: ProcessRunner> ExportReader for ToolExportReader<R> {
    fn read_exports(&self, path: &Path) -> Result<BTreeSet<String>, ExportError> {
        if !path.exists() {
            return Err(ExportError::MissingBinary {
                path: path.to_path_buf(),
            });
        }

        let mut tried = Vec::new();
        let mut failures = Vec::new();
        for (program, args, format) in self.platform.export_tools() {
            let command = CommandSpec::new(*program)
                .args(args.iter().copied())
                .arg(path.to_string_lossy());
            tried.push(program.to_string());

            match self.runner.run(&command) {
                Ok(output) if output.success() => {
                    debug!(tool = program, "read binary exports");
                    return Ok(format.parse(&output.stdout));
                }
                Ok(output) => failures.push(format!(
                    "{}: exit {}: {}",
                    command.display(),
                    output
                        .status
                        .map_or_else(|| "signal".to_string(), |code| code.to_string()),
                    output.diagnostic()
                )),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(tool = program, "export tool not installed");
                }
                Err(err) => failures.push(format!("{}: {err}", command.display())),
            }
        }

        let path = path.to_path_buf();
        if failures.is_empty() {
            Err(ExportError::NoTool { path, tried })
        } else {
            Err(ExportError::ToolFailed { path, failures })
        }
    }
}

/// `nm`/`llvm-nm`: `<address> <type> <name>`; defined globals only.
pub fn parse_nm(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                return None;
            }
            let kind = parts[parts.len() - 2];
            let mut chars = kind.chars();
            let code = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            let exported = (code.is_ascii_uppercase() && code != 'U') || code == 'u';
            exported.then(|| parts[parts.len() - 1].to_string())
        })
        .collect()
}

/// `readelf -Ws`: global/weak/unique bindings, visible, defined.
pub fn parse_readelf(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 8 || !parts[0].ends_with(':') {
                return None;
            }
            let (bind, visibility, section) = (parts[4], parts[5], parts[6]);
            let bound = matches!(bind, "GLOBAL" | "WEAK" | "GNU_UNIQUE" | "UNIQUE");
            let visible = !matches!(visibility, "HIDDEN" | "INTERNAL");
            (bound && visible && section != "UND").then(|| strip_symbol_version(parts[7]))
        })
        .collect()
}

/// `objdump -T`: `<address> <flags...> <section> <size> <version> <name>`.
pub fn parse_objdump(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 || !parts[0].chars().all(|c| c.is_ascii_hexdigit()) {
                return None;
            }
            let bound = matches!(parts[1], "g" | "w" | "u");
            let defined = !parts.contains(&"*UND*");
            (bound && defined).then(|| strip_symbol_version(parts[parts.len() - 1]))
        })
        .collect()
}

/// `dumpbin /exports`: `<ordinal> <hint> <rva> <name>`.
pub fn parse_dumpbin(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| DUMPBIN_EXPORT.captures(line.trim_end()))
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Drops ELF symbol versions (`name@@VER_1`), keeping `@<digits>`
/// stdcall decorations intact.
fn strip_symbol_version(name: &str) -> String {
    if let Some(idx) = name.find('@') {
        let suffix = name[idx..].trim_start_matches('@');
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
            return name[..idx].to_string();
        }
    }
    name.to_string()
}

/// An export name with platform decoration removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalExport {
    pub name: String,
    /// The raw name carried a `@<bytes>` calling-convention suffix.
    pub decorated: bool,
}

/// Strips one leading `_` and a trailing `@<digits>` suffix.
pub fn canonicalize_export(raw: &str) -> CanonicalExport {
    let name = raw.strip_prefix('_').unwrap_or(raw);
    let stdcall = name
        .rsplit_once('@')
        .filter(|(_, suffix)| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()));
    match stdcall {
        Some((base, _)) => CanonicalExport {
            name: base.to_string(),
            decorated: true,
        },
        None => CanonicalExport {
            name: name.to_string(),
            decorated: false,
        },
    }
}
