//! Target registry: loads and validates the configuration once, then drives
//! snapshot, verify, verify-all, diff, init-target and codegen.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};

use crate::canonical::Snapshot;
use crate::config::{AbiConfig, BinaryConfig, BindingsConfig, HeaderConfig, TargetConfig, TypesConfig, VersionMacros, resolve_path};
use crate::error::{Error, Result};
use crate::exports::{ExportReader, ToolExportReader};
use crate::generator::{GeneratorContext, GeneratorRun, run_generators};
use crate::process::{ProcessRunner, SystemRunner};
use crate::report::{AggregateReport, VerifyReport};
use crate::snapshot::{SnapshotBuilder, SnapshotOptions};
use crate::store::{self, DEFAULT_BASELINE_DIR};

/// Directory codegen writes current snapshots to when none is given.
pub const DEFAULT_SNAPSHOT_DIR: &str = "abi/current";

/// A fresh snapshot and its comparison against the baseline.
#[derive(Debug, Clone)]
pub struct Verification {
    pub current: Snapshot,
    pub baseline_path: PathBuf,
    pub report: VerifyReport,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyAllOptions {
    /// Directory holding `<target>.json` baselines; overrides target settings.
    pub baseline_root: Option<PathBuf>,
    pub snapshot: SnapshotOptions,
    /// Receives per-target artifacts and `aggregate.report.json`.
    pub output_dir: Option<PathBuf>,
    pub allow_breaking: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CodegenOptions {
    /// Targets to generate for; all targets when empty.
    pub targets: Vec<String>,
    pub baseline_root: Option<PathBuf>,
    pub snapshot: SnapshotOptions,
    /// Where current snapshots are written before generators run.
    pub snapshot_dir: Option<PathBuf>,
    pub allow_breaking: bool,
}

/// Result of codegen for one target.
#[derive(Debug, Clone)]
pub struct CodegenOutcome {
    pub target: String,
    pub report: VerifyReport,
    /// Path of the written snapshot; `None` when verification failed.
    pub snapshot_path: Option<PathBuf>,
    pub runs: Vec<GeneratorRun>,
}

impl CodegenOutcome {
    pub fn generated(&self) -> bool {
        self.snapshot_path.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CodegenReport {
    pub outcomes: Vec<CodegenOutcome>,
    pub errors: BTreeMap<String, String>,
}

impl CodegenReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty() && self.outcomes.iter().all(CodegenOutcome::generated)
    }
}

/// Discovery parameters for a new target.
#[derive(Debug, Clone)]
pub struct InitTargetParams {
    pub name: String,
    pub header_path: String,
    pub api_macro: String,
    pub call_macro: String,
    pub symbol_prefix: String,
    pub version_macros: VersionMacros,
    pub binding_paths: Vec<String>,
    pub binary_path: Option<String>,
    /// Defaults to `abi/baselines/<name>.json`.
    pub baseline_path: Option<String>,
    pub create_baseline: bool,
    pub force: bool,
}

impl InitTargetParams {
    fn target_config(&self) -> TargetConfig {
        TargetConfig {
            baseline_path: Some(
                self.baseline_path
                    .clone()
                    .unwrap_or_else(|| format!("{DEFAULT_BASELINE_DIR}/{}.json", self.name)),
            ),
            header: HeaderConfig {
                path: self.header_path.clone(),
                api_macro: self.api_macro.clone(),
                call_macro: self.call_macro.clone(),
                symbol_prefix: self.symbol_prefix.clone(),
                version_macros: self.version_macros.clone(),
                types: TypesConfig::explicit_for_prefix(&self.symbol_prefix),
            },
            bindings: (!self.binding_paths.is_empty()).then(|| BindingsConfig {
                paths: self.binding_paths.clone(),
                ..BindingsConfig::default()
            }),
            binary: self.binary_path.as_ref().map(|path| BinaryConfig {
                path: path.clone(),
                allow_non_prefixed_exports: false,
            }),
            generators: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    pub config_path: PathBuf,
    /// Where the initial baseline was written, when one was created.
    pub baseline_path: Option<PathBuf>,
}

/// Immutable view of a validated configuration plus the collaborators used
/// to read binaries and run generators.
pub struct AbiRegistry {
    repo_root: PathBuf,
    config: AbiConfig,
    runner: Box<dyn ProcessRunner>,
    exports: Box<dyn ExportReader>,
}

impl std::fmt::Debug for AbiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbiRegistry")
            .field("repo_root", &self.repo_root)
            .field("targets", &self.config.target_names())
            .finish_non_exhaustive()
    }
}

impl AbiRegistry {
    /// Loads and validates a configuration file.
    pub fn load(config_path: &Path, repo_root: &Path) -> Result<Self> {
        Self::from_config(AbiConfig::from_path(config_path)?, repo_root)
    }

    /// Validates `config`; nothing is processed when it has problems.
    pub fn from_config(config: AbiConfig, repo_root: &Path) -> Result<Self> {
        config.validate(repo_root)?;
        Ok(Self {
            repo_root: repo_root.to_path_buf(),
            config,
            runner: Box::new(SystemRunner),
            exports: Box::new(ToolExportReader::<SystemRunner>::default()),
        })
    }

    /// Replaces the runner used for generators.
    pub fn with_runner(mut self, runner: impl ProcessRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    /// Replaces the binary export reader.
    pub fn with_export_reader(mut self, exports: impl ExportReader + 'static) -> Self {
        self.exports = Box::new(exports);
        self
    }

    pub fn config(&self) -> &AbiConfig {
        &self.config
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Target names in sorted order.
    pub fn list_targets(&self) -> Vec<String> {
        self.config.target_names()
    }

    pub fn snapshot(&self, name: &str, options: &SnapshotOptions) -> Result<Snapshot> {
        let target = self.config.target(name)?;
        SnapshotBuilder::new(&self.repo_root, self.exports.as_ref()).build(name, target, options)
    }

    /// Baseline location of a target, see [`store::resolve_baseline_path`].
    pub fn baseline_path(&self, name: &str, baseline_root: Option<&Path>) -> Result<PathBuf> {
        let target = self.config.target(name)?;
        Ok(store::resolve_baseline_path(&self.repo_root, name, target, baseline_root))
    }

    /// Snapshots `name` and compares it against the baseline at `baseline`,
    /// or at the target's resolved baseline path.
    pub fn verify(
        &self,
        name: &str,
        baseline: Option<&Path>,
        options: &SnapshotOptions,
    ) -> Result<Verification> {
        let baseline_path = match baseline {
            Some(path) => resolve_path(&self.repo_root, &path.to_string_lossy()),
            None => self.baseline_path(name, None)?,
        };
        self.verify_against(name, baseline_path, options)
    }

    fn verify_against(
        &self,
        name: &str,
        baseline_path: PathBuf,
        options: &SnapshotOptions,
    ) -> Result<Verification> {
        info!(target_name = name, baseline = %baseline_path.display(), "verifying");
        let baseline = store::load_snapshot(&baseline_path)?;
        let current = self.snapshot(name, options)?;
        let report = VerifyReport::compare(&baseline, &current)?;
        info!(
            target_name = name,
            status = %report.status,
            classification = %report.classification.overall,
            "verified"
        );
        Ok(Verification {
            current,
            baseline_path,
            report,
        })
    }

    /// Verifies every target on a bounded worker pool.
    ///
    /// A target that cannot be verified is recorded in the aggregate's
    /// errors; the remaining targets still produce reports.
    pub fn verify_all(&self, options: &VerifyAllOptions) -> Result<AggregateReport> {
        let names = self.list_targets();
        if names.is_empty() {
            return Err(Error::config("configuration has no targets to verify"));
        }

        let baseline_root = options.baseline_root.as_deref();
        let outcomes = self.run_parallel(&names, |name| {
            let baseline_path = self.baseline_path(name, baseline_root)?;
            self.verify_against(name, baseline_path, &options.snapshot)
        });

        let mut results = Vec::new();
        let mut errors = BTreeMap::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(verification) => {
                    let written = match &options.output_dir {
                        Some(dir) => write_target_artifacts(dir, &name, &verification),
                        None => Ok(()),
                    };
                    match written {
                        Ok(()) => results.push(verification.report),
                        Err(err) => {
                            warn!(target_name = %name, error = %err, "writing artifacts failed");
                            errors.insert(name, err.to_string());
                        }
                    }
                }
                Err(err) => {
                    warn!(target_name = %name, error = %err, "target failed");
                    errors.insert(name, err.to_string());
                }
            }
        }

        let aggregate = AggregateReport::new(results, errors, options.allow_breaking, now_utc());
        if let Some(dir) = &options.output_dir {
            store::write_json(&dir.join("aggregate.report.json"), &aggregate)?;
        }
        Ok(aggregate)
    }

    /// Loads two snapshot files and compares them; nothing is extracted.
    pub fn diff(baseline: &Path, current: &Path) -> Result<VerifyReport> {
        let baseline = store::load_snapshot(baseline)?;
        let current = store::load_snapshot(current)?;
        VerifyReport::compare(&baseline, &current)
    }

    /// Verifies the selected targets and, for each passing one, writes its
    /// current snapshot and runs its generators.
    pub fn codegen(&self, options: &CodegenOptions) -> Result<CodegenReport> {
        let names = if options.targets.is_empty() {
            self.list_targets()
        } else {
            for name in &options.targets {
                self.config.target(name)?;
            }
            options.targets.clone()
        };
        let snapshot_dir = match &options.snapshot_dir {
            Some(dir) => resolve_path(&self.repo_root, &dir.to_string_lossy()),
            None => self.repo_root.join(DEFAULT_SNAPSHOT_DIR),
        };

        let outcomes = self.run_parallel(&names, |name| {
            self.codegen_target(name, &snapshot_dir, options)
        });

        let mut report = CodegenReport::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(err) => {
                    warn!(target_name = %name, error = %err, "codegen failed");
                    report.errors.insert(name, err.to_string());
                }
            }
        }
        Ok(report)
    }

    fn codegen_target(
        &self,
        name: &str,
        snapshot_dir: &Path,
        options: &CodegenOptions,
    ) -> Result<CodegenOutcome> {
        let target = self.config.target(name)?;
        let baseline_path = self.baseline_path(name, options.baseline_root.as_deref())?;
        let verification = self.verify_against(name, baseline_path, &options.snapshot)?;

        if !verification.report.passes(options.allow_breaking) {
            warn!(target_name = name, "verification failed; generators skipped");
            return Ok(CodegenOutcome {
                target: name.to_string(),
                report: verification.report,
                snapshot_path: None,
                runs: Vec::new(),
            });
        }

        let snapshot_path = snapshot_dir.join(format!("{name}.json"));
        store::save_snapshot(&snapshot_path, &verification.current)?;
        let ctx = GeneratorContext {
            target: name,
            snapshot: &snapshot_path,
            baseline: &verification.baseline_path,
            repo_root: &self.repo_root,
        };
        let runs = run_generators(&target.generators, &ctx, self.runner.as_ref())?;

        Ok(CodegenOutcome {
            target: name.to_string(),
            report: verification.report,
            snapshot_path: Some(snapshot_path),
            runs,
        })
    }

    /// Runs `work` for each name on `min(names, available parallelism)`
    /// scoped threads. Results come back sorted by name.
    fn run_parallel<T, F>(&self, names: &[String], work: F) -> Vec<(String, T)>
    where
        T: Send,
        F: Fn(&str) -> T + Sync,
    {
        let workers = std::thread::available_parallelism()
            .map_or(1, NonZeroUsize::get)
            .min(names.len())
            .max(1);
        let next = AtomicUsize::new(0);
        let collected = Mutex::new(Vec::with_capacity(names.len()));

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let idx = next.fetch_add(1, Ordering::Relaxed);
                        let Some(name) = names.get(idx) else {
                            break;
                        };
                        let outcome = work(name);
                        collected
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push((name.clone(), outcome));
                    }
                });
            }
        });

        let mut collected = collected.into_inner().unwrap_or_else(PoisonError::into_inner);
        collected.sort_by(|a, b| a.0.cmp(&b.0));
        collected
    }

    /// Adds a target to the configuration at `config_path` (created when
    /// missing) and optionally writes its initial baseline.
    ///
    /// The baseline is built without reading the binary.
    pub fn init_target(
        config_path: &Path,
        repo_root: &Path,
        params: &InitTargetParams,
    ) -> Result<InitOutcome> {
        let mut config = if config_path.exists() {
            AbiConfig::from_path(config_path)?
        } else {
            AbiConfig::default()
        };

        if config.targets.contains_key(&params.name) && !params.force {
            return Err(Error::config(format!(
                "target '{}' already exists; use --force to overwrite",
                params.name
            )));
        }

        let target = params.target_config();
        config.targets.insert(params.name.clone(), target.clone());
        config.validate(repo_root)?;
        config.save(config_path)?;
        info!(target_name = %params.name, config = %config_path.display(), "target initialized");

        let baseline_path = if params.create_baseline {
            let exports = ToolExportReader::<SystemRunner>::default();
            let options = SnapshotOptions {
                skip_binary: true,
                ..SnapshotOptions::default()
            };
            let snapshot = SnapshotBuilder::new(repo_root, &exports).build(&params.name, &target, &options)?;
            let path = store::resolve_baseline_path(repo_root, &params.name, &target, None);
            store::save_snapshot(&path, &snapshot)?;
            Some(path)
        } else {
            None
        };

        Ok(InitOutcome {
            config_path: config_path.to_path_buf(),
            baseline_path,
        })
    }
}

fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn write_target_artifacts(dir: &Path, name: &str, verification: &Verification) -> Result<()> {
    store::save_snapshot(&dir.join(format!("{name}.current.json")), &verification.current)?;
    store::write_json(&dir.join(format!("{name}.report.json")), &verification.report)?;
    store::write_atomic(
        &dir.join(format!("{name}.report.md")),
        verification.report.render_markdown().as_bytes(),
    )
}
