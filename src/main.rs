use abi_sign::config::VersionMacros;
use abi_sign::logging::{self, LogProfile};
use abi_sign::registry::{CodegenOptions, InitTargetParams, VerifyAllOptions};
use abi_sign::snapshot::SnapshotOptions;
use abi_sign::{AbiRegistry, VerifyReport, store};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "abi-sign")]
#[command(about = "Snapshot, diff and gate changes to a C ABI surface")]
#[command(version)]
struct Args {
    #[arg(long, global = true, default_value = ".", help = "Repository root for relative paths")]
    repo_root: PathBuf,
    #[arg(long, global = true, default_value = "abi/config.json", help = "Path to the target configuration (JSON or YAML)")]
    config: PathBuf,
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
    #[arg(long, global = true, value_enum, default_value = "human", help = "Log output format")]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Debug)]
struct BinaryArgs {
    #[arg(long, help = "Read exports from this binary instead of the configured one")]
    binary: Option<PathBuf>,
    #[arg(long, help = "Skip binary export extraction")]
    skip_binary: bool,
}

impl BinaryArgs {
    fn options(&self) -> SnapshotOptions {
        SnapshotOptions {
            binary_override: self.binary.clone(),
            skip_binary: self.skip_binary,
        }
    }
}

#[derive(Parser)]
enum Commands {
    #[command(about = "Extract the current ABI snapshot of a target")]
    Snapshot {
        #[arg(long, help = "Target name from the configuration")]
        target: String,
        #[command(flatten)]
        binary: BinaryArgs,
        #[arg(long, help = "Write the snapshot to this path instead of stdout")]
        output: Option<PathBuf>,
    },
    #[command(about = "Compare a target against its baseline and enforce the version policy")]
    Verify {
        #[arg(long, help = "Target name from the configuration")]
        target: String,
        #[arg(long, help = "Baseline snapshot (default: the target's baseline path)")]
        baseline: Option<PathBuf>,
        #[command(flatten)]
        binary: BinaryArgs,
        #[arg(long, help = "Write the current snapshot to this path")]
        current_output: Option<PathBuf>,
        #[arg(long, help = "Write the JSON report to this path")]
        report: Option<PathBuf>,
        #[arg(long, help = "Write the Markdown report to this path")]
        markdown_report: Option<PathBuf>,
        #[arg(long, help = "Do not fail on a breaking classification")]
        allow_breaking: bool,
        #[arg(long, help = "Output format", value_enum, default_value = "text")]
        format: OutputFormat,
    },
    #[command(about = "Verify every configured target")]
    VerifyAll {
        #[arg(long, help = "Directory of <target>.json baselines")]
        baseline_root: Option<PathBuf>,
        #[command(flatten)]
        binary: BinaryArgs,
        #[arg(long, help = "Directory for per-target and aggregate artifacts")]
        output_dir: Option<PathBuf>,
        #[arg(long, help = "Do not fail on breaking classifications")]
        allow_breaking: bool,
        #[arg(long, help = "Output format", value_enum, default_value = "text")]
        format: OutputFormat,
    },
    #[command(about = "Compare two snapshot files without extracting anything")]
    Diff {
        #[arg(long, help = "Baseline snapshot file")]
        baseline: PathBuf,
        #[arg(long, help = "Current snapshot file")]
        current: PathBuf,
        #[arg(long, help = "Write the JSON report to this path")]
        report: Option<PathBuf>,
        #[arg(long, help = "Write the Markdown report to this path")]
        markdown_report: Option<PathBuf>,
        #[arg(long, help = "Output format", value_enum, default_value = "text")]
        format: OutputFormat,
    },
    #[command(about = "List configured targets")]
    ListTargets,
    #[command(about = "Add a target to the configuration and create its baseline")]
    InitTarget {
        #[arg(long, help = "Target name to initialize")]
        target: String,
        #[arg(long, help = "Header path relative to the repository root")]
        header_path: String,
        #[arg(long, help = "Export macro used in ABI declarations")]
        api_macro: String,
        #[arg(long, help = "Calling convention macro used in ABI declarations")]
        call_macro: String,
        #[arg(long, default_value = "", help = "ABI symbol prefix")]
        symbol_prefix: String,
        #[arg(long, help = "ABI major version macro name")]
        version_major_macro: String,
        #[arg(long, help = "ABI minor version macro name")]
        version_minor_macro: String,
        #[arg(long, help = "ABI patch version macro name")]
        version_patch_macro: String,
        #[arg(long = "binding-path", alias = "pinvoke-path", help = "Binding source root (repeatable)")]
        binding_paths: Vec<String>,
        #[arg(long, help = "Native binary path")]
        binary_path: Option<String>,
        #[arg(long, help = "Baseline path (default: abi/baselines/<target>.json)")]
        baseline_path: Option<String>,
        #[arg(long, help = "Do not create the baseline")]
        no_create_baseline: bool,
        #[arg(long, help = "Overwrite an existing target")]
        force: bool,
    },
    #[command(about = "Verify targets and run their generators when verification passes")]
    Codegen {
        #[arg(long = "target", help = "Target to generate for (repeatable; default: all)")]
        targets: Vec<String>,
        #[arg(long, help = "Directory of <target>.json baselines")]
        baseline_root: Option<PathBuf>,
        #[arg(long, help = "Directory current snapshots are written to (default: abi/current)")]
        snapshot_dir: Option<PathBuf>,
        #[command(flatten)]
        binary: BinaryArgs,
        #[arg(long, help = "Generate even when the classification is breaking")]
        allow_breaking: bool,
    },
    #[command(about = "Print the surface fingerprint of a snapshot file")]
    Fingerprint {
        #[arg(help = "Path to the snapshot file")]
        file: PathBuf,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogFormat {
    Human,
    Json,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let profile = match args.log_format {
        LogFormat::Human => LogProfile::Human,
        LogFormat::Json => LogProfile::Json,
    };
    logging::init(profile, args.verbose);

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<abi_sign::Error>()
                .map_or(1, abi_sign::Error::exit_code);
            ExitCode::from(code as u8)
        }
    }
}

fn status(passed: bool) -> ExitCode {
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn load_registry(args: &Args) -> Result<AbiRegistry> {
    AbiRegistry::load(&args.config, &args.repo_root)
        .with_context(|| format!("Failed to load configuration '{}'", args.config.display()))
}

fn print_report(report: &VerifyReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => print!("{}", report.render_text()),
    }
    Ok(())
}

fn write_reports(report: &VerifyReport, json: Option<&Path>, markdown: Option<&Path>) -> Result<()> {
    if let Some(path) = json {
        store::write_json(path, report)?;
    }
    if let Some(path) = markdown {
        store::write_atomic(path, report.render_markdown().as_bytes())?;
    }
    Ok(())
}

fn run(args: Args) -> Result<ExitCode> {
    match &args.command {
        Commands::Snapshot {
            target,
            binary,
            output,
        } => {
            let registry = load_registry(&args)?;
            let snapshot = registry.snapshot(target, &binary.options())?;
            match output {
                Some(path) => {
                    store::save_snapshot(path, &snapshot)?;
                    eprintln!("Snapshot written: {}", path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify {
            target,
            baseline,
            binary,
            current_output,
            report,
            markdown_report,
            allow_breaking,
            format,
        } => {
            let registry = load_registry(&args)?;
            let verification = registry.verify(target, baseline.as_deref(), &binary.options())?;
            if let Some(path) = current_output {
                store::save_snapshot(path, &verification.current)?;
            }
            write_reports(&verification.report, report.as_deref(), markdown_report.as_deref())?;
            print_report(&verification.report, *format)?;
            Ok(status(verification.report.passes(*allow_breaking)))
        }
        Commands::VerifyAll {
            baseline_root,
            binary,
            output_dir,
            allow_breaking,
            format,
        } => {
            let registry = load_registry(&args)?;
            let aggregate = registry.verify_all(&VerifyAllOptions {
                baseline_root: baseline_root.clone(),
                snapshot: binary.options(),
                output_dir: output_dir.clone(),
                allow_breaking: *allow_breaking,
            })?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&aggregate)?),
                OutputFormat::Text => print!("{}", aggregate.render_text()),
            }
            Ok(status(aggregate.passed()))
        }
        Commands::Diff {
            baseline,
            current,
            report,
            markdown_report,
            format,
        } => {
            let result = AbiRegistry::diff(baseline, current)?;
            write_reports(&result, report.as_deref(), markdown_report.as_deref())?;
            print_report(&result, *format)?;
            Ok(status(result.classification.changes.is_empty()))
        }
        Commands::ListTargets => {
            let registry = load_registry(&args)?;
            for name in registry.list_targets() {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::InitTarget {
            target,
            header_path,
            api_macro,
            call_macro,
            symbol_prefix,
            version_major_macro,
            version_minor_macro,
            version_patch_macro,
            binding_paths,
            binary_path,
            baseline_path,
            no_create_baseline,
            force,
        } => {
            let params = InitTargetParams {
                name: target.clone(),
                header_path: header_path.clone(),
                api_macro: api_macro.clone(),
                call_macro: call_macro.clone(),
                symbol_prefix: symbol_prefix.clone(),
                version_macros: VersionMacros {
                    major: version_major_macro.clone(),
                    minor: version_minor_macro.clone(),
                    patch: version_patch_macro.clone(),
                },
                binding_paths: binding_paths.clone(),
                binary_path: binary_path.clone(),
                baseline_path: baseline_path.clone(),
                create_baseline: !no_create_baseline,
                force: *force,
            };
            let outcome = AbiRegistry::init_target(&args.config, &args.repo_root, &params)?;
            if let Some(path) = &outcome.baseline_path {
                println!("Created baseline: {}", path.display());
            }
            println!(
                "Target '{target}' initialized in {}",
                outcome.config_path.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Codegen {
            targets,
            baseline_root,
            snapshot_dir,
            binary,
            allow_breaking,
        } => {
            let registry = load_registry(&args)?;
            let report = registry.codegen(&CodegenOptions {
                targets: targets.clone(),
                baseline_root: baseline_root.clone(),
                snapshot: binary.options(),
                snapshot_dir: snapshot_dir.clone(),
                allow_breaking: *allow_breaking,
            })?;
            for outcome in &report.outcomes {
                if outcome.generated() {
                    println!("[{}] generated ({} generators)", outcome.target, outcome.runs.len());
                } else {
                    println!("[{}] skipped: verification {}", outcome.target, outcome.report.status);
                    print!("{}", outcome.report.render_text());
                }
            }
            for (target, error) in &report.errors {
                println!("[{target}] error: {error}");
            }
            Ok(status(report.passed()))
        }
        Commands::Fingerprint { file } => {
            let snapshot = store::load_snapshot(file)?;
            println!("{}", snapshot.fingerprint()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
