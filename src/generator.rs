//! Declarative source-code generators run after a passing verification.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{info, warn};

use crate::config::GeneratorConfig;
use crate::error::{Error, Result};
use crate::process::{CommandSpec, ProcessOutput, ProcessRunner};

/// Placeholders a generator command may reference as `{name}`.
pub const PLACEHOLDERS: &[&str] = &["target", "snapshot", "baseline", "repo_root"];

pub(crate) static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([A-Za-z_]+)\}").unwrap());

/// Values substituted into generator commands.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorContext<'a> {
    pub target: &'a str,
    pub snapshot: &'a Path,
    pub baseline: &'a Path,
    pub repo_root: &'a Path,
}

impl GeneratorContext<'_> {
    fn value(&self, placeholder: &str) -> Option<String> {
        match placeholder {
            "target" => Some(self.target.to_string()),
            "snapshot" => Some(self.snapshot.display().to_string()),
            "baseline" => Some(self.baseline.display().to_string()),
            "repo_root" => Some(self.repo_root.display().to_string()),
            _ => None,
        }
    }

    /// Expands every placeholder in one pass; substituted text is never
    /// expanded again and unknown names stay literal.
    fn substitute(&self, arg: &str) -> String {
        PLACEHOLDER
            .replace_all(arg, |caps: &Captures<'_>| {
                self.value(&caps[1]).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Expands the placeholders of a generator into a runnable command.
/// Commands run from the repository root.
pub fn render_command(generator: &GeneratorConfig, ctx: &GeneratorContext<'_>) -> Result<CommandSpec> {
    let (program, args) = generator.command.split_first().ok_or_else(|| Error::Generator {
        name: generator.name.clone(),
        reason: "empty command".to_string(),
    })?;
    Ok(CommandSpec::new(ctx.substitute(program))
        .args(args.iter().map(|arg| ctx.substitute(arg)))
        .current_dir(ctx.repo_root))
}

/// Captured result of one generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorRun {
    pub name: String,
    pub command: String,
    pub output: ProcessOutput,
}

/// Runs generators in order. The first unexpected exit status stops the
/// sequence with an error.
pub fn run_generators(
    generators: &[GeneratorConfig],
    ctx: &GeneratorContext<'_>,
    runner: &dyn ProcessRunner,
) -> Result<Vec<GeneratorRun>> {
    let mut runs = Vec::with_capacity(generators.len());
    for generator in generators {
        let command = render_command(generator, ctx)?;
        info!(target_name = ctx.target, generator = %generator.name, "running generator");

        let output = runner.run(&command).map_err(|err| Error::Generator {
            name: generator.name.clone(),
            reason: format!("cannot run '{}': {err}", command.display()),
        })?;

        if output.status != Some(generator.expected_exit_code) {
            let status = output
                .status
                .map_or_else(|| "a signal".to_string(), |code| format!("exit code {code}"));
            warn!(target_name = ctx.target, generator = %generator.name, "generator failed");
            return Err(Error::Generator {
                name: generator.name.clone(),
                reason: format!(
                    "terminated with {status}, expected {}: {}",
                    generator.expected_exit_code,
                    output.diagnostic()
                ),
            });
        }

        runs.push(GeneratorRun {
            name: generator.name.clone(),
            command: command.display(),
            output,
        });
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        status: i32,
        seen: Mutex<Vec<CommandSpec>>,
    }

    impl ProcessRunner for Recorder {
        fn run(&self, command: &CommandSpec) -> std::io::Result<ProcessOutput> {
            self.seen.lock().unwrap().push(command.clone());
            Ok(ProcessOutput {
                status: Some(self.status),
                stdout: String::new(),
                stderr: "boom".into(),
            })
        }
    }

    fn generator(command: &[&str], expected: i32) -> GeneratorConfig {
        GeneratorConfig {
            name: "csharp".into(),
            command: command.iter().map(|s| s.to_string()).collect(),
            expected_exit_code: expected,
        }
    }

    fn ctx() -> GeneratorContext<'static> {
        GeneratorContext {
            target: "demo",
            snapshot: Path::new("/repo/abi/current/demo.json"),
            baseline: Path::new("/repo/abi/baselines/demo.json"),
            repo_root: Path::new("/repo"),
        }
    }

    #[test]
    fn placeholders_are_substituted() {
        let command = render_command(
            &generator(&["gen", "--in={snapshot}", "--name", "{target}", "{unknown}"], 0),
            &ctx(),
        )
        .unwrap();
        assert_eq!(command.program, "gen");
        assert_eq!(
            command.args,
            vec!["--in=/repo/abi/current/demo.json", "--name", "demo", "{unknown}"]
        );
        assert_eq!(command.cwd.as_deref(), Some(Path::new("/repo")));
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let ctx = GeneratorContext {
            target: "{repo_root}",
            snapshot: Path::new("/tmp/{target}/demo.json"),
            ..ctx()
        };
        let command = render_command(&generator(&["gen", "{snapshot}", "{target}:{baseline}"], 0), &ctx).unwrap();
        assert_eq!(
            command.args,
            vec!["/tmp/{target}/demo.json", "{repo_root}:/repo/abi/baselines/demo.json"]
        );
    }

    #[test]
    fn expected_exit_code_passes() {
        let runner = Recorder {
            status: 3,
            seen: Mutex::new(Vec::new()),
        };
        let runs = run_generators(&[generator(&["gen"], 3)], &ctx(), &runner).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].command, "gen");
    }

    #[test]
    fn unexpected_exit_code_stops_the_sequence() {
        let runner = Recorder {
            status: 1,
            seen: Mutex::new(Vec::new()),
        };
        let generators = [generator(&["first"], 0), generator(&["second"], 0)];
        let err = run_generators(&generators, &ctx(), &runner).unwrap_err();

        assert!(err.to_string().contains("exit code 1, expected 0: boom"));
        assert_eq!(runner.seen.lock().unwrap().len(), 1);
    }
}
