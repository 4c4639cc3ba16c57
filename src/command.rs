use crate::dispatch;
use crate::options::{env_assignment, parse_options};
use crate::paths::normalize_path_arg;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Context handed to a subcommand action. Output is routed through an
/// injected writer so actions stay testable.
pub struct CommandContext<'a> {
    pub project_base_dir: &'a Path,
    pub spec_dir: &'a Path,
    pub registry: &'a CommandRegistry,
    pub out: &'a mut dyn Write,
}

pub type CommandAction = fn(&mut CommandContext) -> anyhow::Result<()>;

pub struct Subcommand {
    pub name: &'static str,
    pub alias: Option<&'static str>,
    pub description: &'static str,
    pub action: CommandAction,
}

/// Immutable mapping from command name (or alias) to its action. Built once
/// at startup and passed into `Command` by reference.
pub struct CommandRegistry {
    commands: Vec<Subcommand>,
}

impl CommandRegistry {
    pub fn standard() -> Self {
        Self {
            commands: vec![
                Subcommand {
                    name: "init",
                    alias: None,
                    description: "initialize a specrun project",
                    action: init_project,
                },
                Subcommand {
                    name: "examples",
                    alias: None,
                    description: "install example specs and helpers",
                    action: install_examples,
                },
                Subcommand {
                    name: "help",
                    alias: Some("-h"),
                    description: "show help",
                    action: show_help,
                },
                Subcommand {
                    name: "version",
                    alias: Some("-v"),
                    description: "show the specrun version",
                    action: show_version,
                },
            ],
        }
    }

    pub fn commands(&self) -> &[Subcommand] {
        &self.commands
    }

    /// Scans the argument list for command names and aliases. When several
    /// tokens match, the last one in the list wins.
    pub fn find_in_args(&self, args: &[String]) -> Option<&Subcommand> {
        let mut found = None;
        for arg in args {
            for cmd in &self.commands {
                if cmd.name == arg.as_str() || cmd.alias == Some(arg.as_str()) {
                    found = Some(cmd);
                }
            }
        }
        found
    }
}

/// Applies every `KEY=VALUE` argument to the process environment. Runs
/// before command routing and option parsing so both paths observe the
/// resulting environment.
pub fn apply_env_assignments(args: &[String]) {
    for arg in args {
        if let Some((key, value)) = env_assignment(arg) {
            std::env::set_var(key, value);
        }
    }
}

/// The command-line front end: routes to a subcommand or parses options and
/// dispatches a run, returning the process exit code.
pub struct Command<'a> {
    project_base_dir: PathBuf,
    spec_dir: PathBuf,
    registry: &'a CommandRegistry,
}

impl<'a> Command<'a> {
    pub fn new(project_base_dir: &Path, registry: &'a CommandRegistry) -> Self {
        let base = PathBuf::from(normalize_path_arg(&project_base_dir.to_string_lossy()));
        let spec_dir = base.join("spec");
        Self {
            project_base_dir: base,
            spec_dir,
            registry,
        }
    }

    pub fn run(&self, args: &[String], out: &mut dyn Write) -> i32 {
        apply_env_assignments(args);

        if let Some(cmd) = self.registry.find_in_args(args) {
            let action = cmd.action;
            let mut ctx = CommandContext {
                project_base_dir: &self.project_base_dir,
                spec_dir: &self.spec_dir,
                registry: self.registry,
                out,
            };
            return match action(&mut ctx) {
                Ok(()) => 0,
                Err(e) => {
                    let _ = writeln!(ctx.out, "{:#}", e);
                    1
                }
            };
        }

        let options = parse_options(args, atty::is(atty::Stream::Stdout));
        if !options.usage_errors.is_empty() {
            for error in &options.usage_errors {
                let _ = writeln!(out, "{}", error);
            }
            let _ = writeln!(out);
            print_help(self.registry, out);
            return 1;
        }

        match dispatch::run_specs(&options, &self.project_base_dir) {
            Ok(outcome) => {
                if outcome.no_specs() {
                    let _ = writeln!(out, "No specs found");
                }
                outcome.exit_code()
            }
            Err(e) => {
                let _ = writeln!(out, "{:#}", e);
                1
            }
        }
    }
}

const OPTION_HELP: &[(&str, &str)] = &[
    ("--parallel=N", "run in parallel with N workers"),
    (
        "--parallel=auto",
        "run in parallel with an automatically chosen number of workers",
    ),
    ("--no-color", "turn off color in spec output"),
    ("--color", "force turn on color in spec output"),
    ("--filter=", "run only specs whose names match the given pattern"),
    ("--helper=", "run helper files that match the given pattern"),
    ("--require=", "run the given command before any spec executes"),
    ("--fail-fast", "stop execution on spec failure"),
    ("--random=true|false", "randomize spec execution order"),
    ("--seed=", "fix the randomization seed"),
    ("--config=", "path to your optional specrun.json"),
    (
        "--reporter=",
        "reporter to use instead of the default console reporter",
    ),
    ("--", "marker to signal the end of options"),
];

pub fn print_help(registry: &CommandRegistry, out: &mut dyn Write) {
    let _ = writeln!(out, "Usage: specrun [command] [options] [files] [--]");
    let _ = writeln!(out);
    let _ = writeln!(out, "Commands:");
    for cmd in registry.commands() {
        let name = match cmd.alias {
            Some(alias) => format!("{},{}", cmd.name, alias),
            None => cmd.name.to_string(),
        };
        let _ = writeln!(out, "{:>10}\t{}", name, cmd.description);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "If no command is given, specs will be run");
    let _ = writeln!(out);
    let _ = writeln!(out, "Options:");
    for (flag, description) in OPTION_HELP {
        let _ = writeln!(out, "{:>18}\t{}", flag, description);
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "The given arguments take precedence over options in your specrun.json"
    );
    let _ = writeln!(
        out,
        "The path to your optional specrun.json can also be configured by setting the SPECRUN_CONFIG_PATH environment variable"
    );
}

fn show_help(ctx: &mut CommandContext) -> anyhow::Result<()> {
    print_help(ctx.registry, ctx.out);
    Ok(())
}

fn show_version(ctx: &mut CommandContext) -> anyhow::Result<()> {
    let _ = writeln!(ctx.out, "specrun v{}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

fn init_project(ctx: &mut CommandContext) -> anyhow::Result<()> {
    let support = ctx.spec_dir.join("support");
    fs::create_dir_all(&support)?;

    let config = support.join("specrun.json");
    if config.exists() {
        let _ = writeln!(
            ctx.out,
            "spec/support/specrun.json already exists in your project."
        );
    } else {
        fs::write(&config, include_str!("../templates/specrun.json"))?;
    }
    Ok(())
}

fn install_examples(ctx: &mut CommandContext) -> anyhow::Result<()> {
    let helpers = ctx.spec_dir.join("helpers");
    let samples = ctx.spec_dir.join("samples");
    fs::create_dir_all(&helpers)?;
    fs::create_dir_all(&samples)?;

    write_if_absent(
        &helpers.join("example_helper.sh"),
        include_str!("../templates/example_helper.sh"),
        ctx.out,
    )?;
    write_if_absent(
        &samples.join("example.spec.txt"),
        include_str!("../templates/example.spec.txt"),
        ctx.out,
    )?;
    Ok(())
}

fn write_if_absent(path: &Path, content: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    if path.exists() {
        let _ = writeln!(out, "{} already exists in your project.", path.display());
    } else {
        fs::write(path, content)?;
    }
    Ok(())
}
