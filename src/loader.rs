use crate::reporter::{
    CaseResult, CaseStarted, ConsoleReporter, JsonLinesReporter, Reporter, ReporterEvent,
    RunStarted, RunSummary,
};
use anyhow::{anyhow, Context};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// Constructs reporter instances from a loaded module. Construction is
/// separate from loading so the two failure modes stay distinguishable.
pub trait ReporterFactory: Send {
    fn instantiate(&self) -> anyhow::Result<Box<dyn Reporter>>;
}

/// The runner's module-loading capability. Injected so the dispatch layer
/// can be exercised without touching the filesystem.
pub trait ReporterLoader: Send {
    fn load(&self, identifier: &str) -> anyhow::Result<Box<dyn ReporterFactory>>;
}

/// Resolves a reporter identifier: explicit relative paths become absolute,
/// anything else is left for the loader to interpret.
pub fn resolve_reporter(name_or_path: &str) -> String {
    if name_or_path.starts_with("./") || name_or_path.starts_with("../") {
        match std::env::current_dir() {
            Ok(cwd) => {
                let absolute: PathBuf = cwd.join(name_or_path).components().collect();
                absolute.to_string_lossy().into_owned()
            }
            Err(_) => name_or_path.to_string(),
        }
    } else {
        name_or_path.to_string()
    }
}

/// Default loader: builtin reporter names (`console`, `json`) plus
/// filesystem paths, which load as external command reporters.
pub struct ModuleLoader;

impl ReporterLoader for ModuleLoader {
    fn load(&self, identifier: &str) -> anyhow::Result<Box<dyn ReporterFactory>> {
        match identifier {
            "console" => Ok(Box::new(ConsoleReporterFactory)),
            "json" => Ok(Box::new(JsonReporterFactory)),
            _ if looks_like_path(identifier) => {
                let path = Path::new(identifier);
                if path.is_file() {
                    Ok(Box::new(CommandReporterFactory {
                        program: path.to_path_buf(),
                    }))
                } else {
                    Err(anyhow!("no reporter program at '{}'", identifier))
                }
            }
            _ => Err(anyhow!("unknown reporter module '{}'", identifier)),
        }
    }
}

fn looks_like_path(identifier: &str) -> bool {
    identifier.contains('/') || identifier.contains('\\')
}

struct ConsoleReporterFactory;

impl ReporterFactory for ConsoleReporterFactory {
    fn instantiate(&self) -> anyhow::Result<Box<dyn Reporter>> {
        Ok(Box::new(ConsoleReporter::new(atty::is(
            atty::Stream::Stdout,
        ))))
    }
}

struct JsonReporterFactory;

impl ReporterFactory for JsonReporterFactory {
    fn instantiate(&self) -> anyhow::Result<Box<dyn Reporter>> {
        Ok(Box::new(JsonLinesReporter::stdout()))
    }
}

/// Factory for reporters implemented as external programs. Instantiation
/// spawns the program; events are streamed to its stdin as JSON lines.
struct CommandReporterFactory {
    program: PathBuf,
}

impl ReporterFactory for CommandReporterFactory {
    fn instantiate(&self) -> anyhow::Result<Box<dyn Reporter>> {
        let child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!("failed to spawn reporter program '{}'", self.program.display())
            })?;
        Ok(Box::new(CommandReporter { child }))
    }
}

/// Streams events to a spawned reporter process. Write failures are
/// dropped; a reporter that stops listening does not fail the run.
pub struct CommandReporter {
    child: Child,
}

impl CommandReporter {
    fn emit(&mut self, event: &ReporterEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        if let Some(stdin) = self.child.stdin.as_mut() {
            let _ = writeln!(stdin, "{}", line);
        }
    }
}

impl Reporter for CommandReporter {
    fn run_started(&mut self, info: &RunStarted) {
        self.emit(&ReporterEvent::RunStarted(info));
    }

    fn case_started(&mut self, info: &CaseStarted) {
        self.emit(&ReporterEvent::CaseStarted(info));
    }

    fn case_finished(&mut self, result: &CaseResult) {
        self.emit(&ReporterEvent::CaseFinished(result));
    }

    fn run_finished(&mut self, summary: &RunSummary) {
        self.emit(&ReporterEvent::RunFinished(summary));
        drop(self.child.stdin.take());
        let _ = self.child.wait();
    }
}
