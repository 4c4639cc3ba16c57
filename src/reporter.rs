use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStarted {
    pub total_cases: usize,
    pub randomized: bool,
    pub seed: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseStarted {
    pub file: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub file: String,
    pub name: String,
    pub status: CaseStatus,
    pub command: String,
    pub expected_output: String,
    pub actual_output: Option<String>,
    /// Set when the case failed for a reason other than an output mismatch
    /// (scratch dir setup, helper script failure).
    pub message: Option<String>,
    pub line: usize,
    pub elapsed_secs: f64,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Passed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub randomized: bool,
    pub seed: Option<String>,
    pub elapsed_secs: f64,
}

/// One wire-friendly envelope for every reporter event, shared by the JSON
/// reporter and the external command reporter.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReporterEvent<'a> {
    RunStarted(&'a RunStarted),
    CaseStarted(&'a CaseStarted),
    CaseFinished(&'a CaseResult),
    RunFinished(&'a RunSummary),
}

/// Receives execution events. Implementations must be `Send` so the parallel
/// runner can hand results back across threads.
pub trait Reporter: Send {
    fn run_started(&mut self, _info: &RunStarted) {}
    fn case_started(&mut self, _info: &CaseStarted) {}
    fn case_finished(&mut self, _result: &CaseResult) {}
    fn run_finished(&mut self, _summary: &RunSummary) {}
}

/// Default reporter: progress dots, failure details with a line diff, and a
/// one-line summary.
pub struct ConsoleReporter {
    stdout: StandardStream,
    dot_count: usize,
    failures: Vec<CaseResult>,
}

impl ConsoleReporter {
    pub fn new(color: bool) -> Self {
        let color_choice = if color {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };
        Self {
            stdout: StandardStream::stdout(color_choice),
            dot_count: 0,
            failures: Vec::new(),
        }
    }

    fn set_color(&mut self, color: Color) {
        let _ = self.stdout.set_color(ColorSpec::new().set_fg(Some(color)));
    }

    fn set_bold(&mut self) {
        let _ = self.stdout.set_color(ColorSpec::new().set_bold(true));
    }

    fn reset(&mut self) {
        let _ = self.stdout.reset();
    }

    fn maybe_newline(&mut self) {
        if self.dot_count >= 80 {
            let _ = writeln!(self.stdout);
            self.dot_count = 0;
        }
    }

    fn print_diff(&mut self, expected: &str, actual: &str) {
        let diff = TextDiff::from_lines(expected, actual);

        for (idx, group) in diff.grouped_ops(3).iter().enumerate() {
            if idx > 0 {
                let _ = writeln!(self.stdout, "...");
            }

            for op in group {
                for change in diff.iter_changes(op) {
                    let (sign, color) = match change.tag() {
                        ChangeTag::Delete => ("-", Color::Red),
                        ChangeTag::Insert => ("+", Color::Green),
                        ChangeTag::Equal => (" ", Color::White),
                    };

                    self.set_color(color);
                    let _ = write!(self.stdout, "  {}{}", sign, change.value());
                    self.reset();
                    if change.missing_newline() {
                        let _ = writeln!(self.stdout);
                    }
                }
            }
        }
    }
}

impl Reporter for ConsoleReporter {
    fn run_started(&mut self, info: &RunStarted) {
        if info.randomized {
            if let Some(seed) = &info.seed {
                let _ = writeln!(self.stdout, "Randomized with seed {}", seed);
            }
        }
    }

    fn case_finished(&mut self, result: &CaseResult) {
        if result.passed() {
            self.set_color(Color::Green);
            let _ = write!(self.stdout, ".");
        } else {
            self.set_color(Color::Red);
            let _ = write!(self.stdout, "F");
            self.failures.push(result.clone());
        }
        self.reset();
        let _ = self.stdout.flush();

        self.dot_count += 1;
        self.maybe_newline();
    }

    fn run_finished(&mut self, summary: &RunSummary) {
        if self.dot_count > 0 {
            let _ = writeln!(self.stdout);
        }

        if !self.failures.is_empty() {
            let _ = writeln!(self.stdout);
            self.set_color(Color::Red);
            self.set_bold();
            let _ = writeln!(self.stdout, "Failures:");
            self.reset();

            let failures = std::mem::take(&mut self.failures);
            for result in &failures {
                let _ = writeln!(self.stdout);
                self.set_color(Color::Red);
                let _ = write!(self.stdout, "✗");
                self.reset();
                let _ = writeln!(self.stdout, " {}: {}", result.file, result.name);
                let _ = writeln!(self.stdout, "  {}:{}", result.file, result.line);
                let _ = writeln!(self.stdout, "  Command: {}", result.command);

                if let Some(message) = &result.message {
                    let _ = writeln!(self.stdout, "  Error: {}", message);
                } else if let Some(actual) = &result.actual_output {
                    let _ = writeln!(self.stdout);
                    self.print_diff(&result.expected_output, actual);
                }
            }
        }

        let _ = writeln!(self.stdout);
        let elapsed = format!(" in {:.2}s", summary.elapsed_secs);
        if summary.failed == 0 {
            self.set_color(Color::Green);
            self.set_bold();
            let _ = write!(self.stdout, "All {} specs passed", summary.total);
            self.reset();
            let _ = writeln!(self.stdout, "{}", elapsed);
        } else {
            self.set_bold();
            let _ = write!(self.stdout, "Summary:");
            self.reset();
            let _ = writeln!(
                self.stdout,
                " {} passed, {} failed{}",
                summary.passed, summary.failed, elapsed
            );
        }

        if summary.randomized {
            if let Some(seed) = &summary.seed {
                let _ = writeln!(self.stdout, "Randomized with seed {}", seed);
            }
        }
    }
}

/// Builtin `json` reporter: one JSON object per event, one event per line.
pub struct JsonLinesReporter<W: Write + Send> {
    out: W,
}

impl JsonLinesReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write + Send> JsonLinesReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn emit(&mut self, event: &ReporterEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(self.out, "{}", line);
        }
    }
}

impl<W: Write + Send> Reporter for JsonLinesReporter<W> {
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
        let _ = self.out.flush();
    }
}
