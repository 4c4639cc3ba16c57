use crate::parse::SpecCase;
use crate::reporter::{CaseResult, CaseStarted, CaseStatus};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tempfile::TempDir;

/// A spec file ready to run: parsed cases plus the path it is reported as.
#[derive(Debug, Clone)]
pub struct SpecFilePlan {
    pub path: PathBuf,
    pub display: String,
    pub cases: Vec<SpecCase>,
}

/// Everything a worker needs to execute one spec file.
#[derive(Debug, Clone)]
pub struct ExecSettings {
    pub project_base_dir: PathBuf,
    pub helper_files: Vec<PathBuf>,
    /// Skip the remaining cases of a file after its first failure.
    pub stop_on_case_failure: bool,
}

#[derive(Debug)]
pub enum ExecEvent {
    CaseStarted(CaseStarted),
    CaseFinished(CaseResult),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileRunStats {
    pub ran: usize,
    pub failed: usize,
}

impl FileRunStats {
    pub fn merge(self, other: FileRunStats) -> FileRunStats {
        FileRunStats {
            ran: self.ran + other.ran,
            failed: self.failed + other.failed,
        }
    }
}

/// Runs a shell command string, returning combined stdout+stderr (line
/// endings normalized, trailing newlines trimmed) and the exit code.
pub fn run_command(command: &str, work_dir: &Path, env_vars: &[(String, String)]) -> (String, i32) {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("bash");
        c.arg("-c").arg(command);
        c
    };
    cmd.current_dir(work_dir);

    for (key, value) in env_vars {
        cmd.env(key, value);
    }

    match cmd.output() {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let combined = format!("{}{}", stdout, stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            let normalized = combined.replace("\r\n", "\n");
            (normalized.trim_end_matches('\n').to_string(), exit_code)
        }
        Err(e) => (format!("Failed to execute command: {}", e), -1),
    }
}

/// Runs a helper script file through the shell in `work_dir`.
fn run_script(script: &Path, work_dir: &Path, env_vars: &[(String, String)]) -> (String, i32) {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(script);
        c
    } else {
        let mut c = Command::new("bash");
        c.arg(script);
        c
    };
    cmd.current_dir(work_dir);

    for (key, value) in env_vars {
        cmd.env(key, value);
    }

    match cmd.output() {
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            (stderr, output.status.code().unwrap_or(-1))
        }
        Err(e) => (format!("Failed to execute script: {}", e), -1),
    }
}

/// Executes one spec file's cases in a fresh scratch directory, emitting a
/// started/finished event pair per case. Returns counts for the summary.
pub fn run_spec_file(
    plan: &SpecFilePlan,
    settings: &ExecSettings,
    emit: &mut dyn FnMut(ExecEvent),
    halt: &AtomicBool,
) -> FileRunStats {
    let mut stats = FileRunStats::default();
    if halt.load(Ordering::Relaxed) {
        return stats;
    }

    let scratch = match TempDir::with_prefix("specrun_") {
        Ok(d) => d,
        Err(e) => {
            return fail_all(
                plan,
                &format!("Failed to create scratch dir: {}", e),
                emit,
            );
        }
    };

    let work_dir = scratch
        .path()
        .canonicalize()
        .unwrap_or_else(|_| scratch.path().to_path_buf());

    let env_vars = vec![
        (
            "SPECRUN_WORK_DIR".to_string(),
            work_dir.to_string_lossy().to_string(),
        ),
        (
            "SPECRUN_PROJECT_DIR".to_string(),
            settings.project_base_dir.to_string_lossy().to_string(),
        ),
    ];

    for helper in &settings.helper_files {
        let (output, exit_code) = run_script(helper, &work_dir, &env_vars);
        if exit_code != 0 {
            let message = format!(
                "Helper '{}' exited with status {}{}",
                helper.display(),
                exit_code,
                if output.is_empty() {
                    String::new()
                } else {
                    format!(": {}", output)
                }
            );
            return fail_all(plan, &message, emit);
        }
    }

    for case in &plan.cases {
        if halt.load(Ordering::Relaxed) {
            break;
        }

        emit(ExecEvent::CaseStarted(CaseStarted {
            file: plan.display.clone(),
            name: case.name.clone(),
        }));

        let start = Instant::now();
        let (actual_output, exit_code) = run_command(&case.command, &work_dir, &env_vars);
        let elapsed_secs = start.elapsed().as_secs_f64();

        let passed = if case.expected_output.is_empty() {
            exit_code == 0
        } else {
            actual_output == case.expected_output
        };

        let result = CaseResult {
            file: plan.display.clone(),
            name: case.name.clone(),
            status: if passed {
                CaseStatus::Passed
            } else {
                CaseStatus::Failed
            },
            command: case.command.clone(),
            expected_output: case.expected_output.clone(),
            actual_output: Some(actual_output),
            message: None,
            line: case.start_line,
            elapsed_secs,
        };

        stats.ran += 1;
        if !passed {
            stats.failed += 1;
        }
        emit(ExecEvent::CaseFinished(result));

        if !passed && settings.stop_on_case_failure {
            break;
        }
    }

    stats
}

/// Reports every case of the file as failed with a setup message, without
/// running any of them.
fn fail_all(
    plan: &SpecFilePlan,
    message: &str,
    emit: &mut dyn FnMut(ExecEvent),
) -> FileRunStats {
    let mut stats = FileRunStats::default();
    for case in &plan.cases {
        emit(ExecEvent::CaseStarted(CaseStarted {
            file: plan.display.clone(),
            name: case.name.clone(),
        }));
        emit(ExecEvent::CaseFinished(CaseResult {
            file: plan.display.clone(),
            name: case.name.clone(),
            status: CaseStatus::Failed,
            command: case.command.clone(),
            expected_output: case.expected_output.clone(),
            actual_output: None,
            message: Some(message.to_string()),
            line: case.start_line,
            elapsed_secs: 0.0,
        }));
        stats.ran += 1;
        stats.failed += 1;
    }
    stats
}
