use crate::config::{load_config, RunnerConfig};
use crate::discover::{discover_spec_files, match_helper_files};
use crate::exec::{self, ExecEvent, ExecSettings, FileRunStats, SpecFilePlan};
use crate::loader::{ModuleLoader, ReporterLoader};
use crate::parse::parse_spec_file;
use crate::reporter::{ConsoleReporter, Reporter, RunStarted, RunSummary};
use anyhow::{anyhow, bail, Context};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use regex::Regex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

/// Overrides for the stop-on-failure behaviors, applied on top of whatever
/// the config file sets. `None` leaves the configured value in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvOverrides {
    pub stop_spec_on_expectation_failure: Option<bool>,
    pub stop_on_spec_failure: Option<bool>,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    /// Cases selected for this run, after filtering.
    pub planned: usize,
    /// Cases that actually executed (fail-fast may skip the rest).
    pub executed: usize,
    pub failed: usize,
}

impl RunOutcome {
    pub fn no_specs(&self) -> bool {
        self.planned == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.no_specs() {
            2
        } else if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// The runner collaborator interface the dispatch layer drives. Both
/// execution strategies implement it; tests substitute their own.
pub trait SpecRunner {
    fn load_config_file(&mut self, config_path: Option<&str>) -> anyhow::Result<()>;
    fn configure_env(&mut self, overrides: EnvOverrides);
    fn seed(&mut self, seed: &str);
    fn randomize_tests(&mut self, random: bool);
    fn add_matching_helper_files(&mut self, patterns: &[String]);
    fn add_requires(&mut self, requires: &[String]);
    fn clear_reporters(&mut self);
    fn add_reporter(&mut self, reporter: Box<dyn Reporter>);
    fn show_colors(&mut self, colors: bool);
    fn loader(&self) -> &dyn ReporterLoader;
    fn execute(&mut self, files: &[String], filter: Option<&str>) -> anyhow::Result<RunOutcome>;
}

enum ExecMode {
    Sequential,
    Parallel(usize),
}

/// State shared by both execution strategies.
struct RunnerCore {
    project_base_dir: PathBuf,
    config: RunnerConfig,
    env_overrides: EnvOverrides,
    seed: Option<String>,
    random: Option<bool>,
    extra_helpers: Vec<String>,
    extra_requires: Vec<String>,
    reporters: Vec<Box<dyn Reporter>>,
    use_default_console: bool,
    show_colors: bool,
    loader: Box<dyn ReporterLoader>,
}

impl RunnerCore {
    fn new(project_base_dir: PathBuf, loader: Box<dyn ReporterLoader>) -> Self {
        Self {
            project_base_dir,
            config: RunnerConfig::default(),
            env_overrides: EnvOverrides::default(),
            seed: None,
            random: None,
            extra_helpers: Vec::new(),
            extra_requires: Vec::new(),
            reporters: Vec::new(),
            use_default_console: true,
            show_colors: true,
            loader,
        }
    }

    fn load_config_file(&mut self, config_path: Option<&str>) -> anyhow::Result<()> {
        self.config = load_config(&self.project_base_dir, config_path)?;
        Ok(())
    }

    fn execute(
        &mut self,
        files: &[String],
        filter: Option<&str>,
        mode: ExecMode,
    ) -> anyhow::Result<RunOutcome> {
        let spec_dir = self.project_base_dir.join(&self.config.spec_dir);

        self.run_requires()?;

        let mut plans = self.plan(files, filter, &spec_dir)?;

        let randomized = self.random.unwrap_or(self.config.random);
        let seed = if randomized {
            Some(
                self.seed
                    .clone()
                    .or_else(|| self.config.seed.clone())
                    .unwrap_or_else(|| (rand::random::<u32>() % 100_000).to_string()),
            )
        } else {
            None
        };
        if let Some(seed) = &seed {
            shuffle_plans(&mut plans, seed);
        }

        let planned: usize = plans.iter().map(|p| p.cases.len()).sum();
        if planned == 0 {
            return Ok(RunOutcome {
                planned: 0,
                executed: 0,
                failed: 0,
            });
        }

        let mut helper_patterns = self.config.helpers.clone();
        helper_patterns.extend(self.extra_helpers.iter().cloned());
        let helper_files = match_helper_files(&spec_dir, &helper_patterns)?;

        let settings = ExecSettings {
            project_base_dir: self.project_base_dir.clone(),
            helper_files,
            stop_on_case_failure: self
                .env_overrides
                .stop_spec_on_expectation_failure
                .unwrap_or(self.config.stop_spec_on_expectation_failure),
        };
        let stop_on_spec_failure = self
            .env_overrides
            .stop_on_spec_failure
            .unwrap_or(self.config.stop_on_spec_failure);

        let mut reporters: Vec<Box<dyn Reporter>> = Vec::new();
        if self.use_default_console {
            reporters.push(Box::new(ConsoleReporter::new(self.show_colors)));
        }
        reporters.append(&mut self.reporters);

        let start = Instant::now();
        let run_started = RunStarted {
            total_cases: planned,
            randomized,
            seed: seed.clone(),
        };
        for reporter in reporters.iter_mut() {
            reporter.run_started(&run_started);
        }

        let stats = match mode {
            ExecMode::Sequential => {
                let halt = AtomicBool::new(false);
                let mut total = FileRunStats::default();
                for plan in &plans {
                    if halt.load(Ordering::Relaxed) {
                        break;
                    }
                    let stats = exec::run_spec_file(
                        plan,
                        &settings,
                        &mut |event| dispatch_event(&mut reporters, &event),
                        &halt,
                    );
                    if stats.failed > 0 && stop_on_spec_failure {
                        halt.store(true, Ordering::Relaxed);
                    }
                    total = total.merge(stats);
                }
                total
            }
            ExecMode::Parallel(num_workers) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(num_workers)
                    .build()
                    .context("failed to build worker thread pool")?;
                let (tx, rx) = mpsc::channel::<ExecEvent>();
                let worker_settings = settings.clone();
                let worker = thread::spawn(move || {
                    let halt = AtomicBool::new(false);
                    pool.install(|| {
                        plans
                            .par_iter()
                            .map_with(tx, |tx, plan| {
                                let stats = exec::run_spec_file(
                                    plan,
                                    &worker_settings,
                                    &mut |event| {
                                        let _ = tx.send(event);
                                    },
                                    &halt,
                                );
                                if stats.failed > 0 && stop_on_spec_failure {
                                    halt.store(true, Ordering::Relaxed);
                                }
                                stats
                            })
                            .reduce(FileRunStats::default, FileRunStats::merge)
                    })
                });
                for event in rx {
                    dispatch_event(&mut reporters, &event);
                }
                worker
                    .join()
                    .map_err(|_| anyhow!("spec execution worker panicked"))?
            }
        };

        let summary = RunSummary {
            total: stats.ran,
            passed: stats.ran - stats.failed,
            failed: stats.failed,
            randomized,
            seed,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        for reporter in reporters.iter_mut() {
            reporter.run_finished(&summary);
        }

        Ok(RunOutcome {
            planned,
            executed: stats.ran,
            failed: stats.failed,
        })
    }

    fn run_requires(&self) -> anyhow::Result<()> {
        let env_vars = vec![(
            "SPECRUN_PROJECT_DIR".to_string(),
            self.project_base_dir.to_string_lossy().to_string(),
        )];
        for require in self.config.requires.iter().chain(&self.extra_requires) {
            let (output, exit_code) =
                exec::run_command(require, &self.project_base_dir, &env_vars);
            if exit_code != 0 {
                bail!(
                    "Require command '{}' exited with status {}{}",
                    require,
                    exit_code,
                    if output.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", output)
                    }
                );
            }
        }
        Ok(())
    }

    fn plan(
        &self,
        files: &[String],
        filter: Option<&str>,
        spec_dir: &Path,
    ) -> anyhow::Result<Vec<SpecFilePlan>> {
        let paths: Vec<PathBuf> = if files.is_empty() {
            discover_spec_files(spec_dir, &self.config.spec_files)?
        } else {
            files
                .iter()
                .map(|f| {
                    let p = Path::new(f);
                    if p.is_absolute() {
                        p.to_path_buf()
                    } else {
                        self.project_base_dir.join(p)
                    }
                })
                .collect()
        };

        let filter_re = filter
            .map(Regex::new)
            .transpose()
            .context("invalid --filter= pattern")?;

        let mut plans = Vec::new();
        for path in paths {
            let mut cases = parse_spec_file(&path)?;
            let display = path
                .strip_prefix(&self.project_base_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");

            if let Some(re) = &filter_re {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                cases.retain(|case| re.is_match(&format!("{} {}", stem, case.name)));
            }

            if !cases.is_empty() {
                plans.push(SpecFilePlan {
                    path,
                    display,
                    cases,
                });
            }
        }

        Ok(plans)
    }
}

fn dispatch_event(reporters: &mut [Box<dyn Reporter>], event: &ExecEvent) {
    for reporter in reporters.iter_mut() {
        match event {
            ExecEvent::CaseStarted(info) => reporter.case_started(info),
            ExecEvent::CaseFinished(result) => reporter.case_finished(result),
        }
    }
}

fn shuffle_plans(plans: &mut [SpecFilePlan], seed: &str) {
    let mut rng = StdRng::seed_from_u64(seed_to_u64(seed));
    plans.shuffle(&mut rng);
    for plan in plans.iter_mut() {
        plan.cases.shuffle(&mut rng);
    }
}

fn seed_to_u64(seed: &str) -> u64 {
    seed.parse::<u64>().unwrap_or_else(|_| {
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        hasher.finish()
    })
}

macro_rules! delegate_runner_config {
    () => {
        fn load_config_file(&mut self, config_path: Option<&str>) -> anyhow::Result<()> {
            self.core.load_config_file(config_path)
        }

        fn configure_env(&mut self, overrides: EnvOverrides) {
            if let Some(v) = overrides.stop_spec_on_expectation_failure {
                self.core.env_overrides.stop_spec_on_expectation_failure = Some(v);
            }
            if let Some(v) = overrides.stop_on_spec_failure {
                self.core.env_overrides.stop_on_spec_failure = Some(v);
            }
        }

        fn seed(&mut self, seed: &str) {
            self.core.seed = Some(seed.to_string());
        }

        fn randomize_tests(&mut self, random: bool) {
            self.core.random = Some(random);
        }

        fn add_matching_helper_files(&mut self, patterns: &[String]) {
            self.core.extra_helpers.extend(patterns.iter().cloned());
        }

        fn add_requires(&mut self, requires: &[String]) {
            self.core.extra_requires.extend(requires.iter().cloned());
        }

        fn clear_reporters(&mut self) {
            self.core.reporters.clear();
            self.core.use_default_console = false;
        }

        fn add_reporter(&mut self, reporter: Box<dyn Reporter>) {
            self.core.reporters.push(reporter);
        }

        fn show_colors(&mut self, colors: bool) {
            self.core.show_colors = colors;
        }

        fn loader(&self) -> &dyn ReporterLoader {
            self.core.loader.as_ref()
        }
    };
}

/// Single-process execution strategy: spec files run in order on the calling
/// thread.
pub struct Runner {
    core: RunnerCore,
}

impl Runner {
    pub fn new(project_base_dir: impl Into<PathBuf>) -> Self {
        Self::with_loader(project_base_dir, Box::new(ModuleLoader))
    }

    pub fn with_loader(
        project_base_dir: impl Into<PathBuf>,
        loader: Box<dyn ReporterLoader>,
    ) -> Self {
        Self {
            core: RunnerCore::new(project_base_dir.into(), loader),
        }
    }
}

impl SpecRunner for Runner {
    delegate_runner_config!();

    fn execute(&mut self, files: &[String], filter: Option<&str>) -> anyhow::Result<RunOutcome> {
        self.core.execute(files, filter, ExecMode::Sequential)
    }
}

/// Multi-worker execution strategy: spec files are distributed across a
/// dedicated thread pool sized to the requested worker count.
pub struct ParallelRunner {
    core: RunnerCore,
    num_workers: usize,
}

impl ParallelRunner {
    pub fn new(project_base_dir: impl Into<PathBuf>, num_workers: usize) -> Self {
        Self::with_loader(project_base_dir, num_workers, Box::new(ModuleLoader))
    }

    pub fn with_loader(
        project_base_dir: impl Into<PathBuf>,
        num_workers: usize,
        loader: Box<dyn ReporterLoader>,
    ) -> Self {
        Self {
            core: RunnerCore::new(project_base_dir.into(), loader),
            num_workers,
        }
    }
}

impl SpecRunner for ParallelRunner {
    delegate_runner_config!();

    fn execute(&mut self, files: &[String], filter: Option<&str>) -> anyhow::Result<RunOutcome> {
        self.core
            .execute(files, filter, ExecMode::Parallel(self.num_workers))
    }
}
