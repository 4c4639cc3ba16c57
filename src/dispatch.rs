use crate::error::Error;
use crate::loader::resolve_reporter;
use crate::options::ParsedOptions;
use crate::runner::{EnvOverrides, ParallelRunner, RunOutcome, Runner, SpecRunner};
use std::path::Path;

/// Runs the specs described by `options`: constructs the execution strategy
/// from the worker count, applies every option in a fixed order, and drives
/// the run to completion. The caller has already verified that
/// `options.usage_errors` is empty.
pub fn run_specs(options: &ParsedOptions, project_base_dir: &Path) -> anyhow::Result<RunOutcome> {
    let mut runner: Box<dyn SpecRunner> = if options.num_workers > 1 {
        Box::new(ParallelRunner::new(project_base_dir, options.num_workers))
    } else {
        Box::new(Runner::new(project_base_dir))
    };
    configure_and_execute(runner.as_mut(), options)
}

/// Applies the parsed options to the runner in a fixed order, then
/// executes. Config loads first; reporter substitution can fail, aborting
/// the dispatch; colors are always applied, last, before execution.
pub fn configure_and_execute(
    runner: &mut dyn SpecRunner,
    options: &ParsedOptions,
) -> anyhow::Result<RunOutcome> {
    runner.load_config_file(options.config_path.as_deref())?;

    if let Some(fail_fast) = options.fail_fast {
        runner.configure_env(EnvOverrides {
            stop_spec_on_expectation_failure: Some(fail_fast),
            stop_on_spec_failure: Some(fail_fast),
        });
    }

    if let Some(seed) = &options.seed {
        runner.seed(seed);
    }

    if let Some(random) = options.random {
        runner.randomize_tests(random);
    }

    if !options.helpers.is_empty() {
        runner.add_matching_helper_files(&options.helpers);
    }

    if !options.requires.is_empty() {
        runner.add_requires(&options.requires);
    }

    if let Some(reporter) = &options.reporter {
        register_reporter(reporter, runner)?;
    }

    runner.show_colors(options.color);

    runner.execute(&options.files, options.filter.as_deref())
}

/// Loads and instantiates the named reporter, then swaps it in as the only
/// registered reporter. The two failure modes carry distinct errors, each
/// embedding the identifier the user gave and the underlying cause.
fn register_reporter(
    name_or_path: &str,
    runner: &mut dyn SpecRunner,
) -> Result<(), Error> {
    let identifier = resolve_reporter(name_or_path);

    let factory = runner
        .loader()
        .load(&identifier)
        .map_err(|e| Error::ReporterLoad {
            identifier: name_or_path.to_string(),
            details: format!("{:#}", e),
        })?;

    let reporter = factory
        .instantiate()
        .map_err(|e| Error::ReporterInstantiate {
            identifier: name_or_path.to_string(),
            details: format!("{:#}", e),
        })?;

    runner.clear_reporters();
    runner.add_reporter(reporter);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{ReporterFactory, ReporterLoader};
    use crate::reporter::Reporter;
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct NullReporter;
    impl Reporter for NullReporter {}

    struct OkFactory;
    impl ReporterFactory for OkFactory {
        fn instantiate(&self) -> anyhow::Result<Box<dyn Reporter>> {
            Ok(Box::new(NullReporter))
        }
    }

    struct FailingFactory;
    impl ReporterFactory for FailingFactory {
        fn instantiate(&self) -> anyhow::Result<Box<dyn Reporter>> {
            Err(anyhow!("constructor exploded"))
        }
    }

    enum LoaderBehavior {
        Succeed,
        FailLoad,
        FailInstantiate,
    }

    struct FakeLoader {
        log: CallLog,
        behavior: LoaderBehavior,
    }

    impl ReporterLoader for FakeLoader {
        fn load(&self, identifier: &str) -> anyhow::Result<Box<dyn ReporterFactory>> {
            self.log.lock().unwrap().push(format!("load {}", identifier));
            match self.behavior {
                LoaderBehavior::Succeed => Ok(Box::new(OkFactory)),
                LoaderBehavior::FailLoad => Err(anyhow!("module not found")),
                LoaderBehavior::FailInstantiate => Ok(Box::new(FailingFactory)),
            }
        }
    }

    struct FakeRunner {
        log: CallLog,
        loader: FakeLoader,
        outcome: RunOutcome,
    }

    impl FakeRunner {
        fn new(behavior: LoaderBehavior) -> (Self, CallLog) {
            let log: CallLog = Arc::new(Mutex::new(Vec::new()));
            let runner = FakeRunner {
                log: log.clone(),
                loader: FakeLoader {
                    log: log.clone(),
                    behavior,
                },
                outcome: RunOutcome {
                    planned: 1,
                    executed: 1,
                    failed: 0,
                },
            };
            (runner, log)
        }

        fn record(&self, entry: impl Into<String>) {
            self.log.lock().unwrap().push(entry.into());
        }
    }

    impl SpecRunner for FakeRunner {
        fn load_config_file(&mut self, config_path: Option<&str>) -> anyhow::Result<()> {
            self.record(format!("load_config_file {:?}", config_path));
            Ok(())
        }

        fn configure_env(&mut self, overrides: EnvOverrides) {
            self.record(format!(
                "configure_env {:?}/{:?}",
                overrides.stop_spec_on_expectation_failure, overrides.stop_on_spec_failure
            ));
        }

        fn seed(&mut self, seed: &str) {
            self.record(format!("seed {}", seed));
        }

        fn randomize_tests(&mut self, random: bool) {
            self.record(format!("randomize_tests {}", random));
        }

        fn add_matching_helper_files(&mut self, patterns: &[String]) {
            self.record(format!("add_matching_helper_files {:?}", patterns));
        }

        fn add_requires(&mut self, requires: &[String]) {
            self.record(format!("add_requires {:?}", requires));
        }

        fn clear_reporters(&mut self) {
            self.record("clear_reporters");
        }

        fn add_reporter(&mut self, _reporter: Box<dyn Reporter>) {
            self.record("add_reporter");
        }

        fn show_colors(&mut self, colors: bool) {
            self.record(format!("show_colors {}", colors));
        }

        fn loader(&self) -> &dyn ReporterLoader {
            &self.loader
        }

        fn execute(
            &mut self,
            files: &[String],
            filter: Option<&str>,
        ) -> anyhow::Result<RunOutcome> {
            self.record(format!("execute {:?} {:?}", files, filter));
            Ok(self.outcome)
        }
    }

    fn all_options() -> ParsedOptions {
        let args: Vec<String> = [
            "--config=conf.json",
            "--fail-fast",
            "--seed=42",
            "--random=true",
            "--helper=h1",
            "--require=r1",
            "--reporter=custom",
            "--no-color",
            "--filter=login",
            "a.spec.txt",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        crate::options::parse_options(&args, true)
    }

    #[test]
    fn applies_configuration_in_the_fixed_order() {
        let (mut runner, log) = FakeRunner::new(LoaderBehavior::Succeed);
        configure_and_execute(&mut runner, &all_options()).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "load_config_file Some(\"conf.json\")".to_string(),
                "configure_env Some(true)/Some(true)".to_string(),
                "seed 42".to_string(),
                "randomize_tests true".to_string(),
                "add_matching_helper_files [\"h1\"]".to_string(),
                "add_requires [\"r1\"]".to_string(),
                "load custom".to_string(),
                "clear_reporters".to_string(),
                "add_reporter".to_string(),
                "show_colors false".to_string(),
                "execute [\"a.spec.txt\"] Some(\"login\")".to_string(),
            ]
        );
    }

    #[test]
    fn unset_options_skip_their_steps() {
        let (mut runner, log) = FakeRunner::new(LoaderBehavior::Succeed);
        let options = crate::options::parse_options(&[], true);
        configure_and_execute(&mut runner, &options).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "load_config_file None".to_string(),
                "show_colors true".to_string(),
                "execute [] None".to_string(),
            ]
        );
    }

    #[test]
    fn reporter_load_failure_names_the_module_and_the_cause() {
        let (mut runner, _) = FakeRunner::new(LoaderBehavior::FailLoad);
        let mut options = crate::options::parse_options(&[], true);
        options.reporter = Some("./missing.sh".to_string());

        let err = configure_and_execute(&mut runner, &options).unwrap_err();
        let message = format!("{}", err);
        assert!(message.contains("Failed to load reporter module ./missing.sh"));
        assert!(message.contains("module not found"));
    }

    #[test]
    fn reporter_instantiation_failure_is_worded_distinctly() {
        let (mut runner, log) = FakeRunner::new(LoaderBehavior::FailInstantiate);
        let mut options = crate::options::parse_options(&[], true);
        options.reporter = Some("custom".to_string());

        let err = configure_and_execute(&mut runner, &options).unwrap_err();
        let message = format!("{}", err);
        assert!(message.contains("Failed to instantiate reporter from custom"));
        assert!(message.contains("constructor exploded"));
        // Substitution never happened.
        assert!(!log.lock().unwrap().iter().any(|l| l == "clear_reporters"));
    }

    #[test]
    fn reporter_failure_prevents_execution() {
        let (mut runner, log) = FakeRunner::new(LoaderBehavior::FailLoad);
        let mut options = crate::options::parse_options(&[], true);
        options.reporter = Some("broken".to_string());

        assert!(configure_and_execute(&mut runner, &options).is_err());
        assert!(!log
            .lock()
            .unwrap()
            .iter()
            .any(|l| l.starts_with("execute")));
    }

    #[test]
    fn relative_reporter_paths_reach_the_loader_resolved() {
        let (mut runner, log) = FakeRunner::new(LoaderBehavior::Succeed);
        let mut options = crate::options::parse_options(&[], true);
        options.reporter = Some("./rep.sh".to_string());

        configure_and_execute(&mut runner, &options).unwrap();

        let log = log.lock().unwrap();
        let load_line = log.iter().find(|l| l.starts_with("load ")).unwrap();
        // The loader sees an absolute path, not the raw ./ form.
        assert!(!load_line.contains("load ./"));
        assert!(load_line.ends_with("rep.sh"));
    }
}
