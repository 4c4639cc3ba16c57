use crate::paths::normalize_path_arg;

/// Everything a single invocation parsed out of its argument list. Built
/// once, in one left-to-right pass, and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ParsedOptions {
    pub color: bool,
    pub config_path: Option<String>,
    pub filter: Option<String>,
    pub fail_fast: Option<bool>,
    pub random: Option<bool>,
    pub seed: Option<String>,
    pub helpers: Vec<String>,
    pub requires: Vec<String>,
    pub reporter: Option<String>,
    /// 1 selects the single-process runner; anything greater selects the
    /// parallel runner. Never any other value.
    pub num_workers: usize,
    pub files: Vec<String>,
    /// Non-empty means the run must not proceed; entries are printed instead.
    pub usage_errors: Vec<String>,
}

impl ParsedOptions {
    fn new(color: bool) -> Self {
        Self {
            color,
            config_path: None,
            filter: None,
            fail_fast: None,
            random: None,
            seed: None,
            helpers: Vec::new(),
            requires: Vec::new(),
            reporter: None,
            num_workers: 1,
            files: Vec::new(),
            usage_errors: Vec::new(),
        }
    }
}

type Setter = fn(&mut ParsedOptions, &str);

/// `--flag=value` options, consulted in one pass per token. Repeating
/// `--helper=`/`--require=` appends; every other flag overwrites, so the
/// last occurrence wins.
const VALUE_FLAGS: &[(&str, Setter)] = &[
    ("--filter=", |opts, v| opts.filter = Some(v.to_string())),
    ("--helper=", |opts, v| opts.helpers.push(v.to_string())),
    ("--require=", |opts, v| opts.requires.push(v.to_string())),
    ("--random=", |opts, v| opts.random = Some(v == "true")),
    ("--seed=", |opts, v| opts.seed = Some(v.to_string())),
    ("--config=", |opts, v| opts.config_path = Some(v.to_string())),
    ("--reporter=", |opts, v| opts.reporter = Some(v.to_string())),
    ("--parallel=", set_worker_count),
];

/// Parses the argument list into a `ParsedOptions`. `default_color` is
/// whether stdout is an interactive terminal; `--color`/`--no-color`
/// override it, last one wins. Unknown `--` options are collected into a
/// single usage error rather than rejected.
pub fn parse_options(args: &[String], default_color: bool) -> ParsedOptions {
    let mut opts = ParsedOptions::new(default_color);
    let mut unknown = Vec::new();

    'args: for arg in args {
        if arg == "--no-color" {
            opts.color = false;
            continue;
        }
        if arg == "--color" {
            opts.color = true;
            continue;
        }
        if arg == "--fail-fast" {
            opts.fail_fast = Some(true);
            continue;
        }
        for (prefix, set) in VALUE_FLAGS {
            if let Some(value) = arg.strip_prefix(prefix) {
                set(&mut opts, value);
                continue 'args;
            }
        }
        if arg == "--" {
            break;
        }
        if !arg.starts_with("--") {
            if !is_env_assignment(arg) {
                opts.files.push(normalize_path_arg(arg));
            }
            continue;
        }
        unknown.push(arg.clone());
    }

    if !unknown.is_empty() {
        opts.usage_errors
            .push(format!("Unknown options: {}", unknown.join(", ")));
    }

    opts
}

fn set_worker_count(opts: &mut ParsedOptions, value: &str) {
    if value == "auto" {
        // Leaves one core for the coordinating process; never below one.
        opts.num_workers = num_cpus::get().saturating_sub(1).max(1);
        return;
    }
    match parse_worker_count(value) {
        Some(n) => opts.num_workers = n,
        None => opts
            .usage_errors
            .push("Argument to --parallel= must be an integer greater than 1".to_string()),
    }
}

fn parse_worker_count(value: &str) -> Option<usize> {
    let n: f64 = value.parse().ok()?;
    if n.is_finite() && n >= 2.0 && n.fract() == 0.0 {
        Some(n as usize)
    } else {
        None
    }
}

/// A token counts as an environment assignment if it contains `=` and is not
/// an option. The parser skips such tokens; they were already applied.
pub(crate) fn is_env_assignment(arg: &str) -> bool {
    !arg.starts_with("--") && arg.contains('=')
}

/// Splits `KEY=VALUE` at the first `=`. Tokens with an empty key are left
/// alone (they still parse as environment-ish, but cannot name a variable).
pub(crate) fn env_assignment(arg: &str) -> Option<(&str, &str)> {
    if arg.starts_with("--") {
        return None;
    }
    let (key, value) = arg.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ParsedOptions {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        parse_options(&args, false)
    }

    #[test]
    fn defaults_with_no_arguments() {
        let opts = parse(&[]);
        assert!(!opts.color);
        assert_eq!(opts.num_workers, 1);
        assert!(opts.files.is_empty());
        assert!(opts.usage_errors.is_empty());
        assert!(opts.fail_fast.is_none());
        assert!(opts.random.is_none());
    }

    #[test]
    fn default_color_comes_from_the_terminal() {
        let args: Vec<String> = Vec::new();
        assert!(parse_options(&args, true).color);
        assert!(!parse_options(&args, false).color);
    }

    #[test]
    fn last_color_flag_wins() {
        assert!(!parse(&["--color", "--no-color"]).color);
        assert!(parse(&["--no-color", "--color"]).color);
    }

    #[test]
    fn value_flags_set_their_fields() {
        let opts = parse(&[
            "--filter=login",
            "--seed=777",
            "--config=specrun.json",
            "--reporter=json",
            "--random=true",
            "--fail-fast",
        ]);
        assert_eq!(opts.filter.as_deref(), Some("login"));
        assert_eq!(opts.seed.as_deref(), Some("777"));
        assert_eq!(opts.config_path.as_deref(), Some("specrun.json"));
        assert_eq!(opts.reporter.as_deref(), Some("json"));
        assert_eq!(opts.random, Some(true));
        assert_eq!(opts.fail_fast, Some(true));
    }

    #[test]
    fn random_is_boolean_coerced() {
        assert_eq!(parse(&["--random=true"]).random, Some(true));
        assert_eq!(parse(&["--random=false"]).random, Some(false));
        assert_eq!(parse(&["--random=yes"]).random, Some(false));
    }

    #[test]
    fn repeated_scalar_flags_keep_the_last_value() {
        let opts = parse(&["--filter=a", "--filter=b"]);
        assert_eq!(opts.filter.as_deref(), Some("b"));
    }

    #[test]
    fn helpers_and_requires_append_in_order() {
        let opts = parse(&["--helper=a", "--require=x", "--helper=b", "--require=y"]);
        assert_eq!(opts.helpers, vec!["a", "b"]);
        assert_eq!(opts.requires, vec!["x", "y"]);
    }

    #[test]
    fn parallel_two_selects_two_workers() {
        let opts = parse(&["--parallel=2"]);
        assert_eq!(opts.num_workers, 2);
        assert!(opts.usage_errors.is_empty());
    }

    #[test]
    fn parallel_one_is_a_usage_error() {
        let opts = parse(&["--parallel=1"]);
        assert_eq!(opts.num_workers, 1);
        assert_eq!(
            opts.usage_errors,
            vec!["Argument to --parallel= must be an integer greater than 1"]
        );
    }

    #[test]
    fn parallel_rejects_non_numbers_fractions_and_negatives() {
        for bad in ["abc", "2.5", "-3", "0"] {
            let arg = format!("--parallel={}", bad);
            let opts = parse(&[arg.as_str()]);
            assert_eq!(opts.num_workers, 1, "--parallel={}", bad);
            assert_eq!(opts.usage_errors.len(), 1, "--parallel={}", bad);
        }
    }

    #[test]
    fn parallel_auto_resolves_to_at_least_one_worker() {
        let opts = parse(&["--parallel=auto"]);
        assert!(opts.num_workers >= 1);
        assert!(opts.usage_errors.is_empty());
    }

    #[test]
    fn bare_tokens_are_files_in_order() {
        let opts = parse(&["b.spec.txt", "--filter=x", "a.spec.txt"]);
        assert_eq!(opts.files, vec!["b.spec.txt", "a.spec.txt"]);
    }

    #[test]
    fn env_assignments_are_not_files_and_not_errors() {
        let opts = parse(&["NODE_ENV=test", "a.spec.txt"]);
        assert_eq!(opts.files, vec!["a.spec.txt"]);
        assert!(opts.usage_errors.is_empty());
    }

    #[test]
    fn end_of_options_discards_the_rest() {
        let opts = parse(&["a.spec.txt", "--", "--filter=x", "b.spec.txt"]);
        assert_eq!(opts.files, vec!["a.spec.txt"]);
        assert!(opts.filter.is_none());
        assert!(opts.usage_errors.is_empty());
    }

    #[test]
    fn unknown_options_accumulate_into_one_error() {
        let opts = parse(&["--wat", "--zap=1"]);
        assert_eq!(opts.usage_errors, vec!["Unknown options: --wat, --zap=1"]);
    }

    #[test]
    fn unknown_options_do_not_block_parsing_the_rest() {
        let opts = parse(&["--wat", "--filter=ok", "file.spec.txt"]);
        assert_eq!(opts.filter.as_deref(), Some("ok"));
        assert_eq!(opts.files, vec!["file.spec.txt"]);
        assert_eq!(opts.usage_errors.len(), 1);
    }

    #[test]
    fn env_assignment_splits_at_the_first_equals() {
        assert_eq!(env_assignment("KEY=a=b"), Some(("KEY", "a=b")));
        assert_eq!(env_assignment("--not=env"), None);
        assert_eq!(env_assignment("=orphan"), None);
        assert_eq!(env_assignment("plainfile"), None);
    }
}
