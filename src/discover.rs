use crate::error::Result;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Compiles a glob-lite pattern (`**` spans directories, `*` stays within
/// one, `?` matches a single character) into an anchored regex over
/// slash-separated relative paths.
pub fn pattern_to_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

/// Walks `spec_dir` and returns the files whose relative path matches any of
/// `patterns`, sorted for a stable default ordering.
pub fn discover_spec_files(spec_dir: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let regexes = compile(patterns);
    let mut files: Vec<PathBuf> = walk(spec_dir)
        .into_iter()
        .filter(|(_, rel)| regexes.iter().any(|re| re.is_match(rel)))
        .map(|(path, _)| path)
        .collect();
    files.sort();
    Ok(files)
}

/// Returns helper files under `spec_dir` in pattern order: all files matching
/// the first pattern (sorted), then the second, and so on, deduplicated.
pub fn match_helper_files(spec_dir: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let entries = walk(spec_dir);
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut helpers = Vec::new();

    for pattern in patterns {
        let Ok(re) = pattern_to_regex(pattern) else {
            continue;
        };
        let mut matched: Vec<PathBuf> = entries
            .iter()
            .filter(|(_, rel)| re.is_match(rel))
            .map(|(path, _)| path.clone())
            .collect();
        matched.sort();
        for path in matched {
            if seen.insert(path.clone()) {
                helpers.push(path);
            }
        }
    }

    Ok(helpers)
}

fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| pattern_to_regex(p).ok())
        .collect()
}

fn walk(spec_dir: &Path) -> Vec<(PathBuf, String)> {
    WalkDir::new(spec_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| {
            let rel = e
                .path()
                .strip_prefix(spec_dir)
                .ok()?
                .to_string_lossy()
                .replace('\\', "/");
            Some((e.path().to_path_buf(), rel))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn star_does_not_cross_directories() {
        let re = pattern_to_regex("*.spec.txt").unwrap();
        assert!(re.is_match("a.spec.txt"));
        assert!(!re.is_match("sub/a.spec.txt"));
    }

    #[test]
    fn double_star_crosses_directories() {
        let re = pattern_to_regex("**/*.spec.txt").unwrap();
        assert!(re.is_match("a.spec.txt"));
        assert!(re.is_match("sub/deep/a.spec.txt"));
        assert!(!re.is_match("a.txt"));
    }

    #[test]
    fn literal_dots_are_escaped() {
        let re = pattern_to_regex("a.spec.txt").unwrap();
        assert!(!re.is_match("aXspecXtxt"));
    }

    #[test]
    fn discovers_matching_files_sorted() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "b.spec.txt");
        touch(tmp.path(), "sub/a.spec.txt");
        touch(tmp.path(), "notes.txt");

        let files =
            discover_spec_files(tmp.path(), &["**/*.spec.txt".to_string()]).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("b.spec.txt"));
        assert!(files[1].ends_with("sub/a.spec.txt"));
    }

    #[test]
    fn missing_spec_dir_discovers_nothing() {
        let tmp = TempDir::new().unwrap();
        let files = discover_spec_files(
            &tmp.path().join("nope"),
            &["**/*.spec.txt".to_string()],
        )
        .unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn helpers_come_back_in_pattern_order() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "helpers/z_first.sh");
        touch(tmp.path(), "setup/a_second.sh");

        let helpers = match_helper_files(
            tmp.path(),
            &["helpers/*.sh".to_string(), "setup/*.sh".to_string()],
        )
        .unwrap();
        assert_eq!(helpers.len(), 2);
        assert!(helpers[0].ends_with("z_first.sh"));
        assert!(helpers[1].ends_with("a_second.sh"));
    }

    #[test]
    fn helpers_are_deduplicated_across_patterns() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "helpers/one.sh");

        let helpers = match_helper_files(
            tmp.path(),
            &["helpers/*.sh".to_string(), "**/*.sh".to_string()],
        )
        .unwrap();
        assert_eq!(helpers.len(), 1);
    }
}
