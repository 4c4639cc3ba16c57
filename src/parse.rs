use crate::error::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// One named case from a spec file: a shell command and the output it is
/// expected to produce. An empty expected block asserts exit status 0 only.
#[derive(Debug, Clone)]
pub struct SpecCase {
    pub name: String,
    pub command: String,
    pub expected_output: String,
    pub file_path: PathBuf,
    pub start_line: usize,
}

static CASE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^(={3,})\n(.+?)\n\1\n(.+?)\n(-{3,})\n(.*?)(?=\n={3,}\n|\z)").unwrap()
});

pub fn parse_spec_file(path: &Path) -> Result<Vec<SpecCase>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::ReadSpec {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_spec_content(&content, path)
}

pub fn parse_spec_content(content: &str, path: &Path) -> Result<Vec<SpecCase>> {
    let mut cases = Vec::new();

    for caps in CASE_PATTERN.captures_iter(content) {
        let name = caps.get(2).unwrap().as_str().trim().to_string();
        let command = caps.get(3).unwrap().as_str().trim().to_string();
        let expected = caps
            .get(5)
            .unwrap()
            .as_str()
            .trim_end_matches('\n')
            .to_string();

        let match_start = caps.get(0).unwrap().start();
        let start_line = content[..match_start].matches('\n').count() + 1;

        cases.push(SpecCase {
            name,
            command,
            expected_output: expected,
            file_path: path.to_path_buf(),
            start_line,
        });
    }

    if cases.is_empty() && !content.trim().is_empty() {
        return Err(Error::ParseSpec {
            path: path.to_path_buf(),
            message: "no spec cases found".to_string(),
        });
    }

    Ok(cases)
}
