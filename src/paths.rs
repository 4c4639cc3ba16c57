//! Host-platform normalization of path-like command-line arguments.
//!
//! Windows shells hand us backslash-separated paths; everything downstream
//! (spec discovery, pattern matching, reporter output) works with forward
//! slashes, so arguments are rewritten once, at the parsing boundary.

#[cfg(windows)]
pub fn normalize_path_arg(arg: &str) -> String {
    arg.replace('\\', "/")
}

#[cfg(not(windows))]
pub fn normalize_path_arg(arg: &str) -> String {
    arg.to_string()
}
