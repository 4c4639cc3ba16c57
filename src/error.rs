use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read spec file '{path}'")]
    ReadSpec {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse spec file '{path}': {message}")]
    ParseSpec { path: PathBuf, message: String },

    #[error("Failed to read config file '{path}'")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {message}")]
    ParseConfig { path: PathBuf, message: String },

    #[error("Failed to load reporter module {identifier}\nUnderlying error: {details}\n(end underlying error)")]
    ReporterLoad { identifier: String, details: String },

    #[error("Failed to instantiate reporter from {identifier}\nUnderlying error: {details}\n(end underlying error)")]
    ReporterInstantiate { identifier: String, details: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Walkdir error: {0}")]
    WalkDir(#[from] walkdir::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
