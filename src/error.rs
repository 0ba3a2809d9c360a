use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::{AssetKind, PathRole};

#[derive(Debug, Error)]
pub enum SitekitError {
    #[error("Invalid configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Build failed:\n{0}")]
    Build(#[from] BuildError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Dev server error:\n{0}")]
    Server(#[from] ServerError),
}

/// Raised at startup, before any task runs. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{path}':\n{source}")]
    FileSystem {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse config file:\n{0}")]
    Toml(#[from] Box<toml::de::Error>),

    #[error("No path configured for {kind} ({role})")]
    MissingPath { kind: AssetKind, role: PathRole },

    #[error("Couldn't compile glob pattern:\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Task '{0}' is registered twice")]
    DuplicateTask(String),

    #[error("Task '{from}' references unknown task '{to}'")]
    UnknownRef { from: String, to: String },

    #[error("Task graph contains a cycle through '{0}'")]
    Cycle(String),
}

/// A single transform step rejected its input.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("scss compilation failed:\n{0}")]
    Scss(#[from] Box<grass::Error>),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("include '{include}' not found (from '{from}')")]
    MissingInclude {
        include: Utf8PathBuf,
        from: Utf8PathBuf,
    },

    #[error("include cycle through '{0}'")]
    IncludeCycle(Utf8PathBuf),

    #[error("'@if {0}' has no matching '@endif'")]
    UnterminatedIf(String),

    #[error("unknown preprocess variable '{0}'")]
    UnknownVariable(String),

    #[error("input is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("couldn't compile glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A corrupt or unwritable cache entry. Never fatal; the caller logs it and
/// falls back to recompressing.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry '{path}' is unreadable: {source}")]
    Unreadable {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("couldn't store cache entry '{path}': {source}")]
    Store {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

/// Failure of a single task unit invocation.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("Couldn't compile glob pattern:\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't run glob:\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8:\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("'{file}': {source}")]
    Transform {
        file: Utf8PathBuf,
        source: TransformError,
    },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error("Task '{name}':\n{source}")]
    Task { name: String, source: UnitError },

    #[error("Task '{0}' panicked")]
    Panic(String),
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Couldn't bind the reload socket: {0}")]
    Bind(std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
