//! Error types for ranksync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, read-only home, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.ranksync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// The file parsed but holds an unusable value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A persisted RolesText that cannot be turned back into group names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Two adjacent delimiters, or a leading/trailing delimiter.
    #[error("empty group name at position {position} in roles text")]
    EmptySegment { position: usize },

    /// A group name containing a control character (newline, NUL, ...).
    #[error("group name {name:?} contains a control character")]
    ControlCharacter { name: String },

    /// A group name that would split into several names once stored.
    #[error("group name {name:?} contains the roles delimiter")]
    ContainsDelimiter { name: String },

    #[error("group name is empty")]
    EmptyName,
}
