use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ExecFlow operations
#[derive(Error, Debug)]
pub enum ExecFlowError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transformation error in {} at line {line}: {reason}", path.display())]
    Transformation {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Compilation of {} failed: {output}", path.display())]
    Compile { path: PathBuf, output: String },

    #[error(
        "Debugger session {} {limit_ms} ms; trace truncated after {entries} entries",
        if *stalled { "stalled for" } else { "ran longer than" }
    )]
    SessionTimeout {
        limit_ms: u64,
        /// No output within the idle timeout, as opposed to a run over budget
        stalled: bool,
        entries: usize,
    },

    #[error("No original line for transformed line {line} of {} ({signature})", path.display())]
    MappingGap {
        path: PathBuf,
        signature: String,
        line: usize,
    },

    #[error("Debugger process ended unexpectedly: {0}")]
    ProcessCrash(String),

    #[error("Malformed debugger report: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl ExecFlowError {
    /// Whether the error must abort the whole batch instead of a single
    /// element or file.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::ConfigParse(_) | Self::Regex(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::StorageFull
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::ReadOnlyFilesystem
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecFlowError>;
