use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the logging pipeline, the analyzer and the formatter.
///
/// I/O failures keep the offending path and the OS error. Decoding failures
/// carry a human-readable description of the violated layout rule.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open {}", .path.display())]
    IoOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {}", .path.display())]
    IoRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}", .path.display())]
    IoWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A cursor did not land on a block or file boundary, or a block
    /// references a message key that is not in the format sidecar.
    #[error("malformed log: {0}")]
    MalformedLog(String),

    /// The sidecar references a parameter key the analyzer does not know.
    #[error("unregistered parameter key {0} in format file")]
    UnregisteredParameter(u32),

    /// The sidecar contains two entries with the same message key.
    #[error("duplicate format key {0} in format file")]
    DuplicateFormat(u32),

    /// A parameter type was registered twice on the same analyzer.
    #[error("parameter key {0} already registered")]
    DuplicateParameter(u32),

    /// A message key with no matching format descriptor was looked up.
    #[error("unknown format key {0}")]
    UnknownFormat(u32),

    /// Set algebra between trees built from different analyzers.
    #[error("trees belong to different analyzers")]
    ForeignTree,

    /// Typed parameter access with a mismatched type or out-of-range index.
    #[error("parameter {index} does not match the requested type")]
    ParameterMismatch { index: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
