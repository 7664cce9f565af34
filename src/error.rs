use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

pub type Result<T, E = ExecutorError> = std::result::Result<T, E>;

/// Failures of the build/run/cleanup lifecycle and of executor lookup.
///
/// Timeouts, runtime errors and spawn failures of the user's program are not
/// errors: they are reported through [`crate::verdict::ExitType`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to start toolchain {toolchain:?}: {source}")]
    Build {
        toolchain: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Compilation of {src:?} failed ({status}): {diagnostics}")]
    Compilation {
        src: PathBuf,
        status: ExitStatus,
        diagnostics: String,
    },

    #[error("Failed to remove build artifact {path:?}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No executor registered for language `{0}`")]
    UnknownLanguage(String),

    #[error("An executor is already registered for language `{0}`")]
    DuplicateLanguage(String),

    #[error("Unknown checker `{0}` (expected exact, line or token)")]
    UnknownChecker(String),

    #[error("{src:?} has not been built yet")]
    NotBuilt { src: PathBuf },

    #[error("{src:?} has already been built")]
    AlreadyBuilt { src: PathBuf },

    #[error("Build artifacts for {src:?} were already cleaned up")]
    CleanedUp { src: PathBuf },
}
