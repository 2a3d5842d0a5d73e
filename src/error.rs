use std::path::PathBuf;
use thiserror::Error;

/// Failure while generating a single asset manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Filesystem error at {}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid glob pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Failed to serialize manifest to JSON")]
    Serialize(#[from] serde_json::Error),
}

impl ManifestError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ManifestError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a WebAssembly build. `Spawn`, `CompileFailed` and
/// `MissingArtifact` leave the build log behind.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Toolchain not found (tried: {})", format_tried(.tried))]
    ToolchainNotFound { tried: Vec<PathBuf> },

    #[error("Could not run toolchain {} (see {})", .program.display(), .log_path.display())]
    Spawn {
        program: PathBuf,
        log_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Compilation failed with return code {} (see {})",
        format_code(.code),
        .log_path.display()
    )]
    CompileFailed {
        code: Option<i32>,
        log_path: PathBuf,
    },

    #[error(
        "Toolchain exited successfully but produced no {} (see {})",
        .artifact.display(),
        .log_path.display()
    )]
    MissingArtifact {
        artifact: PathBuf,
        log_path: PathBuf,
    },

    #[error("Failed to write build log {}", .path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn format_tried(tried: &[PathBuf]) -> String {
    if tried.is_empty() {
        return "no candidates".to_string();
    }
    tried
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}
