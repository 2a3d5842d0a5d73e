//! Locating and running the external Emscripten compiler.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::BuildError;

pub const EMCC: &str = "emcc";

/// Strategy for finding the compiler executable.
pub trait ToolchainLocator {
    fn locate(&self) -> Result<PathBuf, BuildError>;
}

/// Ordered candidate lookup; the first existing file wins.
///
/// An explicit override is authoritative: when it is set and missing,
/// resolution fails instead of falling back to the other candidates.
#[derive(Debug, Clone, Default)]
pub struct CandidateLocator {
    explicit: Option<PathBuf>,
    candidates: Vec<PathBuf>,
    search_path: bool,
}

impl CandidateLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn explicit(mut self, path: Option<PathBuf>) -> Self {
        self.explicit = path;
        self
    }

    pub fn candidate(mut self, path: impl Into<PathBuf>) -> Self {
        self.candidates.push(path.into());
        self
    }

    /// Add the compiler location inside an emsdk checkout.
    pub fn emsdk(self, root: Option<PathBuf>) -> Self {
        match root {
            Some(root) => self.candidate(emsdk_emcc(&root)),
            None => self,
        }
    }

    pub fn search_path(mut self, search: bool) -> Self {
        self.search_path = search;
        self
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }
}

impl ToolchainLocator for CandidateLocator {
    fn locate(&self) -> Result<PathBuf, BuildError> {
        if let Some(ref explicit) = self.explicit {
            tracing::debug!(path = %explicit.display(), "checking explicit toolchain");
            if explicit.is_file() {
                return Ok(absolutize(explicit));
            }
            return Err(BuildError::ToolchainNotFound {
                tried: vec![explicit.clone()],
            });
        }

        let mut tried = Vec::new();
        for candidate in &self.candidates {
            tracing::debug!(path = %candidate.display(), "checking toolchain candidate");
            if candidate.is_file() {
                return Ok(absolutize(candidate));
            }
            tried.push(candidate.clone());
        }

        if self.search_path {
            match which::which(EMCC) {
                Ok(path) => return Ok(path),
                Err(e) => {
                    tracing::debug!(error = %e, "{} not on PATH", EMCC);
                    tried.push(PathBuf::from(EMCC));
                }
            }
        }

        Err(BuildError::ToolchainNotFound { tried })
    }
}

/// The compiler runs with the source directory as its working directory, so
/// a relative hit must be pinned to where it was found.
fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

pub fn emsdk_emcc(root: &Path) -> PathBuf {
    let file_name = if cfg!(target_os = "windows") { "emcc.bat" } else { EMCC };
    root.join("upstream").join("emscripten").join(file_name)
}

/// Output of one finished subprocess, both streams captured in full.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs a program to completion. `Err` means the process could not be run
/// at all, not that it exited non-zero.
pub trait CommandRunner {
    fn run(&self, program: &Path, args: &[String], cwd: &Path) -> std::io::Result<CapturedOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[String], cwd: &Path) -> std::io::Result<CapturedOutput> {
        let output = Command::new(program).args(args).current_dir(cwd).output()?;

        Ok(CapturedOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
