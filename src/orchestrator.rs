//! WebAssembly build of the KeyKit core through Emscripten.
//!
//! The command line is fixed: include path, output, the `-s`/`-D`/`-W` flag
//! set, the optimization level, then the source files in their listed
//! order. Output of every attempt is written to the build log before the
//! outcome is decided.

use clap::ValueEnum;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::toolchain::{CapturedOutput, CommandRunner, SystemRunner, ToolchainLocator};

pub const SOURCE_FILES: [&str; 22] = [
    "main.c", "util.c", "misc.c", "phrase.c", "sym.c", "keyto.c", "yacc.c", "code.c", "code2.c",
    "grid.c", "view.c", "menu.c", "task.c", "fifo.c", "mfin.c", "real.c", "kwind.c", "fsm.c",
    "bltin.c", "meth.c", "regex.c", "mdep_wasm.c",
];

const SETTINGS: [&str; 4] = [
    "ALLOW_MEMORY_GROWTH=1",
    // blocking calls in the interpreter loop
    "ASYNCIFY=1",
    "EXPORTED_FUNCTIONS=['_main']",
    "EXPORTED_RUNTIME_METHODS=['ccall','cwrap']",
];

const DEFINES: [&str; 1] = ["-D__EMSCRIPTEN__"];

const WARNING_SUPPRESSIONS: [&str; 4] = [
    "-Wno-implicit-function-declaration",
    "-Wno-int-conversion",
    "-Wno-incompatible-pointer-types",
    "-Wno-return-type",
];

pub const DEFAULT_OUTPUT: &str = "keykit.html";
pub const DEFAULT_LOG: &str = "build_log.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OptLevel {
    #[value(name = "0")]
    O0,
    #[value(name = "1")]
    O1,
    #[default]
    #[value(name = "2")]
    O2,
    #[value(name = "3")]
    O3,
    #[value(name = "s")]
    Os,
    #[value(name = "z")]
    Oz,
}

impl OptLevel {
    pub fn as_flag(&self) -> &str {
        match self {
            OptLevel::O0 => "-O0",
            OptLevel::O1 => "-O1",
            OptLevel::O2 => "-O2",
            OptLevel::O3 => "-O3",
            OptLevel::Os => "-Os",
            OptLevel::Oz => "-Oz",
        }
    }
}

/// One fully assembled compiler command.
#[derive(Debug, Clone)]
pub struct BuildInvocation {
    pub toolchain: PathBuf,
    pub output: String,
    pub flags: Vec<String>,
    pub sources: Vec<String>,
}

impl BuildInvocation {
    pub fn new(toolchain: PathBuf, output: &str, opt_level: OptLevel) -> Self {
        let mut flags = Vec::new();
        for setting in SETTINGS {
            flags.push("-s".to_string());
            flags.push(setting.to_string());
        }
        flags.extend(DEFINES.iter().map(|f| f.to_string()));
        flags.extend(WARNING_SUPPRESSIONS.iter().map(|f| f.to_string()));
        flags.push(opt_level.as_flag().to_string());

        Self {
            toolchain,
            output: output.to_string(),
            flags,
            sources: SOURCE_FILES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Arguments after the program name, in contract order.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-I.".to_string(), "-o".to_string(), self.output.clone()];
        args.extend(self.flags.iter().cloned());
        args.extend(self.sources.iter().cloned());
        args
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.toolchain.display().to_string()];
        parts.extend(self.args());
        parts.join(" ")
    }
}

/// Outcome of a successful build.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
    pub artifact: PathBuf,
}

pub struct BuildOrchestrator<R = SystemRunner> {
    source_dir: PathBuf,
    output: String,
    log_file: String,
    opt_level: OptLevel,
    locator: Box<dyn ToolchainLocator>,
    runner: R,
}

impl BuildOrchestrator<SystemRunner> {
    pub fn new(source_dir: impl AsRef<Path>, locator: Box<dyn ToolchainLocator>) -> Self {
        Self {
            source_dir: source_dir.as_ref().to_path_buf(),
            output: DEFAULT_OUTPUT.to_string(),
            log_file: DEFAULT_LOG.to_string(),
            opt_level: OptLevel::default(),
            locator,
            runner: SystemRunner,
        }
    }
}

impl<R: CommandRunner> BuildOrchestrator<R> {
    pub fn with_runner<T: CommandRunner>(self, runner: T) -> BuildOrchestrator<T> {
        BuildOrchestrator {
            source_dir: self.source_dir,
            output: self.output,
            log_file: self.log_file,
            opt_level: self.opt_level,
            locator: self.locator,
            runner,
        }
    }

    pub fn output(mut self, output: String) -> Self {
        self.output = output;
        self
    }

    pub fn log_file(mut self, log_file: String) -> Self {
        self.log_file = log_file;
        self
    }

    pub fn opt_level(mut self, opt_level: OptLevel) -> Self {
        self.opt_level = opt_level;
        self
    }

    pub fn log_path(&self) -> PathBuf {
        self.source_dir.join(&self.log_file)
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.source_dir.join(&self.output)
    }

    pub fn locate_toolchain(&self) -> Result<PathBuf, BuildError> {
        self.locator.locate()
    }

    /// Source files from the fixed list that are absent from the source dir.
    pub fn missing_sources(&self) -> Vec<&'static str> {
        SOURCE_FILES
            .iter()
            .copied()
            .filter(|name| !self.source_dir.join(name).is_file())
            .collect()
    }

    pub fn invocation(&self, toolchain: PathBuf) -> BuildInvocation {
        BuildInvocation::new(toolchain, &self.output, self.opt_level)
    }

    /// Locate the toolchain, compile once, and persist the combined output.
    pub fn build(&self) -> Result<BuildResult, BuildError> {
        println!("Compiling to WASM...");

        let toolchain = self.locate_toolchain()?;
        let invocation = self.invocation(toolchain);
        let log_path = self.log_path();

        println!("{}", invocation.command_line());
        println!("\nCompiling...");
        tracing::debug!(cwd = %self.source_dir.display(), "running toolchain");

        let run = self
            .runner
            .run(&invocation.toolchain, &invocation.args(), &self.source_dir);
        let captured = match run {
            Ok(captured) => captured,
            Err(source) => {
                let fault = CapturedOutput {
                    code: None,
                    stdout: String::new(),
                    stderr: format!(
                        "failed to start {}: {}",
                        invocation.toolchain.display(),
                        source
                    ),
                };
                if let Err(e) = self.write_log(&log_path, &fault) {
                    tracing::warn!(error = %e, "build log not written");
                }
                return Err(BuildError::Spawn {
                    program: invocation.toolchain,
                    log_path,
                    source,
                });
            }
        };

        println!("{}", captured.stdout);
        eprintln!("{}", captured.stderr);

        // The exit code decides the outcome even when the log cannot be kept
        let log_error = self.write_log(&log_path, &captured).err();
        if let Some(ref e) = log_error {
            tracing::warn!(error = %e, "build log not written");
        }

        if !captured.success() {
            println!("\n✗ Compilation failed with return code {}", format_code(captured.code));
            println!("Check {} for details", log_path.display());
            return Err(BuildError::CompileFailed {
                code: captured.code,
                log_path,
            });
        }

        if let Some(e) = log_error {
            return Err(e);
        }

        let artifact = self.artifact_path();
        if !artifact.is_file() {
            println!("\n✗ Toolchain reported success but {} is missing", artifact.display());
            return Err(BuildError::MissingArtifact { artifact, log_path });
        }

        println!("\n✓ Successfully built {}", self.output);

        Ok(BuildResult {
            exit_code: captured.code,
            stdout: captured.stdout,
            stderr: captured.stderr,
            log_path,
            artifact,
        })
    }

    fn write_log(&self, log_path: &Path, captured: &CapturedOutput) -> Result<(), BuildError> {
        fs::write(log_path, render_log(&captured.stdout, &captured.stderr)).map_err(|source| {
            BuildError::Log {
                path: log_path.to_path_buf(),
                source,
            }
        })
    }
}

pub fn render_log(stdout: &str, stderr: &str) -> String {
    format!("=== STDOUT ===\n{}\n\n=== STDERR ===\n{}", stdout, stderr)
}

fn format_code(code: Option<i32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::CandidateLocator;
    use std::cell::{Cell, RefCell};
    use tempfile::TempDir;

    /// Records invocations and optionally writes the output artifact.
    struct StubRunner {
        calls: Cell<usize>,
        program: RefCell<Option<PathBuf>>,
        code: Option<i32>,
        stderr: String,
        write_artifact: bool,
    }

    impl StubRunner {
        fn exiting(code: i32, write_artifact: bool) -> Self {
            Self {
                calls: Cell::new(0),
                program: RefCell::new(None),
                code: Some(code),
                stderr: "warning: something".to_string(),
                write_artifact,
            }
        }
    }

    impl CommandRunner for &StubRunner {
        fn run(
            &self,
            program: &Path,
            args: &[String],
            cwd: &Path,
        ) -> std::io::Result<CapturedOutput> {
            self.calls.set(self.calls.get() + 1);
            self.program.replace(Some(program.to_path_buf()));
            if self.write_artifact {
                let output = args.iter().skip_while(|a| *a != "-o").nth(1).unwrap();
                fs::write(cwd.join(output), "<html></html>")?;
            }
            Ok(CapturedOutput {
                code: self.code,
                stdout: "emcc: compiled".to_string(),
                stderr: self.stderr.clone(),
            })
        }
    }

    fn fake_toolchain(dir: &Path) -> Box<dyn ToolchainLocator> {
        let emcc = dir.join("emcc");
        fs::write(&emcc, b"").unwrap();
        Box::new(CandidateLocator::new().candidate(emcc))
    }

    #[test]
    fn test_command_order() {
        let invocation = BuildInvocation::new(PathBuf::from("emcc"), "keykit.html", OptLevel::O2);
        let args = invocation.args();

        assert_eq!(&args[..3], &["-I.", "-o", "keykit.html"]);
        assert_eq!(args[3], "-s");
        assert_eq!(args[4], "ALLOW_MEMORY_GROWTH=1");
        assert_eq!(args[6], "ASYNCIFY=1");
        assert_eq!(args[8], "EXPORTED_FUNCTIONS=['_main']");
        assert_eq!(args[10], "EXPORTED_RUNTIME_METHODS=['ccall','cwrap']");
        assert_eq!(args[11], "-D__EMSCRIPTEN__");
        assert_eq!(args[15], "-Wno-return-type");
        assert_eq!(args[16], "-O2");
        assert_eq!(&args[17..], &SOURCE_FILES);
        assert!(invocation.command_line().starts_with("emcc -I. -o keykit.html -s"));
    }

    #[test]
    fn test_opt_level_stays_last_flag() {
        let invocation = BuildInvocation::new(PathBuf::from("emcc"), "out.html", OptLevel::Oz);

        assert_eq!(invocation.flags.last().map(String::as_str), Some("-Oz"));
        assert_eq!(invocation.sources.first().map(String::as_str), Some("main.c"));
        assert_eq!(invocation.sources.last().map(String::as_str), Some("mdep_wasm.c"));
    }

    #[test]
    fn test_success_reports_artifact_and_writes_log() {
        let dir = TempDir::new().unwrap();
        let runner = StubRunner::exiting(0, true);
        let orchestrator =
            BuildOrchestrator::new(dir.path(), fake_toolchain(dir.path())).with_runner(&runner);

        let result = orchestrator.build().unwrap();

        assert_eq!(runner.calls.get(), 1);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.artifact, dir.path().join("keykit.html"));
        assert!(result.artifact.is_file());

        let log = fs::read_to_string(&result.log_path).unwrap();
        assert_eq!(log, "=== STDOUT ===\nemcc: compiled\n\n=== STDERR ===\nwarning: something");
    }

    #[test]
    fn test_failure_keeps_log() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(DEFAULT_LOG), "stale log from an earlier run").unwrap();
        let runner = StubRunner::exiting(1, false);
        let orchestrator =
            BuildOrchestrator::new(dir.path(), fake_toolchain(dir.path())).with_runner(&runner);

        let err = orchestrator.build().unwrap_err();

        match err {
            BuildError::CompileFailed { code, log_path } => {
                assert_eq!(code, Some(1));
                let log = fs::read_to_string(log_path).unwrap();
                assert!(log.contains("=== STDERR ===\nwarning: something"));
                assert!(!log.contains("stale"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unwritable_log_keeps_compile_failure() {
        let dir = TempDir::new().unwrap();
        let mut runner = StubRunner::exiting(1, false);
        runner.stderr = "main.c:1: error: undeclared identifier".to_string();
        let orchestrator = BuildOrchestrator::new(dir.path(), fake_toolchain(dir.path()))
            .log_file("missing/sub/build_log.txt".to_string())
            .with_runner(&runner);

        let err = orchestrator.build().unwrap_err();

        assert_eq!(runner.calls.get(), 1);
        assert!(matches!(err, BuildError::CompileFailed { code: Some(1), .. }));
        assert!(!dir.path().join("missing").exists());
    }

    #[test]
    fn test_unwritable_log_fails_otherwise_good_build() {
        let dir = TempDir::new().unwrap();
        let runner = StubRunner::exiting(0, true);
        let orchestrator = BuildOrchestrator::new(dir.path(), fake_toolchain(dir.path()))
            .log_file("missing/sub/build_log.txt".to_string())
            .with_runner(&runner);

        let err = orchestrator.build().unwrap_err();

        assert!(matches!(err, BuildError::Log { .. }));
        assert!(dir.path().join(DEFAULT_OUTPUT).is_file());
    }

    #[test]
    fn test_relative_toolchain_survives_source_dir() {
        let dir = TempDir::new().unwrap();
        let runner = StubRunner::exiting(0, true);
        // relative to the package root, where cargo runs tests
        let locator = CandidateLocator::new().explicit(Some(PathBuf::from("Cargo.toml")));
        let orchestrator =
            BuildOrchestrator::new(dir.path(), Box::new(locator)).with_runner(&runner);

        orchestrator.build().unwrap();

        let program = runner.program.borrow().clone().unwrap();
        assert!(program.is_absolute());
        assert_eq!(program, Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml"));
    }

    #[test]
    fn test_success_without_artifact_is_failure() {
        let dir = TempDir::new().unwrap();
        let runner = StubRunner::exiting(0, false);
        let orchestrator =
            BuildOrchestrator::new(dir.path(), fake_toolchain(dir.path())).with_runner(&runner);

        assert!(matches!(orchestrator.build(), Err(BuildError::MissingArtifact { .. })));
        assert!(dir.path().join(DEFAULT_LOG).is_file());
    }

    #[test]
    fn test_missing_toolchain_never_spawns() {
        let dir = TempDir::new().unwrap();
        let runner = StubRunner::exiting(0, true);
        let locator = CandidateLocator::new().candidate(dir.path().join("absent-emcc"));
        let orchestrator =
            BuildOrchestrator::new(dir.path(), Box::new(locator)).with_runner(&runner);

        let err = orchestrator.build().unwrap_err();

        assert!(matches!(err, BuildError::ToolchainNotFound { .. }));
        assert_eq!(runner.calls.get(), 0);
        assert!(!dir.path().join(DEFAULT_LOG).exists());
    }

    #[test]
    fn test_missing_sources() {
        let dir = TempDir::new().unwrap();
        for name in &SOURCE_FILES[1..] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let orchestrator = BuildOrchestrator::new(dir.path(), Box::new(CandidateLocator::new()));

        assert_eq!(orchestrator.missing_sources(), vec!["main.c"]);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::toolchain::test_support::{spawn_guard, write_stub};
        use std::os::unix::fs::PermissionsExt;

        const WRITES_ARTIFACT: &str = r#"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
echo "building $out"
echo "note: stub toolchain" >&2
echo placeholder > "$out"
exit 0
"#;

        #[test]
        fn test_stub_toolchain_success() {
            let _guard = spawn_guard();
            let dir = TempDir::new().unwrap();
            let stub = write_stub(dir.path(), WRITES_ARTIFACT);
            let locator = CandidateLocator::new().explicit(Some(stub));

            let result = BuildOrchestrator::new(dir.path(), Box::new(locator)).build().unwrap();

            assert_eq!(result.artifact, dir.path().join("keykit.html"));
            assert!(result.stdout.contains("building keykit.html"));
            let log = fs::read_to_string(&result.log_path).unwrap();
            assert!(log.contains("=== STDOUT ==="));
            assert!(log.contains("=== STDERR ===\nnote: stub toolchain"));
        }

        #[test]
        fn test_stub_toolchain_failure() {
            let _guard = spawn_guard();
            let dir = TempDir::new().unwrap();
            let stub = write_stub(dir.path(), "echo 'error: main.c not found' >&2\nexit 1\n");
            let locator = CandidateLocator::new().explicit(Some(stub));

            let err = BuildOrchestrator::new(dir.path(), Box::new(locator)).build().unwrap_err();

            assert!(matches!(err, BuildError::CompileFailed { code: Some(1), .. }));
            let log = fs::read_to_string(dir.path().join(DEFAULT_LOG)).unwrap();
            assert!(log.contains("error: main.c not found"));
        }

        #[test]
        fn test_unrunnable_toolchain_is_spawn_error() {
            let _guard = spawn_guard();
            let dir = TempDir::new().unwrap();
            let not_executable = dir.path().join("emcc");
            fs::write(&not_executable, b"not a program").unwrap();
            fs::set_permissions(&not_executable, fs::Permissions::from_mode(0o644)).unwrap();
            let locator = CandidateLocator::new().explicit(Some(not_executable));

            let err = BuildOrchestrator::new(dir.path(), Box::new(locator)).build().unwrap_err();

            assert!(matches!(err, BuildError::Spawn { .. }));
            let log = fs::read_to_string(dir.path().join(DEFAULT_LOG)).unwrap();
            assert!(log.contains("failed to start"));
        }
    }
}
