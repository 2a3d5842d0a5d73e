use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::manifest::{ManifestBuilder, ManifestStatus};
use crate::orchestrator::{BuildOrchestrator, OptLevel, DEFAULT_LOG, DEFAULT_OUTPUT, SOURCE_FILES};
use crate::presets::{ManifestPresets, Preset, PresetKind};
use crate::toolchain::CandidateLocator;

#[derive(Parser)]
#[command(name = "keypack")]
#[command(about = "Generate KeyKit asset manifests and build the WebAssembly core")]
#[command(version)]
pub struct Cli {
    /// Show debug diagnostics (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write asset manifests (all presets when none are named)
    Manifest {
        /// Presets to generate
        #[arg(value_enum)]
        presets: Vec<PresetKind>,

        /// Project root holding lib/, local/lib/ and local/music/
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Directory to scan instead of the preset default (one preset only)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Report stale or missing manifests without writing
        #[arg(long)]
        check: bool,
    },

    /// Compile the KeyKit sources to a web bundle with Emscripten
    Build {
        #[command(flatten)]
        toolchain: ToolchainArgs,

        /// Output bundle, relative to the source directory
        #[arg(long, default_value = DEFAULT_OUTPUT)]
        output: String,

        /// Build log, relative to the source directory
        #[arg(long, default_value = DEFAULT_LOG)]
        log: String,

        /// Optimization level
        #[arg(long, value_enum, default_value = "2")]
        opt_level: OptLevel,
    },

    /// Check toolchain, sources and asset directories
    Doctor {
        #[command(flatten)]
        toolchain: ToolchainArgs,

        /// Project root holding lib/, local/lib/ and local/music/
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

#[derive(clap::Args)]
pub struct ToolchainArgs {
    /// Directory containing the C sources
    #[arg(long, default_value = ".")]
    source_dir: PathBuf,

    /// Path to emcc; no other location is tried when set
    #[arg(long, env = "KEYPACK_EMCC")]
    toolchain: Option<PathBuf>,

    /// emsdk checkout to look for emcc in
    #[arg(long, env = "EMSDK")]
    emsdk: Option<PathBuf>,
}

impl ToolchainArgs {
    fn locator(&self) -> CandidateLocator {
        CandidateLocator::new()
            .explicit(self.toolchain.clone())
            .emsdk(self.emsdk.clone())
            .search_path(true)
    }
}

pub fn run_cli() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Manifest {
            presets,
            root,
            dir,
            check,
        } => manifest_command(presets, root, dir, check),
        Commands::Build {
            toolchain,
            output,
            log,
            opt_level,
        } => build_command(toolchain, output, log, opt_level),
        Commands::Doctor { toolchain, root } => doctor_command(toolchain, root),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Ignore a second init when called from tests
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

fn manifest_command(
    kinds: Vec<PresetKind>,
    root: PathBuf,
    dir_override: Option<PathBuf>,
    check: bool,
) -> Result<ExitCode> {
    let presets = ManifestPresets::new();
    let selected = select_presets(&presets, &kinds)?;

    if dir_override.is_some() && selected.len() != 1 {
        return Err(anyhow!("--dir needs exactly one preset, got {}", selected.len()));
    }

    let mut failures = 0;
    let mut outdated = 0;

    for preset in &selected {
        let dir = dir_override.clone().unwrap_or_else(|| preset.dir_under(&root));
        let builder = ManifestBuilder::new(&dir, preset.config.clone());

        let outcome = if check {
            check_one(&builder).map(|current| {
                if !current {
                    outdated += 1;
                }
            })
        } else {
            generate_one(&builder)
        };

        // One failing directory must not stop the other presets
        let outcome =
            outcome.with_context(|| format!("{} manifest failed", preset.kind.as_str()));
        if let Err(e) = outcome {
            eprintln!("Error: {:#}", e);
            failures += 1;
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} of {} manifests failed", failures, selected.len()));
    }

    if outdated > 0 {
        println!("\n{} manifest(s) out of date, run without --check to regenerate", outdated);
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

fn select_presets<'a>(
    presets: &'a ManifestPresets,
    kinds: &[PresetKind],
) -> Result<Vec<&'a Preset>> {
    if kinds.is_empty() {
        return Ok(presets.iter().collect());
    }

    let mut selected: Vec<&Preset> = Vec::new();
    for kind in kinds {
        let preset = presets
            .get(*kind)
            .ok_or_else(|| anyhow!("No manifest preset for {}", kind.as_str()))?;
        if !selected.iter().any(|p| p.kind == *kind) {
            selected.push(preset);
        }
    }

    Ok(selected)
}

fn generate_one(builder: &ManifestBuilder) -> Result<()> {
    let document = builder.generate()?;
    let config = builder.config();

    println!(
        "Generated {} with {} {} files",
        builder.output_path().display(),
        document.len(),
        config.label
    );

    Ok(())
}

/// Returns whether the manifest on disk is current.
fn check_one(builder: &ManifestBuilder) -> Result<bool> {
    let status = builder.check()?;
    let path = builder.output_path();

    match status {
        ManifestStatus::UpToDate => println!("✓ {} is up to date", path.display()),
        ManifestStatus::Stale => println!("✗ {} is stale", path.display()),
        ManifestStatus::Missing => println!("✗ {} is missing", path.display()),
    }

    Ok(status == ManifestStatus::UpToDate)
}

fn build_command(
    toolchain: ToolchainArgs,
    output: String,
    log: String,
    opt_level: OptLevel,
) -> Result<ExitCode> {
    let orchestrator = BuildOrchestrator::new(&toolchain.source_dir, Box::new(toolchain.locator()))
        .output(output)
        .log_file(log)
        .opt_level(opt_level);

    let result = orchestrator.build().context("WebAssembly build failed")?;

    println!("Artifact: {}", result.artifact.display());

    Ok(ExitCode::SUCCESS)
}

fn doctor_command(toolchain: ToolchainArgs, root: PathBuf) -> Result<ExitCode> {
    println!("Keypack Doctor - Checking build requirements...\n");

    let mut problems = 0;
    let orchestrator = BuildOrchestrator::new(&toolchain.source_dir, Box::new(toolchain.locator()));

    match orchestrator.locate_toolchain() {
        Ok(path) => println!("✓ emcc found at: {}", path.display()),
        Err(e) => {
            println!("✗ {}", e);
            println!("  Install emsdk and set EMSDK, or pass --toolchain");
            problems += 1;
        }
    }

    let missing = orchestrator.missing_sources();
    if missing.is_empty() {
        println!(
            "✓ All {} sources present in {}",
            SOURCE_FILES.len(),
            toolchain.source_dir.display()
        );
    } else {
        println!(
            "✗ {} of {} sources missing from {}:",
            missing.len(),
            SOURCE_FILES.len(),
            toolchain.source_dir.display()
        );
        for name in &missing {
            println!("    {}", name);
        }
        problems += 1;
    }

    println!("\nAsset directories:");
    for preset in ManifestPresets::new().iter() {
        report_asset_dir(preset, &root);
    }

    if problems > 0 {
        println!("\n✗ Keypack doctor found {} problem(s)", problems);
        return Ok(ExitCode::FAILURE);
    }

    println!("\n✓ Keypack doctor check complete");
    Ok(ExitCode::SUCCESS)
}

fn report_asset_dir(preset: &Preset, root: &Path) {
    let dir = preset.dir_under(root);
    if dir.is_dir() {
        println!("  ✓ {}: {}", preset.kind.as_str(), dir.display());
    } else {
        // Asset directories are optional for the build itself
        println!("  - {}: {} (not present)", preset.kind.as_str(), dir.display());
    }
}
