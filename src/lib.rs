pub mod error;
pub mod manifest;
pub mod presets;
pub mod toolchain;
pub mod orchestrator;
pub mod cli;

pub use error::{BuildError, ManifestError};
pub use manifest::{ManifestBuilder, ManifestDocument};
pub use orchestrator::{BuildOrchestrator, BuildResult};
