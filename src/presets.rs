use clap::ValueEnum;
use std::path::{Path, PathBuf};

use crate::manifest::{Exclusion, ManifestConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PresetKind {
    /// Bundled library: scripts, compiled scripts, binaries, text, images, lists
    Library,
    /// User library: scripts only, editor backups excluded
    LocalLibrary,
    /// MIDI files and KeyKit groove files
    Music,
}

impl PresetKind {
    pub const ALL: [PresetKind; 3] =
        [PresetKind::Library, PresetKind::LocalLibrary, PresetKind::Music];

    pub fn as_str(&self) -> &str {
        match self {
            PresetKind::Library => "library",
            PresetKind::LocalLibrary => "local-library",
            PresetKind::Music => "music",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Preset {
    pub kind: PresetKind,
    /// Directory relative to the project root.
    pub default_dir: PathBuf,
    pub config: ManifestConfig,
}

impl Preset {
    pub fn dir_under(&self, root: &Path) -> PathBuf {
        root.join(&self.default_dir)
    }
}

#[derive(Debug, Clone)]
pub struct ManifestPresets {
    presets: Vec<Preset>,
}

impl ManifestPresets {
    pub fn new() -> Self {
        let presets = vec![
            // Bundled library
            Preset {
                kind: PresetKind::Library,
                default_dir: PathBuf::from("lib"),
                config: ManifestConfig::new(
                    "library",
                    &["*.k", "*.kc", "*.kb", "*.kbm", "*.exp", "*.txt", "*.ppm", "*.lst"],
                    "lib_manifest.json",
                ),
            },
            // User library
            Preset {
                kind: PresetKind::LocalLibrary,
                default_dir: PathBuf::from("local").join("lib"),
                config: ManifestConfig::new("lib", &["*.k", "*.K"], "lib_manifest.json")
                    .exclude(Exclusion::Suffix("~".to_string())),
            },
            // Music
            Preset {
                kind: PresetKind::Music,
                default_dir: PathBuf::from("local").join("music"),
                config: ManifestConfig::new(
                    "music",
                    &["*.mid", "*.MID", "*.midi", "*.MIDI", "*.kg", "*.KG"],
                    "music_manifest.json",
                ),
            },
        ];

        Self { presets }
    }

    pub fn get(&self, kind: PresetKind) -> Option<&Preset> {
        self.presets.iter().find(|preset| preset.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter()
    }
}

impl Default for ManifestPresets {
    fn default() -> Self {
        Self::new()
    }
}
