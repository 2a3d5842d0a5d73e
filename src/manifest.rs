//! Asset manifest generation.
//!
//! A manifest is a JSON array of bare filenames found in one directory,
//! deduplicated and sorted, which the runtime reads at startup instead of
//! listing the directory itself.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ManifestError;

/// Filenames rejected even when an included pattern matches them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    /// Reject names ending with the given suffix, e.g. editor backups (`~`).
    Suffix(String),
}

impl Exclusion {
    pub fn excludes(&self, file_name: &str) -> bool {
        match self {
            Exclusion::Suffix(suffix) => file_name.ends_with(suffix.as_str()),
        }
    }
}

/// One manifest configuration: which names to collect and where to write them.
#[derive(Debug, Clone)]
pub struct ManifestConfig {
    /// Noun used in operator feedback ("library", "music", ...).
    pub label: String,
    pub patterns: Vec<String>,
    pub exclude: Option<Exclusion>,
    pub output: String,
    pub case_sensitive: bool,
}

impl ManifestConfig {
    pub fn new(label: &str, patterns: &[&str], output: &str) -> Self {
        Self {
            label: label.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            exclude: None,
            output: output.to_string(),
            case_sensitive: true,
        }
    }

    pub fn exclude(mut self, exclusion: Exclusion) -> Self {
        self.exclude = Some(exclusion);
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    fn match_options(&self) -> MatchOptions {
        MatchOptions {
            case_sensitive: self.case_sensitive,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        }
    }
}

/// Result of scanning one directory against a configuration.
#[derive(Debug, Clone)]
pub struct AssetSet {
    pub entries: BTreeSet<String>,
}

impl AssetSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_document(self) -> ManifestDocument {
        ManifestDocument {
            entries: self.entries.into_iter().collect(),
        }
    }
}

/// The persisted manifest: a bare JSON array of filenames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestDocument {
    pub entries: Vec<String>,
}

impl ManifestDocument {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Two-space indented JSON, `[]` when empty.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Outcome of comparing the on-disk manifest with the directory contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestStatus {
    UpToDate,
    Stale,
    Missing,
}

pub struct ManifestBuilder {
    base_dir: PathBuf,
    config: ManifestConfig,
}

impl ManifestBuilder {
    /// All paths are resolved against `base_dir`, never the process
    /// working directory.
    pub fn new(base_dir: impl AsRef<Path>, config: ManifestConfig) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            config,
        }
    }

    pub fn config(&self) -> &ManifestConfig {
        &self.config
    }

    pub fn output_path(&self) -> PathBuf {
        self.base_dir.join(&self.config.output)
    }

    /// Scan the base directory (single level) for files matching the
    /// configured patterns.
    pub fn scan(&self) -> Result<AssetSet, ManifestError> {
        let patterns = self.compile_patterns()?;
        let file_names = self.list_file_names()?;
        let options = self.config.match_options();

        let mut matches = Vec::new();
        for (raw, pattern) in self.config.patterns.iter().zip(&patterns) {
            let before = matches.len();
            matches.extend(
                file_names
                    .iter()
                    .filter(|name| pattern.matches_with(name, options))
                    .cloned(),
            );
            tracing::debug!(pattern = %raw, matched = matches.len() - before, "scanned pattern");
        }

        if let Some(ref exclusion) = self.config.exclude {
            matches.retain(|name| !exclusion.excludes(name));
        }

        Ok(AssetSet {
            entries: matches.into_iter().collect(),
        })
    }

    /// Scan and write the manifest, replacing any previous content.
    pub fn generate(&self) -> Result<ManifestDocument, ManifestError> {
        let document = self.scan()?.into_document();
        let json = document.to_json()?;
        let output_path = self.output_path();

        fs::write(&output_path, json)
            .map_err(|e| ManifestError::filesystem(&output_path, e))?;

        tracing::debug!(path = %output_path.display(), entries = document.len(), "wrote manifest");
        Ok(document)
    }

    /// Compare what `generate` would write with the file on disk, without
    /// writing anything.
    pub fn check(&self) -> Result<ManifestStatus, ManifestError> {
        let expected = self.scan()?.into_document().to_json()?;
        let output_path = self.output_path();

        match fs::read_to_string(&output_path) {
            Ok(current) if current == expected => Ok(ManifestStatus::UpToDate),
            Ok(_) => Ok(ManifestStatus::Stale),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ManifestStatus::Missing),
            Err(e) => Err(ManifestError::filesystem(output_path, e)),
        }
    }

    fn compile_patterns(&self) -> Result<Vec<Pattern>, ManifestError> {
        self.config
            .patterns
            .iter()
            .map(|raw| {
                Pattern::new(raw).map_err(|source| ManifestError::InvalidPattern {
                    pattern: raw.clone(),
                    source,
                })
            })
            .collect()
    }

    fn list_file_names(&self) -> Result<Vec<String>, ManifestError> {
        let read_dir = fs::read_dir(&self.base_dir)
            .map_err(|e| ManifestError::filesystem(&self.base_dir, e))?;

        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| ManifestError::filesystem(&self.base_dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    tracing::warn!(name = ?raw, "skipping file with non UTF-8 name");
                }
            }
        }

        Ok(names)
    }
}
