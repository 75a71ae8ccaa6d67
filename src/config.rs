//! Per-deployment conversion settings.
//!
//! Settings come from an optional YAML file; command-line flags are applied
//! on top by the CLI. Every field has a default, so an empty file is valid.

use std::fs;
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::annotation::DEFAULT_STALE_PREFIXES;
use crate::error::RailprepError;
use crate::layout::LayoutMode;
use crate::registry::{CasePolicy, LabelCleaner};

/// Environment variable naming a deployment file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "RAILPREP_CONFIG";

/// What to do with records whose `shapes` list is empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyRecordPolicy {
    /// Write an empty label file so the image counts as background.
    #[default]
    WriteLabel,
    /// Leave the record out of the output.
    Skip,
}

/// What to do with boxes that leave the image after normalization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutOfRangePolicy {
    /// Drop the shape and report an error.
    #[default]
    Reject,
    /// Clamp the box to the image and report a warning.
    Clamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeploymentConfig {
    pub layout: LayoutMode,
    pub case_policy: CasePolicy,
    /// Path prefixes stripped from raw annotation text before parsing.
    pub stale_prefixes: Vec<String>,
    /// Labels that make an image `target` in binary layout.
    pub target_labels: Vec<String>,
    /// Name of the single class written in binary layout.
    pub target_class_name: String,
    /// Share of records drawn into `test` in per-class-split layout.
    pub test_fraction: f64,
    pub seed: u64,
    pub empty_records: EmptyRecordPolicy,
    pub out_of_range: OutOfRangePolicy,
    /// Write normalized `imagePath` values back into the annotation files.
    pub rewrite_sources: bool,
    /// Labels registered, in order, before any annotation is read.
    pub labels: Vec<String>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            layout: LayoutMode::default(),
            case_policy: CasePolicy::default(),
            stale_prefixes: DEFAULT_STALE_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            target_labels: Vec::new(),
            target_class_name: "target".to_string(),
            test_fraction: 0.2,
            seed: 42,
            empty_records: EmptyRecordPolicy::default(),
            out_of_range: OutOfRangePolicy::default(),
            rewrite_sources: false,
            labels: Vec::new(),
        }
    }
}

impl DeploymentConfig {
    /// Reads a deployment file.
    pub fn load(path: &Path) -> Result<Self, RailprepError> {
        let text = fs::read_to_string(path).map_err(RailprepError::Io)?;
        Self::from_yaml_str(&text, path)
    }

    pub fn from_yaml_str(text: &str, path: &Path) -> Result<Self, RailprepError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|source| RailprepError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn cleaner(&self) -> LabelCleaner {
        LabelCleaner::new(self.case_policy)
    }

    /// Checks settings that the type system cannot.
    pub fn validate(&self) -> Result<(), RailprepError> {
        if !(0.0..=1.0).contains(&self.test_fraction) {
            return Err(RailprepError::InvalidConfig(format!(
                "test_fraction must be between 0.0 and 1.0, got {}",
                self.test_fraction
            )));
        }

        if self.layout == LayoutMode::Binary {
            let cleaner = self.cleaner();
            if !self
                .target_labels
                .iter()
                .any(|label| cleaner.clean(label).is_some())
            {
                return Err(RailprepError::InvalidConfig(
                    "binary layout needs at least one non-empty target label".to_string(),
                ));
            }
            if cleaner.clean(&self.target_class_name).is_none() {
                return Err(RailprepError::InvalidConfig(
                    "target_class_name must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}
