//! Run report for a dataset conversion.
//!
//! Per-record problems never abort a run; they are collected here as issues
//! so the caller can print a summary or fail under `--strict`.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Summary of one conversion run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConversionReport {
    /// Layout the output was written in.
    pub layout: String,
    /// Case policy applied to labels.
    pub case_policy: String,
    pub counts: ConversionCounts,
    /// Classes known at the end of the run, in ID order.
    pub classes: Vec<String>,
    /// True if the run stopped early on request.
    pub cancelled: bool,
    pub issues: Vec<ConversionIssue>,
}

impl ConversionReport {
    pub fn new(layout: impl Into<String>, case_policy: impl Into<String>) -> Self {
        Self {
            layout: layout.into(),
            case_policy: case_policy.into(),
            ..Default::default()
        }
    }

    /// Add an issue to the report.
    pub fn add(&mut self, issue: ConversionIssue) {
        self.issues.push(issue);
    }

    fn count(&self, severity: ConversionSeverity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn error_count(&self) -> usize {
        self.count(ConversionSeverity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(ConversionSeverity::Warning)
    }

    pub fn info_count(&self) -> usize {
        self.count(ConversionSeverity::Info)
    }

    /// Issues carrying a given code.
    pub fn issues_with(&self, code: ConversionIssueCode) -> impl Iterator<Item = &ConversionIssue> {
        self.issues.iter().filter(move |i| i.code == code)
    }

    fn write_section(
        &self,
        f: &mut fmt::Formatter<'_>,
        title: &str,
        severity: ConversionSeverity,
    ) -> fmt::Result {
        let count = self.count(severity);
        if count == 0 {
            return Ok(());
        }

        writeln!(f)?;
        writeln!(f, "{} ({}):", title, count)?;
        for issue in self.issues.iter().filter(|i| i.severity == severity) {
            match &issue.path {
                Some(path) => writeln!(f, "  - {}: {}", path.display(), issue.message)?,
                None => writeln!(f, "  - {}", issue.message)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counts;
        writeln!(
            f,
            "Converted {} of {} annotation file(s) ({} layout, {} labels)",
            c.records_converted, c.files_found, self.layout, self.case_policy
        )?;
        writeln!(
            f,
            "  {} empty, {} skipped, {} shape(s) written, {} dropped",
            c.records_empty, c.records_skipped, c.shapes_written, c.shapes_dropped
        )?;
        writeln!(f, "  {} class(es)", self.classes.len())?;
        if self.cancelled {
            writeln!(f, "  stopped early: cancelled")?;
        }

        self.write_section(f, "Errors", ConversionSeverity::Error)?;
        self.write_section(f, "Warnings", ConversionSeverity::Warning)?;
        self.write_section(f, "Notes", ConversionSeverity::Info)?;

        Ok(())
    }
}

/// Record and shape tallies.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConversionCounts {
    /// Annotation files discovered.
    pub files_found: usize,
    /// Records that produced output, including empty ones.
    pub records_converted: usize,
    /// Converted records with an empty `shapes` list.
    pub records_empty: usize,
    /// Records that produced no output.
    pub records_skipped: usize,
    pub shapes_written: usize,
    pub shapes_dropped: usize,
}

/// A single issue found while converting.
#[derive(Clone, Debug, Serialize)]
pub struct ConversionIssue {
    pub severity: ConversionSeverity,
    pub code: ConversionIssueCode,
    pub message: String,
    /// Annotation file the issue belongs to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl ConversionIssue {
    fn with(severity: ConversionSeverity, code: ConversionIssueCode, message: String) -> Self {
        Self {
            severity,
            code,
            message,
            path: None,
        }
    }

    pub fn error(code: ConversionIssueCode, message: impl Into<String>) -> Self {
        Self::with(ConversionSeverity::Error, code, message.into())
    }

    pub fn warning(code: ConversionIssueCode, message: impl Into<String>) -> Self {
        Self::with(ConversionSeverity::Warning, code, message.into())
    }

    pub fn info(code: ConversionIssueCode, message: impl Into<String>) -> Self {
        Self::with(ConversionSeverity::Info, code, message.into())
    }

    /// Attaches the annotation file the issue belongs to.
    pub fn at(mut self, path: &Path) -> Self {
        self.path = Some(path.to_path_buf());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionSeverity {
    /// Bad input or a failed write kept a record or shape out of the output.
    Error,
    /// A record or shape was altered or dropped by policy.
    Warning,
    /// Informational note.
    Info,
}

/// Stable issue codes for programmatic consumption.
///
/// These codes are part of the JSON output and should remain stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionIssueCode {
    /// Annotation file is not valid JSON or has the wrong shape.
    AnnotationParse,
    /// The image named by `imagePath` is not next to its annotation.
    MissingImage,
    /// Image header could not be read for its dimensions.
    ImageDimensionRead,
    /// Shape has too few points, non-finite points, or the image has no area.
    Geometry,
    /// Shape label is empty after cleaning.
    EmptyLabel,
    /// Normalized box leaves the image.
    OutOfRangeBox,
    /// Record has no shapes.
    EmptyRecord,
    /// Normalized `imagePath` was written back to the annotation file.
    SourceRewritten,
    /// Another record already took this output name; the record was
    /// written under a tagged name instead.
    NameCollision,
    /// An annotation, image, or output file could not be read or written.
    Io,
}
