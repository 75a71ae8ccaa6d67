use std::path::PathBuf;
use thiserror::Error;

use crate::conversion::ConversionReport;
use crate::geometry::GeometryError;

/// The main error type for railprep operations.
#[derive(Debug, Error)]
pub enum RailprepError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse annotation {path}: {source}")]
    AnnotationParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write annotation {path}: {source}")]
    AnnotationWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to walk directory {path}: {source}")]
    DirectoryWalk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Image '{image}' referenced by {annotation} does not exist")]
    MissingImage { annotation: PathBuf, image: PathBuf },

    #[error("Failed to read image dimensions from {path}: {source}")]
    ImageDimensionRead {
        path: PathBuf,
        #[source]
        source: imagesize::ImageError,
    },

    #[error("Failed to render preview {path}: {source}")]
    ImageRender {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid geometry: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Label '{raw}' is empty after cleaning")]
    EmptyLabel { raw: String },

    #[error("Invalid class index {path} (line {line}): {message}")]
    ClassIndexInvalid {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Failed to parse deployment config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write data.yaml to {path}: {source}")]
    DataYamlWrite {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize report: {0}")]
    ReportSerialize(#[source] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Input directory {path} does not exist")]
    InputNotFound { path: PathBuf },

    #[error("Conversion finished with {error_count} error(s) and {warning_count} warning(s)")]
    ConversionFailed {
        error_count: usize,
        warning_count: usize,
        report: Box<ConversionReport>,
    },
}
