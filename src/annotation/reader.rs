//! Reading, path cleanup, and write-back of annotation files.

use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use walkdir::WalkDir;

use super::model::AnnotationRecord;
use crate::error::RailprepError;
use crate::layout::write_atomic;

/// Extension of annotation files produced by the annotation tool.
pub const ANNOTATION_EXTENSION: &str = "json";

/// Drive prefixes left in annotation files by the machines the dataset was
/// labeled on.
pub const DEFAULT_STALE_PREFIXES: [&str; 4] = ["T:/", "T:\\", "V:/", "V:\\"];

/// A parsed annotation file together with what cleanup changed.
#[derive(Clone, Debug)]
pub struct SourceRecord {
    /// Location of the annotation file.
    pub path: PathBuf,
    /// The record with `image_reference` reduced to a bare filename.
    pub record: AnnotationRecord,
    /// `imagePath` as it appeared in the file, after prefix stripping.
    pub original_reference: String,
    /// Whether stale prefixes were removed from the raw text.
    pub prefixes_stripped: bool,
    /// The parsed file as a JSON document, in its original key order.
    document: Value,
}

impl SourceRecord {
    /// Returns true if the file on disk differs from its normalized form.
    pub fn needs_rewrite(&self) -> bool {
        self.prefixes_stripped || self.original_reference != self.record.image_reference
    }

    /// The image this record describes, looked up next to the annotation file.
    pub fn image_path(&self) -> PathBuf {
        resolve_image_path(&self.path, &self.record)
    }
}

/// Removes stale drive prefixes from raw annotation text.
///
/// Prefixes are matched in their JSON-escaped spelling, so `T:\` matches the
/// `T:\\` that appears inside a JSON string.
pub fn strip_stale_prefixes<'a, S: AsRef<str>>(raw: &'a str, prefixes: &[S]) -> Cow<'a, str> {
    let mut text = Cow::Borrowed(raw);
    for prefix in prefixes {
        let prefix = prefix.as_ref();
        if prefix.is_empty() {
            continue;
        }
        let escaped = prefix.replace('\\', "\\\\");
        if text.contains(escaped.as_str()) {
            text = Cow::Owned(text.replace(escaped.as_str(), ""));
        }
    }
    text
}

/// Reduces an absolute or relative image path to its last component.
///
/// Both `/` and `\` count as separators, since annotation files were saved on
/// Windows and Unix machines alike.
pub fn bare_file_name(reference: &str) -> &str {
    reference.rsplit(['/', '\\']).next().unwrap_or(reference)
}

/// Reads and parses one annotation file, stripping stale prefixes first and
/// normalizing `imagePath` afterwards.
pub fn read_annotation<S: AsRef<str>>(
    path: &Path,
    stale_prefixes: &[S],
) -> Result<SourceRecord, RailprepError> {
    let raw = fs::read_to_string(path).map_err(RailprepError::Io)?;
    let text = strip_stale_prefixes(&raw, stale_prefixes);
    let prefixes_stripped = matches!(text, Cow::Owned(_));

    let parse_error = |source: serde_json::Error| RailprepError::AnnotationParse {
        path: path.to_path_buf(),
        source,
    };
    let document: Value = serde_json::from_str(&text).map_err(parse_error)?;
    let mut record = AnnotationRecord::deserialize(&document).map_err(parse_error)?;

    let original_reference = record.image_reference.clone();
    record.image_reference = bare_file_name(&original_reference).to_string();

    Ok(SourceRecord {
        path: path.to_path_buf(),
        record,
        original_reference,
        prefixes_stripped,
        document,
    })
}

/// Writes the normalized record back over its source file.
///
/// Only `imagePath` changes: keys keep their order and numbers keep their
/// spelling. Returns `Ok(false)` without touching the file when it is
/// already normalized.
pub fn persist_normalized(source: &SourceRecord) -> Result<bool, RailprepError> {
    if !source.needs_rewrite() {
        return Ok(false);
    }

    let mut document = source.document.clone();
    if let Value::Object(fields) = &mut document {
        fields.insert(
            "imagePath".to_string(),
            Value::String(source.record.image_reference.clone()),
        );
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document
        .serialize(&mut serializer)
        .map_err(|err| RailprepError::AnnotationWrite {
            path: source.path.clone(),
            source: err,
        })?;
    buf.write_all(b"\n").map_err(RailprepError::Io)?;

    write_atomic(&source.path, &buf)?;
    Ok(true)
}

/// Resolves a record's image relative to the annotation file's directory.
pub fn resolve_image_path(annotation_path: &Path, record: &AnnotationRecord) -> PathBuf {
    let dir = annotation_path.parent().unwrap_or_else(|| Path::new(""));
    dir.join(bare_file_name(&record.image_reference))
}

/// Files found by a directory walk.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Matching files, sorted by full path.
    pub files: Vec<PathBuf>,
    /// Entries the walk could not read; it continued past each of them.
    pub unreadable: Vec<RailprepError>,
}

/// Finds annotation files under `root`.
///
/// `exclude` prunes a subtree, typically an output directory nested in the
/// input. Unreadable subdirectories and symlink loops are collected in
/// [`Discovery::unreadable`] rather than ending the walk.
pub fn discover_annotation_files(root: &Path, exclude: Option<&Path>) -> Discovery {
    collect_files(root, exclude, &[ANNOTATION_EXTENSION])
}

pub(crate) fn collect_files(
    root: &Path,
    exclude: Option<&Path>,
    extensions: &[&str],
) -> Discovery {
    let mut discovery = Discovery::default();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| exclude != Some(entry.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) => {
                let path = source
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                discovery
                    .unreadable
                    .push(RailprepError::DirectoryWalk { path, source });
                continue;
            }
        };

        if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
            discovery.files.push(entry.path().to_path_buf());
        }
    }

    discovery.files.sort();
    discovery
}

pub(crate) fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    allowed
        .iter()
        .any(|allowed_ext| ext.eq_ignore_ascii_case(allowed_ext))
}
