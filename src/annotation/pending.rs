//! Images that have no annotation file yet.

use std::path::{Path, PathBuf};

use super::reader::{collect_files, ANNOTATION_EXTENSION};
use crate::error::RailprepError;

/// Image extensions the annotation tool opens.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

/// Lists images under `images_dir` lacking a `<stem>.json` annotation.
///
/// Annotations are looked up next to each image unless `annotations_dir` is
/// given, in which case they are expected directly inside it. The result is
/// sorted by path.
pub fn find_pending_images(
    images_dir: &Path,
    annotations_dir: Option<&Path>,
) -> Result<Vec<PathBuf>, RailprepError> {
    if !images_dir.is_dir() {
        return Err(RailprepError::InputNotFound {
            path: images_dir.to_path_buf(),
        });
    }

    let discovery = collect_files(images_dir, None, &IMAGE_EXTENSIONS);
    for err in &discovery.unreadable {
        log::warn!("skipping unreadable entry: {}", err);
    }

    Ok(discovery
        .files
        .into_iter()
        .filter(|image| !annotation_path_for(image, annotations_dir).is_file())
        .collect())
}

/// Where the annotation for `image` is expected to live.
pub fn annotation_path_for(image: &Path, annotations_dir: Option<&Path>) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = format!("{}.{}", stem, ANNOTATION_EXTENSION);

    match annotations_dir {
        Some(dir) => dir.join(file_name),
        None => image.with_file_name(file_name),
    }
}
