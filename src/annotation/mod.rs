//! Annotation files as written by the labeling tool.
//!
//! One JSON record per image, stored next to the image it describes.

mod model;
mod pending;
mod reader;

pub use model::{AnnotationRecord, ShapeRecord};
pub use pending::{annotation_path_for, find_pending_images, IMAGE_EXTENSIONS};
pub use reader::{
    bare_file_name, discover_annotation_files, persist_normalized, read_annotation,
    resolve_image_path, strip_stale_prefixes, Discovery, SourceRecord, ANNOTATION_EXTENSION,
    DEFAULT_STALE_PREFIXES,
};
