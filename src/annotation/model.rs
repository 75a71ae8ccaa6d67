//! Serde model of a LabelMe-style annotation file.
//!
//! Only the fields the pipeline reads are typed; everything else is kept in
//! `extra` so a record can be written back without losing information.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One annotation file: the labeled regions of a single image.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    /// Path of the annotated image as saved by the annotation tool.
    #[serde(rename = "imagePath", default)]
    pub image_reference: String,

    #[serde(default)]
    pub shapes: Vec<ShapeRecord>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One labeled region. Two points are opposite box corners, three or more
/// are polygon vertices, all in pixel coordinates.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapeRecord {
    /// The label as the annotator typed it.
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub points: Vec<[f64; 2]>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnnotationRecord {
    /// Returns true if the record carries no shapes and so no training label.
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}
