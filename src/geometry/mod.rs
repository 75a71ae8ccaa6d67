//! Geometry for turning annotated shapes into detection targets.
//!
//! Annotation files store pixel coordinates; YOLO label files store
//! center/size fractions. The marker types in [`space`] keep the two apart.

mod bbox;
mod normalize;
mod space;

pub use bbox::{BBoxXYXY, NormalizedBox};
pub use normalize::{normalize, GeometryError};
pub use space::{Normalized, Pixel};
