//! Point list to normalized detection box.

use thiserror::Error;

use super::bbox::{BBoxXYXY, NormalizedBox};
use super::space::Pixel;

/// Reasons a shape cannot be turned into a detection box.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum GeometryError {
    #[error("image dimensions {width}x{height} must be positive")]
    NonPositiveImageSize { width: f64, height: f64 },

    #[error("shape has {count} point(s); at least 2 are required")]
    TooFewPoints { count: usize },

    #[error("shape has a non-finite coordinate")]
    NonFiniteCoordinate,
}

/// Converts a shape's points into a YOLO box relative to the image size.
///
/// Two points are read as opposite corners of a rectangle, three or more as
/// polygon vertices; both reduce to the componentwise min/max box. The result
/// is not clamped, so callers can detect boxes that leave the image.
pub fn normalize(
    points: &[[f64; 2]],
    image_width: f64,
    image_height: f64,
) -> Result<NormalizedBox, GeometryError> {
    let usable = |side: f64| side.is_finite() && side > 0.0;
    if !(usable(image_width) && usable(image_height)) {
        return Err(GeometryError::NonPositiveImageSize {
            width: image_width,
            height: image_height,
        });
    }

    if points.len() < 2 {
        return Err(GeometryError::TooFewPoints {
            count: points.len(),
        });
    }

    // f64::min/max skip NaN, so check before folding.
    if !points.iter().flatten().all(|v| v.is_finite()) {
        return Err(GeometryError::NonFiniteCoordinate);
    }

    let bbox = BBoxXYXY::<Pixel>::enclosing(points)
        .ok_or(GeometryError::TooFewPoints { count: 0 })?
        .ordered();

    Ok(bbox.to_normalized(image_width, image_height).to_cxcywh())
}
