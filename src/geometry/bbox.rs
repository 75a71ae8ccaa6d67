//! Axis-aligned boxes in XYXY form and the YOLO center/size form.

use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

use super::space::{Normalized, Pixel};

/// An axis-aligned bounding box in XYXY format (xmin, ymin, xmax, ymax).
///
/// The `TSpace` parameter is either [`Pixel`] or [`Normalized`].
///
/// The constructor does not enforce `min <= max`; use [`BBoxXYXY::ordered`]
/// to repair boxes built from corners given in arbitrary order.
#[derive(Clone, Copy, PartialEq)]
pub struct BBoxXYXY<TSpace> {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    _space: PhantomData<TSpace>,
}

impl<TSpace> BBoxXYXY<TSpace> {
    /// Creates a new bounding box from explicit coordinates.
    #[inline]
    pub fn from_xyxy(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            _space: PhantomData,
        }
    }

    /// Width of the box. Negative if the box is not ordered.
    #[inline]
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    /// Height of the box. Negative if the box is not ordered.
    #[inline]
    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Returns true if all coordinates are finite (not NaN or infinite).
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.xmin.is_finite()
            && self.ymin.is_finite()
            && self.xmax.is_finite()
            && self.ymax.is_finite()
    }

    /// Returns true if min <= max on both axes.
    #[inline]
    pub fn is_ordered(&self) -> bool {
        self.xmin <= self.xmax && self.ymin <= self.ymax
    }

    /// Returns a copy with the extrema swapped on any inverted axis.
    pub fn ordered(self) -> Self {
        let (xmin, xmax) = if self.xmin > self.xmax {
            (self.xmax, self.xmin)
        } else {
            (self.xmin, self.xmax)
        };
        let (ymin, ymax) = if self.ymin > self.ymax {
            (self.ymax, self.ymin)
        } else {
            (self.ymin, self.ymax)
        };
        Self::from_xyxy(xmin, ymin, xmax, ymax)
    }
}

impl<TSpace> fmt::Debug for BBoxXYXY<TSpace> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BBoxXYXY")
            .field("xmin", &self.xmin)
            .field("ymin", &self.ymin)
            .field("xmax", &self.xmax)
            .field("ymax", &self.ymax)
            .finish()
    }
}

impl BBoxXYXY<Pixel> {
    /// Encloses a point list in its componentwise min/max box.
    ///
    /// Returns `None` for an empty list.
    pub fn enclosing(points: &[[f64; 2]]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let seed = Self::from_xyxy(first[0], first[1], first[0], first[1]);
        Some(rest.iter().fold(seed, |acc, &[x, y]| {
            Self::from_xyxy(acc.xmin.min(x), acc.ymin.min(y), acc.xmax.max(x), acc.ymax.max(y))
        }))
    }

    /// Converts pixel coordinates to fractions of the image size.
    pub fn to_normalized(&self, image_width: f64, image_height: f64) -> BBoxXYXY<Normalized> {
        BBoxXYXY::from_xyxy(
            self.xmin / image_width,
            self.ymin / image_height,
            self.xmax / image_width,
            self.ymax / image_height,
        )
    }
}

impl BBoxXYXY<Normalized> {
    /// Converts to the YOLO center/size representation.
    pub fn to_cxcywh(&self) -> NormalizedBox {
        NormalizedBox {
            x_center: (self.xmin + self.xmax) / 2.0,
            y_center: (self.ymin + self.ymax) / 2.0,
            width: self.width(),
            height: self.height(),
        }
    }
}

/// A detection target as YOLO expects it: center and size, each a fraction
/// of the image dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct NormalizedBox {
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedBox {
    /// Returns true if the box lies inside the image: every component and
    /// both extents on each axis are within `[0, 1]` (up to rounding noise).
    pub fn is_within_unit(&self) -> bool {
        const TOLERANCE: f64 = 1e-9;
        let in_unit = |v: f64| (-TOLERANCE..=1.0 + TOLERANCE).contains(&v);

        [self.x_center, self.y_center, self.width, self.height]
            .into_iter()
            .all(in_unit)
            && in_unit(self.x_center - self.width / 2.0)
            && in_unit(self.x_center + self.width / 2.0)
            && in_unit(self.y_center - self.height / 2.0)
            && in_unit(self.y_center + self.height / 2.0)
    }

    /// Clamps the box to the image, recomputing center and size from the
    /// clamped extrema.
    pub fn clamped(&self) -> Self {
        let xmin = (self.x_center - self.width / 2.0).clamp(0.0, 1.0);
        let xmax = (self.x_center + self.width / 2.0).clamp(0.0, 1.0);
        let ymin = (self.y_center - self.height / 2.0).clamp(0.0, 1.0);
        let ymax = (self.y_center + self.height / 2.0).clamp(0.0, 1.0);
        BBoxXYXY::<Normalized>::from_xyxy(xmin, ymin, xmax, ymax).to_cxcywh()
    }
}

impl fmt::Display for NormalizedBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} {:.6} {:.6} {:.6}",
            self.x_center, self.y_center, self.width, self.height
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enclosing_takes_componentwise_extrema() {
        let bbox = BBoxXYXY::<Pixel>::enclosing(&[[30.0, 5.0], [10.0, 40.0], [20.0, 20.0]])
            .expect("non-empty points");
        assert_eq!(bbox.xmin, 10.0);
        assert_eq!(bbox.ymin, 5.0);
        assert_eq!(bbox.xmax, 30.0);
        assert_eq!(bbox.ymax, 40.0);
    }

    #[test]
    fn enclosing_rejects_empty_points() {
        assert!(BBoxXYXY::<Pixel>::enclosing(&[]).is_none());
    }

    #[test]
    fn ordered_swaps_inverted_axes() {
        let bbox = BBoxXYXY::<Pixel>::from_xyxy(100.0, 20.0, 10.0, 80.0);
        assert!(!bbox.is_ordered());

        let fixed = bbox.ordered();
        assert!(fixed.is_ordered());
        assert_eq!(fixed.width(), 90.0);
        assert_eq!(fixed.height(), 60.0);
    }

    #[test]
    fn cxcywh_matches_yolo_convention() {
        let norm = BBoxXYXY::<Pixel>::from_xyxy(10.0, 10.0, 20.0, 20.0).to_normalized(100.0, 100.0);
        let yolo = norm.to_cxcywh();
        assert!((yolo.x_center - 0.15).abs() < 1e-12);
        assert!((yolo.y_center - 0.15).abs() < 1e-12);
        assert!((yolo.width - 0.1).abs() < 1e-12);
        assert!((yolo.height - 0.1).abs() < 1e-12);
        assert_eq!(yolo.to_string(), "0.150000 0.150000 0.100000 0.100000");
    }

    #[test]
    fn full_image_box_is_within_unit() {
        let norm = BBoxXYXY::<Pixel>::from_xyxy(0.0, 0.0, 640.0, 480.0).to_normalized(640.0, 480.0);
        assert!(norm.to_cxcywh().is_within_unit());
    }

    #[test]
    fn clamped_trims_box_to_image() {
        let overflowing = NormalizedBox {
            x_center: 0.9,
            y_center: 0.5,
            width: 0.4,
            height: 0.2,
        };
        assert!(!overflowing.is_within_unit());

        let clamped = overflowing.clamped();
        assert!((clamped.x_center - 0.85).abs() < 1e-12);
        assert!((clamped.width - 0.3).abs() < 1e-12);
        assert!((clamped.height - 0.2).abs() < 1e-12);
        assert!(clamped.is_within_unit());
    }
}
