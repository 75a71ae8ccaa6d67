//! Coordinate space marker types.
//!
//! Zero-sized types used as type parameters so pixel boxes and normalized
//! boxes cannot be mixed up at compile time.

use std::fmt;

/// Marker type for pixel coordinates, as stored in annotation files.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pixel {}

/// Marker type for coordinates expressed as fractions of the image size.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Normalized {}

impl fmt::Debug for Pixel {
    fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}

impl fmt::Debug for Normalized {
    fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}
