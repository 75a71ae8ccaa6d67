//! Annotated preview images for checking labels by eye.
//!
//! Each record's image is redrawn with its shapes outlined, boxes in red and
//! polygons in blue, and saved as `<class>/<stem>_annotated.jpg` where
//! `<class>` is the cleaned label of the record's first shape.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use image::{ImageFormat, Rgb, RgbImage};

use crate::annotation::{discover_annotation_files, read_annotation, SourceRecord};
use crate::error::RailprepError;
use crate::layout::write_atomic;
use crate::registry::LabelCleaner;

/// Output directory name used when none is given.
pub const DEFAULT_PREVIEW_DIR: &str = "annotated-preview";

/// Appended to the image stem of every preview file.
pub const PREVIEW_SUFFIX: &str = "_annotated.jpg";

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const POLYGON_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const BOX_THICKNESS: i64 = 3;

/// Inputs of one preview run.
#[derive(Clone, Debug)]
pub struct PreviewOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub stale_prefixes: Vec<String>,
    /// Decides the folder each preview is filed under.
    pub cleaner: LabelCleaner,
}

/// What a preview run produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreviewSummary {
    pub files_found: usize,
    /// Preview images written, in input order.
    pub written: Vec<PathBuf>,
    /// Records with no shapes, no usable first label, or no readable image.
    pub skipped: usize,
    pub cancelled: bool,
}

/// Draws every annotated record under `opts.input` into `opts.output`.
///
/// Problems with a single record are logged and counted; only a missing
/// input directory fails the run.
pub fn render_previews(
    opts: &PreviewOptions,
    cancel: &AtomicBool,
) -> Result<PreviewSummary, RailprepError> {
    if !opts.input.is_dir() {
        return Err(RailprepError::InputNotFound {
            path: opts.input.clone(),
        });
    }

    let discovery = discover_annotation_files(&opts.input, None);
    let mut summary = PreviewSummary {
        files_found: discovery.files.len(),
        skipped: discovery.unreadable.len(),
        ..Default::default()
    };
    for err in &discovery.unreadable {
        log::warn!("not searched: {}", err);
    }

    for path in &discovery.files {
        if cancel.load(Ordering::SeqCst) {
            log::warn!("cancelled; stopping before {}", path.display());
            summary.cancelled = true;
            break;
        }

        match render_one(opts, path) {
            Ok(Some(written)) => summary.written.push(written),
            Ok(None) => summary.skipped += 1,
            Err(err) => {
                log::warn!("{}: skipped: {}", path.display(), err);
                summary.skipped += 1;
            }
        }
    }

    log::info!(
        "wrote {} preview(s) of {} annotation file(s) into {}; {} skipped",
        summary.written.len(),
        summary.files_found,
        opts.output.display(),
        summary.skipped
    );
    Ok(summary)
}

fn render_one(opts: &PreviewOptions, path: &Path) -> Result<Option<PathBuf>, RailprepError> {
    let source = read_annotation(path, &opts.stale_prefixes)?;
    let shapes = &source.record.shapes;

    let Some(first) = shapes.first() else {
        log::info!("{}: no shapes; nothing to draw", path.display());
        return Ok(None);
    };
    let Some(class_dir) = opts.cleaner.clean(&first.label) else {
        log::warn!(
            "{}: first label '{}' is empty after cleaning",
            path.display(),
            first.label
        );
        return Ok(None);
    };

    let image_path = source.image_path();
    if source.record.image_reference.is_empty() || !image_path.is_file() {
        return Err(RailprepError::MissingImage {
            annotation: path.to_path_buf(),
            image: image_path,
        });
    }

    let mut canvas = image::open(&image_path)
        .map_err(|err| RailprepError::ImageRender {
            path: image_path.clone(),
            source: err,
        })?
        .into_rgb8();
    let drawn = draw_shapes(&mut canvas, &source);

    let dest = opts
        .output
        .join(&class_dir)
        .join(preview_file_name(&source.record.image_reference));
    let mut buf = Vec::new();
    canvas
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .map_err(|err| RailprepError::ImageRender {
            path: dest.clone(),
            source: err,
        })?;
    write_atomic(&dest, &buf)?;

    log::debug!("{} -> {} [{}]", path.display(), dest.display(), drawn.join(", "));
    Ok(Some(dest))
}

/// `<stem>_annotated.jpg` for an image name.
pub fn preview_file_name(image_name: &str) -> String {
    let stem = Path::new(image_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_name.to_string());
    format!("{}{}", stem, PREVIEW_SUFFIX)
}

/// Outlines every labeled shape and returns the display labels drawn.
fn draw_shapes<'a>(canvas: &mut RgbImage, source: &'a SourceRecord) -> Vec<&'a str> {
    let mut drawn = Vec::new();
    for shape in &source.record.shapes {
        let label = shape.label.trim();
        if label.is_empty() {
            continue;
        }
        let pixels: Option<Vec<(i64, i64)>> = shape
            .points
            .iter()
            .map(|p| to_pixel(canvas, *p))
            .collect();
        let Some(pixels) = pixels else {
            continue;
        };

        match pixels.as_slice() {
            [a, b] => draw_box(canvas, *a, *b, BOX_COLOR),
            [_, _, _, ..] => draw_polygon(canvas, &pixels, POLYGON_COLOR),
            _ => continue,
        }
        drawn.push(label);
    }
    drawn
}

/// Rounds a point to a pixel, pinned to one pixel outside the canvas.
fn to_pixel(canvas: &RgbImage, [x, y]: [f64; 2]) -> Option<(i64, i64)> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    let pin = |v: f64, size: u32| (v.round() as i64).clamp(-1, size as i64);
    Some((pin(x, canvas.width()), pin(y, canvas.height())))
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    let inside = |v: i64, size: u32| v >= 0 && v < size as i64;
    if inside(x, canvas.width()) && inside(y, canvas.height()) {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_line(canvas: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put(canvas, x, y, color);
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn draw_box(canvas: &mut RgbImage, a: (i64, i64), b: (i64, i64), color: Rgb<u8>) {
    let (x0, x1) = (a.0.min(b.0), a.0.max(b.0));
    let (y0, y1) = (a.1.min(b.1), a.1.max(b.1));
    for t in 0..BOX_THICKNESS {
        let (left, right) = (x0 + t, x1 - t);
        let (top, bottom) = (y0 + t, y1 - t);
        if left > right || top > bottom {
            break;
        }
        draw_line(canvas, (left, top), (right, top), color);
        draw_line(canvas, (left, bottom), (right, bottom), color);
        draw_line(canvas, (left, top), (left, bottom), color);
        draw_line(canvas, (right, top), (right, bottom), color);
    }
}

fn draw_polygon(canvas: &mut RgbImage, vertices: &[(i64, i64)], color: Rgb<u8>) {
    for (idx, from) in vertices.iter().enumerate() {
        let to = vertices[(idx + 1) % vertices.len()];
        draw_line(canvas, *from, to, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    #[test]
    fn boxes_are_three_pixels_thick() {
        let mut canvas = RgbImage::new(20, 20);
        draw_box(&mut canvas, (15, 15), (2, 2), BOX_COLOR);

        for inset in 2..5 {
            assert_eq!(*canvas.get_pixel(inset, 10), BOX_COLOR);
            assert_eq!(*canvas.get_pixel(10, 17 - inset), BOX_COLOR);
        }
        assert_eq!(*canvas.get_pixel(5, 10), BLACK);
        assert_eq!(*canvas.get_pixel(10, 10), BLACK);
        assert_eq!(*canvas.get_pixel(1, 1), BLACK);
    }

    #[test]
    fn polygons_are_closed() {
        let mut canvas = RgbImage::new(10, 10);
        draw_polygon(&mut canvas, &[(1, 1), (8, 1), (8, 8)], POLYGON_COLOR);

        assert_eq!(*canvas.get_pixel(4, 1), POLYGON_COLOR);
        assert_eq!(*canvas.get_pixel(8, 4), POLYGON_COLOR);
        assert_eq!(*canvas.get_pixel(4, 4), POLYGON_COLOR);
        assert_eq!(*canvas.get_pixel(1, 8), BLACK);
    }

    #[test]
    fn off_canvas_points_are_pinned_and_non_finite_points_rejected() {
        let canvas = RgbImage::new(10, 5);
        assert_eq!(to_pixel(&canvas, [-50.0, 2.4]), Some((-1, 2)));
        assert_eq!(to_pixel(&canvas, [1e12, 99.0]), Some((10, 5)));
        assert_eq!(to_pixel(&canvas, [f64::NAN, 0.0]), None);

        let mut canvas = canvas;
        draw_box(&mut canvas, (-1, -1), (10, 5), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(0, 0), BOX_COLOR);
    }

    #[test]
    fn preview_names_replace_the_extension() {
        assert_eq!(preview_file_name("cam1.png"), "cam1_annotated.jpg");
        assert_eq!(preview_file_name("noext"), "noext_annotated.jpg");
    }
}
