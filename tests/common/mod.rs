#![allow(dead_code)]

use std::fs;
use std::path::Path;

pub fn bmp_bytes(width: u32, height: u32) -> Vec<u8> {
    let row_stride = (width * 3).div_ceil(4) * 4;
    let pixel_array_size = row_stride * height;
    let file_size = 54 + pixel_array_size;

    let mut bytes = Vec::with_capacity(file_size as usize);
    bytes.extend_from_slice(b"BM");
    bytes.extend_from_slice(&file_size.to_le_bytes());
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&54u32.to_le_bytes());

    bytes.extend_from_slice(&40u32.to_le_bytes());
    bytes.extend_from_slice(&(width as i32).to_le_bytes());
    bytes.extend_from_slice(&(height as i32).to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&24u16.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&pixel_array_size.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    bytes.resize(file_size as usize, 0);
    bytes
}

pub fn write_bmp(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, bmp_bytes(width, height)).expect("write bmp file");
}

/// One labeled shape: label plus pixel points.
pub type Shape<'a> = (&'a str, &'a [[f64; 2]]);

/// Renders a LabelMe-style annotation record.
pub fn labelme_json(image_path: &str, shapes: &[Shape<'_>], width: u32, height: u32) -> String {
    let shapes: Vec<serde_json::Value> = shapes
        .iter()
        .map(|(label, points)| {
            let shape_type = if points.len() == 2 { "rectangle" } else { "polygon" };
            serde_json::json!({
                "label": label,
                "points": points,
                "group_id": null,
                "shape_type": shape_type,
                "flags": {}
            })
        })
        .collect();

    let record = serde_json::json!({
        "version": "5.2.1",
        "flags": {},
        "shapes": shapes,
        "imagePath": image_path,
        "imageData": null,
        "imageHeight": height,
        "imageWidth": width
    });
    serde_json::to_string_pretty(&record).expect("serialize annotation")
}

/// Writes `<dir>/<stem>.bmp` and its annotation `<dir>/<stem>.json`.
pub fn write_annotated_image(
    dir: &Path,
    stem: &str,
    width: u32,
    height: u32,
    shapes: &[Shape<'_>],
) {
    let image_name = format!("{}.bmp", stem);
    write_bmp(&dir.join(&image_name), width, height);
    fs::write(
        dir.join(format!("{}.json", stem)),
        labelme_json(&image_name, shapes, width, height),
    )
    .expect("write annotation");
}

/// Reads every file under `root` into a sorted (relative path, bytes) list.
pub fn snapshot_tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("under root")
                .to_string_lossy()
                .replace('\\', "/");
            (rel, fs::read(entry.path()).expect("read file"))
        })
        .collect();
    files.sort();
    files
}
