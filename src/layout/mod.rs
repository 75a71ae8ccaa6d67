//! Output directory layouts and the writer that fills them.
//!
//! Every record becomes one image copy plus one label file. Where they land
//! is decided by an [`OutputPlacement`], computed from the deployment's
//! [`LayoutMode`] and what the record resolved to. Writing goes through a
//! temporary sibling and a rename, so an interrupted run never leaves a
//! half-written file under its final name, and a record whose label cannot
//! be written leaves no image behind.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::RailprepError;
use crate::geometry::NormalizedBox;
use crate::registry::{ClassId, ClassRegistry};

pub const IMAGES_DIR: &str = "images";
pub const LABELS_DIR: &str = "labels";
pub const DATA_YAML_FILE: &str = "data.yaml";

/// Group for records that carried shapes but kept none of them.
pub const UNLABELED_GROUP: &str = "_unlabeled";

/// How output files are grouped into directories.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutMode {
    /// `images/<file>` and `labels/<stem>.txt`.
    #[default]
    Flat,
    /// One folder per class, named after the record's first retained label.
    PerClass,
    /// Per-class folders, each split into `train` and `test`.
    PerClassSplit,
    /// `target` and `non_target` folders for single-class detection.
    Binary,
}

impl LayoutMode {
    /// Name used in reports and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            LayoutMode::Flat => "flat",
            LayoutMode::PerClass => "per-class",
            LayoutMode::PerClassSplit => "per-class-split",
            LayoutMode::Binary => "binary",
        }
    }
}

/// Which half of a per-class split a record was drawn into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Test,
}

impl Split {
    /// Directory name of this half.
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

/// Binary-mode partition of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Target,
    NonTarget,
}

impl Partition {
    /// Directory name of this partition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Target => "target",
            Partition::NonTarget => "non_target",
        }
    }
}

/// Returns true if any of an image's cleaned labels is a target label.
pub fn is_target<'a, I>(cleaned_labels: I, targets: &HashSet<String>) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    cleaned_labels
        .into_iter()
        .any(|label| targets.contains(label))
}

/// Everything that decides where a record's files go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlacementKey<'a> {
    /// Cleaned label of the first retained shape, if any shape survived.
    pub class_group: Option<&'a str>,
    pub partition: Partition,
    pub split: Split,
}

/// Destination of one record, relative to the output root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputPlacement {
    /// Directory under both `images/` and `labels/`; empty in flat mode.
    pub group: PathBuf,
    pub image_name: String,
    pub label_name: String,
}

impl OutputPlacement {
    /// Computes the placement of `image_name` under `mode`.
    pub fn compute(mode: LayoutMode, image_name: &str, key: PlacementKey<'_>) -> Self {
        let class_dir = || key.class_group.unwrap_or(UNLABELED_GROUP);

        let group = match mode {
            LayoutMode::Flat => PathBuf::new(),
            LayoutMode::PerClass => PathBuf::from(class_dir()),
            LayoutMode::PerClassSplit => Path::new(class_dir()).join(key.split.as_str()),
            LayoutMode::Binary => PathBuf::from(key.partition.as_str()),
        };

        Self {
            group,
            image_name: image_name.to_string(),
            label_name: label_file_name(image_name),
        }
    }

    /// The same destination under another image name.
    pub fn renamed(&self, image_name: &str) -> Self {
        Self {
            group: self.group.clone(),
            image_name: image_name.to_string(),
            label_name: label_file_name(image_name),
        }
    }

    pub fn image_path(&self, root: &Path) -> PathBuf {
        root.join(IMAGES_DIR).join(&self.group).join(&self.image_name)
    }

    pub fn label_path(&self, root: &Path) -> PathBuf {
        root.join(LABELS_DIR).join(&self.group).join(&self.label_name)
    }

    /// The image directory relative to the output root, `/`-separated.
    pub fn image_dir_key(&self) -> String {
        std::iter::once(IMAGES_DIR.to_string())
            .chain(
                self.group
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned()),
            )
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

fn label_file_name(image_name: &str) -> String {
    format!("{}.txt", file_stem(image_name))
}

/// Inserts `_<tag>` between an image name's stem and its extension.
pub fn tagged_name(image_name: &str, tag: &str) -> String {
    let stem = file_stem(image_name);
    match Path::new(image_name).extension() {
        Some(ext) => format!("{}_{}.{}", stem, tag, ext.to_string_lossy()),
        None => format!("{}_{}", stem, tag),
    }
}

/// One line of a YOLO label file.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LabelRow {
    pub class_id: ClassId,
    pub bbox: NormalizedBox,
}

impl fmt::Display for LabelRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.class_id, self.bbox)
    }
}

/// Renders label rows as file contents, one newline-terminated line each.
pub fn render_label_file(rows: &[LabelRow]) -> String {
    rows.iter().map(|row| format!("{}\n", row)).collect()
}

/// Files produced for one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrittenPaths {
    /// `None` when no source image was given.
    pub image: Option<PathBuf>,
    pub label: PathBuf,
}

/// Writes records into an output tree.
#[derive(Clone, Debug)]
pub struct LayoutEmitter {
    root: PathBuf,
}

impl LayoutEmitter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies the image (if given) and writes the label file for one record.
    ///
    /// Both files are staged next to their destinations before either is
    /// renamed into place. If any step fails, neither file is left under its
    /// final name. An empty `rows` slice still produces an (empty) label file.
    pub fn emit(
        &self,
        source_image: Option<&Path>,
        placement: &OutputPlacement,
        rows: &[LabelRow],
    ) -> Result<WrittenPaths, RailprepError> {
        let label_path = placement.label_path(&self.root);
        let label = StagedFile::new(&label_path, |temp| {
            fs::write(temp, render_label_file(rows).as_bytes())
        })?;

        let Some(source) = source_image else {
            label.commit()?;
            return Ok(WrittenPaths {
                image: None,
                label: label_path,
            });
        };

        let image_path = placement.image_path(&self.root);
        let image = match StagedFile::new(&image_path, |temp| fs::copy(source, temp).map(|_| ())) {
            Ok(image) => image,
            Err(err) => {
                label.discard();
                return Err(err);
            }
        };

        if let Err(err) = image.commit() {
            label.discard();
            return Err(err);
        }
        if let Err(err) = label.commit() {
            let _ = fs::remove_file(&image_path);
            return Err(err);
        }

        Ok(WrittenPaths {
            image: Some(image_path),
            label: label_path,
        })
    }
}

/// A file written under a temporary sibling name, waiting to be renamed.
struct StagedFile {
    temp: PathBuf,
    dest: PathBuf,
}

impl StagedFile {
    fn new(
        dest: &Path,
        fill: impl FnOnce(&Path) -> std::io::Result<()>,
    ) -> Result<Self, RailprepError> {
        ensure_parent(dest)?;
        let temp = temp_sibling(dest);
        if let Err(err) = fill(&temp) {
            let _ = fs::remove_file(&temp);
            return Err(RailprepError::Io(err));
        }
        Ok(Self {
            temp,
            dest: dest.to_path_buf(),
        })
    }

    fn commit(self) -> Result<(), RailprepError> {
        fs::rename(&self.temp, &self.dest).map_err(|err| {
            let _ = fs::remove_file(&self.temp);
            RailprepError::Io(err)
        })
    }

    fn discard(self) {
        let _ = fs::remove_file(&self.temp);
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.railprep-tmp", name))
}

fn ensure_parent(path: &Path) -> Result<(), RailprepError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(RailprepError::Io)?;
        }
    }
    Ok(())
}

/// Writes `bytes` to a temporary sibling of `path`, then renames it into
/// place. Parent directories are created as needed.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RailprepError> {
    StagedFile::new(path, |temp| fs::write(temp, bytes))?.commit()
}

#[derive(Serialize)]
struct DataYaml {
    path: String,
    train: Vec<String>,
    val: Vec<String>,
    names: BTreeMap<usize, String>,
}

/// Image directories to list in `data.yaml`, relative to the output root.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatasetSplits {
    pub train: BTreeSet<String>,
    pub val: BTreeSet<String>,
}

impl DatasetSplits {
    /// Files the image directory of a placement that received an image under
    /// train or val. Only per-class-split output has a held-out half; other
    /// layouts list every group under both keys.
    pub fn record(&mut self, mode: LayoutMode, placement: &OutputPlacement, split: Split) {
        let key = placement.image_dir_key();
        match (mode, split) {
            (LayoutMode::PerClassSplit, Split::Train) => {
                self.train.insert(key);
            }
            (LayoutMode::PerClassSplit, Split::Test) => {
                self.val.insert(key);
            }
            _ => {
                self.train.insert(key.clone());
                self.val.insert(key);
            }
        }
    }
}

/// Writes an Ultralytics-style `data.yaml` at the output root.
pub fn write_data_yaml(
    root: &Path,
    registry: &ClassRegistry,
    splits: &DatasetSplits,
) -> Result<PathBuf, RailprepError> {
    let path = root.join(DATA_YAML_FILE);
    let absolute = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());

    let doc = DataYaml {
        path: absolute.to_string_lossy().into_owned(),
        train: splits.train.iter().cloned().collect(),
        val: splits.val.iter().cloned().collect(),
        names: registry
            .iter()
            .map(|(id, name)| (id.as_usize(), name.to_string()))
            .collect(),
    };

    let yaml = serde_yaml::to_string(&doc).map_err(|source| RailprepError::DataYamlWrite {
        path: path.clone(),
        source,
    })?;
    write_atomic(&path, yaml.as_bytes())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LabelCleaner;

    fn key(class_group: Option<&str>) -> PlacementKey<'_> {
        PlacementKey {
            class_group,
            partition: Partition::NonTarget,
            split: Split::Train,
        }
    }

    fn row(class: usize, x: f64, y: f64, w: f64, h: f64) -> LabelRow {
        LabelRow {
            class_id: ClassId(class),
            bbox: NormalizedBox {
                x_center: x,
                y_center: y,
                width: w,
                height: h,
            },
        }
    }

    #[test]
    fn placement_per_mode() {
        let root = Path::new("/out");

        let flat = OutputPlacement::compute(LayoutMode::Flat, "cam1.jpg", key(Some("train")));
        assert_eq!(flat.image_path(root), PathBuf::from("/out/images/cam1.jpg"));
        assert_eq!(flat.label_path(root), PathBuf::from("/out/labels/cam1.txt"));
        assert_eq!(flat.image_dir_key(), "images");

        let per_class =
            OutputPlacement::compute(LayoutMode::PerClass, "cam1.jpg", key(Some("vehicle")));
        assert_eq!(
            per_class.label_path(root),
            PathBuf::from("/out/labels/vehicle/cam1.txt")
        );

        let split = OutputPlacement::compute(
            LayoutMode::PerClassSplit,
            "cam1.jpg",
            PlacementKey {
                split: Split::Test,
                ..key(Some("vehicle"))
            },
        );
        assert_eq!(
            split.image_path(root),
            PathBuf::from("/out/images/vehicle/test/cam1.jpg")
        );
        assert_eq!(split.image_dir_key(), "images/vehicle/test");

        let binary = OutputPlacement::compute(
            LayoutMode::Binary,
            "cam1.jpg",
            PlacementKey {
                partition: Partition::Target,
                ..key(None)
            },
        );
        assert_eq!(
            binary.image_path(root),
            PathBuf::from("/out/images/target/cam1.jpg")
        );
    }

    #[test]
    fn records_without_retained_shapes_are_grouped_as_unlabeled() {
        let placement = OutputPlacement::compute(LayoutMode::PerClass, "a.png", key(None));
        assert_eq!(placement.group, PathBuf::from(UNLABELED_GROUP));
        assert_eq!(placement.label_name, "a.txt");
    }

    #[test]
    fn target_membership_is_a_set_intersection() {
        let targets: HashSet<String> = ["person".to_string()].into_iter().collect();
        assert!(is_target(["vehicle", "person"], &targets));
        assert!(!is_target(["vehicle"], &targets));
        assert!(!is_target(std::iter::empty::<&str>(), &targets));
    }

    #[test]
    fn label_rows_render_with_six_decimals() {
        let rows = [row(0, 0.3, 0.3, 0.4, 0.4), row(2, 0.5, 0.25, 1.0, 0.125)];
        assert_eq!(
            render_label_file(&rows),
            "0 0.300000 0.300000 0.400000 0.400000\n2 0.500000 0.250000 1.000000 0.125000\n"
        );
        assert_eq!(render_label_file(&[]), "");
    }

    #[test]
    fn emit_writes_image_and_label_without_leftovers() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let source = temp.path().join("cam1.jpg");
        fs::write(&source, b"not really a jpeg").expect("write image");

        let out = temp.path().join("out");
        let emitter = LayoutEmitter::new(&out);
        let placement =
            OutputPlacement::compute(LayoutMode::PerClass, "cam1.jpg", key(Some("vehicle")));

        let written = emitter
            .emit(Some(&source), &placement, &[row(0, 0.5, 0.5, 0.2, 0.2)])
            .expect("emit record");

        let image = written.image.expect("image copied");
        assert_eq!(fs::read(&image).expect("read copy"), b"not really a jpeg");
        assert_eq!(
            fs::read_to_string(&written.label).expect("read label"),
            "0 0.500000 0.500000 0.200000 0.200000\n"
        );

        let leftovers: Vec<_> = fs::read_dir(out.join(LABELS_DIR).join("vehicle"))
            .expect("read label dir")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".railprep-tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn emit_without_rows_writes_empty_label_file() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let emitter = LayoutEmitter::new(temp.path());
        let placement = OutputPlacement::compute(LayoutMode::Flat, "empty.jpg", key(None));

        let written = emitter.emit(None, &placement, &[]).expect("emit record");
        assert!(written.image.is_none());
        assert_eq!(fs::read_to_string(&written.label).expect("read label"), "");
    }

    #[test]
    fn data_yaml_lists_groups_and_names() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let registry = ClassRegistry::with_labels(LabelCleaner::default(), ["vehicle", "person"])
            .expect("seed labels");

        let mut splits = DatasetSplits::default();
        for (class, split) in [("vehicle", Split::Train), ("person", Split::Test)] {
            let placement = OutputPlacement::compute(
                LayoutMode::PerClassSplit,
                "x.jpg",
                PlacementKey {
                    split,
                    ..key(Some(class))
                },
            );
            splits.record(LayoutMode::PerClassSplit, &placement, split);
        }

        let path = write_data_yaml(temp.path(), &registry, &splits).expect("write data.yaml");
        let doc: serde_yaml::Value =
            serde_yaml::from_str(&fs::read_to_string(path).expect("read yaml")).expect("parse");

        assert_eq!(doc["train"][0].as_str(), Some("images/vehicle/train"));
        assert_eq!(doc["val"][0].as_str(), Some("images/person/test"));
        assert_eq!(doc["names"][0].as_str(), Some("vehicle"));
        assert_eq!(doc["names"][1].as_str(), Some("person"));
    }

    #[test]
    fn tagged_names_keep_the_extension() {
        assert_eq!(tagged_name("1.jpg", "TRAIN"), "1_TRAIN.jpg");
        assert_eq!(tagged_name("cam.v2.png", "2"), "cam.v2_2.png");
        assert_eq!(tagged_name("noext", "a"), "noext_a");

        let placement = OutputPlacement::compute(LayoutMode::PerClass, "1.jpg", key(Some("car")));
        let renamed = placement.renamed("1_TRAIN.jpg");
        assert_eq!(renamed.group, placement.group);
        assert_eq!(renamed.label_name, "1_TRAIN.txt");
    }

    #[test]
    fn failed_label_write_leaves_no_image() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let source = temp.path().join("cam1.jpg");
        fs::write(&source, b"pixels").expect("write image");

        let out = temp.path().join("out");
        fs::create_dir_all(out.join(LABELS_DIR)).expect("create labels dir");
        fs::write(out.join(LABELS_DIR).join("vehicle"), b"").expect("block label dir");

        let emitter = LayoutEmitter::new(&out);
        let placement =
            OutputPlacement::compute(LayoutMode::PerClass, "cam1.jpg", key(Some("vehicle")));
        let err = emitter
            .emit(Some(&source), &placement, &[row(0, 0.5, 0.5, 0.2, 0.2)])
            .unwrap_err();

        assert!(matches!(err, RailprepError::Io(_)));
        assert!(!placement.image_path(&out).exists());
    }

    #[test]
    fn failed_image_copy_leaves_no_label() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let out = temp.path().join("out");
        let emitter = LayoutEmitter::new(&out);
        let placement =
            OutputPlacement::compute(LayoutMode::PerClass, "gone.jpg", key(Some("vehicle")));

        let err = emitter
            .emit(
                Some(&temp.path().join("gone.jpg")),
                &placement,
                &[row(0, 0.5, 0.5, 0.2, 0.2)],
            )
            .unwrap_err();

        assert!(matches!(err, RailprepError::Io(_)));
        let label_dir = out.join(LABELS_DIR).join("vehicle");
        let remaining: Vec<_> = fs::read_dir(&label_dir)
            .expect("read label dir")
            .filter_map(Result::ok)
            .collect();
        assert!(remaining.is_empty());
        assert!(!placement.image_path(&out).exists());
    }
}
