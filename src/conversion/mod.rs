//! The annotation-to-YOLO conversion pipeline.
//!
//! Files are processed one at a time in sorted path order, which together
//! with a reloaded `classes.txt` keeps class IDs stable across runs. Nothing
//! that goes wrong with a single record stops the batch: the problem lands in
//! the [`ConversionReport`] and the next file is processed.

pub mod report;

pub use report::{
    ConversionCounts, ConversionIssue, ConversionIssueCode, ConversionReport, ConversionSeverity,
};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

use crate::annotation::{
    discover_annotation_files, persist_normalized, read_annotation, AnnotationRecord,
    SourceRecord,
};
use crate::config::{DeploymentConfig, EmptyRecordPolicy, OutOfRangePolicy};
use crate::error::RailprepError;
use crate::geometry::{normalize, NormalizedBox};
use crate::layout::{
    is_target, tagged_name, write_data_yaml, DatasetSplits, LabelRow, LayoutEmitter, LayoutMode,
    OutputPlacement, Partition, PlacementKey, Split,
};
use crate::registry::{ClassId, ClassRegistry, LabelCleaner, CLASS_INDEX_FILE};

/// Output directory name used when none is given.
pub const DEFAULT_OUTPUT_DIR: &str = "YOLOv8-ready";

/// Inputs of one conversion run.
#[derive(Clone, Debug)]
pub struct ConvertOptions {
    /// Directory searched recursively for annotation files.
    pub input: PathBuf,
    /// Root of the output tree.
    pub output: PathBuf,
    pub config: DeploymentConfig,
    /// Ignore an existing `classes.txt` in the output and start from scratch.
    pub fresh_classes: bool,
}

impl ConvertOptions {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            config: DeploymentConfig::default(),
            fresh_classes: false,
        }
    }
}

/// Result of a completed (or cancelled) run.
#[derive(Clone, Debug)]
pub struct ConversionOutcome {
    pub report: ConversionReport,
    pub registry: ClassRegistry,
}

/// A shape that made it into a label file.
///
/// The display label is kept as annotated; the cleaned label is what the
/// registry and the folder layout see.
#[derive(Clone, Debug, PartialEq)]
pub struct RetainedShape {
    pub display_label: String,
    pub cleaned_label: String,
    pub class_id: ClassId,
    pub bbox: NormalizedBox,
}

impl RetainedShape {
    pub fn row(&self) -> LabelRow {
        LabelRow {
            class_id: self.class_id,
            bbox: self.bbox,
        }
    }
}

/// Converts every annotation file under `opts.input` into `opts.output`.
///
/// `cancel` is checked before each file; once set, the run stops, saves the
/// class index for what was written, and reports itself as cancelled.
pub fn convert_dataset(
    opts: &ConvertOptions,
    cancel: &AtomicBool,
) -> Result<ConversionOutcome, RailprepError> {
    let config = &opts.config;
    config.validate()?;

    if !opts.input.is_dir() {
        return Err(RailprepError::InputNotFound {
            path: opts.input.clone(),
        });
    }

    log::info!(
        "layout: {}, label case policy: {}",
        config.layout.name(),
        config.case_policy.name()
    );

    let exclude = nested_output(&opts.input, &opts.output);
    let discovery = discover_annotation_files(&opts.input, exclude.as_deref());
    let files = discovery.files;
    log::info!(
        "converting {} annotation file(s) from {} into {}",
        files.len(),
        opts.input.display(),
        opts.output.display()
    );

    let registry = initial_registry(opts)?;
    let splits = draw_splits(files.len(), config.test_fraction, config.seed);

    let mut pipeline = Pipeline::new(opts, registry);
    pipeline.report.counts.files_found = files.len();
    for err in discovery.unreadable {
        let issue =
            ConversionIssue::error(ConversionIssueCode::Io, format!("not searched: {}", err));
        match &err {
            RailprepError::DirectoryWalk { path, .. } => pipeline.note(issue.at(path)),
            _ => pipeline.note(issue),
        }
    }

    for (path, split) in files.iter().zip(splits) {
        if cancel.load(Ordering::SeqCst) {
            log::warn!("cancelled; stopping before {}", path.display());
            pipeline.report.cancelled = true;
            break;
        }
        pipeline.convert_file(path, split);
    }

    pipeline.finish()
}

/// Returns the output directory as seen from a walk of `input`, if it lies
/// inside it.
fn nested_output(input: &Path, output: &Path) -> Option<PathBuf> {
    let input_abs = fs::canonicalize(input).ok()?;
    let output_abs = fs::canonicalize(output).ok()?;
    let relative = output_abs.strip_prefix(&input_abs).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(input.join(relative))
}

fn initial_registry(opts: &ConvertOptions) -> Result<ClassRegistry, RailprepError> {
    let config = &opts.config;
    let cleaner = config.cleaner();

    if config.layout == LayoutMode::Binary {
        return ClassRegistry::with_labels(cleaner, [config.target_class_name.as_str()]);
    }

    let index_path = opts.output.join(CLASS_INDEX_FILE);
    let mut registry = if !opts.fresh_classes && index_path.is_file() {
        let registry = ClassRegistry::load(&index_path, cleaner)?;
        log::info!(
            "extending {} ({} existing class(es))",
            index_path.display(),
            registry.len()
        );
        registry
    } else {
        ClassRegistry::new(cleaner)
    };

    for label in &config.labels {
        registry.resolve(label)?;
    }
    Ok(registry)
}

/// Assigns `train`/`test` to `count` records in sorted order.
///
/// Record indices are shuffled with a seeded RNG and the first
/// `ceil(count * test_fraction)` of them go to `test`, so the draw depends
/// only on the file count, the fraction, and the seed.
pub fn draw_splits(count: usize, test_fraction: f64, seed: u64) -> Vec<Split> {
    let test_count = ((count as f64 * test_fraction).ceil() as usize).min(count);

    let mut order: Vec<usize> = (0..count).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut splits = vec![Split::Train; count];
    for &idx in &order[..test_count] {
        splits[idx] = Split::Test;
    }
    splits
}

struct Pipeline<'a> {
    config: &'a DeploymentConfig,
    input: &'a Path,
    cleaner: LabelCleaner,
    targets: HashSet<String>,
    emitter: LayoutEmitter,
    registry: ClassRegistry,
    dataset_splits: DatasetSplits,
    /// Output files written so far, with the annotation each came from.
    claimed: HashMap<PathBuf, PathBuf>,
    report: ConversionReport,
}

impl<'a> Pipeline<'a> {
    fn new(opts: &'a ConvertOptions, registry: ClassRegistry) -> Self {
        let config = &opts.config;
        let cleaner = config.cleaner();
        let targets = config
            .target_labels
            .iter()
            .filter_map(|label| cleaner.clean(label))
            .collect();

        Self {
            config,
            input: &opts.input,
            cleaner,
            targets,
            emitter: LayoutEmitter::new(&opts.output),
            registry,
            dataset_splits: DatasetSplits::default(),
            claimed: HashMap::new(),
            report: ConversionReport::new(config.layout.name(), config.case_policy.name()),
        }
    }

    fn note(&mut self, issue: ConversionIssue) {
        let location = issue
            .path
            .as_ref()
            .map(|p| format!("{}: ", p.display()))
            .unwrap_or_default();
        match issue.severity {
            ConversionSeverity::Error => log::error!("{}{}", location, issue.message),
            ConversionSeverity::Warning => log::warn!("{}{}", location, issue.message),
            ConversionSeverity::Info => log::info!("{}{}", location, issue.message),
        }
        self.report.add(issue);
    }

    fn skip(&mut self, path: &Path, err: &RailprepError) {
        let code = match err {
            RailprepError::AnnotationParse { .. } => ConversionIssueCode::AnnotationParse,
            RailprepError::MissingImage { .. } => ConversionIssueCode::MissingImage,
            RailprepError::ImageDimensionRead { .. } => ConversionIssueCode::ImageDimensionRead,
            _ => ConversionIssueCode::Io,
        };
        self.note(ConversionIssue::error(code, format!("skipped: {}", err)).at(path));
        self.report.counts.records_skipped += 1;
    }

    fn convert_file(&mut self, path: &Path, split: Split) {
        let source = match read_annotation(path, &self.config.stale_prefixes) {
            Ok(source) => source,
            Err(err) => return self.skip(path, &err),
        };

        if self.config.rewrite_sources {
            match persist_normalized(&source) {
                Ok(true) => self.note(
                    ConversionIssue::info(
                        ConversionIssueCode::SourceRewritten,
                        format!("imagePath normalized to '{}'", source.record.image_reference),
                    )
                    .at(path),
                ),
                Ok(false) => {}
                Err(err) => self.note(
                    ConversionIssue::warning(
                        ConversionIssueCode::Io,
                        format!("could not rewrite annotation: {}", err),
                    )
                    .at(path),
                ),
            }
        }

        let result = if source.record.is_empty() {
            self.convert_empty(&source, split)
        } else {
            self.convert_labeled(&source, split)
        };

        if let Err(err) = result {
            self.skip(path, &err);
        }
    }

    fn convert_empty(&mut self, source: &SourceRecord, split: Split) -> Result<(), RailprepError> {
        let path = &source.path;
        if self.config.empty_records == EmptyRecordPolicy::Skip {
            self.note(ConversionIssue::info(
                ConversionIssueCode::EmptyRecord,
                "no shapes; record skipped",
            )
            .at(path));
            self.report.counts.records_skipped += 1;
            return Ok(());
        }

        // No image is copied for an empty record, so fall back to the
        // annotation's own name when `imagePath` is missing.
        let image_name = if source.record.image_reference.is_empty() {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            source.record.image_reference.clone()
        };

        let placement = self.placement(&image_name, None, Partition::NonTarget, split);
        let placement = self.claim(path, placement, false);
        self.emitter.emit(None, &placement, &[])?;
        self.record_written(path, &placement, false, split);

        self.note(ConversionIssue::info(
            ConversionIssueCode::EmptyRecord,
            "no shapes; wrote empty label file",
        )
        .at(path));
        self.report.counts.records_converted += 1;
        self.report.counts.records_empty += 1;
        Ok(())
    }

    fn convert_labeled(
        &mut self,
        source: &SourceRecord,
        split: Split,
    ) -> Result<(), RailprepError> {
        let image_path = source.image_path();
        if source.record.image_reference.is_empty() || !image_path.is_file() {
            return Err(RailprepError::MissingImage {
                annotation: source.path.clone(),
                image: image_path,
            });
        }

        let size = imagesize::size(&image_path).map_err(|err| {
            RailprepError::ImageDimensionRead {
                path: image_path.clone(),
                source: err,
            }
        })?;

        let known_classes = self.registry.len();
        let (retained, partition) = self.resolve_shapes(
            &source.path,
            &source.record,
            size.width as f64,
            size.height as f64,
        );

        let class_group = retained.first().map(|shape| shape.cleaned_label.clone());
        let placement = self.placement(
            &source.record.image_reference,
            class_group.as_deref(),
            partition,
            split,
        );
        let placement = self.claim(&source.path, placement, true);
        let rows: Vec<LabelRow> = retained.iter().map(RetainedShape::row).collect();

        if let Err(err) = self.emitter.emit(Some(&image_path), &placement, &rows) {
            self.registry.truncate(known_classes);
            return Err(err);
        }
        self.record_written(&source.path, &placement, true, split);

        let labels: Vec<&str> = retained
            .iter()
            .map(|shape| shape.display_label.as_str())
            .collect();
        log::debug!(
            "{} -> {} [{}]",
            source.path.display(),
            placement.label_path(self.emitter.root()).display(),
            labels.join(", ")
        );
        self.report.counts.records_converted += 1;
        self.report.counts.shapes_written += rows.len();
        Ok(())
    }

    /// Cleans, normalizes, and registers each shape of a record.
    ///
    /// In binary layout the record's partition is decided from all of its
    /// cleaned labels, and only target shapes are kept, all as the single
    /// target class.
    fn resolve_shapes(
        &mut self,
        path: &Path,
        record: &AnnotationRecord,
        image_width: f64,
        image_height: f64,
    ) -> (Vec<RetainedShape>, Partition) {
        let binary = self.config.layout == LayoutMode::Binary;
        let cleaned: Vec<Option<String>> = record
            .shapes
            .iter()
            .map(|shape| self.cleaner.clean(&shape.label))
            .collect();

        let partition = if is_target(cleaned.iter().flatten().map(String::as_str), &self.targets) {
            Partition::Target
        } else {
            Partition::NonTarget
        };

        let mut retained = Vec::new();
        for (idx, (shape, cleaned_label)) in record.shapes.iter().zip(cleaned).enumerate() {
            let Some(cleaned_label) = cleaned_label else {
                self.drop_shape(
                    ConversionIssue::warning(
                        ConversionIssueCode::EmptyLabel,
                        format!("shape {}: label '{}' is empty after cleaning", idx, shape.label),
                    )
                    .at(path),
                );
                continue;
            };

            if binary && !self.targets.contains(&cleaned_label) {
                continue;
            }

            let bbox = match normalize(&shape.points, image_width, image_height) {
                Ok(bbox) => bbox,
                Err(err) => {
                    self.drop_shape(
                        ConversionIssue::error(
                            ConversionIssueCode::Geometry,
                            format!("shape {} ('{}'): {}", idx, shape.label, err),
                        )
                        .at(path),
                    );
                    continue;
                }
            };

            let Some(bbox) = self.apply_range_policy(path, idx, &shape.label, bbox) else {
                continue;
            };

            let class_id = if binary {
                ClassId::new(0)
            } else {
                self.registry.register(&cleaned_label)
            };

            log::debug!(
                "shape {} '{}' -> class {} ({})",
                idx,
                shape.label,
                class_id,
                bbox
            );
            retained.push(RetainedShape {
                display_label: shape.label.clone(),
                cleaned_label,
                class_id,
                bbox,
            });
        }

        (retained, partition)
    }

    fn apply_range_policy(
        &mut self,
        path: &Path,
        idx: usize,
        label: &str,
        bbox: NormalizedBox,
    ) -> Option<NormalizedBox> {
        if bbox.is_within_unit() {
            return Some(bbox);
        }

        match self.config.out_of_range {
            OutOfRangePolicy::Reject => {
                self.drop_shape(
                    ConversionIssue::error(
                        ConversionIssueCode::OutOfRangeBox,
                        format!("shape {} ('{}'): box {} leaves the image", idx, label, bbox),
                    )
                    .at(path),
                );
                None
            }
            OutOfRangePolicy::Clamp => {
                let clamped = bbox.clamped();
                self.note(
                    ConversionIssue::warning(
                        ConversionIssueCode::OutOfRangeBox,
                        format!(
                            "shape {} ('{}'): box {} clamped to {}",
                            idx, label, bbox, clamped
                        ),
                    )
                    .at(path),
                );
                Some(clamped)
            }
        }
    }

    fn drop_shape(&mut self, issue: ConversionIssue) {
        self.note(issue);
        self.report.counts.shapes_dropped += 1;
    }

    fn placement(
        &self,
        image_name: &str,
        class_group: Option<&str>,
        partition: Partition,
        split: Split,
    ) -> OutputPlacement {
        OutputPlacement::compute(
            self.config.layout,
            image_name,
            PlacementKey {
                class_group,
                partition,
                split,
            },
        )
    }

    fn is_free(&self, placement: &OutputPlacement, with_image: bool) -> bool {
        let root = self.emitter.root();
        !self.claimed.contains_key(&placement.label_path(root))
            && !(with_image && self.claimed.contains_key(&placement.image_path(root)))
    }

    /// Returns `placement`, or a renamed copy if an earlier record of this
    /// run already wrote to it.
    ///
    /// The first alternative tags the name with the annotation's folder
    /// relative to the input; after that, with a counter.
    fn claim(
        &mut self,
        annotation: &Path,
        placement: OutputPlacement,
        with_image: bool,
    ) -> OutputPlacement {
        if self.is_free(&placement, with_image) {
            return placement;
        }

        let root = self.emitter.root();
        let previous = self
            .claimed
            .get(&placement.label_path(root))
            .or_else(|| self.claimed.get(&placement.image_path(root)))
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let folder_tag = annotation
            .parent()
            .and_then(|dir| dir.strip_prefix(self.input).ok())
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("_")
            })
            .filter(|tag| !tag.is_empty());

        let renamed = folder_tag
            .into_iter()
            .chain((2usize..).map(|n| n.to_string()))
            .map(|tag| placement.renamed(&tagged_name(&placement.image_name, &tag)))
            .find(|candidate| self.is_free(candidate, with_image))
            .unwrap_or_else(|| placement.clone());

        self.note(
            ConversionIssue::warning(
                ConversionIssueCode::NameCollision,
                format!(
                    "'{}' was already written for {}; written as '{}'",
                    placement.image_name, previous, renamed.image_name
                ),
            )
            .at(annotation),
        );
        renamed
    }

    /// Remembers what a record wrote. Only records that received an image
    /// put their image directory into `data.yaml`.
    fn record_written(
        &mut self,
        annotation: &Path,
        placement: &OutputPlacement,
        with_image: bool,
        split: Split,
    ) {
        let root = self.emitter.root().to_path_buf();
        self.claimed
            .insert(placement.label_path(&root), annotation.to_path_buf());
        if with_image {
            self.claimed
                .insert(placement.image_path(&root), annotation.to_path_buf());
            self.dataset_splits
                .record(self.config.layout, placement, split);
        }
    }

    fn finish(mut self) -> Result<ConversionOutcome, RailprepError> {
        let root = self.emitter.root();
        fs::create_dir_all(root).map_err(RailprepError::Io)?;

        self.registry.save(&root.join(CLASS_INDEX_FILE))?;
        write_data_yaml(root, &self.registry, &self.dataset_splits)?;

        self.report.classes = self
            .registry
            .iter()
            .map(|(_, name)| name.to_string())
            .collect();

        let counts = &self.report.counts;
        log::info!(
            "converted {} of {} record(s): {} empty, {} skipped, {} shape(s) written, {} dropped",
            counts.records_converted,
            counts.files_found,
            counts.records_empty,
            counts.records_skipped,
            counts.shapes_written,
            counts.shapes_dropped
        );

        Ok(ConversionOutcome {
            report: self.report,
            registry: self.registry,
        })
    }
}
