//! Railprep: LabelMe annotations to YOLO training data.
//!
//! Railprep reads the per-image JSON records written by the LabelMe
//! annotation tool for a railway-safety image collection, reduces every
//! labeled shape to a normalized bounding box, assigns stable class IDs, and
//! lays images and label files out the way a YOLO training run expects.
//!
//! # Modules
//!
//! - [`annotation`]: Annotation file model, discovery, and path cleanup
//! - [`geometry`]: Point lists to normalized boxes
//! - [`registry`]: Label cleaning and class ID assignment
//! - [`layout`]: Output placement and atomic file writing
//! - [`conversion`]: The batch pipeline and its report
//! - [`preview`]: Annotated preview images
//! - [`config`]: Per-deployment settings
//! - [`error`]: Error types for railprep operations

pub mod annotation;
pub mod config;
pub mod conversion;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod preview;
pub mod registry;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use config::{DeploymentConfig, EmptyRecordPolicy, OutOfRangePolicy, CONFIG_ENV_VAR};
use conversion::{ConvertOptions, DEFAULT_OUTPUT_DIR};
use layout::LayoutMode;
use preview::{PreviewOptions, DEFAULT_PREVIEW_DIR};
use registry::{CasePolicy, LabelCleaner};

pub use error::RailprepError;

/// The railprep CLI application.
#[derive(Parser)]
#[command(name = "railprep")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Convert annotation files into a YOLO dataset.
    Convert(ConvertArgs),
    /// Normalize `imagePath` in annotation files in place.
    Clean(CleanArgs),
    /// List images that have no annotation file yet.
    Pending(PendingArgs),
    /// Draw each record's shapes onto a copy of its image.
    Preview(PreviewArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

/// Arguments for the convert subcommand.
#[derive(clap::Args)]
struct ConvertArgs {
    /// Directory searched recursively for annotation files.
    input: PathBuf,

    /// Output directory [default: <INPUT>/YOLOv8-ready].
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,

    /// Deployment settings file (YAML).
    #[arg(long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Output directory layout.
    #[arg(long, value_enum)]
    layout: Option<LayoutMode>,

    /// Whether label case is significant.
    #[arg(long = "case", value_enum)]
    case_policy: Option<CasePolicy>,

    /// Target labels for binary layout (comma-separated).
    #[arg(long = "target", value_delimiter = ',')]
    targets: Vec<String>,

    /// Class name written for target shapes in binary layout.
    #[arg(long)]
    target_class: Option<String>,

    /// Share of records drawn into `test` in per-class-split layout.
    #[arg(long, value_parser = parse_fraction)]
    test_fraction: Option<f64>,

    /// Seed for the train/test draw.
    #[arg(long)]
    seed: Option<u64>,

    /// Ordered labels registered before any annotation is read.
    #[arg(long, value_delimiter = ',')]
    labels: Vec<String>,

    /// What to do with records that have no shapes.
    #[arg(long, value_enum)]
    empty_records: Option<EmptyRecordPolicy>,

    /// What to do with boxes that leave the image.
    #[arg(long, value_enum)]
    out_of_range: Option<OutOfRangePolicy>,

    /// Also write normalized `imagePath` values back into annotation files.
    #[arg(long)]
    rewrite_sources: bool,

    /// Ignore an existing classes.txt in the output directory.
    #[arg(long)]
    fresh_classes: bool,

    /// Output format for the report.
    #[arg(long, value_enum, default_value = "text")]
    output: ReportFormat,

    /// Exit non-zero if any record or shape failed to convert.
    #[arg(long)]
    strict: bool,
}

impl ConvertArgs {
    /// Applies command-line overrides on top of the deployment file.
    fn deployment_config(&self) -> Result<DeploymentConfig, RailprepError> {
        let mut config = match &self.config {
            Some(path) => DeploymentConfig::load(path)?,
            None => DeploymentConfig::default(),
        };

        if let Some(layout) = self.layout {
            config.layout = layout;
        }
        if let Some(case_policy) = self.case_policy {
            config.case_policy = case_policy;
        }
        if !self.targets.is_empty() {
            config.target_labels = self.targets.clone();
        }
        if let Some(name) = &self.target_class {
            config.target_class_name = name.clone();
        }
        if let Some(fraction) = self.test_fraction {
            config.test_fraction = fraction;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if !self.labels.is_empty() {
            config.labels = self.labels.clone();
        }
        if let Some(policy) = self.empty_records {
            config.empty_records = policy;
        }
        if let Some(policy) = self.out_of_range {
            config.out_of_range = policy;
        }
        if self.rewrite_sources {
            config.rewrite_sources = true;
        }

        Ok(config)
    }
}

fn parse_fraction(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err(format!("'{}' is not a number between 0.0 and 1.0", s)),
    }
}

/// Arguments for the clean subcommand.
#[derive(clap::Args)]
struct CleanArgs {
    /// Directory searched recursively for annotation files.
    input: PathBuf,

    /// Deployment settings file (YAML); only `stale_prefixes` is used.
    #[arg(long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Stale path prefix to strip (repeatable; replaces the configured list).
    #[arg(long = "prefix")]
    prefixes: Vec<String>,

    /// List files that would change without writing them.
    #[arg(long)]
    dry_run: bool,
}

/// Arguments for the pending subcommand.
#[derive(clap::Args)]
struct PendingArgs {
    /// Directory searched recursively for images.
    images: PathBuf,

    /// Directory holding the annotation files [default: next to each image].
    #[arg(long)]
    annotations: Option<PathBuf>,
}

/// Arguments for the preview subcommand.
#[derive(clap::Args)]
struct PreviewArgs {
    /// Directory searched recursively for annotation files.
    input: PathBuf,

    /// Output directory [default: <INPUT>/annotated-preview].
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,

    /// Deployment settings file (YAML); `case_policy` and `stale_prefixes`
    /// are used.
    #[arg(long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Whether label case is significant for the class folders.
    #[arg(long = "case", value_enum)]
    case_policy: Option<CasePolicy>,
}

/// Run the railprep CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), RailprepError> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Convert(args)) => run_convert(args),
        Some(Commands::Clean(args)) => run_clean(args),
        Some(Commands::Pending(args)) => run_pending(args),
        Some(Commands::Preview(args)) => run_preview(args),
        None => {
            println!("railprep {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("LabelMe annotations to YOLO training data.");
            println!();
            println!("Run 'railprep --help' for usage information.");
            Ok(())
        }
    }
}

/// Sets a flag on Ctrl-C so a batch can stop between files.
fn install_cancel_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    if let Err(err) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        log::warn!("Ctrl-C will not stop the run cleanly: {}", err);
    }
    flag
}

/// Execute the convert subcommand.
fn run_convert(args: ConvertArgs) -> Result<(), RailprepError> {
    let config = args.deployment_config()?;
    let output = args
        .out
        .clone()
        .unwrap_or_else(|| args.input.join(DEFAULT_OUTPUT_DIR));

    let opts = ConvertOptions {
        input: args.input.clone(),
        output,
        config,
        fresh_classes: args.fresh_classes,
    };

    let cancel = install_cancel_flag();
    let outcome = conversion::convert_dataset(&opts, &cancel)?;
    let report = outcome.report;

    match args.output {
        ReportFormat::Json => {
            let json =
                serde_json::to_string_pretty(&report).map_err(RailprepError::ReportSerialize)?;
            println!("{}", json);
        }
        ReportFormat::Text => print!("{}", report),
    }

    if args.strict && report.error_count() > 0 {
        return Err(RailprepError::ConversionFailed {
            error_count: report.error_count(),
            warning_count: report.warning_count(),
            report: Box::new(report),
        });
    }

    Ok(())
}

/// Execute the clean subcommand.
fn run_clean(args: CleanArgs) -> Result<(), RailprepError> {
    if !args.input.is_dir() {
        return Err(RailprepError::InputNotFound { path: args.input });
    }

    let prefixes = if args.prefixes.is_empty() {
        match &args.config {
            Some(path) => DeploymentConfig::load(path)?.stale_prefixes,
            None => DeploymentConfig::default().stale_prefixes,
        }
    } else {
        args.prefixes.clone()
    };

    let discovery = annotation::discover_annotation_files(&args.input, None);
    let files = discovery.files;
    let mut changed = 0usize;
    let mut failed = discovery.unreadable.len();
    for err in &discovery.unreadable {
        log::warn!("skipping: {}", err);
    }

    for path in &files {
        let source = match annotation::read_annotation(path, &prefixes) {
            Ok(source) => source,
            Err(err) => {
                log::warn!("skipping: {}", err);
                failed += 1;
                continue;
            }
        };

        if !source.needs_rewrite() {
            continue;
        }

        if args.dry_run {
            println!("{}", path.display());
            changed += 1;
            continue;
        }

        match annotation::persist_normalized(&source) {
            Ok(_) => {
                println!("{}", path.display());
                changed += 1;
            }
            Err(err) => {
                log::error!("{}", err);
                failed += 1;
            }
        }
    }

    let verb = if args.dry_run { "would normalize" } else { "normalized" };
    log::info!(
        "{} {} of {} annotation file(s); {} failed",
        verb,
        changed,
        files.len(),
        failed
    );
    Ok(())
}

/// Execute the pending subcommand.
fn run_pending(args: PendingArgs) -> Result<(), RailprepError> {
    let pending = annotation::find_pending_images(&args.images, args.annotations.as_deref())?;
    for image in &pending {
        println!("{}", image.display());
    }
    log::info!("{} image(s) without annotations", pending.len());
    Ok(())
}

/// Execute the preview subcommand.
fn run_preview(args: PreviewArgs) -> Result<(), RailprepError> {
    let config = match &args.config {
        Some(path) => DeploymentConfig::load(path)?,
        None => DeploymentConfig::default(),
    };
    let case_policy = args.case_policy.unwrap_or(config.case_policy);

    let opts = PreviewOptions {
        output: args
            .out
            .clone()
            .unwrap_or_else(|| args.input.join(DEFAULT_PREVIEW_DIR)),
        input: args.input,
        stale_prefixes: config.stale_prefixes,
        cleaner: LabelCleaner::new(case_policy),
    };

    let cancel = install_cancel_flag();
    let summary = preview::render_previews(&opts, &cancel)?;
    for path in &summary.written {
        println!("{}", path.display());
    }
    Ok(())
}
