use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wildwatch::capture::{FrameSource, GifSource, ImageSequence};
use wildwatch::classifier::{load_grayscale_dir, ClassifierArtifact, Trainer, TrainerConfig};
use wildwatch::motion::{self, Mog2Config, ProposerConfig};
use wildwatch::output::{DirectorySink, NullSink, OutputSink};
use wildwatch::pipeline::{run_pipeline, FrameClassifier, PipelineConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the human/animal classifier from two image directories
    Train(TrainArgs),
    /// Detect and classify motion in a frame stream
    Watch(WatchArgs),
    /// Annotate people in the snapshot of a sensor document
    Annotate(AnnotateArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Directory of images showing people
    #[arg(long)]
    human_dir: PathBuf,

    /// Directory of images showing animals
    #[arg(long)]
    animal_dir: PathBuf,

    /// Where to write the trained classifier
    #[arg(short, long, default_value = "classifier.bin")]
    output: PathBuf,

    /// Seed of the train/test split
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Trained classifier produced by `train`
    #[arg(short, long)]
    model: PathBuf,

    /// Directory of frames, played in file name order
    #[arg(long, conflicts_with_all = ["gif", "camera"])]
    frames: Option<PathBuf>,

    /// Animated GIF to play
    #[arg(long, conflicts_with = "camera")]
    gif: Option<PathBuf>,

    /// Webcam device index (requires the `camera` feature)
    #[arg(long)]
    camera: Option<u32>,

    /// Capture resolution width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Write annotated frames as PNG files into this directory
    #[arg(long, conflicts_with = "output_device")]
    output_dir: Option<PathBuf>,

    /// v4l2loopback device for live annotated output (requires the `loopback` feature)
    #[arg(long)]
    output_device: Option<PathBuf>,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Frames covered by the background model
    #[arg(long, default_value_t = 500)]
    history: u32,

    /// Squared Mahalanobis distance for a background match
    #[arg(long, default_value_t = 50.0)]
    var_threshold: f32,

    /// Disable shadow marking
    #[arg(long)]
    no_shadows: bool,

    /// Median filter kernel applied to the foreground mask (odd)
    #[arg(long, default_value_t = 5)]
    median_kernel: u32,

    /// Smallest blob, in pixels, treated as a moving object
    #[arg(long, default_value_t = 500)]
    min_area: u32,

    /// Target frames per second; unlimited when absent
    #[arg(long)]
    fps: Option<u32>,
}

#[derive(Args, Debug)]
struct AnnotateArgs {
    /// Sensor document (JSON) holding a base64 snapshot
    #[arg(long)]
    document: PathBuf,

    /// YOLOv8 person detector in ONNX format (requires the `onnx` feature)
    #[arg(long)]
    detector_model: PathBuf,

    /// Where to write the annotated snapshot
    #[arg(short, long, default_value = "output.jpeg")]
    output: PathBuf,

    /// Minimum person score
    #[arg(long, default_value_t = 0.25)]
    confidence: f32,

    /// IoU above which overlapping boxes are suppressed
    #[arg(long, default_value_t = 0.45)]
    iou: f32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Wildwatch starting");

    match cli.command {
        Command::Train(args) => train(args),
        Command::Watch(args) => watch(args),
        Command::Annotate(args) => annotate(args),
    }
}

fn train(args: TrainArgs) -> Result<()> {
    let humans = load_grayscale_dir(&args.human_dir)
        .with_context(|| format!("Failed to load human images from {}", args.human_dir.display()))?;
    let animals = load_grayscale_dir(&args.animal_dir)
        .with_context(|| format!("Failed to load animal images from {}", args.animal_dir.display()))?;

    let trainer = Trainer::new(TrainerConfig {
        seed: args.seed,
        ..TrainerConfig::default()
    })?;
    let (artifact, report) = trainer
        .train(&humans.images, &animals.images)
        .context("Failed to train classifier")?;

    artifact
        .save(&args.output)
        .with_context(|| format!("Failed to save classifier to {}", args.output.display()))?;

    tracing::info!(
        "Trained on {} images, held out {}, accuracy {:.2}",
        report.train_count,
        report.held_out.len(),
        report.accuracy
    );
    println!("Model accuracy: {:.2}", report.accuracy);

    Ok(())
}

fn watch(args: WatchArgs) -> Result<()> {
    let artifact = ClassifierArtifact::load(&args.model)
        .with_context(|| format!("Failed to load classifier from {}", args.model.display()))?;

    let model = motion::create_default_model(Mog2Config {
        history: args.history,
        var_threshold: args.var_threshold,
        detect_shadows: !args.no_shadows,
        ..Mog2Config::default()
    })
    .context("Failed to create background model")?;

    let mut classifier = FrameClassifier::new(
        model,
        Arc::new(artifact),
        PipelineConfig {
            median_kernel: args.median_kernel,
            proposer: ProposerConfig {
                min_area: args.min_area,
            },
        },
    )?;

    let mut source = open_source(&args)?;
    let mut sink = open_sink(&args)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed))
        .context("Failed to install Ctrl+C handler")?;

    let summary = run_pipeline(&mut source, &mut sink, &mut classifier, &cancel, args.fps)?;

    println!("Frames processed: {}", summary.frames);
    for (label, count) in &summary.per_label {
        println!("{label}: {count}");
    }

    Ok(())
}

fn open_source(args: &WatchArgs) -> Result<Box<dyn FrameSource>> {
    if let Some(dir) = &args.frames {
        return Ok(Box::new(ImageSequence::open(dir)?));
    }
    if let Some(path) = &args.gif {
        return Ok(Box::new(GifSource::open(path)?));
    }
    if let Some(index) = args.camera {
        return open_camera(index, args.capture_width, args.capture_height);
    }
    bail!("No frame source given: use --frames, --gif or --camera")
}

#[cfg(feature = "camera")]
fn open_camera(index: u32, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
    let capture = wildwatch::capture::WebcamCapture::new(index, width, height)
        .context("Failed to initialize webcam capture")?;
    Ok(Box::new(capture))
}

#[cfg(not(feature = "camera"))]
fn open_camera(_index: u32, _width: u32, _height: u32) -> Result<Box<dyn FrameSource>> {
    bail!("Camera input needs a build with the `camera` feature")
}

fn open_sink(args: &WatchArgs) -> Result<Box<dyn OutputSink>> {
    if let Some(dir) = &args.output_dir {
        return Ok(Box::new(DirectorySink::new(dir)?));
    }
    if let Some(device) = &args.output_device {
        return open_loopback(device, args.output_width, args.output_height);
    }
    tracing::info!("No output configured, annotated frames are discarded");
    Ok(Box::new(NullSink::default()))
}

#[cfg(feature = "loopback")]
fn open_loopback(device: &Path, width: u32, height: u32) -> Result<Box<dyn OutputSink>> {
    let output = wildwatch::output::V4L2Output::new(device, width, height)
        .context("Failed to initialize v4l2loopback output")?;
    Ok(Box::new(output))
}

#[cfg(not(feature = "loopback"))]
fn open_loopback(_device: &Path, _width: u32, _height: u32) -> Result<Box<dyn OutputSink>> {
    bail!("Loopback output needs a build with the `loopback` feature")
}

#[cfg(feature = "onnx")]
fn annotate(args: AnnotateArgs) -> Result<()> {
    use wildwatch::annotate::{process_document, DetectorConfig, OnnxPersonDetector};

    let text = std::fs::read_to_string(&args.document)
        .with_context(|| format!("Failed to read {}", args.document.display()))?;
    let document: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {}", args.document.display()))?;

    let mut detector = OnnxPersonDetector::new(
        &args.detector_model,
        DetectorConfig {
            confidence_threshold: args.confidence,
            iou_threshold: args.iou,
            ..DetectorConfig::default()
        },
    )?;

    let updated = process_document(document, &mut detector, &args.output)?;
    println!("{}", serde_json::to_string_pretty(&updated)?);

    Ok(())
}

#[cfg(not(feature = "onnx"))]
fn annotate(args: AnnotateArgs) -> Result<()> {
    bail!(
        "Cannot run detector {}: annotation needs a build with the `onnx` feature",
        args.detector_model.display()
    )
}
