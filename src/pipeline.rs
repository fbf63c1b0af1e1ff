use crate::capture::FrameSource;
use crate::classifier::ClassifierArtifact;
use crate::error::WildwatchError;
use crate::features::{to_gray, HogExtractor};
use crate::motion::{median_blur, BackgroundModel, BoundingBox, ProposerConfig, RegionProposer};
use crate::output::overlay::{draw_labeled_box, GREEN};
use crate::output::OutputSink;
use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A classified motion region
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    /// Probability of `label`, in percent
    pub confidence: f64,
}

impl Detection {
    pub fn caption(&self) -> String {
        format!("{} ({:.1}%)", self.label, self.confidence)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Odd kernel of the median filter applied to the raw mask
    pub median_kernel: u32,
    pub proposer: ProposerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            median_kernel: 5,
            proposer: ProposerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameResult {
    pub detections: Vec<Detection>,
    /// The background model had not yet seen a full history when this frame arrived
    pub warming_up: bool,
}

/// Motion detection followed by per-region classification
pub struct FrameClassifier {
    model: Box<dyn BackgroundModel>,
    artifact: Arc<ClassifierArtifact>,
    extractor: HogExtractor,
    proposer: RegionProposer,
    median_kernel: u32,
}

impl FrameClassifier {
    pub fn new(
        model: Box<dyn BackgroundModel>,
        artifact: Arc<ClassifierArtifact>,
        config: PipelineConfig,
    ) -> crate::error::Result<Self> {
        if config.median_kernel == 0 || config.median_kernel % 2 == 0 {
            return Err(WildwatchError::config(format!(
                "median kernel must be odd, got {}",
                config.median_kernel
            )));
        }
        let extractor = HogExtractor::new(*artifact.hog_params())?;

        Ok(Self {
            model,
            artifact,
            extractor,
            proposer: RegionProposer::new(config.proposer),
            median_kernel: config.median_kernel,
        })
    }

    /// Feed one frame to the background model and classify every moving region
    pub fn process_frame(&mut self, frame: &RgbImage) -> crate::error::Result<FrameResult> {
        let gray = to_gray(frame);

        let mask = {
            let _span = tracing::debug_span!("background_update").entered();
            self.model.update(&gray)?
        };
        let warming_up = self.model.is_warming_up();
        let mask = median_blur(&mask, self.median_kernel)?;
        let boxes = self.proposer.propose(&mask);

        let _span = tracing::debug_span!("classify_regions", regions = boxes.len()).entered();
        let mut detections = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let region = imageops::crop_imm(&gray, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
            let descriptor = self.extractor.extract(&region)?;
            let prediction = self.artifact.classify(&descriptor)?;

            tracing::debug!(
                "Region at ({}, {}) {}x{}: {} {:.1}%",
                bbox.x,
                bbox.y,
                bbox.width,
                bbox.height,
                prediction.label,
                prediction.confidence
            );

            detections.push(Detection {
                bbox,
                label: prediction.label,
                confidence: prediction.confidence,
            });
        }

        Ok(FrameResult {
            detections,
            warming_up,
        })
    }
}

/// Copy of `frame` with every detection boxed and captioned
pub fn annotate(frame: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut annotated = frame.clone();
    for detection in detections {
        let b = &detection.bbox;
        draw_labeled_box(&mut annotated, b.x, b.y, b.width, b.height, &detection.caption(), GREEN);
    }
    annotated
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub detections: u64,
    pub per_label: BTreeMap<String, u64>,
}

/// Pull frames until the source ends or `cancel` is raised
///
/// A frame the source fails to deliver ends the run the same way end of
/// stream does, with a warning. Classification and sink errors are fatal.
pub fn run_pipeline<S, O>(
    source: &mut S,
    sink: &mut O,
    classifier: &mut FrameClassifier,
    cancel: &AtomicBool,
    target_fps: Option<u32>,
) -> Result<RunSummary>
where
    S: FrameSource + ?Sized,
    O: OutputSink + ?Sized,
{
    let frame_duration = target_fps
        .filter(|fps| *fps > 0)
        .map(|fps| Duration::from_secs_f32(1.0 / fps as f32));
    let mut summary = RunSummary::default();
    let mut total_capture_time = Duration::ZERO;
    let mut total_classify_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;
    let mut was_warming_up = false;

    tracing::info!("Starting main pipeline loop");
    tracing::info!("Press Ctrl+C to stop");

    loop {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!("Cancellation requested, stopping");
            break;
        }
        let loop_start = Instant::now();

        let capture_start = Instant::now();
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("End of stream");
                break;
            }
            Err(e) => {
                tracing::warn!("Failed to read frame {}: {:#}", summary.frames + 1, e);
                break;
            }
        };
        total_capture_time += capture_start.elapsed();

        let classify_start = Instant::now();
        let result = classifier
            .process_frame(&frame)
            .with_context(|| format!("Failed to process frame {}", summary.frames + 1))?;
        total_classify_time += classify_start.elapsed();

        if result.warming_up != was_warming_up {
            if result.warming_up {
                tracing::info!("Background model warming up");
            } else {
                tracing::info!("Background model warm-up complete");
            }
            was_warming_up = result.warming_up;
        }

        let output_start = Instant::now();
        let annotated = annotate(&frame, &result.detections);
        sink.write_frame(&annotated).context("Failed to write frame")?;
        total_output_time += output_start.elapsed();

        summary.frames += 1;
        summary.detections += result.detections.len() as u64;
        for detection in &result.detections {
            *summary.per_label.entry(detection.label.clone()).or_insert(0) += 1;
        }

        // Log stats every 30 frames
        if summary.frames % 30 == 0 {
            let frames = summary.frames as f64;
            let avg_capture_ms = total_capture_time.as_secs_f64() * 1000.0 / frames;
            let avg_classify_ms = total_classify_time.as_secs_f64() * 1000.0 / frames;
            let avg_output_ms = total_output_time.as_secs_f64() * 1000.0 / frames;
            let total_ms = avg_capture_ms + avg_classify_ms + avg_output_ms;
            let actual_fps = if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 };

            tracing::info!(
                "Frame {}: capture={:.1}ms, classify={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}, detections={}",
                summary.frames,
                avg_capture_ms,
                avg_classify_ms,
                avg_output_ms,
                total_ms,
                actual_fps,
                summary.detections
            );
        }

        // Frame rate limiting
        if let Some(frame_duration) = frame_duration {
            let elapsed = loop_start.elapsed();
            if elapsed < frame_duration {
                std::thread::sleep(frame_duration - elapsed);
            }
        }
    }

    tracing::info!(
        "Processed {} frames, {} detections {:?}",
        summary.frames,
        summary.detections,
        summary.per_label
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{LabelEncoder, LinearSvm, PlattScaling, ANIMAL, HUMAN};
    use crate::features::HogParams;
    use crate::motion::{Mog2, Mog2Config};
    use crate::output::NullSink;
    use image::{Rgb, RgbImage};
    use ndarray::Array1;

    /// Artifact whose decision value is the constant bias
    fn constant_artifact(bias: f64) -> Arc<ClassifierArtifact> {
        let hog = HogParams::default();
        let svm = LinearSvm::from_parts(Array1::zeros(hog.descriptor_len()), bias);
        let artifact = ClassifierArtifact::new(
            hog,
            LabelEncoder::fit([HUMAN, ANIMAL]),
            svm,
            PlattScaling::new(-2.0, 0.0),
        )
        .unwrap();
        Arc::new(artifact)
    }

    fn classifier(history: u32) -> FrameClassifier {
        let model = Mog2::new(Mog2Config {
            history,
            ..Mog2Config::default()
        })
        .unwrap();
        FrameClassifier::new(Box::new(model), constant_artifact(1.0), PipelineConfig::default()).unwrap()
    }

    fn frame_with_rect(x: u32, y: u32, w: u32, h: u32) -> RgbImage {
        let mut frame = RgbImage::new(160, 120);
        for yy in y..y + h {
            for xx in x..x + w {
                frame.put_pixel(xx, yy, Rgb([250, 250, 250]));
            }
        }
        frame
    }

    struct Frames(std::vec::IntoIter<anyhow::Result<Option<RgbImage>>>);

    impl FrameSource for Frames {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            self.0.next().unwrap_or(Ok(None))
        }
    }

    #[test]
    fn moving_rectangle_is_detected_and_labeled() {
        let mut classifier = classifier(50);
        let blank = RgbImage::new(160, 120);
        for _ in 0..60 {
            classifier.process_frame(&blank).unwrap();
        }

        let result = classifier.process_frame(&frame_with_rect(30, 20, 40, 50)).unwrap();

        assert!(!result.warming_up);
        assert_eq!(result.detections.len(), 1);
        let detection = &result.detections[0];
        assert_eq!(
            (detection.bbox.x, detection.bbox.y, detection.bbox.width, detection.bbox.height),
            (30, 20, 40, 50)
        );
        assert_eq!(detection.label, HUMAN);
        assert!(detection.confidence > 50.0 && detection.confidence <= 100.0);
    }

    #[test]
    fn even_median_kernel_is_rejected() {
        let model = Mog2::new(Mog2Config::default()).unwrap();
        let config = PipelineConfig {
            median_kernel: 4,
            ..PipelineConfig::default()
        };
        assert!(FrameClassifier::new(Box::new(model), constant_artifact(1.0), config).is_err());
    }

    #[test]
    fn annotate_leaves_source_untouched() {
        let frame = RgbImage::new(100, 100);
        let detections = vec![Detection {
            bbox: BoundingBox {
                x: 10,
                y: 40,
                width: 30,
                height: 30,
                area: 900,
            },
            label: ANIMAL.to_string(),
            confidence: 87.5,
        }];

        let annotated = annotate(&frame, &detections);

        assert!(frame.pixels().all(|p| *p == Rgb([0, 0, 0])));
        assert_eq!(*annotated.get_pixel(10, 40), GREEN);
        assert_eq!(detections[0].caption(), "Animal (87.5%)");
    }

    #[test]
    fn read_error_ends_the_run() {
        let frames = vec![
            Ok(Some(RgbImage::new(160, 120))),
            Err(anyhow::anyhow!("corrupt frame")),
            Ok(Some(RgbImage::new(160, 120))),
        ];
        let mut source = Frames(frames.into_iter());
        let mut sink = NullSink::default();
        let cancel = AtomicBool::new(false);

        let summary = run_pipeline(&mut source, &mut sink, &mut classifier(10), &cancel, None).unwrap();

        assert_eq!(summary.frames, 1);
        assert_eq!(sink.frames, 1);
    }

    #[test]
    fn cancellation_stops_before_the_next_frame() {
        let frames = vec![Ok(Some(RgbImage::new(160, 120)))];
        let mut source = Frames(frames.into_iter());
        let mut sink = NullSink::default();
        let cancel = AtomicBool::new(true);

        let summary = run_pipeline(&mut source, &mut sink, &mut classifier(10), &cancel, None).unwrap();

        assert_eq!(summary, RunSummary::default());
    }

    /// Raises `cancel` while handing out frame number `cancel_on`
    struct CancellingSource {
        delivered: usize,
        total: usize,
        cancel_on: usize,
        cancel: Arc<AtomicBool>,
    }

    impl FrameSource for CancellingSource {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            if self.delivered == self.total {
                return Ok(None);
            }
            self.delivered += 1;
            if self.delivered == self.cancel_on {
                self.cancel.store(true, Ordering::Relaxed);
            }
            Ok(Some(RgbImage::new(160, 120)))
        }
    }

    #[test]
    fn cancellation_mid_stream_finishes_the_current_frame() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut source = CancellingSource {
            delivered: 0,
            total: 10,
            cancel_on: 3,
            cancel: Arc::clone(&cancel),
        };
        let mut sink = NullSink::default();
        let mut classifier = classifier(10);

        let summary = run_pipeline(&mut source, &mut sink, &mut classifier, &cancel, None).unwrap();

        assert_eq!(summary.frames, 3);
        assert_eq!(sink.frames, 3);
        assert_eq!(source.delivered, 3);

        // The background model keeps its state and accepts further frames
        let result = classifier.process_frame(&RgbImage::new(160, 120)).unwrap();
        assert!(result.detections.is_empty());
    }

    #[test]
    fn frame_size_change_is_fatal() {
        let frames = vec![
            Ok(Some(RgbImage::new(160, 120))),
            Ok(Some(RgbImage::new(80, 60))),
        ];
        let mut source = Frames(frames.into_iter());
        let cancel = AtomicBool::new(false);

        let result = run_pipeline(&mut source, &mut NullSink::default(), &mut classifier(10), &cancel, None);

        assert!(result.is_err());
    }
}
