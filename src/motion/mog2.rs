//! Mixture of Gaussians background subtraction
//!
//! Every pixel keeps up to `n_mixtures` Gaussian modes sorted by weight. The
//! heaviest modes whose weights add up to `background_ratio` describe the
//! background; a pixel within `var_threshold` squared standard deviations of
//! one of them is background, anything else is foreground (or shadow).

use super::types::{BackgroundModel, ForegroundMask, BACKGROUND, FOREGROUND, SHADOW};
use crate::error::{Result, WildwatchError};
use image::GrayImage;

#[derive(Debug, Clone)]
pub struct Mog2Config {
    /// Number of frames the adaptive estimate covers
    ///
    /// The learning rate is `1 / min(2 * frames_seen, history)`, so early frames
    /// adapt fast and the rate settles at `1 / history`.
    pub history: u32,
    /// Squared Mahalanobis distance under which a pixel matches a background mode
    pub var_threshold: f32,
    /// Mark pixels that look like a darker copy of the background as shadow (127)
    pub detect_shadows: bool,
    pub n_mixtures: usize,
    pub background_ratio: f32,
    /// Squared distance under which a pixel updates an existing mode instead of spawning one
    pub var_threshold_gen: f32,
    pub var_init: f32,
    pub var_min: f32,
    pub var_max: f32,
    /// Prior that prunes modes which stop receiving support
    pub complexity_reduction: f32,
    /// Lowest brightness ratio to the background still considered a shadow
    pub shadow_threshold: f32,
}

impl Default for Mog2Config {
    fn default() -> Self {
        Self {
            history: 500,
            var_threshold: 50.0,
            detect_shadows: true,
            n_mixtures: 5,
            background_ratio: 0.9,
            var_threshold_gen: 9.0,
            var_init: 15.0,
            var_min: 4.0,
            var_max: 75.0,
            complexity_reduction: 0.05,
            shadow_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Gaussian {
    weight: f32,
    mean: f32,
    variance: f32,
}

pub struct Mog2 {
    config: Mog2Config,
    width: u32,
    height: u32,
    /// `n_mixtures` slots per pixel, row-major
    modes: Vec<Gaussian>,
    /// Live modes per pixel
    mode_counts: Vec<u8>,
    frames_seen: u64,
}

impl Mog2 {
    pub fn new(config: Mog2Config) -> Result<Self> {
        if config.history == 0 {
            return Err(WildwatchError::config("background history must be at least one frame"));
        }
        if config.n_mixtures == 0 || config.n_mixtures > u8::MAX as usize {
            return Err(WildwatchError::config(format!(
                "background model needs 1..=255 mixtures, got {}",
                config.n_mixtures
            )));
        }
        if config.var_threshold <= 0.0 || config.var_min <= 0.0 || config.var_min > config.var_max {
            return Err(WildwatchError::config("background variance thresholds must be positive and ordered"));
        }

        tracing::debug!(
            "Background model: history={}, var_threshold={}, shadows={}",
            config.history,
            config.var_threshold,
            config.detect_shadows
        );

        Ok(Self {
            config,
            width: 0,
            height: 0,
            modes: Vec::new(),
            mode_counts: Vec::new(),
            frames_seen: 0,
        })
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    fn init_state(&mut self, width: u32, height: u32) {
        let pixels = (width * height) as usize;

        tracing::debug!("Initializing background model for {}x{}", width, height);

        self.width = width;
        self.height = height;
        self.modes = vec![Gaussian::default(); pixels * self.config.n_mixtures];
        self.mode_counts = vec![0; pixels];
    }

    /// `1 / min(2 * frames_seen, history)`
    fn learning_rate(&self) -> f32 {
        let span = (2 * self.frames_seen).min(self.config.history as u64).max(1);
        1.0 / span as f32
    }
}

impl BackgroundModel for Mog2 {
    fn update(&mut self, frame: &GrayImage) -> Result<ForegroundMask> {
        let _span = tracing::debug_span!("mog2_update").entered();

        let (width, height) = frame.dimensions();
        if self.modes.is_empty() {
            self.init_state(width, height);
        } else if (width, height) != (self.width, self.height) {
            return Err(WildwatchError::FrameDimensions {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: width,
                actual_height: height,
            });
        }

        self.frames_seen += 1;
        let alpha = self.learning_rate();
        let k = self.config.n_mixtures;

        let mut mask = ForegroundMask::new(width, height);
        let config = &self.config;

        for ((pixel, out), (modes, count)) in frame
            .as_raw()
            .iter()
            .zip(mask.iter_mut())
            .zip(self.modes.chunks_exact_mut(k).zip(self.mode_counts.iter_mut()))
        {
            *out = update_pixel(config, modes, count, *pixel as f32, alpha);
        }

        Ok(mask)
    }

    fn is_warming_up(&self) -> bool {
        self.frames_seen < self.config.history as u64
    }
}

/// Update one pixel's mixture with a new sample and classify the sample
fn update_pixel(config: &Mog2Config, modes: &mut [Gaussian], count: &mut u8, pixel: f32, alpha: f32) -> u8 {
    let alpha1 = 1.0 - alpha;
    let prune = -alpha * config.complexity_reduction;
    let mut n = *count as usize;

    let mut background = false;
    let mut fits = false;
    let mut total_weight = 0.0f32;

    for mode in 0..n {
        let mut weight = alpha1 * modes[mode].weight + prune;
        let mut slot = mode;

        if !fits {
            let variance = modes[mode].variance;
            let diff = modes[mode].mean - pixel;
            let dist2 = diff * diff;

            if total_weight < config.background_ratio && dist2 < config.var_threshold * variance {
                background = true;
            }

            if dist2 < config.var_threshold_gen * variance {
                fits = true;
                weight += alpha;
                let k = alpha / weight;
                modes[mode].mean -= k * diff;
                modes[mode].variance = (variance + k * (dist2 - variance)).clamp(config.var_min, config.var_max);

                // Keep modes sorted by weight; predecessors already carry their new weights
                while slot > 0 && weight >= modes[slot - 1].weight {
                    modes.swap(slot, slot - 1);
                    slot -= 1;
                }
            }
        }

        if weight < -prune {
            weight = 0.0;
        }
        modes[slot].weight = weight;
        total_weight += weight;
    }

    // Drop pruned modes
    let mut live = 0;
    for mode in 0..n {
        if modes[mode].weight > 0.0 {
            modes[live] = modes[mode];
            live += 1;
        }
    }
    n = live;

    if total_weight > 0.0 {
        let norm = 1.0 / total_weight;
        for mode in modes.iter_mut().take(n) {
            mode.weight *= norm;
        }
    }

    if !fits {
        let slot = if n == modes.len() {
            n - 1
        } else {
            n += 1;
            n - 1
        };

        if n == 1 {
            modes[slot].weight = 1.0;
        } else {
            modes[slot].weight = alpha;
            for mode in modes.iter_mut().take(n - 1) {
                mode.weight *= alpha1;
            }
        }
        modes[slot].mean = pixel;
        modes[slot].variance = config.var_init;

        let mut slot = slot;
        while slot > 0 && alpha >= modes[slot - 1].weight {
            modes.swap(slot, slot - 1);
            slot -= 1;
        }
    }

    *count = n as u8;

    if background {
        BACKGROUND
    } else if config.detect_shadows && is_shadow(config, &modes[..n], pixel) {
        SHADOW
    } else {
        FOREGROUND
    }
}

/// A shadow is a uniformly darker version of a background mode
fn is_shadow(config: &Mog2Config, modes: &[Gaussian], pixel: f32) -> bool {
    let mut total_weight = 0.0f32;

    for mode in modes {
        let numerator = mode.mean * pixel;
        let denominator = mode.mean * mode.mean;
        if denominator == 0.0 {
            return false;
        }

        if numerator <= denominator && numerator >= config.shadow_threshold * denominator {
            let a = numerator / denominator;
            let dist2a = (a * mode.mean - pixel).powi(2);
            if dist2a < config.var_threshold * mode.variance * a * a {
                return true;
            }
        }

        total_weight += mode.weight;
        if total_weight > config.background_ratio {
            return false;
        }
    }

    false
}
