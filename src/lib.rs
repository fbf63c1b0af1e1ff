//! Motion-triggered human/animal classification for wildlife camera feeds
//!
//! Frames flow through an adaptive background model ([`motion`]), moving
//! regions are described with HOG features ([`features`]) and labeled by a
//! calibrated linear SVM ([`classifier`]). [`pipeline`] ties these together
//! over a [`capture::FrameSource`] and an [`output::OutputSink`]; [`annotate`]
//! handles single sensor snapshots.

pub mod annotate;
pub mod capture;
pub mod classifier;
pub mod error;
pub mod features;
pub mod motion;
pub mod output;
pub mod pipeline;

pub use error::{Result, WildwatchError};
