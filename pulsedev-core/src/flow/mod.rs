//! Local flow-state inference
//!
//! The [`FlowClassifier`] is a pure state machine: it reads the buffer's
//! recent history on each evaluation tick and never performs I/O.

mod classifier;
mod episode;
mod metrics;

pub use classifier::{Evaluation, FlowClassifier};
pub use episode::{BreakSuggestion, FlowEpisode};
pub use metrics::WindowMetrics;
