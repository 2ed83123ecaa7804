//! Activity capture: normalization and buffering
//!
//! Capture never suspends and never fails outward. Records go from an
//! integration's [`RawEvent`] through the [`Normalizer`] into the
//! [`ActivityBuffer`], which cuts ordered batches for delivery and keeps a
//! short history for local flow inference.

mod buffer;
mod normalizer;

pub use buffer::{ActivityBuffer, BufferStats, PushOutcome};
pub use normalizer::{map_kind, Normalizer, RawEvent};
