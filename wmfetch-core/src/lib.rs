//! Fetch-side watermark tracking for a single consuming vertex.
//!
//! Every upstream processor publishing watermarks gets a [`ProcessorToFetch`] which owns the
//! processor's lifecycle status, its bounded [`OffsetTimeline`] and a background task that
//! ingests updates from the shared offset-timeline (OT) bucket. The [`ProcessorManager`] is the
//! owner that creates processors on heartbeats and ages them out when they go silent.
//!
//! [`ProcessorToFetch`]: watermark::processor::ProcessorToFetch
//! [`OffsetTimeline`]: watermark::timeline::OffsetTimeline
//! [`ProcessorManager`]: watermark::manager::ProcessorManager

pub mod config;

pub mod error;
pub use crate::error::{Error, Result};

pub mod watermark;
