//! Shared building blocks for the watermark fetch runtime.

/// Generic watched key-value store abstraction.
pub mod kv;
