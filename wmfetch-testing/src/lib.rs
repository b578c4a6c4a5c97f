//! Testing utilities for the watermark fetch runtime.

/// Simple in-memory KV store for exercising watch consumers.
pub mod simplekvstore;
