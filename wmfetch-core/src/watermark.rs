//! Watermark fetching. At Vn vertex we have to track all the Vn-1 processors (pods or partitions)
//! which publish watermarks. Each processor publishes (watermark, offset) pairs into the shared
//! offset timeline (OT) bucket and heartbeats into the heartbeat bucket. The fetch side keeps a
//! bounded offset timeline per processor, from which the global watermark for a read offset can be
//! derived by looking at all the active processors.

/// OT value codec.
pub mod ot;

/// Identity of a processor and the OT key it publishes under.
pub mod entity;

/// Bounded, monotonic offset timeline of a processor.
pub mod timeline;

/// Lifecycle status of a processor.
pub mod status;

/// Processor and its timeline watcher.
pub mod processor;

/// Owner of the processors of a vertex, driven by heartbeats.
pub mod manager;

/// Wiring of the processor manager to JetStream buckets.
pub mod jetstream;
