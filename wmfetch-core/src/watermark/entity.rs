use std::fmt;

/// ProcessorEntitier is the identity of a processor (pod or partition) which publishes
/// watermarks.
pub trait ProcessorEntitier: Send + Sync {
    /// Stable identifier of the processor.
    fn id(&self) -> &str;

    /// Key under which the processor publishes its OT values. It must be deterministic.
    fn ot_watch_key(&self) -> String;
}

/// Default processor identity, the processor publishes its OT values under its own name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProcessorEntity {
    name: String,
}

impl ProcessorEntity {
    pub fn new(name: impl Into<String>) -> Self {
        ProcessorEntity { name: name.into() }
    }
}

impl ProcessorEntitier for ProcessorEntity {
    fn id(&self) -> &str {
        &self.name
    }

    fn ot_watch_key(&self) -> String {
        self.name.clone()
    }
}

impl fmt::Display for ProcessorEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
