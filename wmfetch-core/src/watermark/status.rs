use std::fmt;

use parking_lot::RwLock;

/// Status of a processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Active,
    InActive,
    Deleted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Active => write!(f, "active"),
            Status::InActive => write!(f, "inactive"),
            Status::Deleted => write!(f, "deleted"),
        }
    }
}

/// Lifecycle status register of a processor. It is read on every watermark computation and only
/// written by the owner on heartbeat changes. Any status can move to any other status.
#[derive(Debug)]
pub struct ProcessorStatus {
    status: RwLock<Status>,
}

impl Default for ProcessorStatus {
    fn default() -> Self {
        ProcessorStatus {
            status: RwLock::new(Status::Active),
        }
    }
}

impl ProcessorStatus {
    /// A new processor starts as [Status::Active].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Status {
        *self.status.read()
    }

    pub fn set(&self, status: Status) {
        *self.status.write() = status;
    }

    pub fn set_active(&self) {
        self.set(Status::Active);
    }

    pub fn set_inactive(&self) {
        self.set(Status::InActive);
    }

    pub fn set_deleted(&self) {
        self.set(Status::Deleted);
    }

    pub fn is_active(&self) -> bool {
        self.get() == Status::Active
    }

    /// Inactive processors have not sent heartbeats for a while.
    pub fn is_inactive(&self) -> bool {
        self.get() == Status::InActive
    }

    pub fn is_deleted(&self) -> bool {
        self.get() == Status::Deleted
    }
}
