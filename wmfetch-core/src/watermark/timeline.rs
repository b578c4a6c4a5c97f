use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::watermark::ot::OTValue;

/// Returned for the watermark or offset when the timeline has no entry to answer from.
pub const UNSET: i64 = -1;

/// A (watermark, offset) sample: by the time `offset` was reached, no event with a timestamp
/// earlier than `watermark` will arrive from the processor again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffsetWatermark {
    pub watermark: i64,
    pub offset: i64,
}

impl From<OTValue> for OffsetWatermark {
    fn from(value: OTValue) -> Self {
        OffsetWatermark {
            watermark: value.watermark,
            offset: value.offset,
        }
    }
}

/// OffsetTimeline stores the watermark to offset records of a processor. The entries are ordered
/// from the oldest (front) to the latest (back) and are non-decreasing in both watermark and
/// offset. At most `capacity` entries are retained, the oldest is evicted first.
///
/// The timeline carries its own lock; clones share the same entries, so the timeline watcher can
/// write while the readers query it concurrently.
#[derive(Clone)]
pub struct OffsetTimeline {
    watermarks: Arc<RwLock<VecDeque<OffsetWatermark>>>,
    capacity: usize,
}

impl OffsetTimeline {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config(
                "offset timeline capacity must be greater than 0".to_string(),
            ));
        }

        Ok(OffsetTimeline {
            watermarks: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        })
    }

    /// Put inserts the entry, keeping the timeline sorted. Returns whether the timeline changed.
    pub fn put(&self, node: OffsetWatermark) -> bool {
        let mut watermarks = self.watermarks.write();

        let Some(head) = watermarks.back().copied() else {
            watermarks.push_back(node);
            return true;
        };

        // Different cases:
        // 1. Watermark is the same but the offset is larger - advance the offset of the head
        // 2. Watermark is the same but the offset is not larger - skip
        // 3. Watermark is larger but the offset is smaller - offsets never go back, skip
        // 4. Watermark is larger - append, evicting the oldest entry when full
        // 5. Watermark is smaller - out of order delivery, skip
        match (
            node.watermark.cmp(&head.watermark),
            node.offset.cmp(&head.offset),
        ) {
            (Ordering::Equal, Ordering::Greater) => {
                if let Some(head) = watermarks.back_mut() {
                    head.offset = node.offset;
                }
                true
            }
            (Ordering::Equal, _) => {
                debug!(
                    ?node,
                    ?head,
                    "Watermark the same but input offset not larger than the existing offset - skipping"
                );
                false
            }
            (Ordering::Greater, Ordering::Less) => {
                warn!(
                    ?node,
                    ?head,
                    "The new input offset should never be smaller than the existing offset - skipping"
                );
                false
            }
            (Ordering::Greater, _) => {
                watermarks.push_back(node);
                if watermarks.len() > self.capacity {
                    watermarks.pop_front();
                }
                true
            }
            (Ordering::Less, _) => {
                debug!(?node, ?head, "Watermark regressed - skipping");
                false
            }
        }
    }

    /// Latest entry of the timeline.
    pub fn latest(&self) -> Option<OffsetWatermark> {
        self.watermarks.read().back().copied()
    }

    /// Watermark of the latest entry, [UNSET] if empty.
    pub fn latest_watermark(&self) -> i64 {
        self.latest().map_or(UNSET, |w| w.watermark)
    }

    /// Offset of the latest entry, [UNSET] if empty.
    pub fn latest_offset(&self) -> i64 {
        self.latest().map_or(UNSET, |w| w.offset)
    }

    /// Watermark of the latest entry whose offset is less than or equal to the input offset,
    /// [UNSET] if there is none.
    pub fn watermark_for_offset(&self, input_offset: i64) -> i64 {
        let watermarks = self.watermarks.read();
        let idx = watermarks.partition_point(|w| w.offset <= input_offset);
        idx.checked_sub(1)
            .and_then(|i| watermarks.get(i))
            .map_or(UNSET, |w| w.watermark)
    }

    /// Offset of the latest entry whose watermark is less than or equal to the event time,
    /// [UNSET] if there is none.
    pub fn offset_for_watermark(&self, event_time: i64) -> i64 {
        let watermarks = self.watermarks.read();
        let idx = watermarks.partition_point(|w| w.watermark <= event_time);
        idx.checked_sub(1)
            .and_then(|i| watermarks.get(i))
            .map_or(UNSET, |w| w.offset)
    }

    /// Snapshot of the entries, oldest first.
    pub fn entries(&self) -> Vec<OffsetWatermark> {
        self.watermarks.read().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.watermarks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watermarks.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Renders the entries as "(wm=..,off=..)->(wm=..,off=..)", for diagnostics only.
    pub fn dump(&self) -> String {
        let watermarks = self.watermarks.read();
        if watermarks.is_empty() {
            return "empty".to_string();
        }
        watermarks
            .iter()
            .map(|w| format!("(wm={},off={})", w.watermark, w.offset))
            .collect::<Vec<_>>()
            .join("->")
    }
}

impl fmt::Debug for OffsetTimeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OffsetTimeline {{ capacity: {}, watermarks: [{}] }}",
            self.capacity,
            self.dump()
        )
    }
}
