//! Authoritative broadcast and the receiving-side revision gate.
//!
//! Belt state reaches observers as whole-segment snapshots stamped with a
//! revision. Delivery is best effort and may reorder, so receivers keep one
//! [`SyncRevisionGate`] per segment and drop anything older than what they
//! already applied.

use crate::grid::GridPos;
use crate::persistence::SegmentRecord;
use crate::segment::Segment;
use crate::spatial::ObserverId;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

// ============================================================================
// REVISION GATE
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRevisionGate {
    last_applied: Option<u64>,
}

impl SyncRevisionGate {
    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    /// Whether an update stamped `incoming` would be applied. Equal
    /// revisions are accepted.
    pub fn accepts(&self, incoming: u64) -> bool {
        self.last_applied.map_or(true, |last| incoming >= last)
    }

    /// Replace `target` with `state` unless `incoming` is stale.
    ///
    /// A stale update is discarded whole; `target` is left untouched.
    pub fn apply_if_newer<T>(&mut self, incoming: u64, target: &mut T, state: T) -> bool {
        if !self.accepts(incoming) {
            return false;
        }
        *target = state;
        self.last_applied = Some(incoming);
        true
    }
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// Full state of one segment as sent to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSnapshot {
    /// Host cell.
    pub pos: GridPos,
    pub revision: u64,
    /// Authoritative tick the snapshot was taken at.
    pub server_tick: u64,
    pub record: SegmentRecord,
}

impl SegmentSnapshot {
    pub fn capture(segment: &Segment, server_tick: u64) -> Self {
        Self {
            pos: segment.pos,
            revision: segment.revision,
            server_tick,
            record: SegmentRecord::capture(segment),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub observer: ObserverId,
    pub snapshot: SegmentSnapshot,
}

/// Snapshots waiting for the transport to pick them up.
#[derive(Resource, Debug, Default)]
pub struct Outbox(pub Vec<Outbound>);

impl Outbox {
    pub fn drain(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.0)
    }
}

/// Whether a segment last broadcast at `last` may broadcast again at `now`.
pub fn broadcast_due(last: Option<u64>, now: u64, interval: u64) -> bool {
    last.map_or(true, |last| now.saturating_sub(last) >= interval.max(1))
}
