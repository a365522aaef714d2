//! Broadcast system - rate-limited, range-gated segment snapshots.

use crate::config::BeltConfig;
use crate::host::WorldTick;
use crate::segment::Segment;
use crate::spatial::ObserverGrid;
use crate::sync::{broadcast_due, Outbound, Outbox, SegmentSnapshot};
use bevy_ecs::prelude::*;
use tracing::trace;

/// Broadcast every dirty segment whose interval has elapsed.
///
/// The revision is bumped and the dirty flag cleared even when no observer
/// is in range, so a late joiner never sees an old revision reused.
pub fn broadcast_system(
    tick: Res<WorldTick>,
    config: Res<BeltConfig>,
    observers: Res<ObserverGrid>,
    mut outbox: ResMut<Outbox>,
    mut segments: Query<&mut Segment>,
) {
    let now = tick.0;
    let start = outbox.0.len();
    for mut segment in segments.iter_mut() {
        if !segment.dirty || !broadcast_due(segment.last_broadcast, now, segment.config.sync_interval()) {
            continue;
        }
        segment.revision += 1;
        segment.dirty = false;
        segment.last_broadcast = Some(now);

        let anchors = [
            segment.config.path.start_anchor(segment.pos),
            segment.config.path.end_anchor(segment.pos),
        ];
        let recipients = observers.query_near_any(&anchors, config.visual_range);
        if recipients.is_empty() {
            continue;
        }
        let snapshot = SegmentSnapshot::capture(&segment, now);
        trace!(pos = %segment.pos, revision = segment.revision, recipients = recipients.len(), "broadcast");
        outbox.0.extend(recipients.into_iter().map(|observer| Outbound {
            observer,
            snapshot: snapshot.clone(),
        }));
    }
    outbox.0[start..].sort_by_key(|outbound| (outbound.observer, outbound.snapshot.pos));
}

/// Force a full resend on the next broadcast, e.g. after an observer joins.
pub fn mark_all_for_resend(world: &mut World) {
    let mut segments = world.query::<&mut Segment>();
    for mut segment in segments.iter_mut(world) {
        segment.dirty = true;
        segment.last_broadcast = None;
    }
}
