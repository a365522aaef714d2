//! Property tests for the slot queue, persistence clamps and the curve
//! length estimator.

use belt_sim::curve::estimate_length_units;
use belt_sim::{
    Facing, GridPos, ItemIdAllocator, ItemKind, ItemQueue, Segment, SegmentConfig,
    SegmentRecord, SlotRecord, StepBudget, Vec3,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Enqueue(u32),
    Advance,
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u32..8).prop_map(Op::Enqueue),
        Just(Op::Advance),
        Just(Op::Pop),
    ]
}

fn assert_well_formed(queue: &ItemQueue) -> Result<(), TestCaseError> {
    let items = queue.items();
    prop_assert!(items.len() <= queue.capacity());
    for item in items {
        prop_assert!(item.position < queue.capacity());
        prop_assert!(item.count > 0);
    }
    for pair in items.windows(2) {
        prop_assert!(
            pair[0].position > pair[1].position,
            "positions not strictly decreasing: {:?}",
            items
        );
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn queue_stays_ordered_under_random_ops(
        capacity in 1usize..12,
        ops in prop::collection::vec(op(), 0..200),
    ) {
        let ids = ItemIdAllocator::default();
        let mut queue = ItemQueue::new(capacity);
        for op in ops {
            match op {
                Op::Enqueue(kind) => {
                    let had_room = queue.can_accept_at_tail();
                    let result = queue.try_enqueue_at_tail(ids.unit(ItemKind(kind)));
                    prop_assert_eq!(result.is_ok(), had_room);
                }
                Op::Advance => {
                    queue.advance_one_step();
                }
                Op::Pop => {
                    let at_edge = queue
                        .peek_head()
                        .is_some_and(|head| head.position == capacity - 1);
                    let before = queue.len();
                    let popped = queue.pop_head_if_at_output_edge();
                    prop_assert_eq!(popped.is_some(), at_edge);
                    if popped.is_some() {
                        prop_assert_eq!(queue.len(), before - 1);
                    }
                }
            }
            assert_well_formed(&queue)?;
        }
    }

    #[test]
    fn advance_never_loses_items(
        capacity in 1usize..12,
        inserts in prop::collection::vec(any::<bool>(), 0..40),
    ) {
        let ids = ItemIdAllocator::default();
        let mut queue = ItemQueue::new(capacity);
        let mut inserted = 0usize;
        for insert in inserts {
            if insert && queue.try_enqueue_at_tail(ids.unit(ItemKind(1))).is_ok() {
                inserted += 1;
            }
            queue.advance_one_step();
        }
        prop_assert_eq!(queue.len(), inserted);
        // A full drain of advances packs everything against the head.
        for _ in 0..capacity {
            queue.advance_one_step();
        }
        for (offset, item) in queue.items().iter().enumerate() {
            prop_assert_eq!(item.position, capacity - 1 - offset);
        }
    }

    #[test]
    fn normalize_is_idempotent(
        capacity in 1usize..10,
        slots in prop::collection::vec((0u32..4, 0u32..4, -3i64..15, 0u64..6), 0..12),
    ) {
        let records: Vec<SlotRecord> = slots
            .into_iter()
            .map(|(kind, count, position, id)| SlotRecord { kind, count, position, id })
            .collect();
        let items = records.iter().map(|slot| slot.restore(capacity)).collect();
        let (mut queue, _) = ItemQueue::restore(capacity, items);
        let ids = ItemIdAllocator::starting_at(100);

        queue.normalize(&ids);
        assert_well_formed(&queue)?;
        let settled = queue.clone();
        prop_assert!(!queue.normalize(&ids));
        prop_assert_eq!(queue, settled);
    }

    #[test]
    fn resize_conserves_items(
        from in 1usize..12,
        to in 1usize..12,
        inserts in 0usize..12,
    ) {
        let ids = ItemIdAllocator::default();
        let mut queue = ItemQueue::new(from);
        for _ in 0..inserts {
            let _ = queue.try_enqueue_at_tail(ids.unit(ItemKind(2)));
            queue.advance_one_step();
        }
        let before = queue.len();
        let mut overflow = 0usize;
        queue.resize(to, |_| overflow += 1);
        prop_assert_eq!(queue.len() + overflow, before);
        prop_assert_eq!(queue.capacity(), to);
        assert_well_formed(&queue)?;
    }

    #[test]
    fn restored_segment_fits_its_capacity(
        slots_cfg in 1usize..8,
        saved_capacity in 0usize..12,
        slots in prop::collection::vec((1u32..4, 1u32..3, -5i64..20, 0u64..50), 0..16),
        accumulator in prop::num::f64::ANY,
    ) {
        let record = SegmentRecord {
            config: SegmentConfig::straight(Facing::East).with_slots(slots_cfg),
            capacity: saved_capacity,
            length_units: 1,
            slots: slots
                .into_iter()
                .map(|(kind, count, position, id)| SlotRecord { kind, count, position, id })
                .collect(),
            step_accumulator: accumulator,
            revision: 3,
        };
        let (segment, overflow) = record.restore(GridPos::new(0, 0, 0), 64.0);
        prop_assert_eq!(segment.capacity(), slots_cfg);
        prop_assert!(segment.queue.len() + overflow.len() <= record.slots.len());
        let budget = segment.budget.accumulator();
        prop_assert!(budget.is_finite() && (0.0..=64.0).contains(&budget));
        assert_well_formed(&segment.queue)?;
    }

    #[test]
    fn segment_record_survives_encoding(
        capacity in 1usize..10,
        ops in prop::collection::vec(op(), 0..60),
        eighths in 0u32..512,
        revision in 0u64..1000,
    ) {
        let ids = ItemIdAllocator::default();
        let pos = GridPos::new(2, 0, -3);
        let mut segment = Segment::new(pos, SegmentConfig::straight(Facing::South).with_slots(capacity), 0);
        for op in ops {
            match op {
                Op::Enqueue(kind) => {
                    let _ = segment.queue.try_enqueue_at_tail(ids.unit(ItemKind(kind)));
                }
                Op::Advance => {
                    segment.queue.advance_one_step();
                }
                Op::Pop => {
                    segment.queue.pop_head_if_at_output_edge();
                }
            }
        }
        segment.budget = StepBudget::restored(eighths as f64 / 8.0, 64.0);
        segment.revision = revision;

        let record = SegmentRecord::capture(&segment);
        let json = record.to_json().unwrap();
        let decoded = SegmentRecord::from_json(&json).unwrap();
        prop_assert_eq!(&decoded, &record);

        let (restored, overflow) = decoded.restore(pos, 64.0);
        prop_assert!(overflow.is_empty());
        prop_assert_eq!(&restored.queue, &segment.queue);
        prop_assert_eq!(SegmentRecord::capture(&restored), record);
    }

    #[test]
    fn curve_length_is_finite_and_positive(
        sx in -20.0f64..20.0, sz in -20.0f64..20.0,
        ex in -20.0f64..20.0, ez in -20.0f64..20.0,
        start_face in 0usize..4, end_face in 0usize..4,
    ) {
        let start = Vec3::new(sx, 0.5, sz);
        let end = Vec3::new(ex, 0.5, ez);
        let units = estimate_length_units(
            start,
            Facing::HORIZONTAL[start_face].vector(),
            end,
            Facing::HORIZONTAL[end_face].vector(),
        );
        prop_assert!(units >= 1);
        // A cubic with unit tangents never runs longer than its hull.
        let hull = start.distance(end) * 3.0 + 4.0;
        prop_assert!((units as f64) <= hull.ceil() + 1.0);
    }
}
