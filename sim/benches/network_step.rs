//! Throughput of the conveyor pass on long belt lines.
//!
//! Run with: cargo bench --bench network_step

use belt_sim::{BeltWorld, Chest, Facing, GridPos, ItemKind, SegmentConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const ORE: ItemKind = ItemKind(1);

/// A chest-fed line of `length` belts draining into a sink chest.
fn belt_line(length: i32, travel_ticks: u32) -> BeltWorld {
    let mut belts = BeltWorld::new();
    belts
        .place_chest(GridPos::new(-1, 0, 0), Chest::new(8, 64).with_contents(ORE, 512))
        .unwrap();
    belts.place_chest(GridPos::new(length, 0, 0), Chest::new(8, 64)).unwrap();
    for x in 0..length {
        belts
            .place_segment(
                GridPos::new(x, 0, 0),
                SegmentConfig::straight(Facing::East).with_travel_ticks(travel_ticks),
            )
            .unwrap();
    }
    // Fill the line before measuring.
    belts.step(length as u64 * 2);
    belts
}

fn bench_long_line(c: &mut Criterion) {
    let mut belts = belt_line(256, 1);
    c.bench_function("tick_line_256_fast", |b| {
        b.iter(|| {
            belts.tick();
            black_box(belts.last_report())
        })
    });
}

fn bench_many_short_lines(c: &mut Criterion) {
    let mut belts = BeltWorld::new();
    for z in 0..64 {
        for x in 0..8 {
            belts
                .place_segment(
                    GridPos::new(x, 0, z * 2),
                    SegmentConfig::straight(Facing::East).with_travel_ticks(3),
                )
                .unwrap();
        }
        belts.insert_item(GridPos::new(0, 0, z * 2), ORE).unwrap();
    }
    c.bench_function("tick_64_networks", |b| {
        b.iter(|| {
            belts.tick();
            black_box(belts.last_report().networks)
        })
    });
}

criterion_group!(benches, bench_long_line, bench_many_short_lines);
criterion_main!(benches);
