//! Basic demonstration of the belt simulation.
//!
//! Run with: cargo run --example belt_demo
//! Set `RUST_LOG=belt_sim=trace` to watch individual hand-offs.

use belt_sim::{
    BeltWorld, Chest, ClientPredictor, ClientWorld, Facing, GridPos, ItemKind, ObserverId,
    SegmentConfig, Vec3,
};
use tracing_subscriber::EnvFilter;

const ORE: ItemKind = ItemKind(1);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Belt Sim - Demo ===\n");

    let mut belts = BeltWorld::new();
    let source = GridPos::new(-1, 0, 0);
    let sink = GridPos::new(6, 0, 0);
    belts.place_chest(source, Chest::new(4, 64).with_contents(ORE, 10)).unwrap();
    belts.place_chest(sink, Chest::new(4, 64)).unwrap();

    // Three straight belts, a curve around a corner, then two more belts.
    for x in 0..3 {
        belts
            .place_segment(GridPos::new(x, 0, 0), SegmentConfig::straight(Facing::East).with_travel_ticks(6))
            .unwrap();
    }
    belts
        .place_segment(
            GridPos::new(3, 0, 0),
            SegmentConfig::curve(Facing::East, GridPos::new(4, 0, 0), Facing::East).with_travel_ticks(6),
        )
        .unwrap();
    belts
        .place_segment(GridPos::new(5, 0, 0), SegmentConfig::straight(Facing::East).with_travel_ticks(6))
        .unwrap();

    belts.add_observer(ObserverId(1), Vec3::new(2.0, 1.0, 0.0));
    let mut client = ClientWorld::new();
    let predictor = ClientPredictor::from_config(&belts.config());

    println!("Running 120 ticks...\n");
    for _ in 0..120 {
        belts.tick();
        for outbound in belts.drain_outbox() {
            client.apply_snapshot(&outbound.snapshot);
        }
        if belts.current_tick() % 20 == 0 {
            let report = belts.last_report();
            let predicted = predictor.predict_all(&client, belts.current_tick() as f64 + 0.5);
            println!(
                "--- Tick {} --- networks={} handoffs={} deliveries={} pulls={} predicted={}",
                belts.current_tick(),
                report.networks,
                report.report.handoffs,
                report.report.deliveries,
                report.report.pulls,
                predicted.len()
            );
            let snapshot = belts.snapshot();
            for segment in &snapshot.segments {
                let slots: Vec<usize> = segment.items.iter().map(|item| item.position).collect();
                println!("    belt {} cap={} items={:?}", segment.pos, segment.capacity, slots);
            }
        }
    }

    println!(
        "\nsource holds {}, sink holds {}",
        belts.chest(source).map_or(0, Chest::total),
        belts.chest(sink).map_or(0, Chest::total)
    );

    println!("\n=== Final State (JSON) ===\n");
    match belts.snapshot().to_json_pretty() {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("snapshot encoding failed: {err}"),
    }
}
