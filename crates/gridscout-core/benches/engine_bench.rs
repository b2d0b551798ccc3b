use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use gridscout_core::{MapKind, Simulation, SimulationConfig};
use gridscout_policy::PolicyKind;
use std::time::Duration;

fn bench_engine_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_step");
    group.sample_size(30);
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(8));

    for &drones in &[1_u32, 4, 10] {
        group.bench_function(format!("floorplan100_drones{drones}_64ticks"), |b| {
            b.iter_batched(
                || {
                    let config = SimulationConfig {
                        width: 100,
                        height: 100,
                        map_kind: MapKind::Floorplan,
                        num_rooms: 10,
                        room_size: 12,
                        num_drones: drones,
                        num_targets: 4,
                        seed: Some(0xBEEF),
                        ..SimulationConfig::default()
                    };
                    Simulation::new(config, PolicyKind::Swarm.build(drones as usize))
                        .expect("simulation")
                },
                |mut sim| {
                    for _ in 0..64 {
                        sim.step();
                    }
                    sim
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_engine_ticks);
criterion_main!(benches);
