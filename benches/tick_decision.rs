use criterion::{criterion_group, criterion_main, Criterion};

use abr_probe::sampling::{decide_tick, SessionState};
use abr_probe::{PlayerReading, SessionConfig};

fn reading(t: u64) -> PlayerReading {
    let height = if (t / 10) % 2 == 0 { 360 } else { 720 };
    PlayerReading {
        width: height * 16 / 9,
        height,
        buffer_seconds: (t % 40) as f64 * 0.75,
        position_seconds: t as f64,
    }
}

fn bench_tick_decision(c: &mut Criterion) {
    let config = SessionConfig::new("bench")
        .compile()
        .expect("default config compiles");
    let readings: Vec<PlayerReading> = (0..135).map(reading).collect();

    let mut group = c.benchmark_group("tick_decision");
    group.bench_function("single_tick", |b| {
        let state = SessionState::new();
        b.iter(|| {
            let decision = decide_tick(&state, &config, 14, &readings[14]);
            criterion::black_box(decision)
        });
    });

    group.bench_function("full_session", |b| {
        b.iter(|| {
            let mut state = SessionState::new();
            let mut recorded = 0usize;
            for (t, reading) in readings.iter().enumerate() {
                let decision = decide_tick(&state, &config, t as u64, reading);
                if decision.recorded_anything() {
                    recorded += 1;
                }
                state = decision.state;
            }
            criterion::black_box(recorded)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_tick_decision);
criterion_main!(benches);
