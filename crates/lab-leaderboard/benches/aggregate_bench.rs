use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use lab_core::{BlueprintId, JobId, OwnerId, ScoredArtifact, Visibility};
use rust_decimal::Decimal;

fn history(owners: u32, versions: u32) -> Vec<ScoredArtifact> {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut out = Vec::new();
    for o in 0..owners {
        for v in 1..=versions {
            out.push(ScoredArtifact {
                blueprint: BlueprintId::new(format!("bp-{}", v % 4)),
                owner: OwnerId::new(format!("owner-{o}")),
                version: v,
                score: Decimal::new(((o * 31 + v * 17) % 1000) as i64, 1),
                created_at: lab_core::add_millis(t0, (o * versions + v) as i64),
                visibility: if v % 3 == 0 {
                    Visibility::Private
                } else {
                    Visibility::Public
                },
                job: JobId((o * versions + v) as u64),
            });
        }
    }
    out
}

fn bench_leaderboard(c: &mut Criterion) {
    let all = history(200, 40);
    let bp = BlueprintId::new("bp-1");
    c.bench_function("aggregate_owner_history", |b| {
        b.iter(|| lab_leaderboard::aggregate(&all[..40]))
    });
    c.bench_function("global_ranking", |b| {
        b.iter(|| lab_leaderboard::global_ranking(&bp, &all))
    });
    c.bench_function("owner_standings", |b| {
        b.iter(|| lab_leaderboard::owner_standings(&all))
    });
}

criterion_group!(benches, bench_leaderboard);
criterion_main!(benches);
