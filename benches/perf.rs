use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use rand::SeedableRng;
use rand::rngs::StdRng;

use pitchcast::models::FixtureContext;
use pitchcast::players::{PlayerMap, PlayerRating};
use pitchcast::shots::{
    PredictionCaches, build_outcome_table, build_player_probs, sample_poisson, team_ratings,
};

fn sample_squad() -> (Vec<String>, PlayerMap) {
    let mut players = PlayerMap::new();
    let mut ids = Vec::new();
    for i in 0..11 {
        let id = format!("p{i}_{i}_T");
        let mut p = PlayerRating::new(id.clone(), 1);
        p.minutes_played = 900.0 + i as f64;
        p.headers = 8 + i as u32;
        p.footers = 25 + i as u32;
        p.key_passes = 12;
        p.non_assisted_footers = 9;
        p.hxg = 0.9;
        p.fxg = 2.8;
        p.hpsxg = 1.0;
        p.fpsxg = 3.0;
        p.off_sh_coef = 0.011;
        p.off_headers_coef = 0.004;
        p.off_footers_coef = 0.007;
        p.off_hxg_coef = 0.01;
        p.off_fxg_coef = 0.02;
        players.insert(id.clone(), p);
        ids.push(id);
    }
    (ids, players)
}

fn sample_fixture() -> FixtureContext {
    FixtureContext {
        league_id: 1,
        home_team_id: 1,
        away_team_id: 2,
        kickoff: chrono::NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(20, 30, 0)
            .unwrap(),
        referee_name: "R".to_string(),
        home_elevation_dif: 12.0,
        away_elevation_dif: 45.0,
        away_travel: 300.0,
        home_rest_days: 6.0,
        away_rest_days: 4.0,
        temperature_c: 16.0,
        is_raining: false,
    }
}

fn bench_player_probs(c: &mut Criterion) {
    let (ids, players) = sample_squad();
    c.bench_function("build_player_probs", |b| {
        b.iter(|| {
            let probs = build_player_probs(black_box(&ids), black_box(&players));
            black_box(probs);
        })
    });
}

fn bench_outcome_table(c: &mut Criterion) {
    let (ids, players) = sample_squad();
    let ratings = team_ratings(&ids, &ids, &players, &players);
    let fixture = sample_fixture();
    c.bench_function("build_outcome_table_warm_cache", |b| {
        let mut caches = PredictionCaches::default();
        b.iter(|| {
            let table = build_outcome_table(
                black_box(&ids),
                &players,
                0.08,
                &ratings,
                0.0,
                0.0,
                true,
                &fixture,
                None,
                None,
                &mut caches,
            );
            black_box(table.len());
        })
    });
}

fn bench_poisson(c: &mut Criterion) {
    c.bench_function("sample_poisson", |b| {
        let mut rng = StdRng::seed_from_u64(17);
        b.iter(|| black_box(sample_poisson(&mut rng, black_box(0.3))))
    });
}

criterion_group!(benches, bench_player_probs, bench_outcome_table, bench_poisson);
criterion_main!(benches);
