//! Per-minute shot sampling: team rating sums over the active lineups,
//! shooter/assister categorical draws, and the goal-probability table built
//! through the RSQ → PSxG prediction chain with per-simulation memo caches
//! keyed on rounded inputs.

use std::collections::HashMap;

use rand::Rng;
use rand::rngs::StdRng;

use crate::lineup::weighted_index;
use crate::models::{
    DifBucket, FixtureContext, PsxgInput, PsxgModel, RsqInput, RsqModel, StateBucket,
    predict_psxg_bulk, predict_rsq_bulk,
};
use crate::players::{BodyPart, PlayerId, PlayerMap};

/// Team rating sums over the active lineups; recomputed only when a roster
/// changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeamRatings {
    /// Shots per minute (offense minus opposing defense).
    pub ras: f64,
    /// Headed-shot rate sum.
    pub rahs: f64,
    /// Footed-shot rate sum.
    pub rafs: f64,
    /// Header shot-quality adjustment (PLSQA).
    pub plhsq: f64,
    /// Footer shot-quality adjustment.
    pub plfsq: f64,
}

pub fn team_ratings(
    offense: &[PlayerId],
    defense: &[PlayerId],
    off_players: &PlayerMap,
    def_players: &PlayerMap,
) -> TeamRatings {
    let mut ratings = TeamRatings::default();
    for p in offense.iter().filter_map(|id| off_players.get(id)) {
        ratings.ras += p.off_sh_coef;
        ratings.rahs += p.off_headers_coef;
        ratings.rafs += p.off_footers_coef;
        ratings.plhsq += p.off_hxg_coef;
        ratings.plfsq += p.off_fxg_coef;
    }
    for p in defense.iter().filter_map(|id| def_players.get(id)) {
        ratings.ras -= p.def_sh_coef;
        ratings.rahs -= p.def_headers_coef;
        ratings.rafs -= p.def_footers_coef;
        ratings.plhsq -= p.def_hxg_coef;
        ratings.plfsq -= p.def_fxg_coef;
    }
    ratings
}

/// Knuth's product method; fine for the per-minute rates seen here.
pub fn sample_poisson(rng: &mut StdRng, lambda: f64) -> u32 {
    if !(lambda > 0.0) {
        return 0;
    }
    let threshold = (-lambda).exp();
    let mut count = 0u32;
    let mut product = rng.r#gen::<f64>();
    while product > threshold {
        count += 1;
        product *= rng.r#gen::<f64>();
        if count > 1_000 {
            break;
        }
    }
    count
}

pub fn sample_body_part(rng: &mut StdRng, rahs: f64, rafs: f64) -> BodyPart {
    let head = rahs.max(0.0);
    let foot = rafs.max(0.0);
    let total = head + foot;
    let head_prob = if total == 0.0 { 0.5 } else { head / total };
    if rng.r#gen::<f64>() < head_prob {
        BodyPart::Head
    } else {
        BodyPart::Foot
    }
}

/// Shooter and assister categoricals over the active lineup, rebuilt on
/// roster changes.
#[derive(Debug, Clone, Default)]
pub struct PlayerProbs {
    shooters_head: Vec<(PlayerId, f64)>,
    shooters_foot: Vec<(PlayerId, f64)>,
    assists_head: HashMap<PlayerId, Vec<(Option<PlayerId>, f64)>>,
    assists_foot: HashMap<PlayerId, Vec<(Option<PlayerId>, f64)>>,
}

pub fn build_player_probs(active: &[PlayerId], players: &PlayerMap) -> PlayerProbs {
    let rate = |id: &PlayerId, f: fn(&crate::players::PlayerRating) -> u32| -> f64 {
        players.get(id).map_or(0.0, |p| p.per_minute(f(p)))
    };

    let shooters_head: Vec<(PlayerId, f64)> = active
        .iter()
        .map(|id| (id.clone(), rate(id, |p| p.headers)))
        .collect();
    let shooters_foot: Vec<(PlayerId, f64)> = active
        .iter()
        .map(|id| (id.clone(), rate(id, |p| p.footers)))
        .collect();

    let mut assists_head = HashMap::new();
    let mut assists_foot = HashMap::new();
    for shooter in active {
        // Footed shots may be unassisted; headers always have a creator.
        let mut foot: Vec<(Option<PlayerId>, f64)> =
            vec![(None, rate(shooter, |p| p.non_assisted_footers))];
        let mut head: Vec<(Option<PlayerId>, f64)> = Vec::new();
        for assister in active {
            if assister == shooter {
                continue;
            }
            let kp = rate(assister, |p| p.key_passes);
            foot.push((Some(assister.clone()), kp));
            head.push((Some(assister.clone()), kp));
        }
        assists_foot.insert(shooter.clone(), foot);
        assists_head.insert(shooter.clone(), head);
    }

    PlayerProbs {
        shooters_head,
        shooters_foot,
        assists_head,
        assists_foot,
    }
}

impl PlayerProbs {
    pub fn sample_shooter(&self, rng: &mut StdRng, body: BodyPart) -> Option<PlayerId> {
        let pool = match body {
            BodyPart::Head => &self.shooters_head,
            BodyPart::Foot => &self.shooters_foot,
        };
        if pool.is_empty() {
            return None;
        }
        let weights: Vec<f64> = pool.iter().map(|(_, w)| *w).collect();
        Some(pool[weighted_index(rng, &weights)].0.clone())
    }

    pub fn sample_assister(
        &self,
        rng: &mut StdRng,
        body: BodyPart,
        shooter: &PlayerId,
    ) -> Option<PlayerId> {
        let pools = match body {
            BodyPart::Head => &self.assists_head,
            BodyPart::Foot => &self.assists_foot,
        };
        let pool = pools.get(shooter)?;
        if pool.is_empty() {
            return None;
        }
        let weights: Vec<f64> = pool.iter().map(|(_, w)| *w).collect();
        pool[weighted_index(rng, &weights)].0.clone()
    }
}

// Prediction memo keys, rounded to four decimals so nearby contexts share
// entries deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RsqKey {
    plsqa: i64,
    shooter_sq: i64,
    assister_sq: i64,
    state: StateBucket,
    player_dif: DifBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PsxgKey {
    rsq: i64,
    shooter_a: i64,
    gk_a: i64,
    is_home: bool,
}

fn scaled(value: f64) -> i64 {
    (value * 10_000.0).round() as i64
}

fn unscaled(value: i64) -> f64 {
    value as f64 / 10_000.0
}

/// Per-worker memo caches for the two prediction stages.
#[derive(Debug, Clone, Default)]
pub struct PredictionCaches {
    rsq: HashMap<RsqKey, f64>,
    psxg: HashMap<PsxgKey, f64>,
}

impl PredictionCaches {
    pub fn clear(&mut self) {
        self.rsq.clear();
        self.psxg.clear();
    }
}

pub type OutcomeTable = HashMap<(PlayerId, Option<PlayerId>, BodyPart), f64>;

/// Goal probability per (shooter, assister, body part) over the active
/// lineup. Misses run through the batched RSQ prediction and then the PSxG
/// model; both stages memoize on rounded inputs.
#[allow(clippy::too_many_arguments)]
pub fn build_outcome_table(
    active: &[PlayerId],
    players: &PlayerMap,
    gk_ability: f64,
    ratings: &TeamRatings,
    state_code: f64,
    player_dif_code: f64,
    is_home: bool,
    fixture: &FixtureContext,
    rsq_model: Option<&RsqModel>,
    psxg_model: Option<&PsxgModel>,
    caches: &mut PredictionCaches,
) -> OutcomeTable {
    let state = StateBucket::from_code(state_code);
    let pdif = DifBucket::from_code(player_dif_code);

    struct Combo {
        shooter: PlayerId,
        assister: Option<PlayerId>,
        body: BodyPart,
        rsq_key: RsqKey,
    }

    let mut combos = Vec::new();
    let mut rsq_misses: Vec<(RsqKey, RsqInput)> = Vec::new();
    for shooter in active {
        let shooter_data = players.get(shooter);
        for assister in std::iter::once(None).chain(active.iter().map(|a| Some(a.clone()))) {
            if assister.as_ref() == Some(shooter) {
                continue;
            }
            for body in [BodyPart::Head, BodyPart::Foot] {
                let plsqa = match body {
                    BodyPart::Head => ratings.plhsq,
                    BodyPart::Foot => ratings.plfsq,
                };
                let shooter_sq = shooter_data.map_or(0.0, |p| p.shot_quality(body));
                let assister_sq = assister
                    .as_ref()
                    .and_then(|id| players.get(id))
                    .map(|p| p.assist_quality(body));
                let key = RsqKey {
                    plsqa: scaled(plsqa),
                    shooter_sq: scaled(shooter_sq),
                    assister_sq: scaled(assister_sq.unwrap_or(0.0)),
                    state,
                    player_dif: pdif,
                };
                if !caches.rsq.contains_key(&key)
                    && !rsq_misses.iter().any(|(k, _)| *k == key)
                {
                    // Predict on the rounded values, so every cache entry is
                    // a pure function of its key regardless of which worker
                    // or simulation populated it.
                    rsq_misses.push((
                        key,
                        RsqInput {
                            total_plsqa: unscaled(key.plsqa),
                            shooter_sq: unscaled(key.shooter_sq),
                            assister_sq: Some(unscaled(key.assister_sq)),
                            state,
                            player_dif: pdif,
                        },
                    ));
                }
                combos.push(Combo {
                    shooter: shooter.clone(),
                    assister: assister.clone(),
                    body,
                    rsq_key: key,
                });
            }
        }
    }

    if !rsq_misses.is_empty() {
        let inputs: Vec<RsqInput> = rsq_misses.iter().map(|(_, i)| i.clone()).collect();
        let predictions = match rsq_model {
            Some(model) => predict_rsq_bulk(model, &inputs),
            // Untrained quality model: the shooter's own average stands in.
            None => inputs.iter().map(|i| i.shooter_sq.max(0.05)).collect(),
        };
        for ((key, _), pred) in rsq_misses.iter().zip(predictions) {
            caches.rsq.insert(*key, pred);
        }
    }

    // Second stage: post-shot goal probability per rounded RSQ context.
    let team_elevation_dif = if is_home {
        fixture.home_elevation_dif
    } else {
        fixture.away_elevation_dif
    };
    let team_travel = if is_home { 0.0 } else { fixture.away_travel };
    let team_rest_days = if is_home {
        fixture.home_rest_days
    } else {
        fixture.away_rest_days
    };

    let mut psxg_misses: Vec<(PsxgKey, PsxgInput)> = Vec::new();
    let mut table_keys = Vec::with_capacity(combos.len());
    for combo in &combos {
        let rsq = caches.rsq[&combo.rsq_key];
        let shooter_a = players
            .get(&combo.shooter)
            .map_or(0.0, |p| p.shooter_ability(combo.body));
        let key = PsxgKey {
            rsq: scaled(rsq),
            shooter_a: scaled(shooter_a),
            gk_a: scaled(gk_ability),
            is_home,
        };
        if !caches.psxg.contains_key(&key) && !psxg_misses.iter().any(|(k, _)| *k == key) {
            psxg_misses.push((
                key,
                PsxgInput {
                    rsq: unscaled(key.rsq),
                    shooter_a: unscaled(key.shooter_a),
                    gk_a: unscaled(key.gk_a),
                    team_is_home: is_home,
                    team_elevation_dif,
                    team_travel,
                    team_rest_days,
                    temperature_c: fixture.temperature_c,
                    is_raining: fixture.is_raining,
                    match_time: fixture.match_time(),
                },
            ));
        }
        table_keys.push(key);
    }

    if !psxg_misses.is_empty() {
        let inputs: Vec<PsxgInput> = psxg_misses.iter().map(|(_, i)| i.clone()).collect();
        let predictions = match psxg_model {
            Some(model) => predict_psxg_bulk(model, &inputs),
            None => inputs.iter().map(|i| i.rsq.clamp(0.0, 1.0)).collect(),
        };
        for ((key, _), pred) in psxg_misses.iter().zip(predictions) {
            caches.psxg.insert(*key, pred.clamp(0.0, 1.0));
        }
    }

    combos
        .into_iter()
        .zip(table_keys)
        .map(|(combo, key)| {
            (
                (combo.shooter, combo.assister, combo.body),
                caches.psxg[&key],
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::players::PlayerRating;
    use rand::SeedableRng;

    fn squad() -> (Vec<PlayerId>, PlayerMap) {
        let mut players = PlayerMap::new();
        let mut ids = Vec::new();
        for i in 0..11 {
            let id = format!("p{i}_{i}_T");
            let mut p = PlayerRating::new(id.clone(), 1);
            p.minutes_played = 900.0;
            p.headers = 10;
            p.footers = 30;
            p.key_passes = 10;
            p.non_assisted_footers = 10;
            p.hxg = 1.0;
            p.fxg = 3.0;
            p.hpsxg = 1.1;
            p.fpsxg = 3.2;
            p.off_sh_coef = 0.01;
            p.off_headers_coef = 0.003;
            p.off_footers_coef = 0.007;
            players.insert(id.clone(), p);
            ids.push(id);
        }
        (ids, players)
    }

    #[test]
    fn team_ratings_subtract_defense() {
        let (ids, players) = squad();
        let r = team_ratings(&ids, &ids, &players, &players);
        // Defensive coefficients are zero here, so the sums are offensive.
        assert!((r.ras - 0.11).abs() < 1e-9);
        assert!((r.rahs - 0.033).abs() < 1e-9);
    }

    #[test]
    fn poisson_zero_lambda_never_fires(){
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(sample_poisson(&mut rng, 0.0), 0);
            assert_eq!(sample_poisson(&mut rng, -3.0), 0);
        }
    }

    #[test]
    fn poisson_mean_tracks_lambda() {
        let mut rng = StdRng::seed_from_u64(2);
        let n = 20_000;
        let total: u64 = (0..n).map(|_| sample_poisson(&mut rng, 1.5) as u64).sum();
        let mean = total as f64 / n as f64;
        assert!((mean - 1.5).abs() < 0.05, "mean={mean}");
    }

    #[test]
    fn body_part_degrades_to_even_split() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut heads = 0;
        for _ in 0..1000 {
            if sample_body_part(&mut rng, -1.0, -2.0) == BodyPart::Head {
                heads += 1;
            }
        }
        assert!((400..600).contains(&heads), "heads={heads}");
    }

    #[test]
    fn headed_shots_never_self_assist_and_never_go_unassisted() {
        let (ids, players) = squad();
        let probs = build_player_probs(&ids, &players);
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..200 {
            let shooter = probs.sample_shooter(&mut rng, BodyPart::Head).unwrap();
            let assister = probs.sample_assister(&mut rng, BodyPart::Head, &shooter);
            let assister = assister.expect("headers always have a creator");
            assert_ne!(assister, shooter);
        }
    }

    #[test]
    fn outcome_table_covers_every_combo_without_models() {
        let (ids, players) = squad();
        let ratings = team_ratings(&ids, &ids, &players, &players);
        let fixture = FixtureContext {
            league_id: 1,
            home_team_id: 1,
            away_team_id: 2,
            kickoff: chrono::NaiveDate::from_ymd_opt(2026, 3, 1)
                .unwrap()
                .and_hms_opt(20, 0, 0)
                .unwrap(),
            referee_name: String::new(),
            home_elevation_dif: 0.0,
            away_elevation_dif: 0.0,
            away_travel: 0.0,
            home_rest_days: 7.0,
            away_rest_days: 7.0,
            temperature_c: 15.0,
            is_raining: false,
        };
        let mut caches = PredictionCaches::default();
        let table = build_outcome_table(
            &ids, &players, 0.1, &ratings, 0.0, 0.0, true, &fixture, None, None, &mut caches,
        );
        // 11 shooters × (None + 10 others) × 2 bodies.
        assert_eq!(table.len(), 11 * 11 * 2);
        assert!(table.values().all(|p| (0.0..=1.0).contains(p)));
    }
}
