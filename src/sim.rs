//! Simulation driver: loads a scheduled fixture, trains the context models,
//! precomputes the context-multiplier tables, then fans independent
//! minute-by-minute match simulations across a rayon pool and persists the
//! aggregated shot rows in one delete+insert transaction.

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use log::{info, warn};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::discipline::{self, Card, RefereePriors};
use crate::error::ForecastError;
use crate::lineup;
use crate::models::{self, CtxTable, DifBucket, FixtureContext, PsxgModel, RsqModel, StateBucket};
use crate::players::{GameStatus, PlayerId, PlayerMap, PlayerRating};
use crate::segments::{match_state_code, player_dif_code, time_segment};
use crate::shots::{self, OutcomeTable, PlayerProbs, PredictionCaches, TeamRatings};
use crate::store::{SimShotRow, Store};

pub const FULL_TIME: u32 = 90;

// Minutes after which a new 15-minute bucket begins mid-loop.
const SEGMENT_TURNOVERS: [u32; 5] = [16, 31, 46, 61, 76];

#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub schedule_id: i64,
    pub initial_minute: u32,
    pub home_goals: u32,
    pub away_goals: u32,
    pub home_subs_available: u32,
    pub away_subs_available: u32,
    pub seed: u64,
    pub workers: Option<usize>,
}

/// Simulation count by starting minute: full pre-match runs get the deepest
/// sample, in-play runs progressively fewer.
pub fn n_sims_for(initial_minute: u32) -> usize {
    if initial_minute < 1 {
        20_000
    } else if initial_minute < 45 {
        8_000
    } else {
        2_000
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimCardRow {
    pub sim_id: i64,
    pub minute: i64,
    pub player_id: PlayerId,
    pub team_id: i64,
    pub card: Card,
}

#[derive(Debug, Clone, Default)]
pub struct SimRun {
    pub n_sims: usize,
    pub shot_rows: usize,
    pub card_rows: Vec<SimCardRow>,
    pub mean_home_goals: f64,
    pub mean_away_goals: f64,
}

struct TeamSetup {
    team_id: i64,
    is_home: bool,
    starters: Vec<PlayerId>,
    bench: Vec<PlayerId>,
    sub_plan: HashMap<u32, u32>,
    ctx: CtxTable,
    gk_ability: f64,
}

struct SimShared {
    fixture: FixtureContext,
    params: SimulationParams,
    priors: RefereePriors,
    players: PlayerMap,
    home: TeamSetup,
    away: TeamSetup,
    rsq: Option<RsqModel>,
    psxg: Option<PsxgModel>,
}

/// Runs the full simulation for one schedule row and replaces its
/// `simulation_data`.
pub fn run_schedule(store: &mut Store, params: SimulationParams) -> Result<SimRun> {
    let schedule = store.schedule(params.schedule_id)?.ok_or_else(|| {
        anyhow!(ForecastError::DataShape(format!(
            "schedule {} not found",
            params.schedule_id
        )))
    })?;
    if schedule.home_players.is_empty() || schedule.away_players.is_empty() {
        return Err(anyhow!(ForecastError::DataShape(format!(
            "schedule {} has no saved lineups",
            params.schedule_id
        ))));
    }
    let fixture = FixtureContext::from_schedule(&schedule);

    let mut players = store.players_all()?;
    for id in schedule.home_players.iter().chain(&schedule.away_players) {
        if !players.contains_key(id) {
            warn!("player {id} missing from players_data; using neutral ratings");
            players.insert(id.clone(), PlayerRating::new(id.clone(), 0));
        }
    }

    let ras = models::train_ras_model(store, fixture.league_id)?;
    let (ctx_home, ctx_away) = match &ras {
        Some(model) => models::context_multipliers(model, &fixture),
        None => (CtxTable::uniform(), CtxTable::uniform()),
    };
    let rsq = models::train_rsq_model(store)?;
    let psxg = models::train_psxg_model(store)?;

    let priors = RefereePriors::from_stats(
        &store
            .referee_stats(&fixture.referee_name)?
            .unwrap_or_default(),
    );

    let home = team_setup(
        store,
        &players,
        schedule.home_team_id,
        true,
        &schedule.home_players,
        params.home_subs_available,
        params.initial_minute,
        ctx_home,
    )?;
    let away = team_setup(
        store,
        &players,
        schedule.away_team_id,
        false,
        &schedule.away_players,
        params.away_subs_available,
        params.initial_minute,
        ctx_away,
    )?;

    let n_sims = n_sims_for(params.initial_minute);
    let workers = params
        .workers
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
        .max(1);
    info!(
        "simulating schedule {}: {n_sims} sims from minute {} on {workers} workers",
        params.schedule_id, params.initial_minute
    );

    let shared = SimShared {
        fixture,
        params,
        priors,
        players,
        home,
        away,
        rsq,
        psxg,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| anyhow!("build worker pool: {e}"))?;
    // Prediction memos live per worker, as in-sim contexts repeat heavily
    // across simulations.
    let outputs: Vec<SimOutput> = pool.install(|| {
        (0..n_sims as i64)
            .into_par_iter()
            .map_init(PredictionCaches::default, |caches, sim_id| {
                simulate_one(&shared, sim_id, caches)
            })
            .collect()
    });

    let mut shot_rows = Vec::new();
    let mut card_rows = Vec::new();
    let mut home_goal_total = 0u64;
    let mut away_goal_total = 0u64;
    for output in outputs {
        shot_rows.extend(output.shot_rows);
        card_rows.extend(output.card_rows);
        home_goal_total += output.home_goals as u64;
        away_goal_total += output.away_goals as u64;
    }

    store.replace_simulation(shared.params.schedule_id, &shot_rows)?;

    Ok(SimRun {
        n_sims,
        shot_rows: shot_rows.len(),
        card_rows,
        mean_home_goals: home_goal_total as f64 / n_sims as f64,
        mean_away_goals: away_goal_total as f64 / n_sims as f64,
    })
}

#[allow(clippy::too_many_arguments)]
fn team_setup(
    store: &Store,
    players: &PlayerMap,
    team_id: i64,
    is_home: bool,
    sheet: &[PlayerId],
    subs_available: u32,
    initial_minute: u32,
    ctx: CtxTable,
) -> Result<TeamSetup> {
    let starters: Vec<PlayerId> = sheet.iter().take(11).cloned().collect();
    let bench: Vec<PlayerId> = sheet.iter().skip(11).cloned().collect();
    let history = store.sub_history(team_id)?;
    let sub_plan = lineup::plan_sub_minutes(&history, subs_available, initial_minute);
    // The keeper is the first name on the sheet.
    let gk_ability = players
        .get(&starters[0])
        .map_or(0.0, |p| p.keeper_ability());
    Ok(TeamSetup {
        team_id,
        is_home,
        starters,
        bench,
        sub_plan,
        ctx,
        gk_ability,
    })
}

struct SimOutput {
    shot_rows: Vec<SimShotRow>,
    card_rows: Vec<SimCardRow>,
    home_goals: u32,
    away_goals: u32,
}

struct TeamState {
    active: Vec<PlayerId>,
    passive: Vec<PlayerId>,
    yellows: HashMap<PlayerId, u32>,
    goals: u32,
    reds: u32,
}

impl TeamState {
    fn reset(setup: &TeamSetup, initial_goals: u32) -> Self {
        Self {
            active: setup.starters.clone(),
            passive: setup.bench.clone(),
            yellows: HashMap::new(),
            goals: initial_goals,
            reds: 0,
        }
    }

    fn dismiss(&mut self, player: &PlayerId) {
        self.active.retain(|p| p != player);
        self.reds += 1;
    }
}

struct TeamView {
    ratings: TeamRatings,
    probs: PlayerProbs,
    outcome: OutcomeTable,
    // Bucket the current outcome table was built for; None forces a rebuild.
    outcome_key: Option<(StateBucket, DifBucket)>,
    lambda: f64,
    foul_rate: f64,
}

impl Default for TeamView {
    fn default() -> Self {
        Self {
            ratings: TeamRatings::default(),
            probs: PlayerProbs::default(),
            outcome: OutcomeTable::default(),
            outcome_key: None,
            lambda: 0.0,
            foul_rate: 0.0,
        }
    }
}

fn simulate_one(shared: &SimShared, sim_id: i64, caches: &mut PredictionCaches) -> SimOutput {
    let mut rng = StdRng::seed_from_u64(
        shared
            .params
            .seed
            .wrapping_add((sim_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
    );

    let mut home = TeamState::reset(&shared.home, shared.params.home_goals);
    let mut away = TeamState::reset(&shared.away, shared.params.away_goals);
    let mut home_view = TeamView::default();
    let mut away_view = TeamView::default();

    let mut shot_rows = Vec::new();
    let mut card_rows = Vec::new();

    let mut roster_dirty = true;
    let mut context_dirty = true;

    for minute in shared.params.initial_minute..=FULL_TIME {
        if SEGMENT_TURNOVERS.contains(&minute) {
            context_dirty = true;
        }

        // Planned substitutions.
        let home_status = GameStatus::from_goal_diff(home.goals as i32 - away.goals as i32);
        let away_status = GameStatus::from_goal_diff(away.goals as i32 - home.goals as i32);
        if let Some(&count) = shared.home.sub_plan.get(&minute) {
            lineup::swap_players(
                &mut rng,
                &mut home.active,
                &mut home.passive,
                &shared.players,
                count,
                home_status,
            );
            roster_dirty = true;
        }
        if let Some(&count) = shared.away.sub_plan.get(&minute) {
            lineup::swap_players(
                &mut rng,
                &mut away.active,
                &mut away.passive,
                &shared.players,
                count,
                away_status,
            );
            roster_dirty = true;
        }

        if roster_dirty {
            // Rating sums cross team lines, so both sides refresh together.
            home_view.ratings = shots::team_ratings(
                &home.active,
                &away.active,
                &shared.players,
                &shared.players,
            );
            away_view.ratings = shots::team_ratings(
                &away.active,
                &home.active,
                &shared.players,
                &shared.players,
            );
            home_view.probs = shots::build_player_probs(&home.active, &shared.players);
            away_view.probs = shots::build_player_probs(&away.active, &shared.players);
            home_view.outcome_key = None;
            away_view.outcome_key = None;
            roster_dirty = false;
            context_dirty = true;
        }

        if context_dirty {
            refresh_context(shared, &home, &away, &mut home_view, &mut away_view, minute, caches);
            context_dirty = false;
        }

        // Shots, home then away.
        let home_shots = sample_team_shots(
            &mut rng,
            sim_id,
            minute,
            &mut home,
            &home_view,
            shared.home.team_id,
            &mut shot_rows,
        );
        let away_shots = sample_team_shots(
            &mut rng,
            sim_id,
            minute,
            &mut away,
            &away_view,
            shared.away.team_id,
            &mut shot_rows,
        );
        if home_shots || away_shots {
            context_dirty = true;
        }

        // Fouls and cards.
        if sample_team_fouls(
            shared,
            &mut rng,
            sim_id,
            minute,
            &mut home,
            &home_view,
            shared.home.team_id,
            &mut card_rows,
        ) {
            roster_dirty = true;
            context_dirty = true;
        }
        if sample_team_fouls(
            shared,
            &mut rng,
            sim_id,
            minute,
            &mut away,
            &away_view,
            shared.away.team_id,
            &mut card_rows,
        ) {
            roster_dirty = true;
            context_dirty = true;
        }
    }

    SimOutput {
        shot_rows,
        card_rows,
        home_goals: home.goals,
        away_goals: away.goals,
    }
}

fn refresh_context(
    shared: &SimShared,
    home: &TeamState,
    away: &TeamState,
    home_view: &mut TeamView,
    away_view: &mut TeamView,
    minute: u32,
    caches: &mut PredictionCaches,
) {
    let segment = time_segment(minute);
    let home_state = match_state_code(home.goals as i32 - away.goals as i32);
    let away_state = match_state_code(away.goals as i32 - home.goals as i32);
    let home_pdif = player_dif_code(away.reds as i32 - home.reds as i32);
    let away_pdif = player_dif_code(home.reds as i32 - away.reds as i32);

    home_view.lambda =
        home_view.ratings.ras.max(0.0) * shared.home.ctx.get(home_state, segment, home_pdif);
    away_view.lambda =
        away_view.ratings.ras.max(0.0) * shared.away.ctx.get(away_state, segment, away_pdif);

    // Goal probabilities depend on the coarse state/advantage buckets, not
    // the exact codes; skip the rebuild while the bucket holds. Shot-quality
    // context is home-anchored in the training data, so both sides serve the
    // home-perspective codes.
    let shot_key = (
        StateBucket::from_code(home_state),
        DifBucket::from_code(home_pdif),
    );
    if home_view.outcome_key != Some(shot_key) {
        home_view.outcome = shots::build_outcome_table(
            &home.active,
            &shared.players,
            shared.away.gk_ability,
            &home_view.ratings,
            home_state,
            home_pdif,
            shared.home.is_home,
            &shared.fixture,
            shared.rsq.as_ref(),
            shared.psxg.as_ref(),
            caches,
        );
        home_view.outcome_key = Some(shot_key);
    }
    if away_view.outcome_key != Some(shot_key) {
        away_view.outcome = shots::build_outcome_table(
            &away.active,
            &shared.players,
            shared.home.gk_ability,
            &away_view.ratings,
            home_state,
            home_pdif,
            shared.away.is_home,
            &shared.fixture,
            shared.rsq.as_ref(),
            shared.psxg.as_ref(),
            caches,
        );
        away_view.outcome_key = Some(shot_key);
    }

    let home_status = GameStatus::from_goal_diff(home.goals as i32 - away.goals as i32);
    let away_status = GameStatus::from_goal_diff(away.goals as i32 - home.goals as i32);
    let home_f90 =
        discipline::team_fouls_per90(&home.active, &away.active, &shared.players, &shared.players);
    let away_f90 =
        discipline::team_fouls_per90(&away.active, &home.active, &shared.players, &shared.players);
    home_view.foul_rate = discipline::foul_rate_per_minute(
        home_f90,
        away_f90,
        &shared.priors,
        shared.home.is_home,
        home_status,
    );
    away_view.foul_rate = discipline::foul_rate_per_minute(
        away_f90,
        home_f90,
        &shared.priors,
        shared.away.is_home,
        away_status,
    );
}

/// Samples one team's shots for this minute; returns whether a goal was
/// scored.
#[allow(clippy::too_many_arguments)]
fn sample_team_shots(
    rng: &mut StdRng,
    sim_id: i64,
    minute: u32,
    state: &mut TeamState,
    view: &TeamView,
    team_id: i64,
    shot_rows: &mut Vec<SimShotRow>,
) -> bool {
    if state.active.is_empty() {
        return false;
    }
    let mut scored = false;
    let n_shots = shots::sample_poisson(rng, view.lambda);
    for _ in 0..n_shots {
        let body = shots::sample_body_part(rng, view.ratings.rahs, view.ratings.rafs);
        let Some(shooter) = view.probs.sample_shooter(rng, body) else {
            continue;
        };
        let assister = view.probs.sample_assister(rng, body, &shooter);
        let goal_prob = view
            .outcome
            .get(&(shooter.clone(), assister.clone(), body))
            .copied()
            .unwrap_or(0.0);
        let outcome = rng.r#gen::<f64>() < goal_prob;
        if outcome {
            state.goals += 1;
            scored = true;
        }
        shot_rows.push(SimShotRow {
            sim_id,
            minute: minute as i64,
            shooter,
            team_id,
            outcome,
            body_part: body.as_str().to_string(),
            assister,
        });
    }
    scored
}

/// Samples one team's fouls for this minute; returns whether the roster
/// shrank (second yellow or straight red).
#[allow(clippy::too_many_arguments)]
fn sample_team_fouls(
    shared: &SimShared,
    rng: &mut StdRng,
    sim_id: i64,
    minute: u32,
    state: &mut TeamState,
    view: &TeamView,
    team_id: i64,
    card_rows: &mut Vec<SimCardRow>,
) -> bool {
    if state.active.is_empty() {
        return false;
    }
    let mut removed = false;
    let n_fouls = shots::sample_poisson(rng, view.foul_rate);
    for _ in 0..n_fouls {
        if state.active.is_empty() {
            break;
        }
        let fouler = discipline::choose_fouler(rng, &state.active, &shared.players);
        let Some(card) = discipline::determine_card(rng, &fouler, &shared.players, &shared.priors)
        else {
            continue;
        };
        card_rows.push(SimCardRow {
            sim_id,
            minute: minute as i64,
            player_id: fouler.clone(),
            team_id,
            card,
        });
        match card {
            Card::Yellow => {
                let count = state.yellows.entry(fouler.clone()).or_insert(0);
                *count += 1;
                if *count >= 2 {
                    state.dismiss(&fouler);
                    removed = true;
                }
            }
            Card::Red => {
                state.dismiss(&fouler);
                removed = true;
            }
        }
    }
    removed
}
