//! The three context boosters: RAS (shots per minute, Poisson on a log
//! offset), RSQ (refined shot quality, squared error) and PSxG (post-shot
//! goal probability, logistic). Category values are closed sets, so the
//! one-hot columns are enumerated up front; prediction rows are always built
//! against the model's own column order with unknown columns left at zero.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{NaiveDateTime, Timelike};
use log::warn;

use crate::boost::{BoostParams, Booster, Objective, TrainingSet};
use crate::segments::MatchTime;
use crate::store::{ScheduleRow, Store};

pub const STATE_CODES: [f64; 5] = [-1.5, -1.0, 0.0, 1.0, 1.5];
pub const SEGMENTS: [i64; 6] = [1, 2, 3, 4, 5, 6];

const PDRAS_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateBucket {
    Trailing,
    Level,
    Leading,
}

impl StateBucket {
    pub fn from_code(code: f64) -> Self {
        if code < 0.0 {
            Self::Trailing
        } else if code > 0.0 {
            Self::Leading
        } else {
            Self::Level
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trailing => "Trailing",
            Self::Level => "Level",
            Self::Leading => "Leading",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DifBucket {
    Neg,
    Neu,
    Pos,
}

impl DifBucket {
    pub fn from_code(code: f64) -> Self {
        if code < 0.0 {
            Self::Neg
        } else if code > 0.0 {
            Self::Pos
        } else {
            Self::Neu
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Neg => "Neg",
            Self::Neu => "Neu",
            Self::Pos => "Pos",
        }
    }
}

/// Fixture-level context shared by the simulator and the prediction caches.
#[derive(Debug, Clone)]
pub struct FixtureContext {
    pub league_id: i64,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub kickoff: NaiveDateTime,
    pub referee_name: String,
    pub home_elevation_dif: f64,
    pub away_elevation_dif: f64,
    pub away_travel: f64,
    pub home_rest_days: f64,
    pub away_rest_days: f64,
    pub temperature_c: f64,
    pub is_raining: bool,
}

impl FixtureContext {
    pub fn from_schedule(row: &ScheduleRow) -> Self {
        Self {
            league_id: row.league_id,
            home_team_id: row.home_team_id,
            away_team_id: row.away_team_id,
            kickoff: row.kickoff,
            referee_name: row.referee_name.clone(),
            home_elevation_dif: row.home_elevation_dif,
            away_elevation_dif: row.away_elevation_dif,
            away_travel: row.away_travel,
            home_rest_days: row.home_rest_days,
            away_rest_days: row.away_rest_days,
            temperature_c: row.temperature_c,
            is_raining: row.is_raining,
        }
    }

    pub fn match_time(&self) -> MatchTime {
        MatchTime::from_hour(self.kickoff.hour())
    }
}

// ---- column frames ----

#[derive(Debug, Clone)]
struct Frame {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl Frame {
    fn new(columns: Vec<String>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Self { columns, index }
    }

    fn from_model(booster: &Booster) -> Self {
        Self::new(booster.columns().to_vec())
    }

    fn row(&self) -> Vec<f32> {
        vec![0.0; self.columns.len()]
    }

    fn set(&self, row: &mut [f32], column: &str, value: f64) {
        if let Some(idx) = self.index.get(column) {
            row[*idx] = value as f32;
        }
    }

    fn set_flag(&self, row: &mut [f32], column: &str) {
        self.set(row, column, 1.0);
    }
}

fn state_label(code: f64) -> &'static str {
    if code <= -1.5 {
        "-1.5"
    } else if code < 0.0 {
        "-1"
    } else if code >= 1.5 {
        "1.5"
    } else if code > 0.0 {
        "1"
    } else {
        "0"
    }
}

fn ras_frame() -> Frame {
    let mut columns: Vec<String> = [
        "team_elevation_dif",
        "opp_elevation_dif",
        "team_travel",
        "opp_travel",
        "team_rest_days",
        "opp_rest_days",
        "temperature_c",
        "team_is_home",
        "is_raining",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for code in STATE_CODES {
        columns.push(format!("match_state_{}", state_label(code)));
    }
    for segment in SEGMENTS {
        columns.push(format!("match_segment_{segment}"));
    }
    for code in STATE_CODES {
        columns.push(format!("player_dif_{}", state_label(code)));
    }
    for bucket in [MatchTime::Aft, MatchTime::Evening, MatchTime::Night] {
        columns.push(format!("match_time_{}", bucket.as_str()));
    }
    Frame::new(columns)
}

fn rsq_frame() -> Frame {
    let mut columns: Vec<String> = ["total_plsqa", "shooter_sq", "assister_sq"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for bucket in [StateBucket::Trailing, StateBucket::Level, StateBucket::Leading] {
        columns.push(format!("match_state_{}", bucket.as_str()));
    }
    columns.push("match_state_nan".to_string());
    for bucket in [DifBucket::Neg, DifBucket::Neu, DifBucket::Pos] {
        columns.push(format!("player_dif_{}", bucket.as_str()));
    }
    columns.push("player_dif_nan".to_string());
    Frame::new(columns)
}

fn psxg_frame() -> Frame {
    let mut columns: Vec<String> = [
        "RSQ",
        "shooter_A",
        "GK_A",
        "team_elevation_dif",
        "team_travel",
        "team_rest_days",
        "temperature_c",
        "team_is_home",
        "is_raining",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for bucket in [MatchTime::Aft, MatchTime::Evening, MatchTime::Night] {
        columns.push(format!("match_time_{}", bucket.as_str()));
    }
    columns.push("match_time_nan".to_string());
    Frame::new(columns)
}

// ---- RAS ----

#[derive(Debug, Clone)]
pub struct RasModel {
    booster: Booster,
}

/// One team-perspective slice of a historical segment.
#[derive(Debug, Clone)]
struct RasSample {
    shots: f64,
    pdras: f64,
    minutes: f64,
    team_is_home: bool,
    team_elevation_dif: f64,
    opp_elevation_dif: f64,
    team_travel: f64,
    opp_travel: f64,
    team_rest_days: f64,
    opp_rest_days: f64,
    match_state: f64,
    match_segment: i64,
    player_dif: f64,
    temperature_c: f64,
    is_raining: bool,
    match_time: MatchTime,
}

pub fn train_ras_model(store: &Store, league_id: i64) -> Result<Option<RasModel>> {
    let joined = store.segments_with_context(league_id)?;
    let mut samples = Vec::with_capacity(joined.len() * 2);

    for (seg, info) in &joined {
        if seg.minutes_played <= 0 {
            continue;
        }
        let (Some(pdras_a), Some(pdras_b)) = (seg.team_a_pdras, seg.team_b_pdras) else {
            continue;
        };
        let match_time = MatchTime::from_hour(info.kickoff.hour());
        let minutes = seg.minutes_played as f64;
        let home_elev = info.home_elevation_dif.unwrap_or(0.0);
        let away_elev = info.away_elevation_dif.unwrap_or(0.0);
        let travel = info.away_travel.unwrap_or(0.0);
        let home_rest = info.home_rest_days.unwrap_or(30.0);
        let away_rest = info.away_rest_days.unwrap_or(30.0);
        let temperature = info.temperature_c.unwrap_or(0.0);
        let raining = info.is_raining.unwrap_or(false);

        samples.push(RasSample {
            shots: (seg.team_a_headers + seg.team_a_footers) as f64,
            pdras: pdras_a,
            minutes,
            team_is_home: true,
            team_elevation_dif: home_elev,
            opp_elevation_dif: away_elev,
            team_travel: 0.0,
            opp_travel: travel,
            team_rest_days: home_rest,
            opp_rest_days: away_rest,
            match_state: seg.match_state,
            match_segment: seg.match_segment,
            player_dif: seg.player_dif,
            temperature_c: temperature,
            is_raining: raining,
            match_time,
        });
        samples.push(RasSample {
            shots: (seg.team_b_headers + seg.team_b_footers) as f64,
            pdras: pdras_b,
            minutes,
            team_is_home: false,
            team_elevation_dif: away_elev,
            opp_elevation_dif: home_elev,
            team_travel: travel,
            opp_travel: 0.0,
            team_rest_days: away_rest,
            opp_rest_days: home_rest,
            match_state: -seg.match_state,
            match_segment: seg.match_segment,
            player_dif: -seg.player_dif,
            temperature_c: temperature,
            is_raining: raining,
            match_time,
        });
    }

    if samples.is_empty() {
        warn!("no RAS training rows for league {league_id}; skipping model");
        return Ok(None);
    }

    let frame = ras_frame();
    let mut rows = Vec::with_capacity(samples.len());
    let mut targets = Vec::with_capacity(samples.len());
    let mut margins = Vec::with_capacity(samples.len());
    for s in &samples {
        let mut row = frame.row();
        frame.set(&mut row, "team_elevation_dif", s.team_elevation_dif);
        frame.set(&mut row, "opp_elevation_dif", s.opp_elevation_dif);
        frame.set(&mut row, "team_travel", s.team_travel);
        frame.set(&mut row, "opp_travel", s.opp_travel);
        frame.set(&mut row, "team_rest_days", s.team_rest_days);
        frame.set(&mut row, "opp_rest_days", s.opp_rest_days);
        frame.set(&mut row, "temperature_c", s.temperature_c);
        frame.set(&mut row, "team_is_home", s.team_is_home as i64 as f64);
        frame.set(&mut row, "is_raining", s.is_raining as i64 as f64);
        frame.set_flag(&mut row, &format!("match_state_{}", state_label(s.match_state)));
        frame.set_flag(&mut row, &format!("match_segment_{}", s.match_segment));
        frame.set_flag(&mut row, &format!("player_dif_{}", state_label(s.player_dif)));
        frame.set_flag(&mut row, &format!("match_time_{}", s.match_time.as_str()));
        rows.push(row);
        targets.push((s.shots / s.minutes) as f32);
        margins.push((s.pdras / s.minutes).max(PDRAS_FLOOR).ln() as f32);
    }

    let set = TrainingSet {
        columns: frame.columns.clone(),
        rows,
        targets,
        base_margin: Some(margins),
    };
    let mut params = BoostParams::new(Objective::Poisson);
    params.rounds = 300;
    params.max_depth = 6;
    params.min_child_weight = 5.0;
    let booster = Booster::train(&set, &params)?;
    Ok(Some(RasModel { booster }))
}

/// Context multiplier table: `exp(raw margin)` of the RAS model over every
/// (state, segment, player-dif) bucket, predicted with a unit rating sum so
/// only the model's multiplicative effect remains.
#[derive(Debug, Clone, Default)]
pub struct CtxTable {
    map: HashMap<(i8, i64, i8), f64>,
}

impl CtxTable {
    pub fn get(&self, state: f64, segment: i64, player_dif: f64) -> f64 {
        self.map
            .get(&(scale_code(state), segment, scale_code(player_dif)))
            .copied()
            .unwrap_or(1.0)
    }

    /// Flat multiplier for the degenerate no-model case.
    pub fn uniform() -> Self {
        Self::default()
    }
}

fn scale_code(code: f64) -> i8 {
    (code * 10.0).round() as i8
}

pub fn context_multipliers(ras: &RasModel, fixture: &FixtureContext) -> (CtxTable, CtxTable) {
    let frame = Frame::from_model(&ras.booster);
    let mut home = CtxTable::default();
    let mut away = CtxTable::default();

    for is_home in [true, false] {
        let table = if is_home { &mut home } else { &mut away };
        for state in STATE_CODES {
            for segment in SEGMENTS {
                for pdif in STATE_CODES {
                    let mut row = frame.row();
                    frame.set(
                        &mut row,
                        "team_elevation_dif",
                        if is_home {
                            fixture.home_elevation_dif
                        } else {
                            fixture.away_elevation_dif
                        },
                    );
                    frame.set(
                        &mut row,
                        "opp_elevation_dif",
                        if is_home {
                            fixture.away_elevation_dif
                        } else {
                            fixture.home_elevation_dif
                        },
                    );
                    frame.set(
                        &mut row,
                        "team_travel",
                        if is_home { 0.0 } else { fixture.away_travel },
                    );
                    frame.set(
                        &mut row,
                        "opp_travel",
                        if is_home { fixture.away_travel } else { 0.0 },
                    );
                    frame.set(
                        &mut row,
                        "team_rest_days",
                        if is_home {
                            fixture.home_rest_days
                        } else {
                            fixture.away_rest_days
                        },
                    );
                    frame.set(
                        &mut row,
                        "opp_rest_days",
                        if is_home {
                            fixture.away_rest_days
                        } else {
                            fixture.home_rest_days
                        },
                    );
                    frame.set(&mut row, "temperature_c", fixture.temperature_c);
                    frame.set(&mut row, "team_is_home", is_home as i64 as f64);
                    frame.set(&mut row, "is_raining", fixture.is_raining as i64 as f64);
                    frame.set_flag(&mut row, &format!("match_state_{}", state_label(state)));
                    frame.set_flag(&mut row, &format!("match_segment_{segment}"));
                    frame.set_flag(&mut row, &format!("player_dif_{}", state_label(pdif)));
                    frame.set_flag(
                        &mut row,
                        &format!("match_time_{}", fixture.match_time().as_str()),
                    );

                    // Unit rating sum ⇒ zero base margin ⇒ pure model effect.
                    let raw = ras.booster.predict_row(&row, 0.0, true);
                    table
                        .map
                        .insert((scale_code(state), segment, scale_code(pdif)), raw.exp());
                }
            }
        }
    }
    (home, away)
}

// ---- RSQ ----

#[derive(Debug, Clone)]
pub struct RsqModel {
    booster: Booster,
}

#[derive(Debug, Clone)]
pub struct RsqInput {
    pub total_plsqa: f64,
    pub shooter_sq: f64,
    pub assister_sq: Option<f64>,
    pub state: StateBucket,
    pub player_dif: DifBucket,
}

pub fn train_rsq_model(store: &Store) -> Result<Option<RsqModel>> {
    let shots = store.shots_with_quality()?;
    let frame = rsq_frame();
    let mut rows = Vec::new();
    let mut targets = Vec::new();

    for shot in &shots {
        let (Some(plsqa), Some(shooter_sq)) = (shot.total_plsqa, shot.shooter_sq) else {
            continue;
        };
        let mut row = frame.row();
        frame.set(&mut row, "total_plsqa", plsqa);
        frame.set(&mut row, "shooter_sq", shooter_sq);
        frame.set(&mut row, "assister_sq", shot.assister_sq.unwrap_or(0.0));
        let state = StateBucket::from_code(shot.match_state);
        let pdif = DifBucket::from_code(shot.player_dif);
        frame.set_flag(&mut row, &format!("match_state_{}", state.as_str()));
        frame.set_flag(&mut row, &format!("player_dif_{}", pdif.as_str()));
        rows.push(row);
        targets.push(shot.xg as f32);
    }

    if rows.is_empty() {
        warn!("no refined-shot-quality training rows; skipping model");
        return Ok(None);
    }

    let set = TrainingSet {
        columns: frame.columns.clone(),
        rows,
        targets,
        base_margin: None,
    };
    let mut params = BoostParams::new(Objective::SquaredError);
    params.rounds = 400;
    params.max_depth = 6;
    params.min_child_weight = 2.0;
    let booster = Booster::train(&set, &params)?;
    Ok(Some(RsqModel { booster }))
}

pub fn predict_rsq_bulk(model: &RsqModel, inputs: &[RsqInput]) -> Vec<f64> {
    let frame = Frame::from_model(&model.booster);
    inputs
        .iter()
        .map(|input| {
            let mut row = frame.row();
            frame.set(&mut row, "total_plsqa", input.total_plsqa);
            frame.set(&mut row, "shooter_sq", input.shooter_sq);
            frame.set(&mut row, "assister_sq", input.assister_sq.unwrap_or(0.0));
            frame.set_flag(&mut row, &format!("match_state_{}", input.state.as_str()));
            frame.set_flag(&mut row, &format!("player_dif_{}", input.player_dif.as_str()));
            model.booster.predict_row(&row, 0.0, false)
        })
        .collect()
}

// ---- PSxG ----

#[derive(Debug, Clone)]
pub struct PsxgModel {
    booster: Booster,
}

#[derive(Debug, Clone)]
pub struct PsxgInput {
    pub rsq: f64,
    pub shooter_a: f64,
    pub gk_a: f64,
    pub team_is_home: bool,
    pub team_elevation_dif: f64,
    pub team_travel: f64,
    pub team_rest_days: f64,
    pub temperature_c: f64,
    pub is_raining: bool,
    pub match_time: MatchTime,
}

pub fn train_psxg_model(store: &Store) -> Result<Option<PsxgModel>> {
    let joined = store.shots_with_context()?;
    let frame = psxg_frame();
    let mut rows = Vec::new();
    let mut targets = Vec::new();

    for (shot, info) in &joined {
        let (Some(rsq), Some(shooter_a), Some(gk_a)) = (shot.rsq, shot.shooter_a, shot.gk_a)
        else {
            continue;
        };
        let team_is_home = shot.team_id == info.home_team_id;
        let input = PsxgInput {
            rsq,
            shooter_a,
            gk_a,
            team_is_home,
            team_elevation_dif: if team_is_home {
                info.home_elevation_dif.unwrap_or(0.0)
            } else {
                info.away_elevation_dif.unwrap_or(0.0)
            },
            team_travel: if team_is_home {
                0.0
            } else {
                info.away_travel.unwrap_or(0.0)
            },
            team_rest_days: if team_is_home {
                info.home_rest_days.unwrap_or(30.0)
            } else {
                info.away_rest_days.unwrap_or(30.0)
            },
            temperature_c: info.temperature_c.unwrap_or(0.0),
            is_raining: info.is_raining.unwrap_or(false),
            match_time: MatchTime::from_hour(info.kickoff.hour()),
        };
        rows.push(psxg_row(&frame, &input));
        targets.push(shot.outcome as i64 as f32);
    }

    if rows.is_empty() {
        warn!("no post-shot-goal training rows; skipping model");
        return Ok(None);
    }

    let set = TrainingSet {
        columns: frame.columns.clone(),
        rows,
        targets,
        base_margin: None,
    };
    let mut params = BoostParams::new(Objective::Logistic);
    params.rounds = 300;
    params.max_depth = 5;
    params.subsample = 0.9;
    params.colsample = 0.9;
    params.min_child_weight = 2.0;
    let booster = Booster::train(&set, &params)?;
    Ok(Some(PsxgModel { booster }))
}

fn psxg_row(frame: &Frame, input: &PsxgInput) -> Vec<f32> {
    let mut row = frame.row();
    frame.set(&mut row, "RSQ", input.rsq);
    frame.set(&mut row, "shooter_A", input.shooter_a);
    frame.set(&mut row, "GK_A", input.gk_a);
    frame.set(&mut row, "team_elevation_dif", input.team_elevation_dif);
    frame.set(&mut row, "team_travel", input.team_travel);
    frame.set(&mut row, "team_rest_days", input.team_rest_days);
    frame.set(&mut row, "temperature_c", input.temperature_c);
    frame.set(&mut row, "team_is_home", input.team_is_home as i64 as f64);
    frame.set(&mut row, "is_raining", input.is_raining as i64 as f64);
    frame.set_flag(&mut row, &format!("match_time_{}", input.match_time.as_str()));
    row
}

pub fn predict_psxg_bulk(model: &PsxgModel, inputs: &[PsxgInput]) -> Vec<f64> {
    let frame = Frame::from_model(&model.booster);
    inputs
        .iter()
        .map(|input| model.booster.predict_row(&psxg_row(&frame, input), 0.0, false))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_buckets_from_codes() {
        assert_eq!(StateBucket::from_code(-1.5), StateBucket::Trailing);
        assert_eq!(StateBucket::from_code(0.0), StateBucket::Level);
        assert_eq!(StateBucket::from_code(1.0), StateBucket::Leading);
        assert_eq!(DifBucket::from_code(-1.0), DifBucket::Neg);
        assert_eq!(DifBucket::from_code(1.5), DifBucket::Pos);
    }

    #[test]
    fn state_labels_are_stable() {
        assert_eq!(state_label(-1.5), "-1.5");
        assert_eq!(state_label(-1.0), "-1");
        assert_eq!(state_label(0.0), "0");
        assert_eq!(state_label(1.0), "1");
        assert_eq!(state_label(1.5), "1.5");
    }

    #[test]
    fn frame_ignores_unknown_columns() {
        let frame = rsq_frame();
        let mut row = frame.row();
        frame.set(&mut row, "no_such_column", 3.0);
        assert!(row.iter().all(|v| *v == 0.0));
        frame.set(&mut row, "total_plsqa", 0.4);
        assert!(row.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn ctx_table_defaults_to_unit_multiplier() {
        let table = CtxTable::uniform();
        assert_eq!(table.get(0.0, 3, 0.0), 1.0);
    }
}
