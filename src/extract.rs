//! Historical extraction: raw ingested matches become `match_info`,
//! `match_detail`, `match_breakdown` and `shots_data` rows; afterwards the
//! rating-dependent fields (PDRAS per segment, shot-quality columns per shot)
//! are backfilled from the current player coefficients.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{Days, NaiveDate};
use log::{info, warn};

use crate::ingest::{MatchIngestor, RawMatch, Side};
use crate::models::{self, DifBucket, RsqInput, StateBucket};
use crate::players::{self, BodyPart, GameStatus, PlayerId};
use crate::ratings;
use crate::segments::{
    EventTimeline, lineup_at, match_state_code, player_dif_code, segment_boundaries, time_segment,
};
use crate::store::{BreakdownRow, MatchInfoRow, SegmentRow, ShotRow, Store};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractSummary {
    pub leagues: usize,
    pub matches_recorded: usize,
    pub matches_skipped: usize,
}

/// The full training pass: ingest new matches, rebuild player and referee
/// tables, then backfill rating-derived fields. Resumable per league — a
/// league that fails to extract is logged and skipped.
pub fn train_and_extract(
    store: &mut Store,
    ingestor: &dyn MatchIngestor,
    upto: NaiveDate,
) -> Result<ExtractSummary> {
    let summary = extract_matches(store, ingestor, upto)?;
    ratings::rebuild(store)?;
    let pdras = update_pdras(store)?;
    let refreshed = refresh_shot_quality(store)?;
    info!(
        "training pass complete: {} matches recorded, {pdras} segments pdras-filled, {refreshed} shots refreshed",
        summary.matches_recorded
    );
    Ok(summary)
}

pub fn extract_matches(
    store: &mut Store,
    ingestor: &dyn MatchIngestor,
    upto: NaiveDate,
) -> Result<ExtractSummary> {
    let mut summary = ExtractSummary::default();
    let leagues = store.active_leagues()?;
    for league in &leagues {
        summary.leagues += 1;
        let since = league
            .last_updated_date
            .unwrap_or_else(|| upto.checked_sub_days(Days::new(365)).unwrap_or(upto));
        let raw_matches = match ingestor.matches_between(league, since, upto) {
            Ok(matches) => matches,
            Err(err) => {
                warn!("league {} ingest failed, skipping: {err:#}", league.league_id);
                continue;
            }
        };
        for raw in &raw_matches {
            match process_raw_match(store, league.league_id, raw) {
                Ok(true) => summary.matches_recorded += 1,
                Ok(false) => summary.matches_skipped += 1,
                Err(err) => {
                    warn!(
                        "match {} vs {} extraction failed: {err:#}",
                        raw.home_team, raw.away_team
                    );
                    summary.matches_skipped += 1;
                }
            }
        }
        store.set_league_updated(league.league_id, upto)?;
    }
    Ok(summary)
}

#[derive(Debug, Clone, Default)]
struct PlayerAccum {
    starter: bool,
    headers: i64,
    footers: i64,
    key_passes: i64,
    non_assisted_footers: i64,
    hxg: f64,
    fxg: f64,
    kp_hxg: f64,
    kp_fxg: f64,
    hpsxg: f64,
    fpsxg: f64,
    gk_psxg: f64,
    gk_ga: i64,
    sub_in: Option<i64>,
    sub_out: Option<i64>,
    in_status: Option<GameStatus>,
    out_status: Option<GameStatus>,
    fouls_committed: i64,
    fouls_drawn: i64,
    yellow_cards: i64,
    red_cards: i64,
}

fn process_raw_match(store: &mut Store, league_id: i64, raw: &RawMatch) -> Result<bool> {
    let Some(home) = store.team_by_name(league_id, &raw.home_team)? else {
        warn!("unknown home team '{}' in league {league_id}", raw.home_team);
        return Ok(false);
    };
    let Some(away) = store.team_by_name(league_id, &raw.away_team)? else {
        warn!("unknown away team '{}' in league {league_id}", raw.away_team);
        return Ok(false);
    };

    let home_roster: Vec<PlayerId> = raw
        .home_roster
        .iter()
        .map(|p| players::player_id(&p.name, &p.shirt, &raw.home_team))
        .collect();
    let away_roster: Vec<PlayerId> = raw
        .away_roster
        .iter()
        .map(|p| players::player_id(&p.name, &p.shirt, &raw.away_team))
        .collect();
    if home_roster.is_empty() || away_roster.is_empty() {
        warn!("empty roster for {} vs {}", raw.home_team, raw.away_team);
        return Ok(false);
    }

    let timeline = EventTimeline::from_events(&raw.events);
    let total_minutes = raw.total_minutes();

    let segments = build_segments(raw, &timeline, &home_roster, &away_roster, total_minutes);
    let (breakdowns, shots) = build_breakdown_and_shots(
        raw,
        &timeline,
        &home_roster,
        &away_roster,
        home.team_id,
        away.team_id,
        total_minutes,
    );

    let info = MatchInfoRow {
        match_id: 0,
        home_team_id: home.team_id,
        away_team_id: away.team_id,
        kickoff: raw.kickoff,
        league_id,
        referee_name: raw.referee.clone(),
        url: raw.url.clone(),
        home_elevation_dif: None,
        away_elevation_dif: None,
        away_travel: None,
        home_rest_days: None,
        away_rest_days: None,
        temperature_c: None,
        is_raining: None,
        total_fouls: 0,
        yellow_cards: 0,
        red_cards: 0,
    };
    Ok(store.record_match(&info, &segments, &breakdowns, &shots)?.is_some())
}

fn build_segments(
    raw: &RawMatch,
    timeline: &EventTimeline,
    home_roster: &[PlayerId],
    away_roster: &[PlayerId],
    total_minutes: u32,
) -> Vec<SegmentRow> {
    let boundaries = segment_boundaries(total_minutes, timeline.event_minutes());
    let mut segments = Vec::with_capacity(boundaries.len());

    for window in boundaries.windows(2) {
        let (start, end) = (window[0], window[1]);
        let mut seg = SegmentRow {
            match_id: 0,
            team_a_players: lineup_at(home_roster, timeline, start, Side::Home),
            team_b_players: lineup_at(away_roster, timeline, start, Side::Away),
            minutes_played: (end - start) as i64,
            match_segment: time_segment(start),
            ..Default::default()
        };

        for shot in &raw.shots {
            if shot.minute < start || shot.minute >= end {
                continue;
            }
            let Some(body) = shot.body_part.as_deref().and_then(BodyPart::parse) else {
                continue;
            };
            match (shot.side, body) {
                (Side::Home, BodyPart::Head) => {
                    seg.team_a_headers += 1;
                    seg.team_a_hxg += shot.xg;
                }
                (Side::Home, BodyPart::Foot) => {
                    seg.team_a_footers += 1;
                    seg.team_a_fxg += shot.xg;
                }
                (Side::Away, BodyPart::Head) => {
                    seg.team_b_headers += 1;
                    seg.team_b_hxg += shot.xg;
                }
                (Side::Away, BodyPart::Foot) => {
                    seg.team_b_footers += 1;
                    seg.team_b_fxg += shot.xg;
                }
            }
        }

        let goal_diff =
            timeline.goals_until(end, Side::Home) - timeline.goals_until(end, Side::Away);
        let red_diff = timeline.reds_until(end, Side::Away) - timeline.reds_until(end, Side::Home);
        seg.match_state = match_state_code(goal_diff);
        seg.player_dif = player_dif_code(red_diff);
        segments.push(seg);
    }
    segments
}

#[allow(clippy::too_many_arguments)]
fn build_breakdown_and_shots(
    raw: &RawMatch,
    timeline: &EventTimeline,
    home_roster: &[PlayerId],
    away_roster: &[PlayerId],
    home_team_id: i64,
    away_team_id: i64,
    total_minutes: u32,
) -> (Vec<BreakdownRow>, Vec<ShotRow>) {
    let mut home_accum = init_accums(home_roster);
    let mut away_accum = init_accums(away_roster);

    // Substitution minutes and the game status they happened under.
    for sub in &timeline.subs {
        let (accum, roster) = match sub.side {
            Side::Home => (&mut home_accum, home_roster),
            Side::Away => (&mut away_accum, away_roster),
        };
        let goals_for = timeline.goals_until(sub.minute, sub.side);
        let goals_against = timeline.goals_until(sub.minute, sub.side.flip());
        let status = GameStatus::from_goal_diff(goals_for - goals_against);

        if let Some(id) = find_by_name(roster, &sub.player_out) {
            let acc = accum.entry(id).or_default();
            acc.sub_out = Some(sub.minute as i64);
            acc.out_status = Some(status);
        }
        let in_id = find_by_name(roster, &sub.player_in).unwrap_or_else(|| sub.player_in.clone());
        let acc = accum.entry(in_id).or_default();
        acc.sub_in = Some(sub.minute as i64);
        acc.in_status = Some(status);
    }

    // Shots feed both the per-player aggregates and the shots table.
    let mut shot_rows = Vec::with_capacity(raw.shots.len());
    for shot in &raw.shots {
        let Some(body) = shot.body_part.as_deref().and_then(BodyPart::parse) else {
            continue;
        };
        let (roster, opp_roster, accum, opp_accum, team_id) = match shot.side {
            Side::Home => (
                home_roster,
                away_roster,
                &mut home_accum,
                &mut away_accum,
                home_team_id,
            ),
            Side::Away => (
                away_roster,
                home_roster,
                &mut away_accum,
                &mut home_accum,
                away_team_id,
            ),
        };
        let Some(shooter_id) = find_by_name(roster, &shot.shooter) else {
            continue;
        };
        let psxg = shot.psxg.unwrap_or(0.0);

        {
            let acc = accum.entry(shooter_id.clone()).or_default();
            match body {
                BodyPart::Head => {
                    acc.headers += 1;
                    acc.hxg += shot.xg;
                    acc.hpsxg += psxg;
                }
                BodyPart::Foot => {
                    acc.footers += 1;
                    acc.fxg += shot.xg;
                    acc.fpsxg += psxg;
                }
            }
        }

        let assister_id = if shot.sca_is_pass {
            shot.sca_player
                .as_deref()
                .and_then(|name| find_by_name(roster, name))
        } else {
            None
        };
        match &assister_id {
            Some(assister) => {
                let acc = accum.entry(assister.clone()).or_default();
                acc.key_passes += 1;
                match body {
                    BodyPart::Head => acc.kp_hxg += shot.xg,
                    BodyPart::Foot => acc.kp_fxg += shot.xg,
                }
            }
            None => {
                accum.entry(shooter_id.clone()).or_default().non_assisted_footers += 1;
            }
        }

        // The opposing keeper is the first name on the sheet.
        let gk_id = opp_roster[0].clone();
        {
            let acc = opp_accum.entry(gk_id.clone()).or_default();
            acc.gk_psxg += psxg;
            if shot.goal {
                acc.gk_ga += 1;
            }
        }

        // Shot context keeps the segment builder's convention: goal diff and
        // red-card advantage from the home perspective, whoever is shooting.
        let goal_diff = timeline.goals_until(shot.minute, Side::Home)
            - timeline.goals_until(shot.minute, Side::Away);
        let red_diff = timeline.reds_until(shot.minute, Side::Away)
            - timeline.reds_until(shot.minute, Side::Home);

        shot_rows.push(ShotRow {
            shot_id: 0,
            match_id: 0,
            xg: shot.xg,
            psxg,
            outcome: shot.goal,
            shooter_id,
            assister_id,
            team_id,
            gk_id,
            off_players: lineup_at(roster, timeline, shot.minute, shot.side),
            def_players: lineup_at(opp_roster, timeline, shot.minute, shot.side.flip()),
            match_state: match_state_code(goal_diff),
            player_dif: player_dif_code(red_diff),
            shot_type: body.as_str().to_string(),
            total_plsqa: None,
            shooter_sq: None,
            assister_sq: None,
            rsq: None,
            shooter_a: None,
            gk_a: None,
        });
    }

    // Misc table: fouls and cards per player.
    for (lines, accum, team_name) in [
        (&raw.home_misc, &mut home_accum, &raw.home_team),
        (&raw.away_misc, &mut away_accum, &raw.away_team),
    ] {
        for line in lines.iter() {
            let id = players::player_id(&line.name, &line.shirt, team_name);
            if let Some(acc) = accum.get_mut(&id) {
                acc.fouls_committed = line.fouls_committed;
                acc.fouls_drawn = line.fouls_drawn;
                acc.yellow_cards = line.yellow_cards;
                acc.red_cards = line.red_cards;
            }
        }
    }

    let mut breakdowns = Vec::new();
    for (roster, accum) in [(home_roster, home_accum), (away_roster, away_accum)] {
        let mut ordered: Vec<(PlayerId, PlayerAccum)> = accum.into_iter().collect();
        // Roster order first, late sub-in unknowns after.
        ordered.sort_by_key(|(id, _)| {
            roster
                .iter()
                .position(|p| p == id)
                .unwrap_or(usize::MAX)
        });
        for (player_id, acc) in ordered {
            breakdowns.push(finish_breakdown(player_id, acc, total_minutes));
        }
    }
    (breakdowns, shot_rows)
}

fn init_accums(roster: &[PlayerId]) -> HashMap<PlayerId, PlayerAccum> {
    roster
        .iter()
        .enumerate()
        .map(|(idx, id)| {
            (
                id.clone(),
                PlayerAccum {
                    starter: idx < 11,
                    ..Default::default()
                },
            )
        })
        .collect()
}

fn find_by_name(roster: &[PlayerId], name: &str) -> Option<PlayerId> {
    let trimmed = name.trim();
    roster
        .iter()
        .find(|id| players::base_name(id) == trimmed)
        .cloned()
}

fn finish_breakdown(player_id: PlayerId, acc: PlayerAccum, total_minutes: u32) -> BreakdownRow {
    let entered = if acc.starter { Some(0) } else { acc.sub_in };
    let left = acc.sub_out.unwrap_or(total_minutes as i64).min(90);
    let minutes_played = entered.map_or(0, |m| (left - m).max(0));

    BreakdownRow {
        match_id: 0,
        player_id,
        headers: acc.headers,
        footers: acc.footers,
        key_passes: acc.key_passes,
        non_assisted_footers: acc.non_assisted_footers,
        hxg: acc.hxg,
        fxg: acc.fxg,
        kp_hxg: acc.kp_hxg,
        kp_fxg: acc.kp_fxg,
        hpsxg: acc.hpsxg,
        fpsxg: acc.fpsxg,
        gk_psxg: acc.gk_psxg,
        gk_ga: acc.gk_ga,
        sub_in: acc.sub_in,
        sub_out: acc.sub_out,
        in_status: acc.in_status.map(|s| s.label().to_string()),
        out_status: acc.out_status.map(|s| s.label().to_string()),
        fouls_committed: acc.fouls_committed,
        fouls_drawn: acc.fouls_drawn,
        yellow_cards: acc.yellow_cards,
        red_cards: acc.red_cards,
        minutes_played,
    }
}

/// Backfills PDRAS on segments that do not have it yet, from the current
/// shot-rate coefficients.
pub fn update_pdras(store: &Store) -> Result<usize> {
    let players = store.players_all()?;
    let segments = store.segments_missing_pdras()?;
    let mut updated = 0usize;

    for seg in &segments {
        let minutes = seg.minutes_played as f64;
        let a_off: f64 = sum_coef(&players, &seg.team_a_players, |p| p.off_sh_coef);
        let a_def: f64 = sum_coef(&players, &seg.team_a_players, |p| p.def_sh_coef);
        let b_off: f64 = sum_coef(&players, &seg.team_b_players, |p| p.off_sh_coef);
        let b_def: f64 = sum_coef(&players, &seg.team_b_players, |p| p.def_sh_coef);

        let pdras_a = (a_off - b_def) * minutes;
        let pdras_b = (b_off - a_def) * minutes;
        store.set_segment_pdras(seg.detail_id, pdras_a, pdras_b)?;
        updated += 1;
    }
    Ok(updated)
}

fn sum_coef(
    players: &crate::players::PlayerMap,
    ids: &[PlayerId],
    coef: impl Fn(&crate::players::PlayerRating) -> f64,
) -> f64 {
    ids.iter()
        .filter_map(|id| players.get(id))
        .map(&coef)
        .sum()
}

/// Recomputes PLSQA, shooter/assister shot quality, the refined shot quality
/// prediction and the ability ratios for every shot missing them.
pub fn refresh_shot_quality(store: &Store) -> Result<usize> {
    let players = store.players_all()?;
    let model = models::train_rsq_model(store)?;
    let shots = store.shots_missing_quality()?;
    if shots.is_empty() {
        return Ok(0);
    }

    struct Pending {
        shot_id: i64,
        plsqa: f64,
        shooter_sq: f64,
        assister_sq: Option<f64>,
        shooter_a: f64,
        gk_a: f64,
        fallback: f64,
    }

    let mut pending = Vec::with_capacity(shots.len());
    let mut inputs = Vec::with_capacity(shots.len());

    for shot in &shots {
        let body = match shot.shot_type.as_str() {
            "head" => BodyPart::Head,
            _ => BodyPart::Foot,
        };
        let (offense, defense) = match body {
            BodyPart::Head => (
                sum_coef(&players, &shot.off_players, |p| p.off_hxg_coef),
                sum_coef(&players, &shot.def_players, |p| p.def_hxg_coef),
            ),
            BodyPart::Foot => (
                sum_coef(&players, &shot.off_players, |p| p.off_fxg_coef),
                sum_coef(&players, &shot.def_players, |p| p.def_fxg_coef),
            ),
        };
        let plsqa = offense - defense;

        let shooter = players.get(&shot.shooter_id);
        let shooter_sq = shooter.map_or(0.0, |p| p.shot_quality(body));
        let shooter_a = shooter.map_or(0.0, |p| p.shooter_ability(body));
        let assister_sq = shot
            .assister_id
            .as_ref()
            .and_then(|id| players.get(id))
            .map(|p| p.assist_quality(body));
        let gk_a = players.get(&shot.gk_id).map_or(0.0, |p| p.keeper_ability());

        inputs.push(RsqInput {
            total_plsqa: plsqa,
            shooter_sq,
            assister_sq,
            state: StateBucket::from_code(shot.match_state),
            player_dif: DifBucket::from_code(shot.player_dif),
        });
        pending.push(Pending {
            shot_id: shot.shot_id,
            plsqa,
            shooter_sq,
            assister_sq,
            shooter_a,
            gk_a,
            fallback: shot.xg,
        });
    }

    let rsqs: Vec<f64> = match &model {
        Some(m) => models::predict_rsq_bulk(m, &inputs),
        None => {
            // No trained quality model yet (first pass); the raw xG stands in.
            pending.iter().map(|p| p.fallback).collect()
        }
    };

    for (p, rsq) in pending.iter().zip(&rsqs) {
        store.set_shot_quality(
            p.shot_id,
            p.plsqa,
            p.shooter_sq,
            p.assister_sq,
            *rsq,
            p.shooter_a,
            p.gk_a,
        )?;
    }
    Ok(pending.len())
}
