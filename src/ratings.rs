//! Player-rating estimation. Rebuilds the player and referee tables from the
//! historical breakdown, then fits the per-league ridge regressions that
//! produce offensive/defensive coefficients for shot counts (headers and
//! footers separately) and for xG per shot.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use log::{info, warn};

use crate::players::{
    BodyPart, GameStatus, PlayerId, PlayerMap, PlayerRating, RefereeStats, team_initials,
};
use crate::ridge::RidgeProblem;
use crate::store::{SegmentRow, Store};

pub const RIDGE_ALPHA: f64 = 1.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct RatingsSummary {
    pub players: usize,
    pub referees: usize,
    pub league_fits: usize,
    pub skipped_fits: usize,
}

/// Truncate-and-rebuild of `players_data` and `referee_data`.
pub fn rebuild(store: &mut Store) -> Result<RatingsSummary> {
    store.backfill_match_card_totals()?;

    let matches = store.match_rows()?;
    let match_map: HashMap<i64, _> = matches.iter().map(|m| (m.match_id, m.clone())).collect();

    // Side membership from segment lineups is authoritative; the id suffix
    // (team initials) covers unused bench players who never enter a lineup.
    let mut initials: HashMap<i64, String> = HashMap::new();
    let mut team_of: HashMap<PlayerId, i64> = HashMap::new();
    let leagues = store.active_leagues()?;
    for league in &leagues {
        for team in store.teams_in_league(league.league_id)? {
            initials.insert(team.team_id, team_initials(&team.team_name));
        }
        for seg in store.segments_for_league(league.league_id)? {
            let Some(info) = match_map.get(&seg.match_id) else {
                continue;
            };
            for p in &seg.team_a_players {
                team_of.insert(p.clone(), info.home_team_id);
            }
            for p in &seg.team_b_players {
                team_of.insert(p.clone(), info.away_team_id);
            }
        }
    }

    let mut players: PlayerMap = PlayerMap::new();
    for row in store.breakdown_rows()? {
        let Some(info) = match_map.get(&row.match_id) else {
            continue;
        };
        let team_id = team_of.get(&row.player_id).copied().unwrap_or_else(|| {
            let suffix = row.player_id.rsplit('_').next().unwrap_or_default();
            match initials.get(&info.home_team_id) {
                Some(home_initials) if suffix == home_initials => info.home_team_id,
                _ => info.away_team_id,
            }
        });

        let p = players
            .entry(row.player_id.clone())
            .or_insert_with(|| PlayerRating::new(row.player_id.clone(), team_id));
        p.current_team = team_id;
        p.minutes_played += row.minutes_played as f64;
        p.headers += row.headers as u32;
        p.footers += row.footers as u32;
        p.key_passes += row.key_passes as u32;
        p.non_assisted_footers += row.non_assisted_footers as u32;
        p.hxg += row.hxg;
        p.fxg += row.fxg;
        p.kp_hxg += row.kp_hxg;
        p.kp_fxg += row.kp_fxg;
        p.hpsxg += row.hpsxg;
        p.fpsxg += row.fpsxg;
        p.gk_psxg += row.gk_psxg;
        p.gk_ga += row.gk_ga as u32;
        p.fouls_committed += row.fouls_committed as u32;
        p.fouls_drawn += row.fouls_drawn as u32;
        p.yellow_cards += row.yellow_cards as u32;
        p.red_cards += row.red_cards as u32;
        if let Some(status) = row.in_status.as_deref().and_then(parse_status) {
            p.in_status.add(status);
        }
        if let Some(status) = row.out_status.as_deref().and_then(parse_status) {
            p.out_status.add(status);
        }
        if let Some(minute) = row.sub_in {
            p.sub_in.push(minute as u32);
        }
        if let Some(minute) = row.sub_out {
            p.sub_out.push(minute as u32);
        }
    }

    let mut summary = RatingsSummary::default();

    // Per-league ridge fits.
    for league in &leagues {
        let segments = store.segments_for_league(league.league_id)?;
        if segments.is_empty() {
            continue;
        }
        for body in [BodyPart::Head, BodyPart::Foot] {
            match fit_shot_rates(&segments, body) {
                Some(fit) => {
                    apply_fit(&mut players, &fit, body, CoefKind::ShotRate);
                    summary.league_fits += 1;
                }
                None => {
                    warn!(
                        "league {} has no usable {} segments; shot-rate fit skipped",
                        league.league_id,
                        body.as_str()
                    );
                    summary.skipped_fits += 1;
                }
            }
            match fit_shot_quality(&segments, body) {
                Some(fit) => {
                    apply_fit(&mut players, &fit, body, CoefKind::ShotQuality);
                    summary.league_fits += 1;
                }
                None => {
                    warn!(
                        "league {} has no {} shots; xG fit skipped",
                        league.league_id,
                        body.as_str()
                    );
                    summary.skipped_fits += 1;
                }
            }
        }
    }

    for p in players.values_mut() {
        p.off_sh_coef = p.off_headers_coef + p.off_footers_coef;
        p.def_sh_coef = p.def_headers_coef + p.def_footers_coef;
    }

    // Referee totals over completed matches.
    let mut referees: HashMap<String, RefereeStats> = HashMap::new();
    for m in &matches {
        if m.referee_name.trim().is_empty() {
            continue;
        }
        let r = referees
            .entry(m.referee_name.clone())
            .or_insert_with(|| RefereeStats {
                referee_name: m.referee_name.clone(),
                fouls: 0.0,
                yellow_cards: 0.0,
                red_cards: 0.0,
                matches_played: 0,
            });
        r.fouls += m.total_fouls as f64;
        r.yellow_cards += m.yellow_cards as f64;
        r.red_cards += m.red_cards as f64;
        r.matches_played += 1;
    }

    let mut player_rows: Vec<PlayerRating> = players.into_values().collect();
    player_rows.sort_by(|a, b| a.player_id.cmp(&b.player_id));
    let mut referee_rows: Vec<RefereeStats> = referees.into_values().collect();
    referee_rows.sort_by(|a, b| a.referee_name.cmp(&b.referee_name));

    summary.players = player_rows.len();
    summary.referees = referee_rows.len();
    store.replace_players(&player_rows)?;
    store.replace_referees(&referee_rows)?;
    info!(
        "ratings rebuilt: {} players, {} referees, {} fits ({} skipped)",
        summary.players, summary.referees, summary.league_fits, summary.skipped_fits
    );
    Ok(summary)
}

fn parse_status(raw: &str) -> Option<GameStatus> {
    match raw {
        "leading" => Some(GameStatus::Leading),
        "level" => Some(GameStatus::Level),
        "trailing" => Some(GameStatus::Trailing),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum CoefKind {
    ShotRate,
    ShotQuality,
}

struct LeagueFit {
    players: Vec<PlayerId>,
    offensive: Vec<f64>,
    defensive: Vec<f64>,
}

fn ordered_players(segments: &[SegmentRow]) -> Vec<PlayerId> {
    let mut set = BTreeSet::new();
    for seg in segments {
        set.extend(seg.team_a_players.iter().cloned());
        set.extend(seg.team_b_players.iter().cloned());
    }
    set.into_iter().collect()
}

fn side_counts(seg: &SegmentRow, body: BodyPart) -> (i64, i64, f64, f64) {
    match body {
        BodyPart::Head => (
            seg.team_a_headers,
            seg.team_b_headers,
            seg.team_a_hxg,
            seg.team_b_hxg,
        ),
        BodyPart::Foot => (
            seg.team_a_footers,
            seg.team_b_footers,
            seg.team_a_fxg,
            seg.team_b_fxg,
        ),
    }
}

/// Weighted ridge on shots-per-minute. Two rows per segment: the attacking
/// team's offensive indicators +1, the defending team's defensive
/// indicators −1.
fn fit_shot_rates(segments: &[SegmentRow], body: BodyPart) -> Option<LeagueFit> {
    let players = ordered_players(segments);
    if players.is_empty() {
        return None;
    }
    let index: HashMap<&PlayerId, u32> = players
        .iter()
        .enumerate()
        .map(|(i, p)| (p, i as u32))
        .collect();
    let n = players.len() as u32;

    let mut problem = RidgeProblem::new(2 * players.len());
    for seg in segments {
        if seg.minutes_played <= 0 {
            continue;
        }
        let minutes = seg.minutes_played as f64;
        let (count_a, count_b, _, _) = side_counts(seg, body);

        problem.push_row(
            incidence(&index, n, &seg.team_a_players, &seg.team_b_players),
            count_a as f64 / minutes,
            minutes,
        );
        problem.push_row(
            incidence(&index, n, &seg.team_b_players, &seg.team_a_players),
            count_b as f64 / minutes,
            minutes,
        );
    }
    solve_fit(problem, players)
}

/// Weighted ridge on xG-per-shot, restricted to segments where the attacking
/// side actually took shots of this kind.
fn fit_shot_quality(segments: &[SegmentRow], body: BodyPart) -> Option<LeagueFit> {
    let players = ordered_players(segments);
    if players.is_empty() {
        return None;
    }
    let index: HashMap<&PlayerId, u32> = players
        .iter()
        .enumerate()
        .map(|(i, p)| (p, i as u32))
        .collect();
    let n = players.len() as u32;

    let mut problem = RidgeProblem::new(2 * players.len());
    for seg in segments {
        let (count_a, count_b, xg_a, xg_b) = side_counts(seg, body);
        if count_a > 0 {
            problem.push_row(
                incidence(&index, n, &seg.team_a_players, &seg.team_b_players),
                xg_a / count_a as f64,
                count_a as f64,
            );
        }
        if count_b > 0 {
            problem.push_row(
                incidence(&index, n, &seg.team_b_players, &seg.team_a_players),
                xg_b / count_b as f64,
                count_b as f64,
            );
        }
    }
    solve_fit(problem, players)
}

fn incidence(
    index: &HashMap<&PlayerId, u32>,
    n: u32,
    offense: &[PlayerId],
    defense: &[PlayerId],
) -> Vec<(u32, f32)> {
    let mut entries = Vec::with_capacity(offense.len() + defense.len());
    for p in offense {
        if let Some(i) = index.get(p) {
            entries.push((*i, 1.0));
        }
    }
    for p in defense {
        if let Some(i) = index.get(p) {
            entries.push((n + *i, -1.0));
        }
    }
    entries
}

fn solve_fit(problem: RidgeProblem, players: Vec<PlayerId>) -> Option<LeagueFit> {
    if problem.is_empty() {
        return None;
    }
    let beta = problem.solve(RIDGE_ALPHA);
    let n = players.len();
    Some(LeagueFit {
        offensive: beta[..n].to_vec(),
        defensive: beta[n..].to_vec(),
        players,
    })
}

fn apply_fit(players: &mut PlayerMap, fit: &LeagueFit, body: BodyPart, kind: CoefKind) {
    for (i, id) in fit.players.iter().enumerate() {
        let p = players
            .entry(id.clone())
            .or_insert_with(|| PlayerRating::new(id.clone(), 0));
        match (kind, body) {
            (CoefKind::ShotRate, BodyPart::Head) => {
                p.off_headers_coef = fit.offensive[i];
                p.def_headers_coef = fit.defensive[i];
            }
            (CoefKind::ShotRate, BodyPart::Foot) => {
                p.off_footers_coef = fit.offensive[i];
                p.def_footers_coef = fit.defensive[i];
            }
            (CoefKind::ShotQuality, BodyPart::Head) => {
                p.off_hxg_coef = fit.offensive[i];
                p.def_hxg_coef = fit.defensive[i];
            }
            (CoefKind::ShotQuality, BodyPart::Foot) => {
                p.off_fxg_coef = fit.offensive[i];
                p.def_fxg_coef = fit.defensive[i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(
        team_a: &[&str],
        team_b: &[&str],
        headers_a: i64,
        headers_b: i64,
        minutes: i64,
    ) -> SegmentRow {
        SegmentRow {
            team_a_players: team_a.iter().map(|s| s.to_string()).collect(),
            team_b_players: team_b.iter().map(|s| s.to_string()).collect(),
            team_a_headers: headers_a,
            team_b_headers: headers_b,
            team_a_hxg: headers_a as f64 * 0.1,
            team_b_hxg: headers_b as f64 * 0.1,
            minutes_played: minutes,
            ..Default::default()
        }
    }

    #[test]
    fn prolific_attacker_earns_positive_rate_coefficient() {
        // X's team shoots far more than everyone else across many segments.
        let mut segments = Vec::new();
        for _ in 0..40 {
            segments.push(segment(&["X", "A"], &["B", "C"], 6, 1, 45));
            segments.push(segment(&["A", "D"], &["B", "C"], 1, 1, 45));
        }
        let fit = fit_shot_rates(&segments, BodyPart::Head).unwrap();
        let idx_x = fit.players.iter().position(|p| p == "X").unwrap();
        let avg: f64 = fit.offensive.iter().sum::<f64>() / fit.offensive.len() as f64;
        assert!(fit.offensive[idx_x] > 0.0);
        assert!(fit.offensive[idx_x] > avg);
    }

    #[test]
    fn zero_minute_segments_leave_an_empty_design_matrix() {
        let segments = vec![segment(&["X"], &["B"], 3, 0, 0)];
        assert!(fit_shot_rates(&segments, BodyPart::Head).is_none());
    }

    #[test]
    fn quality_fit_skips_shotless_segments() {
        let mut segments = vec![segment(&["X"], &["B"], 0, 0, 45)];
        // No shots at all: no rows, fit degenerates to None-like zeros.
        let fit = fit_shot_quality(&segments, BodyPart::Head);
        assert!(fit.is_none());

        segments.push(segment(&["X"], &["B"], 2, 0, 45));
        let fit = fit_shot_quality(&segments, BodyPart::Head).unwrap();
        let idx_x = fit.players.iter().position(|p| p == "X").unwrap();
        assert!(fit.offensive[idx_x] != 0.0);
    }
}
