//! Foul and card sampling. Team foul pressure blends the active players'
//! committed rate with the opponents' drawn rate, normalized against the
//! referee's own whistle rate; card probabilities shrink sparse player
//! histories toward the referee's card-per-foul priors.

use rand::Rng;
use rand::rngs::StdRng;

use crate::lineup::weighted_index;
use crate::players::{GameStatus, PlayerId, PlayerMap, RefereeStats};

pub const HOME_FOUL_FACTOR: f64 = 0.95;
pub const AWAY_FOUL_FACTOR: f64 = 1.05;
const CARD_PSEUDO_FOULS: f64 = 10.0;
const PLAYER_CARD_WEIGHT: f64 = 0.5;
const MIN_FOUL_RATE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Card {
    Yellow,
    Red,
}

#[derive(Debug, Clone, Copy)]
pub struct RefereePriors {
    pub fouls_per_match: f64,
    pub yc_given_foul: f64,
    pub rc_given_foul: f64,
}

impl RefereePriors {
    pub fn from_stats(stats: &RefereeStats) -> Self {
        let matches = stats.matches_played.max(1) as f64;
        let fouls_per_match = stats.fouls / matches;
        let floor = fouls_per_match.max(1e-5);
        Self {
            fouls_per_match,
            yc_given_foul: (stats.yellow_cards / matches) / floor,
            rc_given_foul: (stats.red_cards / matches) / floor,
        }
    }
}

pub fn status_foul_factor(status: GameStatus) -> f64 {
    match status {
        GameStatus::Leading => 0.88,
        GameStatus::Level => 1.0,
        GameStatus::Trailing => 1.11,
    }
}

/// Per-90 foul pressure: mean of the active players' committed-per-90 total
/// and the opponents' drawn-per-90 total.
pub fn team_fouls_per90(
    active: &[PlayerId],
    opponents: &[PlayerId],
    players: &PlayerMap,
    opp_players: &PlayerMap,
) -> f64 {
    let committed: f64 = active
        .iter()
        .filter_map(|p| players.get(p))
        .map(|p| p.per_minute(p.fouls_committed) * 90.0)
        .sum();
    let drawn: f64 = opponents
        .iter()
        .filter_map(|p| opp_players.get(p))
        .map(|p| p.per_minute(p.fouls_drawn) * 90.0)
        .sum();
    (committed + drawn) / 2.0
}

/// Per-minute foul rate for one team, shrunk toward the referee's whistle
/// rate and scaled by venue and game status.
pub fn foul_rate_per_minute(
    team_f90: f64,
    opp_f90: f64,
    priors: &RefereePriors,
    is_home: bool,
    status: GameStatus,
) -> f64 {
    let normalizer = (team_f90 + opp_f90 + priors.fouls_per_match) / 2.0;
    let adjust = team_f90 / normalizer.max(1e-5);
    let team_factor = if is_home {
        HOME_FOUL_FACTOR
    } else {
        AWAY_FOUL_FACTOR
    };
    let rate = (team_f90 / 90.0) * adjust * team_factor * status_foul_factor(status);
    rate.max(MIN_FOUL_RATE)
}

/// The fouling player, weighted by historical fouls committed per minute.
pub fn choose_fouler(rng: &mut StdRng, active: &[PlayerId], players: &PlayerMap) -> PlayerId {
    let weights: Vec<f64> = active
        .iter()
        .map(|p| {
            players
                .get(p)
                .map_or(0.0, |d| d.per_minute(d.fouls_committed))
        })
        .collect();
    active[weighted_index(rng, &weights)].clone()
}

/// Card outcome for one foul: player rates shrunk with pseudo-fouls toward
/// the referee's card-per-foul rates, then mixed half-and-half with them.
pub fn determine_card(
    rng: &mut StdRng,
    fouler: &PlayerId,
    players: &PlayerMap,
    priors: &RefereePriors,
) -> Option<Card> {
    let (fouls, ycs, rcs) = players
        .get(fouler)
        .map(|p| (p.fouls_committed as f64, p.yellow_cards as f64, p.red_cards as f64))
        .unwrap_or((0.0, 0.0, 0.0));

    let player_yc = (ycs + CARD_PSEUDO_FOULS * priors.yc_given_foul) / (fouls + CARD_PSEUDO_FOULS);
    let player_rc = (rcs + CARD_PSEUDO_FOULS * priors.rc_given_foul) / (fouls + CARD_PSEUDO_FOULS);

    let mut yc_prob = PLAYER_CARD_WEIGHT * player_yc + (1.0 - PLAYER_CARD_WEIGHT) * priors.yc_given_foul;
    let mut rc_prob = PLAYER_CARD_WEIGHT * player_rc + (1.0 - PLAYER_CARD_WEIGHT) * priors.rc_given_foul;
    yc_prob = yc_prob.max(0.0);
    rc_prob = rc_prob.max(0.0);

    let total = yc_prob + rc_prob;
    if total > 1.0 {
        yc_prob /= total;
        rc_prob /= total;
    }

    let draw = rng.r#gen::<f64>();
    if draw < yc_prob {
        Some(Card::Yellow)
    } else if draw < yc_prob + rc_prob {
        Some(Card::Red)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::players::PlayerRating;
    use rand::SeedableRng;

    fn squad(fouls: u32, minutes: f64) -> (Vec<PlayerId>, PlayerMap) {
        let mut players = PlayerMap::new();
        let mut ids = Vec::new();
        for i in 0..11 {
            let id = format!("p{i}_{i}_T");
            let mut p = PlayerRating::new(id.clone(), 1);
            p.minutes_played = minutes;
            p.fouls_committed = fouls;
            p.fouls_drawn = fouls;
            players.insert(id.clone(), p);
            ids.push(id);
        }
        (ids, players)
    }

    #[test]
    fn foul_rate_orders_by_status() {
        let priors = RefereePriors::from_stats(&RefereeStats::default());
        let leading = foul_rate_per_minute(12.0, 11.0, &priors, true, GameStatus::Leading);
        let level = foul_rate_per_minute(12.0, 11.0, &priors, true, GameStatus::Level);
        let trailing = foul_rate_per_minute(12.0, 11.0, &priors, true, GameStatus::Trailing);
        assert!(leading < level && level < trailing);
    }

    #[test]
    fn away_side_fouls_more_than_home() {
        let priors = RefereePriors::from_stats(&RefereeStats::default());
        let home = foul_rate_per_minute(12.0, 11.0, &priors, true, GameStatus::Level);
        let away = foul_rate_per_minute(12.0, 11.0, &priors, false, GameStatus::Level);
        assert!(away > home);
    }

    #[test]
    fn foul_rate_never_hits_zero() {
        let priors = RefereePriors::from_stats(&RefereeStats::default());
        let rate = foul_rate_per_minute(0.0, 0.0, &priors, true, GameStatus::Level);
        assert!(rate >= MIN_FOUL_RATE);
    }

    #[test]
    fn card_probabilities_stay_bounded() {
        // A pathological player with a card on every foul still yields a
        // valid distribution.
        let mut players = PlayerMap::new();
        let mut p = PlayerRating::new("x_1_T".into(), 1);
        p.fouls_committed = 4;
        p.yellow_cards = 4;
        p.red_cards = 4;
        players.insert("x_1_T".to_string(), p);
        let priors = RefereePriors {
            fouls_per_match: 20.0,
            yc_given_foul: 0.6,
            rc_given_foul: 0.6,
        };
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            // Must not panic; either card or nothing.
            let _ = determine_card(&mut rng, &"x_1_T".to_string(), &players, &priors);
        }
    }

    #[test]
    fn team_fouls_blend_committed_and_drawn() {
        let (ids, players) = squad(90, 900.0);
        // Each player: 90 fouls over 900 minutes → 9 per 90; eleven of them.
        let f90 = team_fouls_per90(&ids, &ids, &players, &players);
        assert!((f90 - 99.0).abs() < 1e-9);
    }

    #[test]
    fn fouler_choice_follows_weights() {
        let (ids, mut players) = squad(0, 900.0);
        players.get_mut(&ids[3]).unwrap().fouls_committed = 500;
        let mut rng = StdRng::seed_from_u64(5);
        let mut hits = 0;
        for _ in 0..50 {
            if choose_fouler(&mut rng, &ids, &players) == ids[3] {
                hits += 1;
            }
        }
        assert!(hits > 45);
    }
}
