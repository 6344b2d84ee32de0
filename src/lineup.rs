//! Lineup evolution during a simulated match: how many substitutions to
//! spend, at which minutes, who leaves and who comes on. Red-card removals
//! are handled by the simulation loop; the vacated slot is never refilled.

use std::collections::HashMap;

use rand::Rng;
use rand::rngs::StdRng;

use crate::players::{GameStatus, PlayerId, PlayerMap};

pub const MAX_SUBS: u32 = 5;

/// Weighted index draw over a non-negative weight vector. All-zero weights
/// degrade to uniform.
pub fn weighted_index(rng: &mut StdRng, weights: &[f64]) -> usize {
    debug_assert!(!weights.is_empty());
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return rng.gen_range(0..weights.len());
    }
    let mut draw = rng.r#gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        draw -= w;
        if draw < 0.0 {
            return i;
        }
    }
    weights.len() - 1
}

/// Substitution plan: how many players to swap at which minute.
///
/// The team's historical average number of subs per match, reduced by subs
/// already burned before the simulation starts, is spread over its most
/// frequent historical sub-in minutes after the current one (one window when
/// a single sub remains, two below five, three otherwise), remainder on the
/// earlier windows.
pub fn plan_sub_minutes(
    history: &[(i64, i64)],
    available: u32,
    current_minute: u32,
) -> HashMap<u32, u32> {
    let mut per_match: HashMap<i64, u32> = HashMap::new();
    for (match_id, _) in history {
        *per_match.entry(*match_id).or_default() += 1;
    }
    if per_match.is_empty() || available == 0 {
        return HashMap::new();
    }
    let avg_subs =
        (per_match.values().sum::<u32>() as f64 / per_match.len() as f64).round() as i64;
    let effective = avg_subs
        .saturating_sub((MAX_SUBS - available.min(MAX_SUBS)) as i64)
        .clamp(0, available as i64) as u32;
    if effective == 0 {
        return HashMap::new();
    }

    let n_windows = if effective == 1 {
        1
    } else if effective < MAX_SUBS {
        2
    } else {
        3
    };

    // Most frequent sub-in minutes strictly after the current one, by
    // frequency then earliness.
    let mut minute_counts: HashMap<i64, u32> = HashMap::new();
    for (_, minute) in history {
        if *minute > current_minute as i64 {
            *minute_counts.entry(*minute).or_default() += 1;
        }
    }
    let mut ranked: Vec<(i64, u32)> = minute_counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(n_windows);
    if ranked.is_empty() {
        return HashMap::new();
    }

    let n_windows = ranked.len() as u32;
    let base = effective / n_windows;
    let remainder = effective % n_windows;
    let mut plan = HashMap::new();
    for (i, (minute, _)) in ranked.iter().enumerate() {
        let count = base + if (i as u32) < remainder { 1 } else { 0 };
        if count > 0 {
            plan.insert(*minute as u32, count);
        }
    }
    plan
}

/// Swaps `count` players between the active and passive lists.
///
/// Out-candidates are weighted by spare minutes times their historical
/// leave-the-pitch probability under the current status; in-candidates by
/// minutes share times their come-on probability. A lone certain pick is
/// softened to 0.99 so multi-sub draws stay feasible.
pub fn swap_players(
    rng: &mut StdRng,
    active: &mut Vec<PlayerId>,
    passive: &mut Vec<PlayerId>,
    players: &PlayerMap,
    count: u32,
    status: GameStatus,
) {
    let count = (count as usize).min(active.len()).min(passive.len());
    if count == 0 {
        return;
    }

    let total_active_minutes: f64 = active
        .iter()
        .filter_map(|p| players.get(p))
        .map(|p| p.minutes_played)
        .sum();
    let out_weights = normalized_weights(
        active,
        count,
        |p| {
            let minutes = players.get(p).map_or(0.0, |d| d.minutes_played);
            let share = if total_active_minutes > 0.0 {
                minutes / total_active_minutes
            } else {
                0.0
            };
            let out_prob = players.get(p).map_or(0.0, |d| d.out_status.prob(status));
            (1.0 - share) * out_prob
        },
    );

    let total_passive_minutes: f64 = passive
        .iter()
        .filter_map(|p| players.get(p))
        .map(|p| p.minutes_played)
        .sum();
    let in_weights = normalized_weights(
        passive,
        count,
        |p| {
            let minutes = players.get(p).map_or(0.0, |d| d.minutes_played);
            let share = if total_passive_minutes > 0.0 {
                minutes / total_passive_minutes
            } else {
                0.0
            };
            let in_prob = players.get(p).map_or(0.0, |d| d.in_status.prob(status));
            share * in_prob
        },
    );

    let picked_out = draw_without_replacement(rng, active, &out_weights, count);
    let picked_in = draw_without_replacement(rng, passive, &in_weights, count);

    active.retain(|p| !picked_out.contains(p));
    active.extend(picked_in.iter().cloned());
    passive.retain(|p| !picked_in.contains(p));
}

fn normalized_weights(
    ids: &[PlayerId],
    count: usize,
    weight_of: impl Fn(&PlayerId) -> f64,
) -> Vec<f64> {
    let raw: Vec<f64> = ids.iter().map(&weight_of).collect();
    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        return vec![1.0 / ids.len() as f64; ids.len()];
    }
    let mut weights: Vec<f64> = raw.iter().map(|w| w / total).collect();

    // A single certain pick starves every later draw in a multi-sub swap.
    if count > 1 && weights.iter().filter(|w| **w >= 1.0).count() == 1 && ids.len() > 1 {
        let spread = 0.01 / (ids.len() - 1) as f64;
        for w in weights.iter_mut() {
            *w = if *w >= 1.0 { 0.99 } else { spread };
        }
    }
    weights
}

fn draw_without_replacement(
    rng: &mut StdRng,
    ids: &[PlayerId],
    weights: &[f64],
    count: usize,
) -> Vec<PlayerId> {
    let mut pool: Vec<(usize, f64)> = weights.iter().copied().enumerate().collect();
    let mut picked = Vec::with_capacity(count);
    for _ in 0..count {
        if pool.is_empty() {
            break;
        }
        let current: Vec<f64> = pool.iter().map(|(_, w)| *w).collect();
        let chosen = weighted_index(rng, &current);
        let (idx, _) = pool.remove(chosen);
        picked.push(ids[idx].clone());
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::players::PlayerRating;
    use rand::SeedableRng;

    fn history_with(avg_counts: &[(i64, &[i64])]) -> Vec<(i64, i64)> {
        let mut history = Vec::new();
        for (match_id, minutes) in avg_counts {
            for m in *minutes {
                history.push((*match_id, *m));
            }
        }
        history
    }

    #[test]
    fn three_subs_over_two_windows_split_two_one() {
        // Three subs per match historically, five still available.
        let history = history_with(&[
            (1, &[60, 75, 85]),
            (2, &[60, 75, 85]),
            (3, &[60, 75, 85]),
        ]);
        let plan = plan_sub_minutes(&history, 5, 0);
        assert_eq!(plan.len(), 2);
        let mut counts: Vec<u32> = plan.values().copied().collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![1, 2]);
        assert_eq!(plan.values().sum::<u32>(), 3);
    }

    #[test]
    fn burned_subs_reduce_the_effective_count() {
        let history = history_with(&[(1, &[60, 70, 80]), (2, &[60, 70, 80])]);
        // Three historical subs per match, one already burned pre-sim.
        let plan = plan_sub_minutes(&history, 4, 0);
        assert_eq!(plan.values().sum::<u32>(), 2);
        // All five burned: nothing left to schedule.
        assert!(plan_sub_minutes(&history, 0, 0).is_empty());
    }

    #[test]
    fn windows_respect_the_current_minute() {
        let history = history_with(&[(1, &[46, 60, 85]), (2, &[46, 60, 85])]);
        let plan = plan_sub_minutes(&history, 5, 70);
        assert!(plan.keys().all(|m| *m > 70));
    }

    #[test]
    fn swap_moves_players_between_lists() {
        let mut players = PlayerMap::new();
        for i in 0..14 {
            let id = format!("p{i}_{i}_T");
            let mut p = PlayerRating::new(id.clone(), 1);
            p.minutes_played = 900.0;
            p.in_status.add(GameStatus::Level);
            p.out_status.add(GameStatus::Level);
            players.insert(id, p);
        }
        let mut active: Vec<PlayerId> = (0..11).map(|i| format!("p{i}_{i}_T")).collect();
        let mut passive: Vec<PlayerId> = (11..14).map(|i| format!("p{i}_{i}_T")).collect();
        let mut rng = StdRng::seed_from_u64(11);

        swap_players(&mut rng, &mut active, &mut passive, &players, 2, GameStatus::Level);
        assert_eq!(active.len(), 11);
        assert_eq!(passive.len(), 1);
        // No duplicates after the swap.
        let mut sorted = active.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 11);
    }
}
