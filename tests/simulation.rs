mod common;

use std::collections::HashMap;

use pitchcast::discipline::Card;
use pitchcast::sim::{self, SimulationParams};
use pitchcast::store::Store;

fn params(schedule_id: i64, minute: u32, seed: u64) -> SimulationParams {
    SimulationParams {
        schedule_id,
        initial_minute: minute,
        home_goals: 0,
        away_goals: 0,
        home_subs_available: 5,
        away_subs_available: 5,
        seed,
        workers: Some(2),
    }
}

#[test]
fn sim_count_follows_the_starting_minute_ladder() {
    assert_eq!(sim::n_sims_for(0), 20_000);
    assert_eq!(sim::n_sims_for(30), 8_000);
    assert_eq!(sim::n_sims_for(45), 2_000);
    assert_eq!(sim::n_sims_for(60), 2_000);

    let mut store = Store::open_in_memory().unwrap();
    common::seed_history(&mut store);
    let schedule_id = common::seed_schedule(&store);

    let run = sim::run_schedule(&mut store, params(schedule_id, 60, 9)).unwrap();
    assert_eq!(run.n_sims, 2_000);
    assert_eq!(store.simulation_sim_count(schedule_id).unwrap(), 2_000);

    let run = sim::run_schedule(&mut store, params(schedule_id, 30, 9)).unwrap();
    assert_eq!(run.n_sims, 8_000);
    // The rerun replaced the previous output wholesale.
    assert_eq!(store.simulation_sim_count(schedule_id).unwrap(), 8_000);
}

#[test]
fn fixed_seed_replays_identically() {
    let mut store = Store::open_in_memory().unwrap();
    common::seed_history(&mut store);
    let schedule_id = common::seed_schedule(&store);

    let first = sim::run_schedule(&mut store, params(schedule_id, 60, 1234)).unwrap();
    let first_rows = store.simulation_rows(schedule_id).unwrap();

    let second = sim::run_schedule(&mut store, params(schedule_id, 60, 1234)).unwrap();
    let second_rows = store.simulation_rows(schedule_id).unwrap();

    assert_eq!(first_rows, second_rows);
    assert_eq!(first.card_rows, second.card_rows);
    assert!(!first_rows.is_empty());

    // A different seed diverges.
    sim::run_schedule(&mut store, params(schedule_id, 60, 4321)).unwrap();
    let other_rows = store.simulation_rows(schedule_id).unwrap();
    assert_ne!(first_rows, other_rows);
}

#[test]
fn dismissed_players_vanish_from_later_events() {
    let mut store = Store::open_in_memory().unwrap();
    common::seed_history(&mut store);
    let schedule_id = common::seed_schedule(&store);

    let run = sim::run_schedule(&mut store, params(schedule_id, 45, 7)).unwrap();
    let shot_rows = store.simulation_rows(schedule_id).unwrap();

    // Dismissal minute per (sim, player): a straight red or a second yellow.
    let mut dismissed: HashMap<(i64, String), i64> = HashMap::new();
    let mut yellows: HashMap<(i64, String), (u32, i64)> = HashMap::new();
    for card in &run.card_rows {
        let key = (card.sim_id, card.player_id.clone());
        match card.card {
            Card::Red => {
                dismissed.entry(key).or_insert(card.minute);
            }
            Card::Yellow => {
                let entry = yellows.entry(key.clone()).or_insert((0, 0));
                entry.0 += 1;
                entry.1 = card.minute;
                if entry.0 >= 2 {
                    dismissed.entry(key).or_insert(entry.1);
                }
            }
        }
    }
    assert!(
        !dismissed.is_empty(),
        "expected at least one dismissal across {} sims",
        run.n_sims
    );

    for ((sim_id, player), minute) in &dismissed {
        for shot in shot_rows.iter().filter(|s| s.sim_id == *sim_id) {
            if shot.minute > *minute {
                assert_ne!(&shot.shooter, player, "shot after dismissal at {minute}");
                assert_ne!(shot.assister.as_ref(), Some(player), "assist after dismissal");
            }
        }
        for card in run.card_rows.iter().filter(|c| c.sim_id == *sim_id) {
            assert!(
                card.minute <= *minute || &card.player_id != player,
                "card after dismissal at {minute}"
            );
        }
    }
}
