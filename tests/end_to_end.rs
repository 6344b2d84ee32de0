mod common;

use pitchcast::sim::{self, SimulationParams};
use pitchcast::store::Store;

/// Ten one-sided results in training must show up as a one-sided forecast:
/// the dominant side's players rate higher and its simulated goal mean is
/// strictly larger.
#[test]
fn lopsided_history_forecasts_a_lopsided_fixture() {
    let mut store = Store::open_in_memory().unwrap();
    common::seed_history(&mut store);

    let players = store.players_all().unwrap();
    let home_ids = common::player_ids("H", common::HOME_TEAM);
    let away_ids = common::player_ids("A", common::AWAY_TEAM);
    let home_striker = players.get(&home_ids[2]).unwrap();
    let away_striker = players.get(&away_ids[2]).unwrap();
    assert!(home_striker.off_sh_coef > away_striker.off_sh_coef);

    let schedule_id = common::seed_schedule(&store);
    let run = sim::run_schedule(
        &mut store,
        SimulationParams {
            schedule_id,
            initial_minute: 45,
            home_goals: 0,
            away_goals: 0,
            home_subs_available: 5,
            away_subs_available: 5,
            seed: 99,
            workers: Some(2),
        },
    )
    .unwrap();

    assert_eq!(run.n_sims, 2_000);
    assert!(run.shot_rows > 0);
    assert!(
        run.mean_home_goals > run.mean_away_goals,
        "home {:.3} vs away {:.3}",
        run.mean_home_goals,
        run.mean_away_goals
    );

    // Persisted rows carry both squads and only fielded players.
    let rows = store.simulation_rows(schedule_id).unwrap();
    let home = store
        .team_by_name(common::LEAGUE_ID, common::HOME_TEAM)
        .unwrap()
        .unwrap();
    let sheet: Vec<String> = home_ids.iter().chain(&away_ids).cloned().collect();
    assert!(rows.iter().any(|r| r.team_id == home.team_id));
    assert!(rows.iter().all(|r| sheet.contains(&r.shooter)));
}
