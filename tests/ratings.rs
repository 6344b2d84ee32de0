mod common;

use pitchcast::store::Store;

#[test]
fn dominant_side_earns_higher_offensive_coefficients() {
    let mut store = Store::open_in_memory().unwrap();
    common::seed_history(&mut store);

    let players = store.players_all().unwrap();
    let home_ids = common::player_ids("H", common::HOME_TEAM);
    let away_ids = common::player_ids("A", common::AWAY_TEAM);

    // Every fielded player got rated.
    let home_striker = players.get(&home_ids[1]).expect("home player rated");
    let away_striker = players.get(&away_ids[1]).expect("away player rated");

    assert!(
        home_striker.off_sh_coef > away_striker.off_sh_coef,
        "home {} vs away {}",
        home_striker.off_sh_coef,
        away_striker.off_sh_coef
    );

    // The aggregate equals the per-body-part sum.
    for p in players.values() {
        assert!(
            (p.off_sh_coef - (p.off_headers_coef + p.off_footers_coef)).abs() < 1e-12,
            "aggregate mismatch for {}",
            p.player_id
        );
        assert!(
            (p.def_sh_coef - (p.def_headers_coef + p.def_footers_coef)).abs() < 1e-12
        );
    }

    // Team-level rates: the home eleven out-rate the away eleven.
    let sum_off = |ids: &[String]| -> f64 {
        ids.iter()
            .take(11)
            .filter_map(|id| players.get(id))
            .map(|p| p.off_sh_coef)
            .sum()
    };
    assert!(sum_off(&home_ids) > sum_off(&away_ids));
}

#[test]
fn totals_accumulate_across_matches() {
    let mut store = Store::open_in_memory().unwrap();
    common::seed_history(&mut store);

    let players = store.players_all().unwrap();
    let home_ids = common::player_ids("H", common::HOME_TEAM);

    // Ten matches, starters played the full ninety in each.
    let starter = players.get(&home_ids[1]).unwrap();
    assert_eq!(starter.minutes_played, 900.0);
    assert!(starter.footers > 0);
    assert!(starter.fouls_committed >= 20);

    // The sheet's first name keeps goal-keeping totals.
    let keeper = players.get(&home_ids[0]).unwrap();
    assert!(keeper.gk_psxg > 0.0);
    assert!(keeper.keeper_ability() <= 1.0);
}

#[test]
fn referee_totals_come_from_match_aggregates() {
    let mut store = Store::open_in_memory().unwrap();
    common::seed_history(&mut store);

    let referee = store.referee_stats("R Kraken").unwrap().expect("referee tracked");
    assert_eq!(referee.matches_played, 10);
    // 28 players x 2 fouls per match.
    assert!((referee.fouls / referee.matches_played as f64 - 56.0).abs() < 1e-9);
    assert!(referee.yellow_cards > 0.0);
    assert!(referee.red_cards > 0.0);
}
