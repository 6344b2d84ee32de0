mod common;

use chrono::NaiveDate;

use common::MatchBuilder;
use pitchcast::extract;
use pitchcast::ingest::{Side, StaticIngestor};
use pitchcast::store::Store;

fn extract_one(builder: MatchBuilder) -> (Store, Vec<pitchcast::store::SegmentRow>) {
    let mut store = Store::open_in_memory().unwrap();
    common::seed_league(&store);
    let mut ingestor = StaticIngestor::default();
    ingestor.push(common::LEAGUE_ID, builder.build());
    let upto = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
    extract::extract_matches(&mut store, &ingestor, upto).unwrap();
    let segments = store.segments_for_league(common::LEAGUE_ID).unwrap();
    (store, segments)
}

fn kickoff() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 1, 10)
        .unwrap()
        .and_hms_opt(16, 0, 0)
        .unwrap()
}

#[test]
fn boundaries_are_standard_minutes_plus_event_minutes() {
    // Goals walk the diff 0→3→−2, one substitution at 65.
    let mut builder = MatchBuilder::new(kickoff());
    for (minute, side) in [
        (10, Side::Home),
        (20, Side::Home),
        (28, Side::Home),
        (40, Side::Away),
        (50, Side::Away),
        (58, Side::Away),
        (70, Side::Away),
        (80, Side::Away),
    ] {
        builder = builder.shot(minute, side, 1, 0.4, true);
    }
    builder = builder.sub(65, Side::Home, 2, 11);
    let (_store, segments) = extract_one(builder);

    let mut boundaries = vec![0i64];
    let mut cursor = 0i64;
    for seg in &segments {
        assert!(seg.minutes_played > 0, "empty segment window");
        cursor += seg.minutes_played;
        boundaries.push(cursor);
    }
    assert_eq!(
        boundaries,
        vec![0, 10, 15, 20, 28, 30, 40, 45, 50, 58, 60, 65, 70, 75, 80, 90]
    );

    // Contiguity: every boundary is the next segment's start by construction,
    // so the walk above must land exactly on full time.
    assert_eq!(cursor, 90);
}

#[test]
fn match_state_tracks_the_goal_difference_walk() {
    let mut builder = MatchBuilder::new(kickoff());
    for (minute, side) in [
        (10, Side::Home),
        (20, Side::Home),
        (28, Side::Home),
        (40, Side::Away),
        (50, Side::Away),
        (58, Side::Away),
        (70, Side::Away),
        (80, Side::Away),
    ] {
        builder = builder.shot(minute, side, 1, 0.4, true);
    }
    let (_store, segments) = extract_one(builder);

    // Goal diffs at the window ends walk 1,1,2,3,3,2,2,1,0,0,-1,-1,-2,-2.
    let expected = [
        1.0, 1.0, 1.5, 1.5, 1.5, 1.5, 1.5, 1.0, 0.0, 0.0, -1.0, -1.0, -1.5, -1.5,
    ];
    // Window ends: 10,15,20,28,30,40,45,50,58,60,70,75,80,90.
    let states: Vec<f64> = segments.iter().map(|s| s.match_state).collect();
    let ends: Vec<i64> = segments
        .iter()
        .scan(0i64, |acc, s| {
            *acc += s.minutes_played;
            Some(*acc)
        })
        .collect();
    assert_eq!(ends.len(), expected.len());
    for ((end, state), want) in ends.iter().zip(&states).zip(&expected) {
        assert_eq!(state, want, "state at window end {end}");
    }
}

#[test]
fn substitutions_and_reds_shape_segment_lineups() {
    let builder = MatchBuilder::new(kickoff())
        .shot(30, Side::Home, 1, 0.3, false)
        .sub(60, Side::Home, 2, 11)
        .red(75, Side::Away, 4);
    let (_store, segments) = extract_one(builder);

    let ids_home = common::player_ids("H", common::HOME_TEAM);
    let ids_away = common::player_ids("A", common::AWAY_TEAM);

    for seg in &segments {
        let start: i64 = segments
            .iter()
            .take_while(|s| s.detail_id < seg.detail_id)
            .map(|s| s.minutes_played)
            .sum();
        if start < 60 {
            assert!(seg.team_a_players.contains(&ids_home[2]), "start={start}");
            assert_eq!(seg.team_a_players.len(), 11);
        } else {
            assert!(!seg.team_a_players.contains(&ids_home[2]), "start={start}");
            assert!(seg.team_a_players.contains(&ids_home[11]), "start={start}");
        }
        if start < 75 {
            assert_eq!(seg.team_b_players.len(), 11);
        } else {
            assert_eq!(seg.team_b_players.len(), 10, "start={start}");
            assert!(!seg.team_b_players.contains(&ids_away[4]));
        }
    }

    // Red-card advantage from the home perspective after minute 75.
    let last = segments.last().unwrap();
    assert_eq!(last.player_dif, 1.0);
}
