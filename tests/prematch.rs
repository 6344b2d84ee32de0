mod common;

use chrono::{NaiveDate, NaiveTime};

use pitchcast::prematch::{self, haversine_km};
use pitchcast::resolver::{HourlyWeather, StubResolver};
use pitchcast::store::Store;

#[test]
fn haversine_matches_reference_distances() {
    // Antipodal along the equator: half the Earth's circumference.
    let half = haversine_km(0.0, 0.0, 0.0, 180.0);
    assert!((half - 20015.0).abs() < 1.0, "half={half}");
    assert_eq!(haversine_km(51.5, -0.1, 51.5, -0.1), 0.0);
    // Madrid to Barcelona, roughly 500 km.
    let d = haversine_km(40.4168, -3.7038, 41.3874, 2.1686);
    assert!((480.0..530.0).contains(&d), "d={d}");
}

#[test]
fn schedule_row_collects_context_fields() {
    let store = Store::open_in_memory().unwrap();
    common::seed_league(&store);

    let day = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
    let kickoff = day.and_time(NaiveTime::from_hms_opt(20, 0, 0).unwrap());
    let weather = HourlyWeather {
        times: (0..24).map(|h| day.and_hms_opt(h, 0, 0).unwrap()).collect(),
        temperature_c: (0..24).map(|h| 10.0 + h as f64 / 10.0).collect(),
        precipitation_mm: (0..24).map(|h| if h == 21 { 0.8 } else { 0.0 }).collect(),
    };
    let resolver = StubResolver {
        weather,
        ..Default::default()
    };

    let row = prematch::build_schedule_row(
        &store,
        common::LEAGUE_ID,
        common::HOME_TEAM,
        common::AWAY_TEAM,
        kickoff,
        "Kraken",
        &resolver,
    )
    .unwrap();

    // League average elevation is 80; home at 120, away at 40.
    assert!((row.home_elevation_dif - 20.0).abs() < 1e-9);
    assert!((row.away_elevation_dif - 60.0).abs() < 1e-9);

    let expected_travel = haversine_km(40.0, -3.0, 41.0, 2.0).round();
    assert_eq!(row.away_travel, expected_travel);

    // No recorded matches yet: both sides fall back to the default rest.
    assert_eq!(row.home_rest_days, 30.0);
    assert_eq!(row.away_rest_days, 30.0);

    // Window 19:00..=22:00 catches the 21:00 shower.
    assert!(row.is_raining);
    assert!((row.temperature_c - 12.05).abs() < 1e-9);
}

#[test]
fn unknown_team_is_a_shape_error() {
    let store = Store::open_in_memory().unwrap();
    common::seed_league(&store);
    let kickoff = NaiveDate::from_ymd_opt(2026, 3, 7)
        .unwrap()
        .and_hms_opt(18, 0, 0)
        .unwrap();
    let result = prematch::build_schedule_row(
        &store,
        common::LEAGUE_ID,
        "Gamma Town",
        common::AWAY_TEAM,
        kickoff,
        "",
        &StubResolver::default(),
    );
    assert!(result.is_err());
}
