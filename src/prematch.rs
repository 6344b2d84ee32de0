//! Pre-match context assembly: elevation differentials, great-circle travel,
//! rest days and kickoff-window weather, plus the schedule-table upkeep that
//! carries those fields onto finished matches.

use anyhow::{Result, anyhow};
use chrono::{Days, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::{info, warn};

use crate::error::ForecastError;
use crate::players;
use crate::resolver::{HourlyWeather, WeatherProvider};
use crate::store::{ScheduleRow, Store};

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const DEFAULT_REST_DAYS: f64 = 30.0;

const BREAKDOWN_RETENTION_DAYS: u64 = 365;
const SCHEDULE_RETENTION_DAYS: u64 = 10;

/// Great-circle distance between two coordinates, in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Elevation differentials, both measured from the home venue: each side's
/// reference is the midpoint of the league average and that side's own
/// home ground.
pub fn elevation_difs(home_elev: f64, away_elev: f64, league_avg: f64) -> (f64, f64) {
    let home_reference = (league_avg + home_elev) / 2.0;
    let away_reference = (league_avg + away_elev) / 2.0;
    (home_elev - home_reference, home_elev - away_reference)
}

pub fn rest_days(last_game: Option<NaiveDate>, target: NaiveDate) -> f64 {
    match last_game {
        Some(last) => (target - last).num_days().max(0) as f64,
        None => DEFAULT_REST_DAYS,
    }
}

/// Average temperature and any-rain flag over the hourly samples whose
/// time-of-day falls within [kickoff − 1h, kickoff + 2h].
pub fn weather_window(weather: &HourlyWeather, kickoff: NaiveTime) -> Option<(f64, bool)> {
    let anchor = NaiveDate::from_ymd_opt(2000, 1, 1)?.and_time(kickoff);
    let start = (anchor - Duration::hours(1)).time();
    let end = (anchor + Duration::hours(2)).time();

    let mut temps = Vec::new();
    let mut raining = false;
    for (i, t) in weather.times.iter().enumerate() {
        let tod = t.time();
        if tod < start || tod > end {
            continue;
        }
        if let Some(temp) = weather.temperature_c.get(i) {
            temps.push(*temp);
        }
        if weather.precipitation_mm.get(i).copied().unwrap_or(0.0) > 0.0 {
            raining = true;
        }
    }
    if temps.is_empty() {
        return None;
    }
    Some((temps.iter().sum::<f64>() / temps.len() as f64, raining))
}

/// Assembles a schedule row for an upcoming fixture: elevation difs against
/// the league average, away travel, rest days from stored history, and the
/// kickoff-window weather at the home venue.
pub fn build_schedule_row(
    store: &Store,
    league_id: i64,
    home_name: &str,
    away_name: &str,
    kickoff: NaiveDateTime,
    referee_raw: &str,
    weather: &dyn WeatherProvider,
) -> Result<ScheduleRow> {
    let home = store
        .team_by_name(league_id, home_name)?
        .ok_or_else(|| anyhow!(ForecastError::DataShape(format!("unknown team '{home_name}'"))))?;
    let away = store
        .team_by_name(league_id, away_name)?
        .ok_or_else(|| anyhow!(ForecastError::DataShape(format!("unknown team '{away_name}'"))))?;

    let teams = store.teams_in_league(league_id)?;
    let league_avg = if teams.is_empty() {
        0.0
    } else {
        teams.iter().map(|t| t.elevation_m).sum::<f64>() / teams.len() as f64
    };
    let (home_elevation_dif, away_elevation_dif) =
        elevation_difs(home.elevation_m, away.elevation_m, league_avg);

    let away_travel = haversine_km(home.lat, home.lon, away.lat, away.lon).round();

    let date = kickoff.date();
    let home_rest_days = rest_days(store.last_match_date_before(home.team_id, date)?, date);
    let away_rest_days = rest_days(store.last_match_date_before(away.team_id, date)?, date);

    let (temperature_c, is_raining) = match weather.hourly(home.lat, home.lon, date) {
        Ok(hourly) => weather_window(&hourly, kickoff.time()).unwrap_or_else(|| {
            warn!("no weather samples in kickoff window for {home_name} vs {away_name}");
            (15.0, false)
        }),
        Err(err) => {
            warn!("weather lookup failed for {home_name} vs {away_name}: {err:#}");
            (15.0, false)
        }
    };

    // Raw referee names come straight from team sheets; match them against
    // the referees we already track.
    let referee_name = players::best_match(
        referee_raw,
        store.referee_names()?.iter().map(|s| s.as_str()),
        50,
    )
    .unwrap_or_else(|| referee_raw.to_string());

    Ok(ScheduleRow {
        schedule_id: 0,
        home_team_id: home.team_id,
        away_team_id: away.team_id,
        kickoff,
        league_id,
        referee_name,
        home_elevation_dif,
        away_elevation_dif,
        away_travel,
        home_rest_days,
        away_rest_days,
        temperature_c,
        is_raining,
        home_players: Vec::new(),
        away_players: Vec::new(),
    })
}

/// Moves context from stale schedule rows onto their finished matches and
/// deletes the covered schedule rows.
pub fn transfer_finished(store: &Store, today: NaiveDate) -> Result<()> {
    store.transfer_schedule_context(today)
}

/// Data retention for one league: year-old breakdown rows, ten-day-old
/// schedule and simulation rows.
pub fn prune_league(store: &mut Store, league_id: i64, today: NaiveDate) -> Result<()> {
    let breakdown_cutoff = today
        .checked_sub_days(Days::new(BREAKDOWN_RETENTION_DAYS))
        .unwrap_or(today);
    let schedule_cutoff = today
        .checked_sub_days(Days::new(SCHEDULE_RETENTION_DAYS))
        .unwrap_or(today);
    store.prune(league_id, breakdown_cutoff, schedule_cutoff)?;
    info!("pruned league {league_id} data before {breakdown_cutoff} / {schedule_cutoff}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_half_circumference() {
        let d = haversine_km(0.0, 0.0, 0.0, 180.0);
        assert!((d - 20015.0).abs() < 1.0, "d={d}");
    }

    #[test]
    fn haversine_identical_points_is_zero() {
        assert_eq!(haversine_km(45.0, 9.0, 45.0, 9.0), 0.0);
    }

    #[test]
    fn elevation_difs_reference_home_venue() {
        // Home at 1000m, away at 200m, league average 400m.
        let (home_dif, away_dif) = elevation_difs(1000.0, 200.0, 400.0);
        assert!((home_dif - 300.0).abs() < 1e-9);
        assert!((away_dif - 700.0).abs() < 1e-9);
    }

    #[test]
    fn rest_days_defaults_without_history() {
        let target = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert_eq!(rest_days(None, target), DEFAULT_REST_DAYS);
        let last = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        assert_eq!(rest_days(Some(last), target), 7.0);
    }

    #[test]
    fn weather_window_averages_and_flags_rain() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let weather = HourlyWeather {
            times: (0..24)
                .map(|h| day.and_hms_opt(h, 0, 0).unwrap())
                .collect(),
            temperature_c: (0..24).map(|h| h as f64).collect(),
            precipitation_mm: (0..24).map(|h| if h == 20 { 0.4 } else { 0.0 }).collect(),
        };
        let kickoff = NaiveTime::from_hms_opt(20, 0, 0).unwrap();
        // Window covers 19:00..=22:00.
        let (temp, rain) = weather_window(&weather, kickoff).unwrap();
        assert!((temp - 20.5).abs() < 1e-9);
        assert!(rain);

        let dry_kick = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let (_, rain) = weather_window(&weather, dry_kick).unwrap();
        assert!(!rain);
    }
}
