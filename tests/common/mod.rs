//! Shared fixtures: a two-team synthetic league with enough history to
//! train every model, plus raw-match builders.

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};

use pitchcast::extract;
use pitchcast::ingest::{
    RawEvent, RawEventKind, RawMatch, RawMiscLine, RawPlayer, Side, StaticIngestor,
};
use pitchcast::players;
use pitchcast::store::{LeagueRow, ScheduleRow, Store};

pub const LEAGUE_ID: i64 = 1;
pub const HOME_TEAM: &str = "Alpha FC";
pub const AWAY_TEAM: &str = "Beta United";

pub fn roster(prefix: &str) -> Vec<RawPlayer> {
    (0..14)
        .map(|i| RawPlayer {
            name: format!("{prefix}{i}"),
            shirt: format!("{}", i + 1),
        })
        .collect()
}

pub fn player_ids(prefix: &str, team_name: &str) -> Vec<String> {
    roster(prefix)
        .iter()
        .map(|p| players::player_id(&p.name, &p.shirt, team_name))
        .collect()
}

pub struct MatchBuilder {
    raw: RawMatch,
}

impl MatchBuilder {
    pub fn new(kickoff: NaiveDateTime) -> Self {
        Self {
            raw: RawMatch {
                home_team: HOME_TEAM.to_string(),
                away_team: AWAY_TEAM.to_string(),
                kickoff,
                referee: "R Kraken".to_string(),
                url: None,
                home_roster: roster("H"),
                away_roster: roster("A"),
                events: Vec::new(),
                shots: Vec::new(),
                home_misc: Vec::new(),
                away_misc: Vec::new(),
                first_half_added: 0,
                second_half_added: 0,
            },
        }
    }

    pub fn shot(mut self, minute: u32, side: Side, shooter_ix: usize, xg: f64, goal: bool) -> Self {
        let prefix = if side == Side::Home { "H" } else { "A" };
        self.raw.shots.push(pitchcast::ingest::RawShot {
            minute,
            side,
            shooter: format!("{prefix}{shooter_ix}"),
            xg,
            psxg: Some(xg * 1.1),
            goal,
            body_part: Some(if shooter_ix % 4 == 0 { "Head" } else { "Right Foot" }.to_string()),
            sca_player: if shooter_ix > 0 {
                Some(format!("{prefix}{}", shooter_ix - 1))
            } else {
                None
            },
            sca_is_pass: shooter_ix > 0,
        });
        if goal {
            self.raw.events.push(RawEvent {
                minute,
                side,
                kind: RawEventKind::Goal,
            });
        }
        self
    }

    pub fn sub(mut self, minute: u32, side: Side, out_ix: usize, in_ix: usize) -> Self {
        let prefix = if side == Side::Home { "H" } else { "A" };
        self.raw.events.push(RawEvent {
            minute,
            side,
            kind: RawEventKind::Substitution {
                player_out: format!("{prefix}{out_ix}"),
                player_in: format!("{prefix}{in_ix}"),
            },
        });
        self
    }

    pub fn red(mut self, minute: u32, side: Side, player_ix: usize) -> Self {
        let prefix = if side == Side::Home { "H" } else { "A" };
        self.raw.events.push(RawEvent {
            minute,
            side,
            kind: RawEventKind::RedCard {
                player: format!("{prefix}{player_ix}"),
            },
        });
        self
    }

    /// Uniform foul/card lines so referee and player discipline rates exist.
    pub fn with_discipline(mut self) -> Self {
        for (prefix, lines) in [("H", &mut self.raw.home_misc), ("A", &mut self.raw.away_misc)] {
            *lines = (0..14)
                .map(|i| RawMiscLine {
                    name: format!("{prefix}{i}"),
                    shirt: format!("{}", i + 1),
                    fouls_committed: 2,
                    fouls_drawn: 2,
                    yellow_cards: if i == 3 { 1 } else { 0 },
                    red_cards: if i == 5 { 1 } else { 0 },
                })
                .collect();
        }
        self
    }

    pub fn build(self) -> RawMatch {
        self.raw
    }
}

pub fn seed_league(store: &Store) {
    store
        .upsert_league(&LeagueRow {
            league_id: LEAGUE_ID,
            league_name: "Test League".to_string(),
            fixtures_url: String::new(),
            last_updated_date: None,
            is_active: true,
        })
        .unwrap();
    store
        .upsert_team(LEAGUE_ID, HOME_TEAM, 120.0, 40.0, -3.0, "")
        .unwrap();
    store
        .upsert_team(LEAGUE_ID, AWAY_TEAM, 40.0, 41.0, 2.0, "")
        .unwrap();
}

/// Ten one-sided matches: the home side shoots a lot and scores, the away
/// side shoots enough to keep its rates well above zero.
pub fn seed_history(store: &mut Store) {
    seed_league(store);
    let mut ingestor = StaticIngestor::default();
    for game in 0..10 {
        let kickoff = NaiveDate::from_ymd_opt(2026, 1, 5 + game)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        let mut builder = MatchBuilder::new(kickoff).with_discipline();
        // 30 home shots spread over the match, a third of them goals.
        for k in 0..30u32 {
            let minute = 2 + (k * 7) % 88;
            let shooter = (k as usize) % 10;
            builder = builder.shot(minute, Side::Home, shooter, 0.15, k % 3 == 0);
        }
        // 24 away shots, rarely converted.
        for k in 0..24u32 {
            let minute = 3 + (k * 9) % 85;
            let shooter = (k as usize) % 10;
            builder = builder.shot(minute, Side::Away, shooter, 0.08, k % 9 == 0);
        }
        ingestor.push(LEAGUE_ID, builder.build());
    }
    let upto = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
    extract::train_and_extract(store, &ingestor, upto).unwrap();
}

pub fn seed_schedule(store: &Store) -> i64 {
    let home = store.team_by_name(LEAGUE_ID, HOME_TEAM).unwrap().unwrap();
    let away = store.team_by_name(LEAGUE_ID, AWAY_TEAM).unwrap().unwrap();
    store
        .upsert_schedule(&ScheduleRow {
            schedule_id: 0,
            home_team_id: home.team_id,
            away_team_id: away.team_id,
            kickoff: NaiveDate::from_ymd_opt(2026, 2, 7)
                .unwrap()
                .and_hms_opt(20, 0, 0)
                .unwrap(),
            league_id: LEAGUE_ID,
            referee_name: "R Kraken".to_string(),
            home_elevation_dif: 20.0,
            away_elevation_dif: 60.0,
            away_travel: 150.0,
            home_rest_days: 6.0,
            away_rest_days: 4.0,
            temperature_c: 14.0,
            is_raining: false,
            home_players: player_ids("H", HOME_TEAM),
            away_players: player_ids("A", AWAY_TEAM),
        })
        .unwrap()
}
