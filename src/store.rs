//! SQLite-backed store. All persistence goes through this type: the training
//! pipeline and the simulation driver receive a `Store` (tests substitute an
//! in-memory one), never a global connection.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension, params};

use crate::players::{PlayerId, PlayerMap, PlayerRating, RefereeStats, StatusCounts};

const SIM_INSERT_CHUNK: usize = 200;

const DATE_FMT: &str = "%Y-%m-%d";
const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub struct Store {
    conn: Connection,
}

#[derive(Debug, Clone)]
pub struct LeagueRow {
    pub league_id: i64,
    pub league_name: String,
    pub fixtures_url: String,
    pub last_updated_date: Option<NaiveDate>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct TeamRow {
    pub team_id: i64,
    pub team_name: String,
    pub elevation_m: f64,
    pub lat: f64,
    pub lon: f64,
    pub fixtures_url: String,
    pub league_id: i64,
}

#[derive(Debug, Clone)]
pub struct MatchInfoRow {
    pub match_id: i64,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub kickoff: NaiveDateTime,
    pub league_id: i64,
    pub referee_name: String,
    pub url: Option<String>,
    pub home_elevation_dif: Option<f64>,
    pub away_elevation_dif: Option<f64>,
    pub away_travel: Option<f64>,
    pub home_rest_days: Option<f64>,
    pub away_rest_days: Option<f64>,
    pub temperature_c: Option<f64>,
    pub is_raining: Option<bool>,
    pub total_fouls: i64,
    pub yellow_cards: i64,
    pub red_cards: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SegmentRow {
    pub detail_id: i64,
    pub match_id: i64,
    pub team_a_players: Vec<PlayerId>,
    pub team_b_players: Vec<PlayerId>,
    pub team_a_headers: i64,
    pub team_a_footers: i64,
    pub team_a_hxg: f64,
    pub team_a_fxg: f64,
    pub team_b_headers: i64,
    pub team_b_footers: i64,
    pub team_b_hxg: f64,
    pub team_b_fxg: f64,
    pub minutes_played: i64,
    pub match_state: f64,
    pub match_segment: i64,
    pub player_dif: f64,
    pub team_a_pdras: Option<f64>,
    pub team_b_pdras: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct BreakdownRow {
    pub match_id: i64,
    pub player_id: PlayerId,
    pub headers: i64,
    pub footers: i64,
    pub key_passes: i64,
    pub non_assisted_footers: i64,
    pub hxg: f64,
    pub fxg: f64,
    pub kp_hxg: f64,
    pub kp_fxg: f64,
    pub hpsxg: f64,
    pub fpsxg: f64,
    pub gk_psxg: f64,
    pub gk_ga: i64,
    pub sub_in: Option<i64>,
    pub sub_out: Option<i64>,
    pub in_status: Option<String>,
    pub out_status: Option<String>,
    pub fouls_committed: i64,
    pub fouls_drawn: i64,
    pub yellow_cards: i64,
    pub red_cards: i64,
    pub minutes_played: i64,
}

#[derive(Debug, Clone)]
pub struct ShotRow {
    pub shot_id: i64,
    pub match_id: i64,
    pub xg: f64,
    pub psxg: f64,
    pub outcome: bool,
    pub shooter_id: PlayerId,
    pub assister_id: Option<PlayerId>,
    pub team_id: i64,
    pub gk_id: PlayerId,
    pub off_players: Vec<PlayerId>,
    pub def_players: Vec<PlayerId>,
    pub match_state: f64,
    pub player_dif: f64,
    pub shot_type: String,
    pub total_plsqa: Option<f64>,
    pub shooter_sq: Option<f64>,
    pub assister_sq: Option<f64>,
    pub rsq: Option<f64>,
    pub shooter_a: Option<f64>,
    pub gk_a: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ScheduleRow {
    pub schedule_id: i64,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub kickoff: NaiveDateTime,
    pub league_id: i64,
    pub referee_name: String,
    pub home_elevation_dif: f64,
    pub away_elevation_dif: f64,
    pub away_travel: f64,
    pub home_rest_days: f64,
    pub away_rest_days: f64,
    pub temperature_c: f64,
    pub is_raining: bool,
    pub home_players: Vec<PlayerId>,
    pub away_players: Vec<PlayerId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimShotRow {
    pub sim_id: i64,
    pub minute: i64,
    pub shooter: PlayerId,
    pub team_id: i64,
    pub outcome: bool,
    pub body_part: String,
    pub assister: Option<PlayerId>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite db {}", path.display()))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS league_data (
                league_id INTEGER PRIMARY KEY,
                league_name TEXT NOT NULL,
                fbref_fixtures_url TEXT NOT NULL DEFAULT '',
                last_updated_date TEXT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS team_data (
                team_id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_name TEXT NOT NULL,
                team_elevation REAL NOT NULL DEFAULT 0,
                team_coordinates TEXT NOT NULL DEFAULT '0,0',
                team_fixtures_url TEXT NOT NULL DEFAULT '',
                league_id INTEGER NOT NULL,
                UNIQUE(league_id, team_name)
            );
            CREATE TABLE IF NOT EXISTS match_info (
                match_id INTEGER PRIMARY KEY AUTOINCREMENT,
                home_team_id INTEGER NOT NULL,
                away_team_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                league_id INTEGER NOT NULL,
                referee_name TEXT NOT NULL DEFAULT '',
                url TEXT NULL,
                home_elevation_dif REAL NULL,
                away_elevation_dif REAL NULL,
                away_travel REAL NULL,
                home_rest_days REAL NULL,
                away_rest_days REAL NULL,
                temperature_c REAL NULL,
                is_raining INTEGER NULL,
                total_fouls INTEGER NOT NULL DEFAULT 0,
                yellow_cards INTEGER NOT NULL DEFAULT 0,
                red_cards INTEGER NOT NULL DEFAULT 0,
                UNIQUE(home_team_id, away_team_id, date, league_id)
            );
            CREATE TABLE IF NOT EXISTS match_detail (
                detail_id INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id INTEGER NOT NULL REFERENCES match_info(match_id),
                teamA_players TEXT NOT NULL,
                teamB_players TEXT NOT NULL,
                teamA_headers INTEGER NOT NULL DEFAULT 0,
                teamA_footers INTEGER NOT NULL DEFAULT 0,
                teamA_hxg REAL NOT NULL DEFAULT 0,
                teamA_fxg REAL NOT NULL DEFAULT 0,
                teamB_headers INTEGER NOT NULL DEFAULT 0,
                teamB_footers INTEGER NOT NULL DEFAULT 0,
                teamB_hxg REAL NOT NULL DEFAULT 0,
                teamB_fxg REAL NOT NULL DEFAULT 0,
                minutes_played INTEGER NOT NULL,
                match_state REAL NOT NULL,
                match_segment INTEGER NOT NULL,
                player_dif REAL NOT NULL,
                teamA_pdras REAL NULL,
                teamB_pdras REAL NULL
            );
            CREATE INDEX IF NOT EXISTS idx_detail_match ON match_detail(match_id);
            CREATE TABLE IF NOT EXISTS match_breakdown (
                match_id INTEGER NOT NULL REFERENCES match_info(match_id),
                player_id TEXT NOT NULL,
                headers INTEGER NOT NULL DEFAULT 0,
                footers INTEGER NOT NULL DEFAULT 0,
                key_passes INTEGER NOT NULL DEFAULT 0,
                non_assisted_footers INTEGER NOT NULL DEFAULT 0,
                hxg REAL NOT NULL DEFAULT 0,
                fxg REAL NOT NULL DEFAULT 0,
                kp_hxg REAL NOT NULL DEFAULT 0,
                kp_fxg REAL NOT NULL DEFAULT 0,
                hpsxg REAL NOT NULL DEFAULT 0,
                fpsxg REAL NOT NULL DEFAULT 0,
                gk_psxg REAL NOT NULL DEFAULT 0,
                gk_ga INTEGER NOT NULL DEFAULT 0,
                sub_in INTEGER NULL,
                sub_out INTEGER NULL,
                in_status TEXT NULL,
                out_status TEXT NULL,
                fouls_committed INTEGER NOT NULL DEFAULT 0,
                fouls_drawn INTEGER NOT NULL DEFAULT 0,
                yellow_cards INTEGER NOT NULL DEFAULT 0,
                red_cards INTEGER NOT NULL DEFAULT 0,
                minutes_played INTEGER NOT NULL DEFAULT 0,
                UNIQUE(match_id, player_id)
            );
            CREATE TABLE IF NOT EXISTS shots_data (
                shot_id INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id INTEGER NOT NULL REFERENCES match_info(match_id),
                xg REAL NOT NULL DEFAULT 0,
                psxg REAL NOT NULL DEFAULT 0,
                outcome INTEGER NOT NULL DEFAULT 0,
                shooter_id TEXT NOT NULL,
                assister_id TEXT NULL,
                team_id INTEGER NOT NULL,
                GK_id TEXT NOT NULL,
                off_players TEXT NOT NULL,
                def_players TEXT NOT NULL,
                match_state REAL NOT NULL,
                player_dif REAL NOT NULL,
                shot_type TEXT NOT NULL,
                total_PLSQA REAL NULL,
                shooter_SQ REAL NULL,
                assister_SQ REAL NULL,
                RSQ REAL NULL,
                shooter_A REAL NULL,
                GK_A REAL NULL
            );
            CREATE INDEX IF NOT EXISTS idx_shots_match ON shots_data(match_id);
            CREATE TABLE IF NOT EXISTS players_data (
                player_id TEXT PRIMARY KEY,
                current_team INTEGER NOT NULL,
                minutes_played REAL NOT NULL DEFAULT 0,
                headers INTEGER NOT NULL DEFAULT 0,
                footers INTEGER NOT NULL DEFAULT 0,
                key_passes INTEGER NOT NULL DEFAULT 0,
                non_assisted_footers INTEGER NOT NULL DEFAULT 0,
                hxg REAL NOT NULL DEFAULT 0,
                fxg REAL NOT NULL DEFAULT 0,
                kp_hxg REAL NOT NULL DEFAULT 0,
                kp_fxg REAL NOT NULL DEFAULT 0,
                hpsxg REAL NOT NULL DEFAULT 0,
                fpsxg REAL NOT NULL DEFAULT 0,
                gk_psxg REAL NOT NULL DEFAULT 0,
                gk_ga INTEGER NOT NULL DEFAULT 0,
                fouls_committed INTEGER NOT NULL DEFAULT 0,
                fouls_drawn INTEGER NOT NULL DEFAULT 0,
                yellow_cards INTEGER NOT NULL DEFAULT 0,
                red_cards INTEGER NOT NULL DEFAULT 0,
                off_sh_coef REAL NOT NULL DEFAULT 0,
                def_sh_coef REAL NOT NULL DEFAULT 0,
                off_headers_coef REAL NOT NULL DEFAULT 0,
                def_headers_coef REAL NOT NULL DEFAULT 0,
                off_footers_coef REAL NOT NULL DEFAULT 0,
                def_footers_coef REAL NOT NULL DEFAULT 0,
                off_hxg_coef REAL NOT NULL DEFAULT 0,
                def_hxg_coef REAL NOT NULL DEFAULT 0,
                off_fxg_coef REAL NOT NULL DEFAULT 0,
                def_fxg_coef REAL NOT NULL DEFAULT 0,
                in_status TEXT NOT NULL DEFAULT '{}',
                out_status TEXT NOT NULL DEFAULT '{}',
                sub_in TEXT NOT NULL DEFAULT '[]',
                sub_out TEXT NOT NULL DEFAULT '[]'
            );
            CREATE TABLE IF NOT EXISTS referee_data (
                referee_name TEXT PRIMARY KEY,
                fouls REAL NOT NULL DEFAULT 0,
                yellow_cards REAL NOT NULL DEFAULT 0,
                red_cards REAL NOT NULL DEFAULT 0,
                matches_played INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS schedule_data (
                schedule_id INTEGER PRIMARY KEY AUTOINCREMENT,
                home_team_id INTEGER NOT NULL,
                away_team_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                league_id INTEGER NOT NULL,
                referee_name TEXT NOT NULL DEFAULT '',
                home_elevation_dif REAL NOT NULL DEFAULT 0,
                away_elevation_dif REAL NOT NULL DEFAULT 0,
                away_travel REAL NOT NULL DEFAULT 0,
                home_rest_days REAL NOT NULL DEFAULT 30,
                away_rest_days REAL NOT NULL DEFAULT 30,
                temperature REAL NOT NULL DEFAULT 15,
                is_raining INTEGER NOT NULL DEFAULT 0,
                home_players TEXT NOT NULL DEFAULT '[]',
                away_players TEXT NOT NULL DEFAULT '[]',
                UNIQUE(home_team_id, away_team_id, date, league_id)
            );
            CREATE TABLE IF NOT EXISTS simulation_data (
                sim_id INTEGER NOT NULL,
                schedule_id INTEGER NOT NULL,
                minute INTEGER NOT NULL,
                shooter TEXT NOT NULL,
                squad INTEGER NOT NULL,
                outcome INTEGER NOT NULL,
                body_part TEXT NOT NULL,
                assister TEXT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sim_schedule ON simulation_data(schedule_id);
            "#,
            )
            .context("create sqlite schema")?;
        Ok(())
    }

    // ---- leagues & teams ----

    pub fn upsert_league(&self, league: &LeagueRow) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO league_data (league_id, league_name, fbref_fixtures_url, last_updated_date, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(league_id) DO UPDATE SET
                    league_name = excluded.league_name,
                    fbref_fixtures_url = excluded.fbref_fixtures_url,
                    is_active = excluded.is_active",
                params![
                    league.league_id,
                    league.league_name,
                    league.fixtures_url,
                    league.last_updated_date.map(|d| d.format(DATE_FMT).to_string()),
                    league.is_active as i64,
                ],
            )
            .context("upsert league")?;
        Ok(())
    }

    /// Creates a league row if none exists yet; never overwrites one.
    pub fn ensure_league(&self, league_id: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO league_data (league_id, league_name) VALUES (?1, ?2)",
                params![league_id, format!("league {league_id}")],
            )
            .context("ensure league")?;
        Ok(())
    }

    pub fn active_leagues(&self) -> Result<Vec<LeagueRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT league_id, league_name, fbref_fixtures_url, last_updated_date, is_active
                 FROM league_data WHERE is_active = 1 ORDER BY league_id",
            )
            .context("prepare active leagues query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LeagueRow {
                    league_id: row.get(0)?,
                    league_name: row.get(1)?,
                    fixtures_url: row.get(2)?,
                    last_updated_date: row
                        .get::<_, Option<String>>(3)?
                        .and_then(|s| NaiveDate::parse_from_str(&s, DATE_FMT).ok()),
                    is_active: row.get::<_, i64>(4)? != 0,
                })
            })
            .context("query active leagues")?;
        collect_rows(rows)
    }

    pub fn set_league_updated(&self, league_id: i64, date: NaiveDate) -> Result<()> {
        self.conn
            .execute(
                "UPDATE league_data SET last_updated_date = ?1 WHERE league_id = ?2",
                params![date.format(DATE_FMT).to_string(), league_id],
            )
            .context("update league last_updated_date")?;
        Ok(())
    }

    pub fn upsert_team(
        &self,
        league_id: i64,
        team_name: &str,
        elevation_m: f64,
        lat: f64,
        lon: f64,
        fixtures_url: &str,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO team_data (team_name, team_elevation, team_coordinates, team_fixtures_url, league_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(league_id, team_name) DO UPDATE SET
                    team_elevation = excluded.team_elevation,
                    team_coordinates = excluded.team_coordinates,
                    team_fixtures_url = excluded.team_fixtures_url",
                params![
                    team_name,
                    elevation_m,
                    format!("{lat},{lon}"),
                    fixtures_url,
                    league_id
                ],
            )
            .context("upsert team")?;
        let id = self
            .conn
            .query_row(
                "SELECT team_id FROM team_data WHERE league_id = ?1 AND team_name = ?2",
                params![league_id, team_name],
                |row| row.get(0),
            )
            .context("read back team id")?;
        Ok(id)
    }

    pub fn team_by_name(&self, league_id: i64, team_name: &str) -> Result<Option<TeamRow>> {
        self.conn
            .query_row(
                "SELECT team_id, team_name, team_elevation, team_coordinates, team_fixtures_url, league_id
                 FROM team_data WHERE league_id = ?1 AND team_name = ?2",
                params![league_id, team_name],
                decode_team,
            )
            .optional()
            .context("query team by name")
    }

    pub fn team_by_id(&self, team_id: i64) -> Result<Option<TeamRow>> {
        self.conn
            .query_row(
                "SELECT team_id, team_name, team_elevation, team_coordinates, team_fixtures_url, league_id
                 FROM team_data WHERE team_id = ?1",
                params![team_id],
                decode_team,
            )
            .optional()
            .context("query team by id")
    }

    pub fn teams_in_league(&self, league_id: i64) -> Result<Vec<TeamRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT team_id, team_name, team_elevation, team_coordinates, team_fixtures_url, league_id
                 FROM team_data WHERE league_id = ?1 ORDER BY team_id",
            )
            .context("prepare teams query")?;
        let rows = stmt
            .query_map(params![league_id], decode_team)
            .context("query teams in league")?;
        collect_rows(rows)
    }

    // ---- extraction writes ----

    /// Persists one extracted match (info + segments + breakdown + shots) in
    /// a single transaction. Returns None when the match was already stored.
    pub fn record_match(
        &mut self,
        info: &MatchInfoRow,
        segments: &[SegmentRow],
        breakdowns: &[BreakdownRow],
        shots: &[ShotRow],
    ) -> Result<Option<i64>> {
        let tx = self.conn.transaction().context("begin match transaction")?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO match_info
                    (home_team_id, away_team_id, date, league_id, referee_name, url,
                     home_elevation_dif, away_elevation_dif, away_travel,
                     home_rest_days, away_rest_days, temperature_c, is_raining)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    info.home_team_id,
                    info.away_team_id,
                    info.kickoff.format(DATETIME_FMT).to_string(),
                    info.league_id,
                    info.referee_name,
                    info.url,
                    info.home_elevation_dif,
                    info.away_elevation_dif,
                    info.away_travel,
                    info.home_rest_days,
                    info.away_rest_days,
                    info.temperature_c,
                    info.is_raining.map(|b| b as i64),
                ],
            )
            .context("insert match_info")?;
        if inserted == 0 {
            return Ok(None);
        }
        let match_id = tx.last_insert_rowid();

        for seg in segments {
            tx.execute(
                "INSERT INTO match_detail
                    (match_id, teamA_players, teamB_players,
                     teamA_headers, teamA_footers, teamA_hxg, teamA_fxg,
                     teamB_headers, teamB_footers, teamB_hxg, teamB_fxg,
                     minutes_played, match_state, match_segment, player_dif)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    match_id,
                    serde_json::to_string(&seg.team_a_players)?,
                    serde_json::to_string(&seg.team_b_players)?,
                    seg.team_a_headers,
                    seg.team_a_footers,
                    seg.team_a_hxg,
                    seg.team_a_fxg,
                    seg.team_b_headers,
                    seg.team_b_footers,
                    seg.team_b_hxg,
                    seg.team_b_fxg,
                    seg.minutes_played,
                    seg.match_state,
                    seg.match_segment,
                    seg.player_dif,
                ],
            )
            .context("insert match_detail")?;
        }

        for b in breakdowns {
            tx.execute(
                "INSERT OR IGNORE INTO match_breakdown
                    (match_id, player_id, headers, footers, key_passes, non_assisted_footers,
                     hxg, fxg, kp_hxg, kp_fxg, hpsxg, fpsxg, gk_psxg, gk_ga,
                     sub_in, sub_out, in_status, out_status,
                     fouls_committed, fouls_drawn, yellow_cards, red_cards, minutes_played)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
                params![
                    match_id,
                    b.player_id,
                    b.headers,
                    b.footers,
                    b.key_passes,
                    b.non_assisted_footers,
                    b.hxg,
                    b.fxg,
                    b.kp_hxg,
                    b.kp_fxg,
                    b.hpsxg,
                    b.fpsxg,
                    b.gk_psxg,
                    b.gk_ga,
                    b.sub_in,
                    b.sub_out,
                    b.in_status,
                    b.out_status,
                    b.fouls_committed,
                    b.fouls_drawn,
                    b.yellow_cards,
                    b.red_cards,
                    b.minutes_played,
                ],
            )
            .context("insert match_breakdown")?;
        }

        for s in shots {
            tx.execute(
                "INSERT INTO shots_data
                    (match_id, xg, psxg, outcome, shooter_id, assister_id, team_id, GK_id,
                     off_players, def_players, match_state, player_dif, shot_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    match_id,
                    s.xg,
                    s.psxg,
                    s.outcome as i64,
                    s.shooter_id,
                    s.assister_id,
                    s.team_id,
                    s.gk_id,
                    serde_json::to_string(&s.off_players)?,
                    serde_json::to_string(&s.def_players)?,
                    s.match_state,
                    s.player_dif,
                    s.shot_type,
                ],
            )
            .context("insert shots_data")?;
        }

        tx.commit().context("commit match transaction")?;
        Ok(Some(match_id))
    }

    pub fn match_rows(&self) -> Result<Vec<MatchInfoRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {MATCH_INFO_COLS} FROM match_info ORDER BY match_id"))
            .context("prepare match rows query")?;
        let rows = stmt
            .query_map([], decode_match_info)
            .context("query match rows")?;
        collect_rows(rows)
    }

    pub fn match_ids_for_league(&self, league_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT match_id FROM match_info WHERE league_id = ?1 ORDER BY match_id")
            .context("prepare league match ids query")?;
        let rows = stmt
            .query_map(params![league_id], |row| row.get(0))
            .context("query league match ids")?;
        collect_rows(rows)
    }

    // ---- segments ----

    pub fn segments_for_league(&self, league_id: i64) -> Result<Vec<SegmentRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SEGMENT_COLS}
                 FROM match_detail md
                 JOIN match_info mi ON mi.match_id = md.match_id
                 WHERE mi.league_id = ?1
                 ORDER BY md.detail_id"
            ))
            .context("prepare league segments query")?;
        let rows = stmt
            .query_map(params![league_id], decode_segment)
            .context("query league segments")?;
        collect_rows(rows)
    }

    pub fn segments_with_context(&self, league_id: i64) -> Result<Vec<(SegmentRow, MatchInfoRow)>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SEGMENT_COLS}, {MATCH_INFO_COLS_QUALIFIED}
                 FROM match_detail md
                 JOIN match_info mi ON mi.match_id = md.match_id
                 WHERE mi.league_id = ?1
                 ORDER BY md.detail_id"
            ))
            .context("prepare segments-with-context query")?;
        let rows = stmt
            .query_map(params![league_id], |row| {
                let seg = decode_segment(row)?;
                let info = decode_match_info_at(row, 18)?;
                Ok((seg, info))
            })
            .context("query segments with context")?;
        collect_rows(rows)
    }

    pub fn segments_missing_pdras(&self) -> Result<Vec<SegmentRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SEGMENT_COLS} FROM match_detail md
                 WHERE md.teamA_pdras IS NULL OR md.teamB_pdras IS NULL
                 ORDER BY md.detail_id"
            ))
            .context("prepare missing-pdras query")?;
        let rows = stmt
            .query_map([], decode_segment)
            .context("query segments missing pdras")?;
        collect_rows(rows)
    }

    pub fn set_segment_pdras(&self, detail_id: i64, team_a: f64, team_b: f64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE match_detail SET teamA_pdras = ?1, teamB_pdras = ?2 WHERE detail_id = ?3",
                params![team_a, team_b, detail_id],
            )
            .context("update segment pdras")?;
        Ok(())
    }

    // ---- breakdown & shots ----

    pub fn breakdown_rows(&self) -> Result<Vec<BreakdownRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT match_id, player_id, headers, footers, key_passes, non_assisted_footers,
                        hxg, fxg, kp_hxg, kp_fxg, hpsxg, fpsxg, gk_psxg, gk_ga,
                        sub_in, sub_out, in_status, out_status,
                        fouls_committed, fouls_drawn, yellow_cards, red_cards, minutes_played
                 FROM match_breakdown ORDER BY match_id",
            )
            .context("prepare breakdown query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(BreakdownRow {
                    match_id: row.get(0)?,
                    player_id: row.get(1)?,
                    headers: row.get(2)?,
                    footers: row.get(3)?,
                    key_passes: row.get(4)?,
                    non_assisted_footers: row.get(5)?,
                    hxg: row.get(6)?,
                    fxg: row.get(7)?,
                    kp_hxg: row.get(8)?,
                    kp_fxg: row.get(9)?,
                    hpsxg: row.get(10)?,
                    fpsxg: row.get(11)?,
                    gk_psxg: row.get(12)?,
                    gk_ga: row.get(13)?,
                    sub_in: row.get(14)?,
                    sub_out: row.get(15)?,
                    in_status: row.get(16)?,
                    out_status: row.get(17)?,
                    fouls_committed: row.get(18)?,
                    fouls_drawn: row.get(19)?,
                    yellow_cards: row.get(20)?,
                    red_cards: row.get(21)?,
                    minutes_played: row.get(22)?,
                })
            })
            .context("query breakdown rows")?;
        collect_rows(rows)
    }

    pub fn shots_missing_quality(&self) -> Result<Vec<ShotRow>> {
        self.query_shots("WHERE total_PLSQA IS NULL OR RSQ IS NULL")
    }

    pub fn shots_with_quality(&self) -> Result<Vec<ShotRow>> {
        self.query_shots("WHERE total_PLSQA IS NOT NULL")
    }

    pub fn shots_all(&self) -> Result<Vec<ShotRow>> {
        self.query_shots("")
    }

    fn query_shots(&self, filter: &str) -> Result<Vec<ShotRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT shot_id, match_id, xg, psxg, outcome, shooter_id, assister_id, team_id,
                        GK_id, off_players, def_players, match_state, player_dif, shot_type,
                        total_PLSQA, shooter_SQ, assister_SQ, RSQ, shooter_A, GK_A
                 FROM shots_data {filter} ORDER BY shot_id"
            ))
            .context("prepare shots query")?;
        let rows = stmt.query_map([], decode_shot).context("query shots")?;
        collect_rows(rows)
    }

    pub fn shots_with_context(&self) -> Result<Vec<(ShotRow, MatchInfoRow)>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT sd.shot_id, sd.match_id, sd.xg, sd.psxg, sd.outcome, sd.shooter_id,
                        sd.assister_id, sd.team_id, sd.GK_id, sd.off_players, sd.def_players,
                        sd.match_state, sd.player_dif, sd.shot_type,
                        sd.total_PLSQA, sd.shooter_SQ, sd.assister_SQ, sd.RSQ, sd.shooter_A, sd.GK_A,
                        {MATCH_INFO_COLS_QUALIFIED}
                 FROM shots_data sd
                 JOIN match_info mi ON mi.match_id = sd.match_id
                 ORDER BY sd.shot_id"
            ))
            .context("prepare shots-with-context query")?;
        let rows = stmt
            .query_map([], |row| {
                let shot = decode_shot(row)?;
                let info = decode_match_info_at(row, 20)?;
                Ok((shot, info))
            })
            .context("query shots with context")?;
        collect_rows(rows)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_shot_quality(
        &self,
        shot_id: i64,
        total_plsqa: f64,
        shooter_sq: f64,
        assister_sq: Option<f64>,
        rsq: f64,
        shooter_a: f64,
        gk_a: f64,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE shots_data
                 SET total_PLSQA = ?1, shooter_SQ = ?2, assister_SQ = ?3,
                     RSQ = ?4, shooter_A = ?5, GK_A = ?6
                 WHERE shot_id = ?7",
                params![total_plsqa, shooter_sq, assister_sq, rsq, shooter_a, gk_a, shot_id],
            )
            .context("update shot quality")?;
        Ok(())
    }

    // ---- players & referees ----

    pub fn replace_players(&mut self, players: &[PlayerRating]) -> Result<()> {
        let tx = self.conn.transaction().context("begin players rebuild")?;
        tx.execute("DELETE FROM players_data", [])
            .context("truncate players_data")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO players_data
                        (player_id, current_team, minutes_played, headers, footers, key_passes,
                         non_assisted_footers, hxg, fxg, kp_hxg, kp_fxg, hpsxg, fpsxg,
                         gk_psxg, gk_ga, fouls_committed, fouls_drawn, yellow_cards, red_cards,
                         off_sh_coef, def_sh_coef, off_headers_coef, def_headers_coef,
                         off_footers_coef, def_footers_coef, off_hxg_coef, def_hxg_coef,
                         off_fxg_coef, def_fxg_coef, in_status, out_status, sub_in, sub_out)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                             ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28,
                             ?29, ?30, ?31, ?32, ?33)",
                )
                .context("prepare players insert")?;
            for p in players {
                stmt.execute(params![
                    p.player_id,
                    p.current_team,
                    p.minutes_played,
                    p.headers,
                    p.footers,
                    p.key_passes,
                    p.non_assisted_footers,
                    p.hxg,
                    p.fxg,
                    p.kp_hxg,
                    p.kp_fxg,
                    p.hpsxg,
                    p.fpsxg,
                    p.gk_psxg,
                    p.gk_ga,
                    p.fouls_committed,
                    p.fouls_drawn,
                    p.yellow_cards,
                    p.red_cards,
                    p.off_sh_coef,
                    p.def_sh_coef,
                    p.off_headers_coef,
                    p.def_headers_coef,
                    p.off_footers_coef,
                    p.def_footers_coef,
                    p.off_hxg_coef,
                    p.def_hxg_coef,
                    p.off_fxg_coef,
                    p.def_fxg_coef,
                    serde_json::to_string(&p.in_status)?,
                    serde_json::to_string(&p.out_status)?,
                    serde_json::to_string(&p.sub_in)?,
                    serde_json::to_string(&p.sub_out)?,
                ])
                .context("insert player row")?;
            }
        }
        tx.commit().context("commit players rebuild")?;
        Ok(())
    }

    pub fn players_all(&self) -> Result<PlayerMap> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT player_id, current_team, minutes_played, headers, footers, key_passes,
                        non_assisted_footers, hxg, fxg, kp_hxg, kp_fxg, hpsxg, fpsxg,
                        gk_psxg, gk_ga, fouls_committed, fouls_drawn, yellow_cards, red_cards,
                        off_sh_coef, def_sh_coef, off_headers_coef, def_headers_coef,
                        off_footers_coef, def_footers_coef, off_hxg_coef, def_hxg_coef,
                        off_fxg_coef, def_fxg_coef, in_status, out_status, sub_in, sub_out
                 FROM players_data",
            )
            .context("prepare players query")?;
        let rows = stmt
            .query_map([], |row| {
                let in_status: String = row.get(29)?;
                let out_status: String = row.get(30)?;
                let sub_in: String = row.get(31)?;
                let sub_out: String = row.get(32)?;
                Ok(PlayerRating {
                    player_id: row.get(0)?,
                    current_team: row.get(1)?,
                    minutes_played: row.get(2)?,
                    headers: row.get(3)?,
                    footers: row.get(4)?,
                    key_passes: row.get(5)?,
                    non_assisted_footers: row.get(6)?,
                    hxg: row.get(7)?,
                    fxg: row.get(8)?,
                    kp_hxg: row.get(9)?,
                    kp_fxg: row.get(10)?,
                    hpsxg: row.get(11)?,
                    fpsxg: row.get(12)?,
                    gk_psxg: row.get(13)?,
                    gk_ga: row.get(14)?,
                    fouls_committed: row.get(15)?,
                    fouls_drawn: row.get(16)?,
                    yellow_cards: row.get(17)?,
                    red_cards: row.get(18)?,
                    off_sh_coef: row.get(19)?,
                    def_sh_coef: row.get(20)?,
                    off_headers_coef: row.get(21)?,
                    def_headers_coef: row.get(22)?,
                    off_footers_coef: row.get(23)?,
                    def_footers_coef: row.get(24)?,
                    off_hxg_coef: row.get(25)?,
                    def_hxg_coef: row.get(26)?,
                    off_fxg_coef: row.get(27)?,
                    def_fxg_coef: row.get(28)?,
                    in_status: serde_json::from_str::<StatusCounts>(&in_status)
                        .unwrap_or_default(),
                    out_status: serde_json::from_str::<StatusCounts>(&out_status)
                        .unwrap_or_default(),
                    sub_in: serde_json::from_str(&sub_in).unwrap_or_default(),
                    sub_out: serde_json::from_str(&sub_out).unwrap_or_default(),
                })
            })
            .context("query players")?;
        let mut map = PlayerMap::new();
        for row in rows {
            let p = row.context("decode player row")?;
            map.insert(p.player_id.clone(), p);
        }
        Ok(map)
    }

    pub fn players_for_team(&self, team_id: i64) -> Result<Vec<PlayerId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT player_id FROM players_data WHERE current_team = ?1 ORDER BY player_id")
            .context("prepare team players query")?;
        let rows = stmt
            .query_map(params![team_id], |row| row.get(0))
            .context("query team players")?;
        collect_rows(rows)
    }

    pub fn replace_referees(&mut self, referees: &[RefereeStats]) -> Result<()> {
        let tx = self.conn.transaction().context("begin referee rebuild")?;
        tx.execute("DELETE FROM referee_data", [])
            .context("truncate referee_data")?;
        for r in referees {
            tx.execute(
                "INSERT INTO referee_data (referee_name, fouls, yellow_cards, red_cards, matches_played)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(referee_name) DO UPDATE SET
                    fouls = excluded.fouls,
                    yellow_cards = excluded.yellow_cards,
                    red_cards = excluded.red_cards,
                    matches_played = excluded.matches_played",
                params![r.referee_name, r.fouls, r.yellow_cards, r.red_cards, r.matches_played],
            )
            .context("insert referee row")?;
        }
        tx.commit().context("commit referee rebuild")?;
        Ok(())
    }

    pub fn referee_stats(&self, referee_name: &str) -> Result<Option<RefereeStats>> {
        self.conn
            .query_row(
                "SELECT referee_name, fouls, yellow_cards, red_cards, matches_played
                 FROM referee_data WHERE referee_name = ?1",
                params![referee_name],
                |row| {
                    Ok(RefereeStats {
                        referee_name: row.get(0)?,
                        fouls: row.get(1)?,
                        yellow_cards: row.get(2)?,
                        red_cards: row.get(3)?,
                        matches_played: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("query referee stats")
    }

    pub fn referee_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT referee_name FROM referee_data ORDER BY referee_name")
            .context("prepare referee names query")?;
        let rows = stmt
            .query_map([], |row| row.get(0))
            .context("query referee names")?;
        collect_rows(rows)
    }

    /// Fills match-level foul/card totals from the breakdown where they are
    /// still zero.
    pub fn backfill_match_card_totals(&self) -> Result<()> {
        self.conn
            .execute(
                "UPDATE match_info SET
                    total_fouls = COALESCE((SELECT SUM(fouls_committed) FROM match_breakdown mb
                                            WHERE mb.match_id = match_info.match_id), 0),
                    yellow_cards = COALESCE((SELECT SUM(yellow_cards) FROM match_breakdown mb
                                             WHERE mb.match_id = match_info.match_id), 0),
                    red_cards = COALESCE((SELECT SUM(red_cards) FROM match_breakdown mb
                                          WHERE mb.match_id = match_info.match_id), 0)
                 WHERE total_fouls = 0",
                [],
            )
            .context("backfill match card totals")?;
        Ok(())
    }

    /// Historical sub-in minutes for a team, via each player's current team.
    pub fn sub_history(&self, team_id: i64) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT mb.match_id, mb.sub_in
                 FROM match_breakdown mb
                 JOIN players_data pd ON pd.player_id = mb.player_id
                 WHERE pd.current_team = ?1 AND mb.sub_in IS NOT NULL AND mb.sub_in > 0
                 ORDER BY mb.match_id",
            )
            .context("prepare sub history query")?;
        let rows = stmt
            .query_map(params![team_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("query sub history")?;
        collect_rows(rows)
    }

    pub fn last_match_date_before(&self, team_id: i64, date: NaiveDate) -> Result<Option<NaiveDate>> {
        let cutoff = date.format(DATE_FMT).to_string();
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT MAX(date) FROM match_info
                 WHERE (home_team_id = ?1 OR away_team_id = ?1) AND DATE(date) < ?2",
                params![team_id, cutoff],
                |row| row.get(0),
            )
            .context("query last match date")?;
        Ok(raw.and_then(|s| parse_datetime(&s).map(|dt| dt.date())))
    }

    // ---- schedule ----

    pub fn upsert_schedule(&self, row: &ScheduleRow) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO schedule_data
                    (home_team_id, away_team_id, date, league_id, referee_name,
                     home_elevation_dif, away_elevation_dif, away_travel,
                     home_rest_days, away_rest_days, temperature, is_raining,
                     home_players, away_players)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(home_team_id, away_team_id, date, league_id) DO UPDATE SET
                    referee_name = excluded.referee_name,
                    temperature = excluded.temperature,
                    is_raining = excluded.is_raining",
                params![
                    row.home_team_id,
                    row.away_team_id,
                    row.kickoff.format(DATETIME_FMT).to_string(),
                    row.league_id,
                    row.referee_name,
                    row.home_elevation_dif,
                    row.away_elevation_dif,
                    row.away_travel,
                    row.home_rest_days,
                    row.away_rest_days,
                    row.temperature_c,
                    row.is_raining as i64,
                    serde_json::to_string(&row.home_players)?,
                    serde_json::to_string(&row.away_players)?,
                ],
            )
            .context("upsert schedule")?;
        let id = self
            .conn
            .query_row(
                "SELECT schedule_id FROM schedule_data
                 WHERE home_team_id = ?1 AND away_team_id = ?2 AND date = ?3 AND league_id = ?4",
                params![
                    row.home_team_id,
                    row.away_team_id,
                    row.kickoff.format(DATETIME_FMT).to_string(),
                    row.league_id
                ],
                |r| r.get(0),
            )
            .context("read back schedule id")?;
        Ok(id)
    }

    pub fn schedule(&self, schedule_id: i64) -> Result<Option<ScheduleRow>> {
        self.conn
            .query_row(
                "SELECT schedule_id, home_team_id, away_team_id, date, league_id, referee_name,
                        home_elevation_dif, away_elevation_dif, away_travel,
                        home_rest_days, away_rest_days, temperature, is_raining,
                        home_players, away_players
                 FROM schedule_data WHERE schedule_id = ?1",
                params![schedule_id],
                |row| {
                    let raw_date: String = row.get(3)?;
                    let home_players: String = row.get(13)?;
                    let away_players: String = row.get(14)?;
                    Ok(ScheduleRow {
                        schedule_id: row.get(0)?,
                        home_team_id: row.get(1)?,
                        away_team_id: row.get(2)?,
                        kickoff: parse_datetime(&raw_date).unwrap_or_default(),
                        league_id: row.get(4)?,
                        referee_name: row.get(5)?,
                        home_elevation_dif: row.get(6)?,
                        away_elevation_dif: row.get(7)?,
                        away_travel: row.get(8)?,
                        home_rest_days: row.get(9)?,
                        away_rest_days: row.get(10)?,
                        temperature_c: row.get(11)?,
                        is_raining: row.get::<_, i64>(12)? != 0,
                        home_players: serde_json::from_str(&home_players).unwrap_or_default(),
                        away_players: serde_json::from_str(&away_players).unwrap_or_default(),
                    })
                },
            )
            .optional()
            .context("query schedule")
    }

    pub fn set_schedule_lineups(
        &self,
        schedule_id: i64,
        home_players: &[PlayerId],
        away_players: &[PlayerId],
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE schedule_data SET home_players = ?1, away_players = ?2 WHERE schedule_id = ?3",
                params![
                    serde_json::to_string(home_players)?,
                    serde_json::to_string(away_players)?,
                    schedule_id
                ],
            )
            .context("update schedule lineups")?;
        Ok(())
    }

    pub fn set_schedule_referee(&self, schedule_id: i64, referee_name: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE schedule_data SET referee_name = ?1 WHERE schedule_id = ?2",
                params![referee_name, schedule_id],
            )
            .context("update schedule referee")?;
        Ok(())
    }

    /// Copies schedule context onto finished matches (filling only NULLs) and
    /// deletes the schedule rows those matches cover.
    pub fn transfer_schedule_context(&self, before: NaiveDate) -> Result<()> {
        let cutoff = before.format(DATE_FMT).to_string();
        self.conn
            .execute(
                "UPDATE match_info SET
                    home_elevation_dif = COALESCE(home_elevation_dif,
                        (SELECT sd.home_elevation_dif FROM schedule_data sd
                         WHERE sd.home_team_id = match_info.home_team_id
                           AND sd.away_team_id = match_info.away_team_id
                           AND DATE(sd.date) = DATE(match_info.date)
                           AND sd.league_id = match_info.league_id)),
                    away_elevation_dif = COALESCE(away_elevation_dif,
                        (SELECT sd.away_elevation_dif FROM schedule_data sd
                         WHERE sd.home_team_id = match_info.home_team_id
                           AND sd.away_team_id = match_info.away_team_id
                           AND DATE(sd.date) = DATE(match_info.date)
                           AND sd.league_id = match_info.league_id)),
                    away_travel = COALESCE(away_travel,
                        (SELECT sd.away_travel FROM schedule_data sd
                         WHERE sd.home_team_id = match_info.home_team_id
                           AND sd.away_team_id = match_info.away_team_id
                           AND DATE(sd.date) = DATE(match_info.date)
                           AND sd.league_id = match_info.league_id)),
                    home_rest_days = COALESCE(home_rest_days,
                        (SELECT sd.home_rest_days FROM schedule_data sd
                         WHERE sd.home_team_id = match_info.home_team_id
                           AND sd.away_team_id = match_info.away_team_id
                           AND DATE(sd.date) = DATE(match_info.date)
                           AND sd.league_id = match_info.league_id)),
                    away_rest_days = COALESCE(away_rest_days,
                        (SELECT sd.away_rest_days FROM schedule_data sd
                         WHERE sd.home_team_id = match_info.home_team_id
                           AND sd.away_team_id = match_info.away_team_id
                           AND DATE(sd.date) = DATE(match_info.date)
                           AND sd.league_id = match_info.league_id)),
                    temperature_c = COALESCE(temperature_c,
                        (SELECT sd.temperature FROM schedule_data sd
                         WHERE sd.home_team_id = match_info.home_team_id
                           AND sd.away_team_id = match_info.away_team_id
                           AND DATE(sd.date) = DATE(match_info.date)
                           AND sd.league_id = match_info.league_id)),
                    is_raining = COALESCE(is_raining,
                        (SELECT sd.is_raining FROM schedule_data sd
                         WHERE sd.home_team_id = match_info.home_team_id
                           AND sd.away_team_id = match_info.away_team_id
                           AND DATE(sd.date) = DATE(match_info.date)
                           AND sd.league_id = match_info.league_id))
                 WHERE DATE(date) < ?1",
                params![cutoff],
            )
            .context("transfer schedule context")?;

        self.conn
            .execute(
                "DELETE FROM schedule_data
                 WHERE DATE(date) < ?1
                   AND EXISTS (SELECT 1 FROM match_info mi
                               WHERE mi.home_team_id = schedule_data.home_team_id
                                 AND mi.away_team_id = schedule_data.away_team_id
                                 AND DATE(mi.date) = DATE(schedule_data.date)
                                 AND mi.league_id = schedule_data.league_id)",
                params![cutoff],
            )
            .context("delete covered schedules")?;
        Ok(())
    }

    /// Data retention: breakdown rows older than `breakdown_cutoff`, schedule
    /// and simulation rows older than `schedule_cutoff`.
    pub fn prune(
        &mut self,
        league_id: i64,
        breakdown_cutoff: NaiveDate,
        schedule_cutoff: NaiveDate,
    ) -> Result<()> {
        let tx = self.conn.transaction().context("begin prune")?;
        tx.execute(
            "DELETE FROM match_breakdown WHERE match_id IN
                (SELECT match_id FROM match_info
                 WHERE league_id = ?1 AND DATE(date) < ?2)",
            params![league_id, breakdown_cutoff.format(DATE_FMT).to_string()],
        )
        .context("prune breakdown rows")?;
        tx.execute(
            "DELETE FROM simulation_data WHERE schedule_id IN
                (SELECT schedule_id FROM schedule_data
                 WHERE league_id = ?1 AND DATE(date) < ?2)",
            params![league_id, schedule_cutoff.format(DATE_FMT).to_string()],
        )
        .context("prune simulation rows")?;
        tx.execute(
            "DELETE FROM schedule_data WHERE league_id = ?1 AND DATE(date) < ?2",
            params![league_id, schedule_cutoff.format(DATE_FMT).to_string()],
        )
        .context("prune schedule rows")?;
        tx.commit().context("commit prune")?;
        Ok(())
    }

    // ---- simulation output ----

    /// Replaces this schedule's simulation rows: delete + chunked bulk
    /// insert, all in one transaction so a failed run never leaves partial
    /// output behind.
    pub fn replace_simulation(&mut self, schedule_id: i64, rows: &[SimShotRow]) -> Result<()> {
        let tx = self.conn.transaction().context("begin simulation write")?;
        tx.execute(
            "DELETE FROM simulation_data WHERE schedule_id = ?1",
            params![schedule_id],
        )
        .context("delete previous simulation rows")?;

        for chunk in rows.chunks(SIM_INSERT_CHUNK) {
            let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
            let sql = format!(
                "INSERT INTO simulation_data
                    (sim_id, schedule_id, minute, shooter, squad, outcome, body_part, assister)
                 VALUES {placeholders}"
            );
            let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(chunk.len() * 8);
            for row in chunk {
                values.push(row.sim_id.into());
                values.push(schedule_id.into());
                values.push(row.minute.into());
                values.push(row.shooter.clone().into());
                values.push(row.team_id.into());
                values.push((row.outcome as i64).into());
                values.push(row.body_part.clone().into());
                values.push(match &row.assister {
                    Some(a) => a.clone().into(),
                    None => rusqlite::types::Value::Null,
                });
            }
            tx.execute(&sql, rusqlite::params_from_iter(values))
                .context("insert simulation chunk")?;
        }
        tx.commit().context("commit simulation write")?;
        Ok(())
    }

    pub fn simulation_rows(&self, schedule_id: i64) -> Result<Vec<SimShotRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT sim_id, minute, shooter, squad, outcome, body_part, assister
                 FROM simulation_data WHERE schedule_id = ?1
                 ORDER BY sim_id, minute, shooter",
            )
            .context("prepare simulation rows query")?;
        let rows = stmt
            .query_map(params![schedule_id], |row| {
                Ok(SimShotRow {
                    sim_id: row.get(0)?,
                    minute: row.get(1)?,
                    shooter: row.get(2)?,
                    team_id: row.get(3)?,
                    outcome: row.get::<_, i64>(4)? != 0,
                    body_part: row.get(5)?,
                    assister: row.get(6)?,
                })
            })
            .context("query simulation rows")?;
        collect_rows(rows)
    }

    pub fn simulation_sim_count(&self, schedule_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(DISTINCT sim_id) FROM simulation_data WHERE schedule_id = ?1",
                params![schedule_id],
                |row| row.get(0),
            )
            .context("count simulation ids")
    }
}

const MATCH_INFO_COLS: &str = "match_id, home_team_id, away_team_id, date, league_id, referee_name, url, \
     home_elevation_dif, away_elevation_dif, away_travel, home_rest_days, away_rest_days, \
     temperature_c, is_raining, total_fouls, yellow_cards, red_cards";

const MATCH_INFO_COLS_QUALIFIED: &str = "mi.match_id, mi.home_team_id, mi.away_team_id, mi.date, mi.league_id, mi.referee_name, \
     mi.url, mi.home_elevation_dif, mi.away_elevation_dif, mi.away_travel, mi.home_rest_days, \
     mi.away_rest_days, mi.temperature_c, mi.is_raining, mi.total_fouls, mi.yellow_cards, mi.red_cards";

const SEGMENT_COLS: &str = "md.detail_id, md.match_id, md.teamA_players, md.teamB_players, \
     md.teamA_headers, md.teamA_footers, md.teamA_hxg, md.teamA_fxg, \
     md.teamB_headers, md.teamB_footers, md.teamB_hxg, md.teamB_fxg, \
     md.minutes_played, md.match_state, md.match_segment, md.player_dif, \
     md.teamA_pdras, md.teamB_pdras";

fn decode_team(row: &rusqlite::Row<'_>) -> rusqlite::Result<TeamRow> {
    let coords: String = row.get(3)?;
    let (lat, lon) = parse_coordinates(&coords);
    Ok(TeamRow {
        team_id: row.get(0)?,
        team_name: row.get(1)?,
        elevation_m: row.get(2)?,
        lat,
        lon,
        fixtures_url: row.get(4)?,
        league_id: row.get(5)?,
    })
}

fn decode_match_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<MatchInfoRow> {
    decode_match_info_at(row, 0)
}

fn decode_match_info_at(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<MatchInfoRow> {
    let raw_date: String = row.get(base + 3)?;
    Ok(MatchInfoRow {
        match_id: row.get(base)?,
        home_team_id: row.get(base + 1)?,
        away_team_id: row.get(base + 2)?,
        kickoff: parse_datetime(&raw_date).unwrap_or_default(),
        league_id: row.get(base + 4)?,
        referee_name: row.get(base + 5)?,
        url: row.get(base + 6)?,
        home_elevation_dif: row.get(base + 7)?,
        away_elevation_dif: row.get(base + 8)?,
        away_travel: row.get(base + 9)?,
        home_rest_days: row.get(base + 10)?,
        away_rest_days: row.get(base + 11)?,
        temperature_c: row.get(base + 12)?,
        is_raining: row.get::<_, Option<i64>>(base + 13)?.map(|v| v != 0),
        total_fouls: row.get(base + 14)?,
        yellow_cards: row.get(base + 15)?,
        red_cards: row.get(base + 16)?,
    })
}

fn decode_segment(row: &rusqlite::Row<'_>) -> rusqlite::Result<SegmentRow> {
    let team_a: String = row.get(2)?;
    let team_b: String = row.get(3)?;
    Ok(SegmentRow {
        detail_id: row.get(0)?,
        match_id: row.get(1)?,
        team_a_players: serde_json::from_str(&team_a).unwrap_or_default(),
        team_b_players: serde_json::from_str(&team_b).unwrap_or_default(),
        team_a_headers: row.get(4)?,
        team_a_footers: row.get(5)?,
        team_a_hxg: row.get(6)?,
        team_a_fxg: row.get(7)?,
        team_b_headers: row.get(8)?,
        team_b_footers: row.get(9)?,
        team_b_hxg: row.get(10)?,
        team_b_fxg: row.get(11)?,
        minutes_played: row.get(12)?,
        match_state: row.get(13)?,
        match_segment: row.get(14)?,
        player_dif: row.get(15)?,
        team_a_pdras: row.get(16)?,
        team_b_pdras: row.get(17)?,
    })
}

fn decode_shot(row: &rusqlite::Row<'_>) -> rusqlite::Result<ShotRow> {
    let off: String = row.get(9)?;
    let def: String = row.get(10)?;
    Ok(ShotRow {
        shot_id: row.get(0)?,
        match_id: row.get(1)?,
        xg: row.get(2)?,
        psxg: row.get(3)?,
        outcome: row.get::<_, i64>(4)? != 0,
        shooter_id: row.get(5)?,
        assister_id: row.get::<_, Option<String>>(6)?.filter(|s| !s.is_empty()),
        team_id: row.get(7)?,
        gk_id: row.get(8)?,
        off_players: serde_json::from_str(&off).unwrap_or_default(),
        def_players: serde_json::from_str(&def).unwrap_or_default(),
        match_state: row.get(11)?,
        player_dif: row.get(12)?,
        shot_type: row.get(13)?,
        total_plsqa: row.get(14)?,
        shooter_sq: row.get(15)?,
        assister_sq: row.get(16)?,
        rsq: row.get(17)?,
        shooter_a: row.get(18)?,
        gk_a: row.get(19)?,
    })
}

fn parse_coordinates(raw: &str) -> (f64, f64) {
    let mut parts = raw.split(',').map(|p| p.trim().parse::<f64>().unwrap_or(0.0));
    (parts.next().unwrap_or(0.0), parts.next().unwrap_or(0.0))
}

pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FMT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, DATE_FMT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode row")?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn schema_round_trips_teams() {
        let store = sample_store();
        store
            .upsert_league(&LeagueRow {
                league_id: 1,
                league_name: "Test League".into(),
                fixtures_url: String::new(),
                last_updated_date: None,
                is_active: true,
            })
            .unwrap();
        let id = store
            .upsert_team(1, "River Plate", 25.0, -34.55, -58.45, "")
            .unwrap();
        let team = store.team_by_id(id).unwrap().unwrap();
        assert_eq!(team.team_name, "River Plate");
        assert!((team.lat - -34.55).abs() < 1e-9);
        // Re-upsert keeps the id stable.
        let id2 = store
            .upsert_team(1, "River Plate", 30.0, -34.55, -58.45, "")
            .unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn record_match_is_idempotent() {
        let mut store = sample_store();
        let info = MatchInfoRow {
            match_id: 0,
            home_team_id: 1,
            away_team_id: 2,
            kickoff: NaiveDate::from_ymd_opt(2026, 3, 1)
                .unwrap()
                .and_hms_opt(20, 0, 0)
                .unwrap(),
            league_id: 1,
            referee_name: "R".into(),
            url: None,
            home_elevation_dif: None,
            away_elevation_dif: None,
            away_travel: None,
            home_rest_days: None,
            away_rest_days: None,
            temperature_c: None,
            is_raining: None,
            total_fouls: 0,
            yellow_cards: 0,
            red_cards: 0,
        };
        let first = store.record_match(&info, &[], &[], &[]).unwrap();
        assert!(first.is_some());
        let second = store.record_match(&info, &[], &[], &[]).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn replace_simulation_overwrites_previous_rows() {
        let mut store = sample_store();
        let rows: Vec<SimShotRow> = (0..450)
            .map(|i| SimShotRow {
                sim_id: i,
                minute: 10,
                shooter: "A_1_T".into(),
                team_id: 1,
                outcome: false,
                body_part: "foot".into(),
                assister: None,
            })
            .collect();
        store.replace_simulation(7, &rows).unwrap();
        assert_eq!(store.simulation_sim_count(7).unwrap(), 450);
        store
            .replace_simulation(
                7,
                &[SimShotRow {
                    sim_id: 0,
                    minute: 1,
                    shooter: "B_2_T".into(),
                    team_id: 2,
                    outcome: true,
                    body_part: "head".into(),
                    assister: Some("C_3_T".into()),
                }],
            )
            .unwrap();
        let rows = store.simulation_rows(7).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].shooter, "B_2_T");
    }
}
