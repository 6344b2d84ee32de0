//! MatchIngestor boundary. Production match pages are scraped by an external
//! collaborator; the core only sees these raw records. The bundled
//! implementation reads them from JSON files on disk, which is also what the
//! test suite feeds in.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::store::LeagueRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn flip(self) -> Self {
        match self {
            Self::Home => Self::Away,
            Self::Away => Self::Home,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPlayer {
    pub name: String,
    pub shirt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawEventKind {
    Substitution { player_out: String, player_in: String },
    Goal,
    RedCard { player: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub minute: u32,
    pub side: Side,
    #[serde(flatten)]
    pub kind: RawEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawShot {
    pub minute: u32,
    pub side: Side,
    pub shooter: String,
    #[serde(default)]
    pub xg: f64,
    #[serde(default)]
    pub psxg: Option<f64>,
    #[serde(default)]
    pub goal: bool,
    /// Free text from the source ("Head", "Left Foot", ...); shots with
    /// neither head nor foot are dropped during extraction.
    #[serde(default)]
    pub body_part: Option<String>,
    #[serde(default)]
    pub sca_player: Option<String>,
    /// Whether the shot-creating action was a pass (key pass → assist).
    #[serde(default)]
    pub sca_is_pass: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMiscLine {
    pub name: String,
    pub shirt: String,
    #[serde(default)]
    pub fouls_committed: i64,
    #[serde(default)]
    pub fouls_drawn: i64,
    #[serde(default)]
    pub yellow_cards: i64,
    #[serde(default)]
    pub red_cards: i64,
}

/// One fully scraped match. Rosters list the eleven starters first, bench
/// players after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMatch {
    pub home_team: String,
    pub away_team: String,
    pub kickoff: NaiveDateTime,
    #[serde(default)]
    pub referee: String,
    #[serde(default)]
    pub url: Option<String>,
    pub home_roster: Vec<RawPlayer>,
    pub away_roster: Vec<RawPlayer>,
    #[serde(default)]
    pub events: Vec<RawEvent>,
    #[serde(default)]
    pub shots: Vec<RawShot>,
    #[serde(default)]
    pub home_misc: Vec<RawMiscLine>,
    #[serde(default)]
    pub away_misc: Vec<RawMiscLine>,
    #[serde(default)]
    pub first_half_added: u32,
    #[serde(default)]
    pub second_half_added: u32,
}

impl RawMatch {
    pub fn total_minutes(&self) -> u32 {
        90 + self.first_half_added + self.second_half_added
    }
}

pub trait MatchIngestor {
    /// Raw matches of a league with kickoff date in `[since, upto)`.
    fn matches_between(
        &self,
        league: &LeagueRow,
        since: NaiveDate,
        upto: NaiveDate,
    ) -> Result<Vec<RawMatch>>;
}

/// Reads raw matches from `<root>/<league_id>/*.json`.
pub struct JsonDirIngestor {
    root: PathBuf,
}

impl JsonDirIngestor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl MatchIngestor for JsonDirIngestor {
    fn matches_between(
        &self,
        league: &LeagueRow,
        since: NaiveDate,
        upto: NaiveDate,
    ) -> Result<Vec<RawMatch>> {
        let dir = self.root.join(league.league_id.to_string());
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("read ingest dir {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        entries.sort();

        let mut out = Vec::new();
        for path in entries {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("read raw match {}", path.display()))?;
            let m: RawMatch = serde_json::from_str(&raw)
                .with_context(|| format!("parse raw match {}", path.display()))?;
            let date = m.kickoff.date();
            if date >= since && date < upto {
                out.push(m);
            }
        }
        out.sort_by_key(|m| m.kickoff);
        Ok(out)
    }
}

/// In-memory ingestor for tests and synthetic backfills.
#[derive(Default)]
pub struct StaticIngestor {
    pub matches: Vec<(i64, RawMatch)>,
}

impl StaticIngestor {
    pub fn push(&mut self, league_id: i64, m: RawMatch) {
        self.matches.push((league_id, m));
    }
}

impl MatchIngestor for StaticIngestor {
    fn matches_between(
        &self,
        league: &LeagueRow,
        since: NaiveDate,
        upto: NaiveDate,
    ) -> Result<Vec<RawMatch>> {
        Ok(self
            .matches
            .iter()
            .filter(|(lid, m)| {
                *lid == league.league_id && m.kickoff.date() >= since && m.kickoff.date() < upto
            })
            .map(|(_, m)| m.clone())
            .collect())
    }
}
