use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Players are identified by `"<name>_<shirt#>_<team initials>"`; the name
/// part (everything before the first underscore) is what raw event feeds
/// carry, so lookups frequently go through [`base_name`].
pub type PlayerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameStatus {
    Leading,
    Level,
    Trailing,
}

impl GameStatus {
    pub fn from_goal_diff(diff: i32) -> Self {
        if diff > 0 {
            Self::Leading
        } else if diff < 0 {
            Self::Trailing
        } else {
            Self::Level
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Leading => "leading",
            Self::Level => "level",
            Self::Trailing => "trailing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyPart {
    Head,
    Foot,
}

impl BodyPart {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Foot => "foot",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.to_ascii_lowercase();
        if lowered.contains("head") {
            Some(Self::Head)
        } else if lowered.contains("foot") {
            Some(Self::Foot)
        } else {
            None
        }
    }
}

/// How often a player entered/left the pitch under each game status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub leading: u32,
    pub level: u32,
    pub trailing: u32,
}

impl StatusCounts {
    pub fn add(&mut self, status: GameStatus) {
        match status {
            GameStatus::Leading => self.leading += 1,
            GameStatus::Level => self.level += 1,
            GameStatus::Trailing => self.trailing += 1,
        }
    }

    pub fn prob(&self, status: GameStatus) -> f64 {
        let total = (self.leading + self.level + self.trailing) as f64;
        if total == 0.0 {
            return 0.0;
        }
        let n = match status {
            GameStatus::Leading => self.leading,
            GameStatus::Level => self.level,
            GameStatus::Trailing => self.trailing,
        };
        n as f64 / total
    }
}

/// One row of `players_data`: historical totals plus the fitted rating
/// coefficients. Rebuilt wholesale on every training pass; simulations only
/// ever read a snapshot of it.
#[derive(Debug, Clone, Default)]
pub struct PlayerRating {
    pub player_id: PlayerId,
    pub current_team: i64,
    pub minutes_played: f64,
    pub headers: u32,
    pub footers: u32,
    pub key_passes: u32,
    pub non_assisted_footers: u32,
    pub hxg: f64,
    pub fxg: f64,
    pub kp_hxg: f64,
    pub kp_fxg: f64,
    pub hpsxg: f64,
    pub fpsxg: f64,
    pub gk_psxg: f64,
    pub gk_ga: u32,
    pub fouls_committed: u32,
    pub fouls_drawn: u32,
    pub yellow_cards: u32,
    pub red_cards: u32,
    pub off_sh_coef: f64,
    pub def_sh_coef: f64,
    pub off_headers_coef: f64,
    pub def_headers_coef: f64,
    pub off_footers_coef: f64,
    pub def_footers_coef: f64,
    pub off_hxg_coef: f64,
    pub def_hxg_coef: f64,
    pub off_fxg_coef: f64,
    pub def_fxg_coef: f64,
    pub in_status: StatusCounts,
    pub out_status: StatusCounts,
    pub sub_in: Vec<u32>,
    pub sub_out: Vec<u32>,
}

impl PlayerRating {
    pub fn new(player_id: PlayerId, current_team: i64) -> Self {
        Self {
            player_id,
            current_team,
            ..Default::default()
        }
    }

    /// Average xG per shot for this shooter, split by body part.
    pub fn shot_quality(&self, body: BodyPart) -> f64 {
        let (xg, shots) = match body {
            BodyPart::Head => (self.hxg, self.headers),
            BodyPart::Foot => (self.fxg, self.footers),
        };
        if shots == 0 { 0.0 } else { xg / shots as f64 }
    }

    /// Average xG per key pass when this player assists, split by body part.
    pub fn assist_quality(&self, body: BodyPart) -> f64 {
        let xg = match body {
            BodyPart::Head => self.kp_hxg,
            BodyPart::Foot => self.kp_fxg,
        };
        if self.key_passes == 0 {
            0.0
        } else {
            xg / self.key_passes as f64
        }
    }

    /// Finishing ability: post-shot xG generated per unit of pre-shot xG.
    pub fn shooter_ability(&self, body: BodyPart) -> f64 {
        let (psxg, xg) = match body {
            BodyPart::Head => (self.hpsxg, self.hxg),
            BodyPart::Foot => (self.fpsxg, self.fxg),
        };
        if xg == 0.0 { 0.0 } else { psxg / xg }
    }

    /// Shot-stopping ability; 0.0 when the keeper has faced no post-shot xG.
    pub fn keeper_ability(&self) -> f64 {
        if self.gk_psxg <= 0.0 {
            0.0
        } else {
            1.0 - self.gk_ga as f64 / self.gk_psxg
        }
    }

    pub fn per_minute(&self, count: u32) -> f64 {
        count as f64 / self.minutes_played.max(1.0)
    }
}

#[derive(Debug, Clone)]
pub struct RefereeStats {
    pub referee_name: String,
    pub fouls: f64,
    pub yellow_cards: f64,
    pub red_cards: f64,
    pub matches_played: u32,
}

impl Default for RefereeStats {
    // League-wide priors for referees with no recorded matches.
    fn default() -> Self {
        Self {
            referee_name: String::new(),
            fouls: 26.5,
            yellow_cards: 3.8,
            red_cards: 0.14,
            matches_played: 1,
        }
    }
}

pub fn team_initials(team_name: &str) -> String {
    team_name
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

pub fn player_id(name: &str, shirt: &str, team_name: &str) -> PlayerId {
    format!("{}_{}_{}", name.trim(), shirt.trim(), team_initials(team_name))
}

/// The name part of a player id (text before the first underscore).
pub fn base_name(id: &str) -> &str {
    id.split('_').next().unwrap_or(id)
}

pub fn normalize_name(input: &str) -> String {
    let lower = input.trim().to_ascii_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut prev_us = false;
    for ch in lower.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            prev_us = false;
        } else if !prev_us && !out.is_empty() {
            out.push('_');
            prev_us = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Token-overlap similarity in [0, 100] between two normalized names.
pub fn name_similarity(a: &str, b: &str) -> u32 {
    let ta: Vec<&str> = a.split('_').filter(|t| !t.is_empty()).collect();
    let tb: Vec<&str> = b.split('_').filter(|t| !t.is_empty()).collect();
    if ta.is_empty() || tb.is_empty() {
        return 0;
    }
    let mut matched = 0usize;
    let mut used = vec![false; tb.len()];
    for t in &ta {
        for (j, u) in tb.iter().enumerate() {
            if !used[j] && (t == u || t.starts_with(u) || u.starts_with(t)) {
                used[j] = true;
                matched += 1;
                break;
            }
        }
    }
    ((2 * matched * 100) / (ta.len() + tb.len())) as u32
}

/// Best candidate at or above `threshold`, or None.
pub fn best_match<'a, I>(target: &str, candidates: I, threshold: u32) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let target_norm = normalize_name(target);
    let mut best: Option<(u32, String)> = None;
    for cand in candidates {
        let score = name_similarity(&target_norm, &normalize_name(cand));
        if score >= threshold && best.as_ref().is_none_or(|(s, _)| score > *s) {
            best = Some((score, cand.to_string()));
        }
    }
    best.map(|(_, name)| name)
}

/// Resolve a list of raw names against known ids, relaxing the threshold in
/// steps (80 → 60 → 40) for leftovers, consuming each id at most once.
pub fn match_names(raw_names: &[String], known_ids: &[PlayerId]) -> Vec<PlayerId> {
    let mut pool: Vec<&str> = known_ids.iter().map(|s| s.as_str()).collect();
    let mut matched = Vec::new();
    let mut unmatched: Vec<&String> = raw_names.iter().collect();

    for threshold in [80u32, 60, 40] {
        let mut remaining = Vec::new();
        for name in unmatched {
            let target = normalize_name(name);
            let mut best: Option<(u32, usize)> = None;
            for (idx, id) in pool.iter().enumerate() {
                let score = name_similarity(&target, &normalize_name(base_name(id)));
                if score >= threshold && best.is_none_or(|(s, _)| score > s) {
                    best = Some((score, idx));
                }
            }
            match best {
                Some((_, idx)) => {
                    matched.push(pool.remove(idx).to_string());
                }
                None => remaining.push(name),
            }
        }
        if remaining.is_empty() {
            break;
        }
        unmatched = remaining;
    }
    matched
}

pub type PlayerMap = HashMap<PlayerId, PlayerRating>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_id_uses_team_initials() {
        assert_eq!(player_id("Jude Bellingham", "5", "Real Madrid"), "Jude Bellingham_5_RM");
        assert_eq!(base_name("Jude Bellingham_5_RM"), "Jude Bellingham");
    }

    #[test]
    fn normalize_name_compacts() {
        assert_eq!(normalize_name(" Man City "), "man_city");
        assert_eq!(normalize_name("AC-Milan"), "ac_milan");
    }

    #[test]
    fn status_probs_sum_over_counts() {
        let mut counts = StatusCounts::default();
        counts.add(GameStatus::Leading);
        counts.add(GameStatus::Leading);
        counts.add(GameStatus::Level);
        assert!((counts.prob(GameStatus::Leading) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(StatusCounts::default().prob(GameStatus::Level), 0.0);
    }

    #[test]
    fn keeper_ability_clamps_without_psxg_faced() {
        let mut p = PlayerRating::new("gk_1_T".into(), 1);
        assert_eq!(p.keeper_ability(), 0.0);
        p.gk_psxg = 4.0;
        p.gk_ga = 1;
        assert!((p.keeper_ability() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn match_names_relaxes_threshold() {
        let known = vec![
            "Erling Haaland_9_MC".to_string(),
            "Phil Foden_47_MC".to_string(),
        ];
        let matched = match_names(&["Haaland".to_string(), "P. Foden".to_string()], &known);
        assert_eq!(matched.len(), 2);
    }
}
