//! Match partitioning and live-context encoders. A match is cut into
//! contiguous windows bounded by the standard minutes {0,15,30,45,60,75,end}
//! plus every substitution, goal and red-card minute; lineups are
//! reconstructed per window from the roster and the event timeline.

use std::collections::BTreeSet;
use std::collections::HashMap;

use crate::ingest::{RawEvent, RawEventKind, Side};
use crate::players::{PlayerId, base_name};

pub const STANDARD_BOUNDARIES: [u32; 6] = [0, 15, 30, 45, 60, 75];

#[derive(Debug, Clone)]
pub struct SubEvent {
    pub minute: u32,
    pub player_out: String,
    pub player_in: String,
    pub side: Side,
}

#[derive(Debug, Clone)]
pub struct RedEvent {
    pub minute: u32,
    pub player: String,
    pub side: Side,
}

/// The event timeline of one match, split by kind.
#[derive(Debug, Clone, Default)]
pub struct EventTimeline {
    pub subs: Vec<SubEvent>,
    pub goals: Vec<(u32, Side)>,
    pub reds: Vec<RedEvent>,
}

impl EventTimeline {
    pub fn from_events(events: &[RawEvent]) -> Self {
        let mut timeline = Self::default();
        for event in events {
            match &event.kind {
                RawEventKind::Substitution {
                    player_out,
                    player_in,
                } => timeline.subs.push(SubEvent {
                    minute: event.minute,
                    player_out: player_out.clone(),
                    player_in: player_in.clone(),
                    side: event.side,
                }),
                RawEventKind::Goal => timeline.goals.push((event.minute, event.side)),
                RawEventKind::RedCard { player } => timeline.reds.push(RedEvent {
                    minute: event.minute,
                    player: player.clone(),
                    side: event.side,
                }),
            }
        }
        timeline.subs.sort_by_key(|s| s.minute);
        timeline.goals.sort_by_key(|g| g.0);
        timeline.reds.sort_by_key(|r| r.minute);
        timeline
    }

    pub fn event_minutes(&self) -> impl Iterator<Item = u32> + '_ {
        self.subs
            .iter()
            .map(|s| s.minute)
            .chain(self.goals.iter().map(|g| g.0))
            .chain(self.reds.iter().map(|r| r.minute))
    }

    pub fn goals_until(&self, minute: u32, side: Side) -> i32 {
        self.goals
            .iter()
            .filter(|(m, s)| *m <= minute && *s == side)
            .count() as i32
    }

    pub fn reds_until(&self, minute: u32, side: Side) -> i32 {
        self.reds
            .iter()
            .filter(|r| r.minute <= minute && r.side == side)
            .count() as i32
    }
}

/// Sorted unique boundaries: standard minutes, event minutes, and the final
/// whistle.
pub fn segment_boundaries(
    total_minutes: u32,
    event_minutes: impl IntoIterator<Item = u32>,
) -> Vec<u32> {
    let mut set: BTreeSet<u32> = STANDARD_BOUNDARIES
        .iter()
        .copied()
        .filter(|m| *m < total_minutes)
        .collect();
    for minute in event_minutes {
        if minute < total_minutes {
            set.insert(minute);
        }
    }
    set.insert(total_minutes);
    set.into_iter().collect()
}

/// The eleven (or fewer, after red cards) on the pitch at `minute`.
/// `roster[..11]` are the starters; substitutions at or before `minute` are
/// applied in order, sent-off players are dropped without replacement.
pub fn lineup_at(
    roster: &[PlayerId],
    timeline: &EventTimeline,
    minute: u32,
    side: Side,
) -> Vec<PlayerId> {
    let mut by_name: HashMap<&str, &PlayerId> =
        roster.iter().map(|p| (base_name(p), p)).collect();
    let mut lineup: Vec<PlayerId> = roster.iter().take(11).cloned().collect();

    for sub in timeline.subs.iter().filter(|s| s.side == side) {
        if sub.minute > minute {
            break;
        }
        if let Some(idx) = lineup.iter().position(|p| base_name(p) == sub.player_out) {
            let replacement = by_name
                .get(sub.player_in.as_str())
                .map(|p| (*p).clone())
                .unwrap_or_else(|| sub.player_in.clone());
            lineup[idx] = replacement;
            by_name.remove(sub.player_in.as_str());
        }
    }

    let sent_off: Vec<&str> = timeline
        .reds
        .iter()
        .filter(|r| r.side == side && r.minute <= minute)
        .map(|r| r.player.as_str())
        .collect();
    lineup.retain(|p| !sent_off.contains(&base_name(p)));
    lineup
}

/// Goal difference bucketed to {−1.5, −1, 0, 1, 1.5}.
pub fn match_state_code(goal_diff: i32) -> f64 {
    match goal_diff {
        0 => 0.0,
        1 => 1.0,
        d if d > 1 => 1.5,
        -1 => -1.0,
        _ => -1.5,
    }
}

/// Red-card advantage (away-minus-home from the home perspective) bucketed
/// like the match state.
pub fn player_dif_code(red_diff: i32) -> f64 {
    match_state_code(red_diff)
}

/// Six 15-minute buckets; the last absorbs overtime.
pub fn time_segment(minute: u32) -> i64 {
    ((minute / 15) + 1).min(6) as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTime {
    Aft,
    Evening,
    Night,
}

impl MatchTime {
    pub fn from_hour(hour: u32) -> Self {
        if (9..14).contains(&hour) {
            Self::Aft
        } else if (14..19).contains(&hour) {
            Self::Evening
        } else {
            Self::Night
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aft => "aft",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::RawEvent;

    fn sub(minute: u32, side: Side, out: &str, inn: &str) -> RawEvent {
        RawEvent {
            minute,
            side,
            kind: RawEventKind::Substitution {
                player_out: out.to_string(),
                player_in: inn.to_string(),
            },
        }
    }

    fn red(minute: u32, side: Side, player: &str) -> RawEvent {
        RawEvent {
            minute,
            side,
            kind: RawEventKind::RedCard {
                player: player.to_string(),
            },
        }
    }

    fn goal(minute: u32, side: Side) -> RawEvent {
        RawEvent {
            minute,
            side,
            kind: RawEventKind::Goal,
        }
    }

    fn roster(prefix: &str, n: usize) -> Vec<PlayerId> {
        (0..n).map(|i| format!("{prefix}{i}_{i}_T")).collect()
    }

    #[test]
    fn boundaries_cover_standard_and_event_minutes() {
        let timeline = EventTimeline::from_events(&[
            goal(23, Side::Home),
            sub(61, Side::Away, "a", "b"),
            red(77, Side::Home, "c"),
        ]);
        let bounds = segment_boundaries(93, timeline.event_minutes());
        assert_eq!(bounds, vec![0, 15, 23, 30, 45, 60, 61, 75, 77, 93]);
        // Contiguous, non-overlapping windows by construction.
        for pair in bounds.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn boundary_minutes_collapse_duplicates() {
        let timeline = EventTimeline::from_events(&[goal(45, Side::Home), goal(45, Side::Away)]);
        let bounds = segment_boundaries(90, timeline.event_minutes());
        assert_eq!(bounds, vec![0, 15, 30, 45, 60, 75, 90]);
    }

    #[test]
    fn match_state_encoding_follows_goal_difference() {
        let expected = [
            (0, 0.0),
            (1, 1.0),
            (2, 1.5),
            (3, 1.5),
            (-1, -1.0),
            (-2, -1.5),
        ];
        for (diff, code) in expected {
            assert_eq!(match_state_code(diff), code, "diff={diff}");
        }
    }

    #[test]
    fn lineup_applies_subs_and_red_cards() {
        let squad = roster("p", 14);
        let timeline = EventTimeline::from_events(&[
            sub(60, Side::Home, "p0", "p12"),
            red(70, Side::Home, "p1"),
        ]);

        let before = lineup_at(&squad, &timeline, 30, Side::Home);
        assert_eq!(before.len(), 11);
        assert!(before.contains(&squad[0]));

        let after_sub = lineup_at(&squad, &timeline, 60, Side::Home);
        assert!(!after_sub.iter().any(|p| base_name(p) == "p0"));
        assert!(after_sub.iter().any(|p| base_name(p) == "p12"));

        let after_red = lineup_at(&squad, &timeline, 75, Side::Home);
        assert_eq!(after_red.len(), 10);
        assert!(!after_red.iter().any(|p| base_name(p) == "p1"));
    }

    #[test]
    fn time_segment_caps_at_six() {
        assert_eq!(time_segment(0), 1);
        assert_eq!(time_segment(44), 3);
        assert_eq!(time_segment(89), 6);
        assert_eq!(time_segment(97), 6);
    }

    #[test]
    fn match_time_buckets_by_hour() {
        assert_eq!(MatchTime::from_hour(10), MatchTime::Aft);
        assert_eq!(MatchTime::from_hour(15), MatchTime::Evening);
        assert_eq!(MatchTime::from_hour(21), MatchTime::Night);
        assert_eq!(MatchTime::from_hour(3), MatchTime::Night);
    }
}
