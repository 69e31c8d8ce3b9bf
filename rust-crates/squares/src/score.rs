// Normalized game score and the scoreboard payload adapter.
use crate::grid::{
    GameStatus,
    Quarter,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;

/// No real period comes near this; larger line scores are treated as malformed.
const MAX_PERIOD_POINTS: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    Pre,
    In,
    Post,
}

impl GameState {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pre" => Some(GameState::Pre),
            "in" => Some(GameState::In),
            "post" => Some(GameState::Post),
            _ => None,
        }
    }

    /// The game status this provider state implies, if any.
    pub fn implied_status(self) -> Option<GameStatus> {
        match self {
            GameState::Pre => None,
            GameState::In => Some(GameStatus::Live),
            GameState::Post => Some(GameStatus::Final),
        }
    }
}

/// Cumulative score at the end of a quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarterScore {
    pub home: u32,
    pub away: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub event_id: String,
    pub game_state: GameState,
    pub period: u32,
    pub display_clock: String,
    pub home_score: u32,
    pub away_score: u32,
    pub home_team: String,
    pub away_team: String,
    pub home_logo: Option<String>,
    pub away_logo: Option<String>,
    pub last_play: Option<String>,
    pub down: Option<String>,
    pub possession: Option<String>,
    /// Index 0 is the end of Q1. Only completed quarters are present.
    pub quarter_scores: Vec<QuarterScore>,
}

impl Score {
    pub fn completed_quarters(&self) -> usize {
        completed_periods(self.game_state, self.period)
    }

    pub fn has_ended(&self, quarter: Quarter) -> bool {
        usize::from(quarter.number()) <= self.completed_quarters()
    }

    pub fn is_live_quarter(&self, quarter: Quarter) -> bool {
        self.game_state == GameState::In && self.period == u32::from(quarter.number())
    }

    pub fn quarter_snapshot(&self, quarter: Quarter) -> Option<QuarterScore> {
        self.quarter_scores
            .get(usize::from(quarter.number()) - 1)
            .copied()
    }

    pub fn current(&self) -> QuarterScore {
        QuarterScore {
            home: self.home_score,
            away: self.away_score,
        }
    }
}

/// `Some(next)` only when the provider state moves the game strictly forward.
pub fn advanced_status(current: GameStatus, state: GameState) -> Option<GameStatus> {
    state.implied_status().filter(|next| *next > current)
}

/// Extract the configured event from a scoreboard payload. Any structural
/// mismatch yields `None`: the score is treated as unavailable.
pub fn normalize_scoreboard(payload: &Value, event_id: &str) -> Option<Score> {
    let event = payload
        .get("events")?
        .as_array()?
        .iter()
        .find(|event| event.get("id").and_then(Value::as_str) == Some(event_id))?;
    let competition = event.get("competitions")?.as_array()?.first()?;
    let status = competition.get("status").or_else(|| event.get("status"))?;
    let game_state = GameState::parse(status.pointer("/type/state")?.as_str()?)?;
    let period = match status.get("period") {
        None | Some(Value::Null) => 0,
        Some(value) => u32::try_from(value.as_u64()?).ok()?,
    };
    let display_clock = text_at(status, "/displayClock").unwrap_or_default();

    let competitors = competition.get("competitors")?.as_array()?;
    let home = competitor(competitors, "home")?;
    let away = competitor(competitors, "away")?;
    let home_score = parse_points(home)?;
    let away_score = parse_points(away)?;

    let completed = completed_periods(game_state, period);
    let quarter_scores = match (line_scores(home), line_scores(away)) {
        (Some(home_lines), Some(away_lines)) => {
            cumulative_quarter_scores(&home_lines, &away_lines, completed)
        }
        _ => Vec::new(),
    };

    Some(Score {
        event_id: event_id.to_string(),
        game_state,
        period,
        display_clock,
        home_score,
        away_score,
        home_team: text_at(home, "/team/abbreviation")?,
        away_team: text_at(away, "/team/abbreviation")?,
        home_logo: text_at(home, "/team/logo"),
        away_logo: text_at(away, "/team/logo"),
        last_play: text_at(competition, "/situation/lastPlay/text"),
        down: text_at(competition, "/situation/shortDownDistanceText"),
        possession: text_at(competition, "/situation/possession"),
        quarter_scores,
    })
}

/// Prefix sums of per-period points, capped at four quarters and at the
/// periods known to be complete. Stops early rather than overflow.
pub fn cumulative_quarter_scores(
    home_lines: &[u32],
    away_lines: &[u32],
    completed: usize,
) -> Vec<QuarterScore> {
    let quarters = completed.min(4).min(home_lines.len()).min(away_lines.len());
    home_lines
        .iter()
        .zip(away_lines)
        .take(quarters)
        .scan(QuarterScore { home: 0, away: 0 }, |total, (home, away)| {
            total.home = total.home.checked_add(*home)?;
            total.away = total.away.checked_add(*away)?;
            Some(*total)
        })
        .collect()
}

fn completed_periods(state: GameState, period: u32) -> usize {
    match state {
        GameState::Pre => 0,
        GameState::In => period.saturating_sub(1).min(4) as usize,
        GameState::Post => 4,
    }
}

fn competitor<'a>(competitors: &'a [Value], side: &str) -> Option<&'a Value> {
    competitors
        .iter()
        .find(|c| c.get("homeAway").and_then(Value::as_str) == Some(side))
}

fn parse_points(competitor: &Value) -> Option<u32> {
    match competitor.get("score") {
        None | Some(Value::Null) => Some(0),
        Some(Value::String(raw)) if raw.trim().is_empty() => Some(0),
        Some(Value::String(raw)) => raw.trim().parse().ok(),
        Some(Value::Number(number)) => u32::try_from(number.as_u64()?).ok(),
        Some(_) => None,
    }
}

/// `Some(vec![])` when absent, `None` when present but malformed.
fn line_scores(competitor: &Value) -> Option<Vec<u32>> {
    let Some(lines) = competitor.get("linescores") else {
        return Some(Vec::new());
    };
    lines
        .as_array()?
        .iter()
        .map(|line| {
            let value = line.get("value")?.as_f64()?;
            (value.is_finite() && (0.0..=MAX_PERIOD_POINTS).contains(&value))
                .then_some(value.round() as u32)
        })
        .collect()
}

fn text_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::{
        EVENT_ID,
        scoreboard,
    };
    use serde_json::json;

    #[test]
    fn normalize_scoreboard__live_game__maps_fields() {
        // given
        let payload = scoreboard(
            "in",
            3,
            ("17", &[7.0, 10.0, 0.0]),
            ("10", &[3.0, 0.0, 7.0]),
        );

        // when
        let score = normalize_scoreboard(&payload, EVENT_ID).unwrap();

        // then
        assert_eq!(score.game_state, GameState::In);
        assert_eq!(score.period, 3);
        assert_eq!(score.display_clock, "4:21");
        assert_eq!((score.home_score, score.away_score), (17, 10));
        assert_eq!(score.home_team, "SEA");
        assert_eq!(score.away_team, "NE");
        assert_eq!(score.down.as_deref(), Some("2nd & 3"));
        assert_eq!(
            score.last_play.as_deref(),
            Some("Pass complete for 12 yards")
        );
    }

    #[test]
    fn normalize_scoreboard__quarter_snapshots__are_cumulative_and_completed_only() {
        // given
        let payload = scoreboard(
            "in",
            3,
            ("17", &[7.0, 10.0, 0.0]),
            ("10", &[3.0, 0.0, 7.0]),
        );

        // when
        let score = normalize_scoreboard(&payload, EVENT_ID).unwrap();

        // then
        assert_eq!(
            score.quarter_scores,
            vec![
                QuarterScore { home: 7, away: 3 },
                QuarterScore { home: 17, away: 3 },
            ]
        );
        assert!(score.has_ended(Quarter::ALL[1]));
        assert!(!score.has_ended(Quarter::ALL[2]));
        assert!(score.is_live_quarter(Quarter::ALL[2]));
    }

    #[test]
    fn normalize_scoreboard__final_game__snapshots_all_four_quarters() {
        // given
        let payload = scoreboard(
            "post",
            5,
            ("30", &[7.0, 7.0, 7.0, 3.0, 6.0]),
            ("24", &[0.0, 14.0, 3.0, 7.0, 0.0]),
        );

        // when
        let score = normalize_scoreboard(&payload, EVENT_ID).unwrap();

        // then
        assert_eq!(score.quarter_scores.len(), 4);
        assert_eq!(
            score.quarter_snapshot(Quarter::ALL[3]),
            Some(QuarterScore { home: 24, away: 24 })
        );
    }

    #[test]
    fn normalize_scoreboard__missing_event__is_unavailable() {
        let payload = scoreboard("in", 1, ("0", &[]), ("0", &[]));
        assert!(normalize_scoreboard(&payload, "999").is_none());
        assert!(normalize_scoreboard(&json!({}), EVENT_ID).is_none());
        assert!(normalize_scoreboard(&json!({ "events": "nope" }), EVENT_ID).is_none());
    }

    #[test]
    fn normalize_scoreboard__malformed_score__is_unavailable() {
        let payload = scoreboard("in", 1, ("seven", &[]), ("0", &[]));
        assert!(normalize_scoreboard(&payload, EVENT_ID).is_none());
    }

    #[test]
    fn normalize_scoreboard__unknown_state__is_unavailable() {
        let payload = scoreboard("halftime-show", 2, ("3", &[]), ("0", &[]));
        assert!(normalize_scoreboard(&payload, EVENT_ID).is_none());
    }

    #[test]
    fn normalize_scoreboard__empty_score_before_kickoff__reads_as_zero() {
        // given
        let payload = scoreboard("pre", 0, ("", &[]), ("", &[]));

        // when
        let score = normalize_scoreboard(&payload, EVENT_ID).unwrap();

        // then
        assert_eq!((score.home_score, score.away_score), (0, 0));
        assert!(score.quarter_scores.is_empty());
    }

    #[test]
    fn normalize_scoreboard__malformed_linescores__drops_snapshots_only() {
        // given
        let mut payload = scoreboard("in", 3, ("14", &[7.0, 7.0]), ("0", &[0.0, 0.0]));
        payload["events"][1]["competitions"][0]["competitors"][1]["linescores"] =
            json!([{ "value": "seven" }]);

        // when
        let score = normalize_scoreboard(&payload, EVENT_ID).unwrap();

        // then
        assert_eq!(score.home_score, 14);
        assert!(score.quarter_scores.is_empty());
    }

    #[test]
    fn normalize_scoreboard__absurd_linescores__drops_snapshots_only() {
        // given
        let payload = scoreboard("post", 4, ("0", &[4e9, 4e9]), ("0", &[0.0, 0.0]));

        // when
        let score = normalize_scoreboard(&payload, EVENT_ID).unwrap();

        // then
        assert_eq!(score.game_state, GameState::Post);
        assert!(score.quarter_scores.is_empty());
    }

    #[test]
    fn advanced_status__only_moves_forward() {
        assert_eq!(
            advanced_status(GameStatus::Selling, GameState::In),
            Some(GameStatus::Live)
        );
        assert_eq!(
            advanced_status(GameStatus::NumbersAssigned, GameState::Post),
            Some(GameStatus::Final)
        );
        assert_eq!(advanced_status(GameStatus::Final, GameState::In), None);
        assert_eq!(advanced_status(GameStatus::Live, GameState::In), None);
        assert_eq!(advanced_status(GameStatus::Selling, GameState::Pre), None);
    }

    #[test]
    fn cumulative_quarter_scores__stops_at_shorter_side() {
        let scores = cumulative_quarter_scores(&[3, 4, 5], &[1], 3);
        assert_eq!(scores, vec![QuarterScore { home: 3, away: 1 }]);
    }

    #[test]
    fn cumulative_quarter_scores__stops_before_overflowing() {
        let scores = cumulative_quarter_scores(&[7, u32::MAX, 3], &[0, 0, 0], 3);
        assert_eq!(scores, vec![QuarterScore { home: 7, away: 0 }]);
    }
}
