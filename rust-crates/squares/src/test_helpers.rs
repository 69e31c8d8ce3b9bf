use crate::{
    grid::{
        Game,
        Numbers,
    },
    score::{
        GameState,
        QuarterScore,
        Score,
    },
};
use pool_config::GameConfig;
use serde_json::{
    Value,
    json,
};

pub const EVENT_ID: &str = "401772988";

pub fn game_config() -> GameConfig {
    serde_json::from_str(
        r#"{
            "id": 1,
            "home": { "name": "Seattle Seahawks", "abbreviation": "SEA" },
            "away": { "name": "New England Patriots", "abbreviation": "NE" },
            "kickoff_time": "2026-02-08T23:30:00Z",
            "provider_event_id": "401772988"
        }"#,
    )
    .unwrap()
}

pub fn sample_numbers() -> Numbers {
    Numbers {
        row_numbers: vec![7, 3, 0, 9, 5, 1, 8, 4, 6, 2].try_into().unwrap(),
        col_numbers: vec![4, 8, 1, 6, 0, 9, 3, 7, 2, 5].try_into().unwrap(),
    }
}

pub fn game_with_numbers() -> Game {
    Game::from_config(&game_config()).with_numbers(sample_numbers())
}

pub fn score_at(
    game_state: GameState,
    period: u32,
    current: (u32, u32),
    snapshots: &[(u32, u32)],
) -> Score {
    Score {
        event_id: EVENT_ID.to_string(),
        game_state,
        period,
        display_clock: "12:00".to_string(),
        home_score: current.0,
        away_score: current.1,
        home_team: "SEA".to_string(),
        away_team: "NE".to_string(),
        home_logo: None,
        away_logo: None,
        last_play: None,
        down: None,
        possession: None,
        quarter_scores: snapshots
            .iter()
            .map(|(home, away)| QuarterScore {
                home: *home,
                away: *away,
            })
            .collect(),
    }
}

pub fn scoreboard(
    state: &str,
    period: u32,
    home: (&str, &[f64]),
    away: (&str, &[f64]),
) -> Value {
    let lines = |values: &[f64]| -> Vec<Value> {
        values.iter().map(|v| json!({ "value": v })).collect()
    };
    json!({
        "events": [
            { "id": "1", "competitions": [] },
            {
                "id": EVENT_ID,
                "competitions": [{
                    "status": {
                        "period": period,
                        "displayClock": "4:21",
                        "type": { "state": state }
                    },
                    "competitors": [
                        {
                            "homeAway": "away",
                            "score": away.0,
                            "team": { "abbreviation": "NE", "logo": "https://a/ne.png" },
                            "linescores": lines(away.1)
                        },
                        {
                            "homeAway": "home",
                            "score": home.0,
                            "team": { "abbreviation": "SEA", "logo": "https://a/sea.png" },
                            "linescores": lines(home.1)
                        }
                    ],
                    "situation": {
                        "lastPlay": { "text": "Pass complete for 12 yards" },
                        "shortDownDistanceText": "2nd & 3",
                        "possession": "26"
                    }
                }]
            }
        ]
    })
}
