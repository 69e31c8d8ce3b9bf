use crate::{
    error::PoolError,
    grid::{
        Cell,
        Game,
        GridBox,
        Quarter,
        QuarterResult,
        UserId,
    },
    score::{
        QuarterScore,
        Score,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

pub fn last_digit(score: u32) -> u8 {
    (score % 10) as u8
}

/// The cell whose row digit matches the home score's last digit and whose
/// column digit matches the away score's last digit.
pub fn winning_cell(game: &Game, home_score: u32, away_score: u32) -> Result<Cell, PoolError> {
    let numbers = game.numbers.as_ref().ok_or(PoolError::NumbersNotAssigned)?;
    numbers
        .cell_for(last_digit(home_score), last_digit(away_score))
        .ok_or(PoolError::NumbersNotAssigned)
}

pub fn owner_of(boxes: &[GridBox], cell: Cell) -> Option<UserId> {
    boxes
        .iter()
        .find(|b| b.cell == cell)
        .and_then(|b| b.user_id.clone())
}

pub fn settle_quarter(
    game: &Game,
    boxes: &[GridBox],
    quarter: Quarter,
    home_score: u32,
    away_score: u32,
    recorded_at: DateTime<Utc>,
) -> Result<QuarterResult, PoolError> {
    let cell = winning_cell(game, home_score, away_score)?;
    let pot = game.prices.pot(boxes);
    Ok(QuarterResult {
        game_id: game.id,
        quarter,
        home_score,
        away_score,
        home_last_digit: last_digit(home_score),
        away_last_digit: last_digit(away_score),
        winning_cell: cell,
        winning_user_id: owner_of(boxes, cell),
        payout_cents: game.payouts.payout_cents(pot, quarter),
        recorded_at,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QuarterProjection {
    Posted {
        result: QuarterResult,
    },
    /// The quarter in progress, resolved against the current score.
    Live {
        cell: Cell,
        user_id: Option<UserId>,
        payout_cents: u64,
    },
    /// Ended but not yet recorded. `approximate` is set when no end-of-quarter
    /// snapshot was available and the current score stood in for it.
    Ended {
        cell: Cell,
        user_id: Option<UserId>,
        payout_cents: u64,
        approximate: bool,
    },
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarterOutlook {
    pub quarter: Quarter,
    #[serde(flatten)]
    pub projection: QuarterProjection,
}

pub fn projected_winners(
    game: &Game,
    boxes: &[GridBox],
    results: &[QuarterResult],
    score: Option<&Score>,
) -> Vec<QuarterOutlook> {
    let pot = game.prices.pot(boxes);
    let resolve = |at: QuarterScore| -> Option<(Cell, Option<UserId>)> {
        let cell = winning_cell(game, at.home, at.away).ok()?;
        Some((cell, owner_of(boxes, cell)))
    };

    Quarter::ALL
        .into_iter()
        .map(|quarter| {
            let payout_cents = game.payouts.payout_cents(pot, quarter);
            let posted = results.iter().find(|r| r.quarter == quarter);
            let projection = match (posted, score) {
                (Some(result), _) => QuarterProjection::Posted {
                    result: result.clone(),
                },
                (None, Some(score)) if score.is_live_quarter(quarter) => {
                    match resolve(score.current()) {
                        Some((cell, user_id)) => QuarterProjection::Live {
                            cell,
                            user_id,
                            payout_cents,
                        },
                        None => QuarterProjection::Pending,
                    }
                }
                (None, Some(score)) if score.has_ended(quarter) => {
                    let snapshot = score.quarter_snapshot(quarter);
                    let at = snapshot.unwrap_or_else(|| score.current());
                    match resolve(at) {
                        Some((cell, user_id)) => QuarterProjection::Ended {
                            cell,
                            user_id,
                            payout_cents,
                            approximate: snapshot.is_none(),
                        },
                        None => QuarterProjection::Pending,
                    }
                }
                _ => QuarterProjection::Pending,
            };
            QuarterOutlook {
                quarter,
                projection,
            }
        })
        .collect()
}
