// Pool operations: authorization, preconditions and the guarded cell
// transitions, on top of a `PoolStorage`.
use crate::{
    app::{
        change_feed::ChangeFeed,
        pool_storage::{
            BoxScope,
            PoolStorage,
        },
    },
    error::PoolError,
    grid::{
        BoxStatus,
        CELL_COUNT,
        Cell,
        Game,
        GameId,
        GridBox,
        Numbers,
        Profile,
        Quarter,
        QuarterResult,
        Transition,
        UserId,
    },
    pricing::paid_counts,
    score::{
        Score,
        advanced_status,
    },
    settlement::{
        QuarterOutlook,
        projected_winners,
        settle_quarter,
    },
};
use chrono::{
    DateTime,
    TimeDelta,
    Utc,
};
use rand::Rng;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::{
    BTreeMap,
    BTreeSet,
    HashMap,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub claimed: Vec<Cell>,
    /// Requested cells someone else held by the time of the write.
    pub lost: Vec<Cell>,
    /// Dollars owed for `claimed` on top of the caller's earlier paid cells.
    pub amount_due: u64,
}

impl ClaimOutcome {
    pub fn is_partial(&self) -> bool {
        !self.lost.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub existing: u64,
    pub additional: u64,
    pub price: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardView {
    pub game: Game,
    pub boxes: Vec<GridBox>,
    pub results: Vec<QuarterResult>,
    /// Whole dollars.
    pub pot: u64,
    pub score: Option<Score>,
    pub projections: Vec<QuarterOutlook>,
    /// Display names of everyone holding a cell.
    pub players: BTreeMap<UserId, String>,
    /// Change feed position the snapshot reflects.
    pub change_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub user_id: UserId,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiveawayRequest {
    /// Caller-chosen key; a retry with the same key replays the first outcome.
    pub request_id: String,
    pub allocations: Vec<Allocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub user_id: UserId,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiveawayOutcome {
    pub grants: Vec<Grant>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSummary {
    pub released: usize,
    pub revoked: usize,
    pub results_cleared: usize,
    pub profile_deleted: bool,
}

pub struct Pool<S> {
    storage: S,
    feed: ChangeFeed,
    reservation_ttl: TimeDelta,
    scores: HashMap<GameId, Score>,
}

impl<S> Pool<S> {
    pub fn new(storage: S, feed: ChangeFeed, reservation_ttl: TimeDelta) -> Self {
        Self {
            storage,
            feed,
            reservation_ttl,
            scores: HashMap::new(),
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}

impl<S: PoolStorage> Pool<S> {
    /// Create the game and its 100 available cells unless it already exists.
    pub fn ensure_game(&mut self, game: &Game) -> Result<bool, PoolError> {
        let created = self.storage.insert_game(game)?;
        if created {
            tracing::info!("created game {} with {} cells", game.id, CELL_COUNT);
        }
        Ok(created)
    }

    pub fn seed_admins(&mut self, admins: &[UserId]) -> Result<(), PoolError> {
        for admin in admins {
            self.storage.add_admin(admin)?;
        }
        Ok(())
    }

    pub fn board(&self, game_id: GameId) -> Result<BoardView, PoolError> {
        let change_seq = self.feed.current_seq();
        let game = self.game(game_id)?;
        let boxes = self.storage.boxes(game_id)?;
        let results = self.storage.quarter_results(game_id)?;
        let score = self.scores.get(&game_id).cloned();
        let projections = projected_winners(&game, &boxes, &results, score.as_ref());
        let holders: BTreeSet<&UserId> =
            boxes.iter().filter_map(|b| b.user_id.as_ref()).collect();
        let players = self
            .storage
            .profiles()?
            .into_iter()
            .filter(|profile| holders.contains(&profile.user_id))
            .map(|profile| (profile.user_id, profile.full_name))
            .collect();
        Ok(BoardView {
            pot: game.prices.pot(&boxes),
            game,
            boxes,
            results,
            score,
            projections,
            players,
            change_seq,
        })
    }

    pub fn score(&self, game_id: GameId) -> Result<Option<Score>, PoolError> {
        self.game(game_id)?;
        Ok(self.scores.get(&game_id).cloned())
    }

    pub fn quote(
        &self,
        game_id: GameId,
        caller: &UserId,
        additional: u64,
    ) -> Result<Quote, PoolError> {
        if additional > CELL_COUNT as u64 {
            return Err(PoolError::TooManyCells(additional));
        }
        let game = self.game(game_id)?;
        let existing = self.paid_count(game_id, caller)?;
        Ok(Quote {
            existing,
            additional,
            price: game.prices.upgrade_delta(existing, additional),
        })
    }

    /// Create or refresh the caller's profile, keeping the first creation time.
    pub fn ensure_profile(
        &mut self,
        caller: &UserId,
        full_name: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Profile, PoolError> {
        let created_at = self
            .storage
            .profile(caller)?
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let profile = Profile {
            user_id: caller.clone(),
            full_name: full_name.to_string(),
            email: email.to_string(),
            created_at,
        };
        self.storage.upsert_profile(&profile)?;
        Ok(profile)
    }

    pub fn claim(
        &mut self,
        game_id: GameId,
        caller: &UserId,
        cells: &[Cell],
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, PoolError> {
        if let Some(cell) = cells.iter().find(|cell| !cell.is_on_grid()) {
            return Err(PoolError::InvalidCell(*cell));
        }
        let requested: Vec<Cell> = cells
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if requested.is_empty() {
            return Err(PoolError::EmptySelection);
        }
        let game = self.game(game_id)?;
        let existing = self.paid_count(game_id, caller)?;

        let written = self.storage.transition_boxes(
            game_id,
            BoxScope::Cells(&requested),
            &Transition::Claim {
                user: caller.clone(),
                at: now,
            },
        )?;
        let claimed: Vec<Cell> = written.iter().map(|b| b.cell).collect();
        let lost: Vec<Cell> = requested
            .into_iter()
            .filter(|cell| !claimed.contains(cell))
            .collect();
        let amount_due = game
            .prices
            .upgrade_delta(existing, claimed.len() as u64);
        self.feed.publish(written);

        if lost.is_empty() {
            tracing::info!("{caller} reserved {} cells in game {game_id}", claimed.len());
        } else {
            tracing::info!(
                "{caller} reserved {} cells in game {game_id}, lost {} to other claimants",
                claimed.len(),
                lost.len()
            );
        }
        Ok(ClaimOutcome {
            claimed,
            lost,
            amount_due,
        })
    }

    /// Return the caller's unpaid reservations to the pool.
    pub fn release_mine(
        &mut self,
        game_id: GameId,
        caller: &UserId,
    ) -> Result<Vec<Cell>, PoolError> {
        self.game(game_id)?;
        self.release(game_id, caller)
    }

    pub fn confirm_payment(
        &mut self,
        game_id: GameId,
        caller: &UserId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Cell>, PoolError> {
        self.require_admin(caller)?;
        self.game(game_id)?;
        let written = self.storage.transition_boxes(
            game_id,
            BoxScope::All,
            &Transition::Confirm {
                user: user.clone(),
                at: now,
            },
        )?;
        let cells = written.iter().map(|b| b.cell).collect::<Vec<_>>();
        self.feed.publish(written);
        tracing::info!("{caller} confirmed {} cells for {user} in game {game_id}", cells.len());
        Ok(cells)
    }

    pub fn release_boxes(
        &mut self,
        game_id: GameId,
        caller: &UserId,
        user: &UserId,
    ) -> Result<Vec<Cell>, PoolError> {
        self.require_admin(caller)?;
        self.game(game_id)?;
        self.release(game_id, user)
    }

    pub fn assign_numbers<R: Rng + ?Sized>(
        &mut self,
        game_id: GameId,
        caller: &UserId,
        rng: &mut R,
    ) -> Result<Game, PoolError> {
        self.require_admin(caller)?;
        let numbers = Numbers::draw(rng);
        match self.storage.update_game_if(
            game_id,
            |game| !game.numbers_assigned(),
            |game| game.with_numbers(numbers),
        )? {
            Some(game) => {
                tracing::info!("numbers assigned for game {game_id}");
                Ok(game)
            }
            None => {
                self.game(game_id)?;
                Err(PoolError::NumbersAlreadyAssigned)
            }
        }
    }

    pub fn reset_numbers(
        &mut self,
        game_id: GameId,
        caller: &UserId,
    ) -> Result<Game, PoolError> {
        self.require_admin(caller)?;
        self.game(game_id)?;
        if !self.storage.quarter_results(game_id)?.is_empty() {
            return Err(PoolError::ResultsAlreadyRecorded);
        }
        let game = self
            .storage
            .update_game_if(game_id, |_| true, Game::without_numbers)?
            .ok_or(PoolError::UnknownGame(game_id))?;
        tracing::info!("numbers reset for game {game_id}");
        Ok(game)
    }

    pub fn record_quarter(
        &mut self,
        game_id: GameId,
        caller: &UserId,
        quarter: u8,
        home_score: u32,
        away_score: u32,
        now: DateTime<Utc>,
    ) -> Result<QuarterResult, PoolError> {
        self.require_admin(caller)?;
        let quarter = Quarter::new(quarter).ok_or(PoolError::InvalidQuarter(quarter))?;
        let game = self.game(game_id)?;
        let boxes = self.storage.boxes(game_id)?;
        let result = settle_quarter(&game, &boxes, quarter, home_score, away_score, now)?;
        self.storage.upsert_quarter_result(&result)?;
        tracing::info!(
            "recorded {quarter} for game {game_id}: {home_score}-{away_score}, cell {} to {}",
            result.winning_cell,
            result
                .winning_user_id
                .as_ref()
                .map(UserId::as_str)
                .unwrap_or("nobody")
        );
        Ok(result)
    }

    /// Remove a user everywhere: their cells go back to the pool, they stop
    /// being a recorded winner, and their admin role and profile are deleted.
    pub fn delete_user(
        &mut self,
        caller: &UserId,
        user: &UserId,
    ) -> Result<DeleteSummary, PoolError> {
        self.require_admin(caller)?;
        if caller == user {
            return Err(PoolError::CannotDeleteSelf);
        }
        let mut summary = DeleteSummary::default();
        for game in self.storage.games()? {
            let released = self.storage.transition_boxes(
                game.id,
                BoxScope::All,
                &Transition::Release { user: user.clone() },
            )?;
            let revoked = self.storage.transition_boxes(
                game.id,
                BoxScope::All,
                &Transition::Revoke { user: user.clone() },
            )?;
            summary.released += released.len();
            summary.revoked += revoked.len();
            self.feed.publish(released.into_iter().chain(revoked));
        }
        summary.results_cleared = self.storage.clear_winning_user(user)?;
        self.storage.remove_admin(user)?;
        summary.profile_deleted = self.storage.delete_profile(user)?;
        tracing::info!("{caller} deleted user {user}: {summary:?}");
        Ok(summary)
    }

    pub fn distribute_giveaway(
        &mut self,
        game_id: GameId,
        caller: &UserId,
        request: &GiveawayRequest,
        now: DateTime<Utc>,
    ) -> Result<GiveawayOutcome, PoolError> {
        self.require_admin(caller)?;
        self.game(game_id)?;
        if let Some(outcome) = self.storage.giveaway(&request.request_id)? {
            tracing::debug!("replaying giveaway {}", request.request_id);
            return Ok(outcome);
        }
        let requested = request
            .allocations
            .iter()
            .fold(0usize, |total, a| total.saturating_add(a.count));
        let available = self
            .storage
            .boxes(game_id)?
            .iter()
            .filter(|b| b.status == BoxStatus::Available)
            .count();
        if requested > available {
            return Err(PoolError::InsufficientInventory {
                requested,
                available,
            });
        }

        let (outcome, written) = self.storage.apply_giveaway(
            game_id,
            &request.request_id,
            &request.allocations,
            now,
        )?;
        self.feed.publish(written);
        tracing::info!(
            "giveaway {} granted {requested} free cells in game {game_id}",
            request.request_id
        );
        Ok(outcome)
    }

    /// Release every reservation older than the staleness threshold, in all games.
    pub fn expire_reservations(&mut self, now: DateTime<Utc>) -> Result<usize, PoolError> {
        let cutoff = now - self.reservation_ttl;
        let mut expired = 0;
        for game in self.storage.games()? {
            let written = self.storage.transition_boxes(
                game.id,
                BoxScope::All,
                &Transition::Expire { cutoff },
            )?;
            expired += written.len();
            self.feed.publish(written);
        }
        if expired > 0 {
            tracing::info!("expired {expired} stale reservations");
        }
        Ok(expired)
    }

    /// Record the latest provider reading for a game. `None` marks the score
    /// unavailable. Returns the game if its status moved forward.
    pub fn apply_score(
        &mut self,
        game_id: GameId,
        score: Option<Score>,
    ) -> Result<Option<Game>, PoolError> {
        let game = self.game(game_id)?;
        let Some(score) = score else {
            self.scores.remove(&game_id);
            return Ok(None);
        };
        let state = score.game_state;
        self.scores.insert(game_id, score);
        let Some(next) = advanced_status(game.status, state) else {
            return Ok(None);
        };
        let advanced = self.storage.update_game_if(
            game_id,
            |current| current.status < next,
            |current| Game {
                status: next,
                ..current.clone()
            },
        )?;
        if advanced.is_some() {
            tracing::info!("game {game_id} is now {next:?}");
        }
        Ok(advanced)
    }

    fn game(&self, game_id: GameId) -> Result<Game, PoolError> {
        self.storage
            .game(game_id)?
            .ok_or(PoolError::UnknownGame(game_id))
    }

    fn require_admin(&self, caller: &UserId) -> Result<(), PoolError> {
        if self.storage.is_admin(caller)? {
            Ok(())
        } else {
            tracing::warn!("{caller} attempted an admin action");
            Err(PoolError::Forbidden)
        }
    }

    fn paid_count(&self, game_id: GameId, user: &UserId) -> Result<u64, PoolError> {
        let boxes = self.storage.boxes(game_id)?;
        Ok(paid_counts(&boxes).get(user).copied().unwrap_or(0))
    }

    fn release(&mut self, game_id: GameId, user: &UserId) -> Result<Vec<Cell>, PoolError> {
        let written = self.storage.transition_boxes(
            game_id,
            BoxScope::All,
            &Transition::Release { user: user.clone() },
        )?;
        let cells = written.iter().map(|b| b.cell).collect::<Vec<_>>();
        self.feed.publish(written);
        tracing::info!("released {} cells held by {user} in game {game_id}", cells.len());
        Ok(cells)
    }
}
