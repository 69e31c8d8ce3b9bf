use crate::{
    Result,
    app::{
        command_api::{
            Command,
            CommandApi,
            Responder,
        },
        pool_storage::PoolStorage,
        score_source::ScoreSource,
    },
    error::PoolError,
    pool::Pool,
};
use chrono::Utc;
use rand::{
    SeedableRng,
    rngs::StdRng,
};
use std::time::Duration;
use tokio::time::{
    Instant,
    Interval,
    MissedTickBehavior,
};
use tracing_subscriber::EnvFilter;

pub mod actix_command_api;
pub mod change_feed;
pub mod command_api;
pub mod espn_score_source;
pub mod in_memory_storage;
pub mod pool_storage;
pub mod score_source;
pub mod sled_storage;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Continue,
    Exit,
}

pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub struct App<API, Scores, Storage> {
    api: API,
    scores: Scores,
    pool: Pool<Storage>,
    sweep: Interval,
    rng: StdRng,
}

impl<API, Scores, Storage> App<API, Scores, Storage> {
    pub fn new(
        api: API,
        scores: Scores,
        pool: Pool<Storage>,
        sweep_period: Duration,
    ) -> Self {
        let mut sweep = tokio::time::interval_at(Instant::now() + sweep_period, sweep_period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            api,
            scores,
            pool,
            sweep,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_rng(self, rng: StdRng) -> Self {
        Self { rng, ..self }
    }

    pub fn pool(&self) -> &Pool<Storage> {
        &self.pool
    }
}

impl<API: CommandApi, Scores: ScoreSource, Storage: PoolStorage> App<API, Scores, Storage> {
    /// Wait for the next thing to happen and apply it. Pool errors are answered
    /// to the caller or logged; only a closed API or score feed ends the run.
    pub async fn run(&mut self, interrupt: impl Future<Output = ()>) -> Result<RunState> {
        tokio::select! {
            _ = interrupt => Ok(RunState::Exit),
            command = self.api.next_command() => {
                handle_command(&mut self.pool, &mut self.rng, command?);
                Ok(RunState::Continue)
            }
            reading = self.scores.next_score() => {
                let reading = reading?;
                if let Err(e) = self.pool.apply_score(reading.game_id, reading.score) {
                    tracing::warn!("failed to apply score for game {}: {e}", reading.game_id);
                }
                Ok(RunState::Continue)
            }
            _ = self.sweep.tick() => {
                if let Err(e) = self.pool.expire_reservations(Utc::now()) {
                    tracing::error!("reservation sweep failed: {e}");
                }
                Ok(RunState::Continue)
            }
        }
    }
}

fn handle_command<S: PoolStorage>(pool: &mut Pool<S>, rng: &mut StdRng, command: Command) {
    tracing::debug!("received {} command", command.name());
    let now = Utc::now();
    match command {
        Command::Board { game_id, responder } => respond(responder, pool.board(game_id)),
        Command::Score { game_id, responder } => respond(responder, pool.score(game_id)),
        Command::Quote {
            game_id,
            caller,
            count,
            responder,
        } => respond(responder, pool.quote(game_id, &caller, count)),
        Command::EnsureProfile {
            caller,
            full_name,
            email,
            responder,
        } => respond(
            responder,
            pool.ensure_profile(&caller, &full_name, &email, now),
        ),
        Command::Claim {
            game_id,
            caller,
            cells,
            responder,
        } => respond(responder, pool.claim(game_id, &caller, &cells, now)),
        Command::ReleaseMine {
            game_id,
            caller,
            responder,
        } => respond(responder, pool.release_mine(game_id, &caller)),
        Command::ConfirmPayment {
            game_id,
            caller,
            user,
            responder,
        } => respond(responder, pool.confirm_payment(game_id, &caller, &user, now)),
        Command::ReleaseBoxes {
            game_id,
            caller,
            user,
            responder,
        } => respond(responder, pool.release_boxes(game_id, &caller, &user)),
        Command::AssignNumbers {
            game_id,
            caller,
            responder,
        } => respond(responder, pool.assign_numbers(game_id, &caller, rng)),
        Command::ResetNumbers {
            game_id,
            caller,
            responder,
        } => respond(responder, pool.reset_numbers(game_id, &caller)),
        Command::RecordQuarter {
            game_id,
            caller,
            quarter,
            home_score,
            away_score,
            responder,
        } => respond(
            responder,
            pool.record_quarter(game_id, &caller, quarter, home_score, away_score, now),
        ),
        Command::DeleteUser {
            caller,
            user,
            responder,
        } => respond(responder, pool.delete_user(&caller, &user)),
        Command::DistributeGiveaway {
            game_id,
            caller,
            request,
            responder,
        } => respond(
            responder,
            pool.distribute_giveaway(game_id, &caller, &request, now),
        ),
        Command::ExpireReservations { responder } => {
            respond(responder, pool.expire_reservations(now))
        }
    }
}

fn respond<T>(responder: Responder<T>, result: std::result::Result<T, PoolError>) {
    match &result {
        Err(PoolError::Storage(e)) => tracing::error!("storage failure: {e:#}"),
        Err(e) => tracing::debug!("command rejected: {e}"),
        Ok(_) => {}
    }
    if responder.send(result).is_err() {
        tracing::warn!("caller went away before the reply was sent");
    }
}
