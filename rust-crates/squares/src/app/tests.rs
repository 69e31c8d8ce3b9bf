#![allow(non_snake_case)]

use super::*;
use crate::{
    app::{
        change_feed::ChangeFeed,
        in_memory_storage::InMemoryPoolStorage,
        score_source::ScoreReading,
    },
    grid::{
        BoxStatus,
        Cell,
        Game,
        GameId,
        GameStatus,
        Numbers,
        UserId,
    },
    pool::ClaimOutcome,
    score::GameState,
    test_helpers::{
        game_config,
        score_at,
    },
};
use anyhow::anyhow;
use chrono::TimeDelta;
use std::future::pending;
use tokio::sync::{
    mpsc,
    oneshot,
};

const GAME: GameId = GameId(1);

pub struct FakeCommandApi {
    recv: mpsc::Receiver<Command>,
}

impl FakeCommandApi {
    pub fn new_with_sender() -> (Self, mpsc::Sender<Command>) {
        let (send, recv) = mpsc::channel(10);
        (FakeCommandApi { recv }, send)
    }
}

impl CommandApi for FakeCommandApi {
    async fn next_command(&mut self) -> Result<Command> {
        self.recv
            .recv()
            .await
            .ok_or_else(|| anyhow!("No more commands"))
    }
}

pub struct FakeScoreSource {
    recv: mpsc::Receiver<ScoreReading>,
}

impl FakeScoreSource {
    pub fn new_with_sender() -> (Self, mpsc::Sender<ScoreReading>) {
        let (send, recv) = mpsc::channel(10);
        (FakeScoreSource { recv }, send)
    }
}

impl ScoreSource for FakeScoreSource {
    async fn next_score(&mut self) -> Result<ScoreReading> {
        match self.recv.recv().await {
            Some(reading) => Ok(reading),
            // a finished feed just goes quiet
            None => pending().await,
        }
    }
}

fn admin() -> UserId {
    UserId::new("admin")
}

fn pool(reservation_ttl: TimeDelta) -> Pool<InMemoryPoolStorage> {
    let mut pool = Pool::new(
        InMemoryPoolStorage::new(),
        ChangeFeed::default(),
        reservation_ttl,
    );
    pool.ensure_game(&Game::from_config(&game_config())).unwrap();
    pool.seed_admins(&[admin()]).unwrap();
    pool
}

type TestApp = App<FakeCommandApi, FakeScoreSource, InMemoryPoolStorage>;

fn app(
    reservation_ttl: TimeDelta,
    sweep_period: Duration,
) -> (TestApp, mpsc::Sender<Command>, mpsc::Sender<ScoreReading>) {
    let (api, commands) = FakeCommandApi::new_with_sender();
    let (scores, readings) = FakeScoreSource::new_with_sender();
    let app = App::new(api, scores, pool(reservation_ttl), sweep_period);
    (app, commands, readings)
}

fn quiet_app() -> (TestApp, mpsc::Sender<Command>, mpsc::Sender<ScoreReading>) {
    app(TimeDelta::minutes(10), Duration::from_secs(3_600))
}

#[tokio::test]
async fn run__claim_command__answers_through_responder() {
    // given
    let (mut app, commands, _readings) = quiet_app();
    let (responder, response) = oneshot::channel();
    let command = Command::Claim {
        game_id: GAME,
        caller: UserId::new("alice"),
        cells: vec![Cell::new(0, 0), Cell::new(9, 9)],
        responder,
    };

    // when
    commands.send(command).await.unwrap();
    let state = app.run(pending()).await.unwrap();

    // then
    assert_eq!(state, RunState::Continue);
    let outcome: ClaimOutcome = response.await.unwrap().unwrap();
    assert_eq!(outcome.claimed, vec![Cell::new(0, 0), Cell::new(9, 9)]);
    assert_eq!(outcome.amount_due, 10);
    let boxes = app.pool().storage().boxes(GAME).unwrap();
    assert_eq!(
        boxes
            .iter()
            .filter(|b| b.status == BoxStatus::Reserved)
            .count(),
        2
    );
}

#[tokio::test]
async fn run__non_admin_command__is_rejected_through_responder() {
    // given
    let (mut app, commands, _readings) = quiet_app();
    let (responder, response) = oneshot::channel();

    // when
    commands
        .send(Command::AssignNumbers {
            game_id: GAME,
            caller: UserId::new("alice"),
            responder,
        })
        .await
        .unwrap();
    app.run(pending()).await.unwrap();

    // then
    assert!(matches!(
        response.await.unwrap(),
        Err(PoolError::Forbidden)
    ));
    let game = app.pool().storage().game(GAME).unwrap().unwrap();
    assert!(game.numbers.is_none());
}

#[tokio::test]
async fn run__assign_numbers__draws_from_the_app_rng() {
    // given
    let (app, commands, _readings) = quiet_app();
    let mut app = app.with_rng(StdRng::seed_from_u64(42));
    let expected = Numbers::draw(&mut StdRng::seed_from_u64(42));
    let (responder, response) = oneshot::channel();

    // when
    commands
        .send(Command::AssignNumbers {
            game_id: GAME,
            caller: admin(),
            responder,
        })
        .await
        .unwrap();
    app.run(pending()).await.unwrap();

    // then
    let game = response.await.unwrap().unwrap();
    assert_eq!(game.numbers, Some(expected));
    assert_eq!(game.status, GameStatus::NumbersAssigned);
}

#[tokio::test]
async fn run__score_reading__advances_game_status() {
    // given
    let (mut app, _commands, readings) = quiet_app();
    let reading = ScoreReading {
        game_id: GAME,
        score: Some(score_at(GameState::Post, 4, (24, 20), &[])),
    };

    // when
    readings.send(reading.clone()).await.unwrap();
    app.run(pending()).await.unwrap();

    // then
    let game = app.pool().storage().game(GAME).unwrap().unwrap();
    assert_eq!(game.status, GameStatus::Final);
    assert_eq!(app.pool().score(GAME).unwrap(), reading.score);
}

#[tokio::test]
async fn run__sweep_tick__expires_stale_reservations() {
    // given
    let (api, _commands) = FakeCommandApi::new_with_sender();
    let (scores, _readings) = FakeScoreSource::new_with_sender();
    let mut pool = pool(TimeDelta::zero());
    pool.claim(GAME, &UserId::new("alice"), &[Cell::new(2, 2)], Utc::now())
        .unwrap();
    let mut app = App::new(api, scores, pool, Duration::from_millis(20));

    // when
    let state = app.run(pending()).await.unwrap();

    // then
    assert_eq!(state, RunState::Continue);
    let boxes = app.pool().storage().boxes(GAME).unwrap();
    assert!(boxes.iter().all(|b| b.status == BoxStatus::Available));
}

#[tokio::test]
async fn run__interrupt__exits() {
    // given
    let (mut app, _commands, _readings) = quiet_app();

    // when
    let state = app.run(async {}).await.unwrap();

    // then
    assert_eq!(state, RunState::Exit);
}

#[tokio::test]
async fn run__command_api_closed__is_an_error() {
    // given
    let (mut app, commands, _readings) = quiet_app();
    drop(commands);

    // when
    let result = app.run(pending()).await;

    // then
    assert!(result.is_err());
}
