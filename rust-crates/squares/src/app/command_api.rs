use crate::{
    error::PoolError,
    grid::{
        Cell,
        Game,
        GameId,
        Profile,
        QuarterResult,
        UserId,
    },
    pool::{
        BoardView,
        ClaimOutcome,
        DeleteSummary,
        GiveawayOutcome,
        GiveawayRequest,
        Quote,
    },
    score::Score,
};
use tokio::sync::oneshot;

pub trait CommandApi {
    fn next_command(&mut self) -> impl Future<Output = crate::Result<Command>>;
}

pub type Responder<T> = oneshot::Sender<Result<T, PoolError>>;

/// A request from the outside world, answered through its responder once the
/// app loop has applied it.
#[derive(Debug)]
pub enum Command {
    Board {
        game_id: GameId,
        responder: Responder<BoardView>,
    },
    Score {
        game_id: GameId,
        responder: Responder<Option<Score>>,
    },
    Quote {
        game_id: GameId,
        caller: UserId,
        count: u64,
        responder: Responder<Quote>,
    },
    EnsureProfile {
        caller: UserId,
        full_name: String,
        email: String,
        responder: Responder<Profile>,
    },
    Claim {
        game_id: GameId,
        caller: UserId,
        cells: Vec<Cell>,
        responder: Responder<ClaimOutcome>,
    },
    ReleaseMine {
        game_id: GameId,
        caller: UserId,
        responder: Responder<Vec<Cell>>,
    },
    ConfirmPayment {
        game_id: GameId,
        caller: UserId,
        user: UserId,
        responder: Responder<Vec<Cell>>,
    },
    ReleaseBoxes {
        game_id: GameId,
        caller: UserId,
        user: UserId,
        responder: Responder<Vec<Cell>>,
    },
    AssignNumbers {
        game_id: GameId,
        caller: UserId,
        responder: Responder<Game>,
    },
    ResetNumbers {
        game_id: GameId,
        caller: UserId,
        responder: Responder<Game>,
    },
    RecordQuarter {
        game_id: GameId,
        caller: UserId,
        quarter: u8,
        home_score: u32,
        away_score: u32,
        responder: Responder<QuarterResult>,
    },
    DeleteUser {
        caller: UserId,
        user: UserId,
        responder: Responder<DeleteSummary>,
    },
    DistributeGiveaway {
        game_id: GameId,
        caller: UserId,
        request: GiveawayRequest,
        responder: Responder<GiveawayOutcome>,
    },
    ExpireReservations {
        responder: Responder<usize>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Board { .. } => "board",
            Command::Score { .. } => "score",
            Command::Quote { .. } => "quote",
            Command::EnsureProfile { .. } => "ensure-profile",
            Command::Claim { .. } => "claim",
            Command::ReleaseMine { .. } => "release-mine",
            Command::ConfirmPayment { .. } => "confirm-payment",
            Command::ReleaseBoxes { .. } => "release-boxes",
            Command::AssignNumbers { .. } => "assign-numbers",
            Command::ResetNumbers { .. } => "reset-numbers",
            Command::RecordQuarter { .. } => "record-quarter",
            Command::DeleteUser { .. } => "delete-user",
            Command::DistributeGiveaway { .. } => "distribute-giveaway",
            Command::ExpireReservations { .. } => "expire-reservations",
        }
    }
}
