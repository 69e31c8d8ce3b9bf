use crate::grid::{
    Cell,
    GameId,
};
use actix_web::{
    HttpResponse,
    ResponseError,
    http::StatusCode,
};
use serde_json::json;

/// Failures surfaced to callers of pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("caller is not authenticated")]
    Unauthenticated,
    #[error("caller is not an admin")]
    Forbidden,
    #[error("unknown game {0}")]
    UnknownGame(GameId),
    #[error("cell {0} is outside the 10x10 grid")]
    InvalidCell(Cell),
    #[error("no cells selected")]
    EmptySelection,
    #[error("{0} cells is more than the grid holds")]
    TooManyCells(u64),
    #[error("numbers are already assigned; reset them first")]
    NumbersAlreadyAssigned,
    #[error("numbers have not been assigned yet")]
    NumbersNotAssigned,
    #[error("quarter {0} is not in 1..=4")]
    InvalidQuarter(u8),
    #[error("quarter results are already recorded")]
    ResultsAlreadyRecorded,
    #[error("requested {requested} cells but only {available} are available")]
    InsufficientInventory { requested: usize, available: usize },
    #[error("admins cannot delete themselves")]
    CannotDeleteSelf,
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl ResponseError for PoolError {
    fn status_code(&self) -> StatusCode {
        match self {
            PoolError::Unauthenticated => StatusCode::UNAUTHORIZED,
            PoolError::Forbidden => StatusCode::FORBIDDEN,
            PoolError::UnknownGame(_) => StatusCode::NOT_FOUND,
            PoolError::InvalidCell(_)
            | PoolError::EmptySelection
            | PoolError::TooManyCells(_)
            | PoolError::InvalidQuarter(_)
            | PoolError::CannotDeleteSelf => StatusCode::UNPROCESSABLE_ENTITY,
            PoolError::NumbersAlreadyAssigned
            | PoolError::NumbersNotAssigned
            | PoolError::ResultsAlreadyRecorded
            | PoolError::InsufficientInventory { .. } => StatusCode::CONFLICT,
            PoolError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
