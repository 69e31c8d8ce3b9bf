use crate::{
    Result,
    grid::GameId,
    score::Score,
};

/// One provider reading. `score` is `None` when the provider was unreachable
/// or its payload unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreReading {
    pub game_id: GameId,
    pub score: Option<Score>,
}

pub trait ScoreSource {
    fn next_score(&mut self) -> impl Future<Output = Result<ScoreReading>>;
}
