use crate::{
    grid::{
        Cell,
        Game,
        GameId,
        GridBox,
        Profile,
        QuarterResult,
        Transition,
        UserId,
    },
    pool::{
        Allocation,
        GiveawayOutcome,
        Grant,
    },
};
use chrono::{
    DateTime,
    Utc,
};

/// Which cells of a game a transition is offered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxScope<'a> {
    All,
    Cells(&'a [Cell]),
    /// The first `n` cells, in grid order, that the transition applies to.
    Limit(usize),
}

pub trait PoolStorage {
    fn game(&self, id: GameId) -> crate::Result<Option<Game>>;

    fn games(&self) -> crate::Result<Vec<Game>>;

    /// create the game together with all of its cells as available; returns false if it
    /// already existed, in which case nothing is written
    fn insert_game(&mut self, game: &Game) -> crate::Result<bool>;

    /// replace the stored game with `apply(current)` only while `guard(current)` holds
    /// at write time; `None` when the game is missing or the guard failed
    fn update_game_if<G, F>(
        &mut self,
        id: GameId,
        guard: G,
        apply: F,
    ) -> crate::Result<Option<Game>>
    where
        G: Fn(&Game) -> bool,
        F: Fn(&Game) -> Game;

    /// all cells of a game in grid order
    fn boxes(&self, game: GameId) -> crate::Result<Vec<GridBox>>;

    /// Apply `transition` to every in-scope cell for which it still applies, each cell
    /// checked and written atomically. Returns the rows as written.
    fn transition_boxes(
        &mut self,
        game: GameId,
        scope: BoxScope<'_>,
        transition: &Transition,
    ) -> crate::Result<Vec<GridBox>>;

    fn quarter_results(&self, game: GameId) -> crate::Result<Vec<QuarterResult>>;

    /// write or overwrite the result keyed by game and quarter
    fn upsert_quarter_result(&mut self, result: &QuarterResult) -> crate::Result<()>;

    /// remove `user` as the winner from every recorded result
    fn clear_winning_user(&mut self, user: &UserId) -> crate::Result<usize>;

    fn profile(&self, user: &UserId) -> crate::Result<Option<Profile>>;

    fn profiles(&self) -> crate::Result<Vec<Profile>>;

    fn upsert_profile(&mut self, profile: &Profile) -> crate::Result<()>;

    fn delete_profile(&mut self, user: &UserId) -> crate::Result<bool>;

    fn is_admin(&self, user: &UserId) -> crate::Result<bool>;

    fn add_admin(&mut self, user: &UserId) -> crate::Result<()>;

    fn remove_admin(&mut self, user: &UserId) -> crate::Result<bool>;

    fn giveaway(&self, request_id: &str) -> crate::Result<Option<GiveawayOutcome>>;

    /// Grant every allocation its cells and record the outcome under `request_id`
    /// as one atomic write: either all of it lands or none of it does. A request id
    /// that is already recorded returns its stored outcome and writes nothing.
    /// Returns the outcome and the rows written by this call.
    fn apply_giveaway(
        &mut self,
        game: GameId,
        request_id: &str,
        allocations: &[Allocation],
        at: DateTime<Utc>,
    ) -> crate::Result<(GiveawayOutcome, Vec<GridBox>)>;
}

/// Walk the grid once in order, handing each allocation its next cells.
/// `try_grant` writes one cell and returns the row, or `None` if the grant
/// does not apply to it.
pub(crate) fn allocate_in_grid_order<E, F>(
    allocations: &[Allocation],
    at: DateTime<Utc>,
    mut try_grant: F,
) -> Result<(GiveawayOutcome, Vec<GridBox>), E>
where
    F: FnMut(Cell, &Transition) -> Result<Option<GridBox>, E>,
{
    let mut cells = Cell::all();
    let mut grants = Vec::new();
    let mut written = Vec::new();
    for allocation in allocations.iter().filter(|a| a.count > 0) {
        let grant = Transition::Grant {
            user: allocation.user_id.clone(),
            at,
        };
        let mut granted = Vec::new();
        while granted.len() < allocation.count {
            let Some(cell) = cells.next() else {
                break;
            };
            if let Some(row) = try_grant(cell, &grant)? {
                granted.push(cell);
                written.push(row);
            }
        }
        grants.push(Grant {
            user_id: allocation.user_id.clone(),
            cells: granted,
        });
    }
    Ok((GiveawayOutcome { grants }, written))
}
