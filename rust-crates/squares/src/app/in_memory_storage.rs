use crate::{
    app::pool_storage::{
        BoxScope,
        PoolStorage,
        allocate_in_grid_order,
    },
    grid::{
        Cell,
        Game,
        GameId,
        GridBox,
        Profile,
        Quarter,
        QuarterResult,
        Transition,
        UserId,
    },
    pool::{
        Allocation,
        GiveawayOutcome,
    },
};
use anyhow::anyhow;
use chrono::{
    DateTime,
    Utc,
};
use std::{
    collections::{
        BTreeMap,
        BTreeSet,
        HashMap,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
};

#[derive(Default)]
struct PoolState {
    games: BTreeMap<GameId, Game>,
    boxes: BTreeMap<(GameId, Cell), GridBox>,
    results: BTreeMap<(GameId, Quarter), QuarterResult>,
    profiles: BTreeMap<UserId, Profile>,
    admins: BTreeSet<UserId>,
    giveaways: HashMap<String, GiveawayOutcome>,
}

/// Process-local storage. Clones share state, and every operation runs under
/// one lock, so each cell update is atomic.
#[derive(Clone, Default)]
pub struct InMemoryPoolStorage {
    state: Arc<Mutex<PoolState>>,
}

impl InMemoryPoolStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> crate::Result<MutexGuard<'_, PoolState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("in-memory pool state lock poisoned"))
    }
}

impl PoolStorage for InMemoryPoolStorage {
    fn game(&self, id: GameId) -> crate::Result<Option<Game>> {
        Ok(self.state()?.games.get(&id).cloned())
    }

    fn games(&self) -> crate::Result<Vec<Game>> {
        Ok(self.state()?.games.values().cloned().collect())
    }

    fn insert_game(&mut self, game: &Game) -> crate::Result<bool> {
        let mut state = self.state()?;
        if state.games.contains_key(&game.id) {
            return Ok(false);
        }
        state.games.insert(game.id, game.clone());
        for cell in Cell::all() {
            state
                .boxes
                .insert((game.id, cell), GridBox::available(game.id, cell));
        }
        Ok(true)
    }

    fn update_game_if<G, F>(
        &mut self,
        id: GameId,
        guard: G,
        apply: F,
    ) -> crate::Result<Option<Game>>
    where
        G: Fn(&Game) -> bool,
        F: Fn(&Game) -> Game,
    {
        let mut state = self.state()?;
        let Some(current) = state.games.get_mut(&id) else {
            return Ok(None);
        };
        if !guard(current) {
            return Ok(None);
        }
        *current = apply(current);
        Ok(Some(current.clone()))
    }

    fn boxes(&self, game: GameId) -> crate::Result<Vec<GridBox>> {
        let state = self.state()?;
        Ok(state
            .boxes
            .range((game, Cell::new(0, 0))..=(game, Cell::new(u8::MAX, u8::MAX)))
            .map(|(_, cell)| cell.clone())
            .collect())
    }

    fn transition_boxes(
        &mut self,
        game: GameId,
        scope: BoxScope<'_>,
        transition: &Transition,
    ) -> crate::Result<Vec<GridBox>> {
        let mut state = self.state()?;
        let (cells, limit): (Vec<Cell>, Option<usize>) = match scope {
            BoxScope::All => (Cell::all().collect(), None),
            BoxScope::Cells(cells) => (cells.to_vec(), None),
            BoxScope::Limit(n) => (Cell::all().collect(), Some(n)),
        };
        let mut written = Vec::new();
        for cell in cells {
            if limit.is_some_and(|n| written.len() >= n) {
                break;
            }
            let Some(current) = state.boxes.get_mut(&(game, cell)) else {
                continue;
            };
            if transition.applies_to(current) {
                *current = transition.apply(current);
                written.push(current.clone());
            }
        }
        Ok(written)
    }

    fn quarter_results(&self, game: GameId) -> crate::Result<Vec<QuarterResult>> {
        let state = self.state()?;
        Ok(state
            .results
            .values()
            .filter(|result| result.game_id == game)
            .cloned()
            .collect())
    }

    fn upsert_quarter_result(&mut self, result: &QuarterResult) -> crate::Result<()> {
        self.state()?
            .results
            .insert((result.game_id, result.quarter), result.clone());
        Ok(())
    }

    fn clear_winning_user(&mut self, user: &UserId) -> crate::Result<usize> {
        let mut state = self.state()?;
        let mut cleared = 0;
        for result in state.results.values_mut() {
            if result.winning_user_id.as_ref() == Some(user) {
                result.winning_user_id = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    fn profile(&self, user: &UserId) -> crate::Result<Option<Profile>> {
        Ok(self.state()?.profiles.get(user).cloned())
    }

    fn profiles(&self) -> crate::Result<Vec<Profile>> {
        Ok(self.state()?.profiles.values().cloned().collect())
    }

    fn upsert_profile(&mut self, profile: &Profile) -> crate::Result<()> {
        self.state()?
            .profiles
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    fn delete_profile(&mut self, user: &UserId) -> crate::Result<bool> {
        Ok(self.state()?.profiles.remove(user).is_some())
    }

    fn is_admin(&self, user: &UserId) -> crate::Result<bool> {
        Ok(self.state()?.admins.contains(user))
    }

    fn add_admin(&mut self, user: &UserId) -> crate::Result<()> {
        self.state()?.admins.insert(user.clone());
        Ok(())
    }

    fn remove_admin(&mut self, user: &UserId) -> crate::Result<bool> {
        Ok(self.state()?.admins.remove(user))
    }

    fn giveaway(&self, request_id: &str) -> crate::Result<Option<GiveawayOutcome>> {
        Ok(self.state()?.giveaways.get(request_id).cloned())
    }

    fn apply_giveaway(
        &mut self,
        game: GameId,
        request_id: &str,
        allocations: &[Allocation],
        at: DateTime<Utc>,
    ) -> crate::Result<(GiveawayOutcome, Vec<GridBox>)> {
        let mut state = self.state()?;
        if let Some(outcome) = state.giveaways.get(request_id) {
            return Ok((outcome.clone(), Vec::new()));
        }
        let (outcome, written) =
            allocate_in_grid_order::<anyhow::Error, _>(allocations, at, |cell, grant| {
                let Some(current) = state.boxes.get_mut(&(game, cell)) else {
                    return Ok(None);
                };
                if !grant.applies_to(current) {
                    return Ok(None);
                }
                *current = grant.apply(current);
                Ok(Some(current.clone()))
            })?;
        state
            .giveaways
            .insert(request_id.to_string(), outcome.clone());
        Ok((outcome, written))
    }
}
