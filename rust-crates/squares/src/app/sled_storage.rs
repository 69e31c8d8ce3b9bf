// Sled-backed pool storage. Every guarded write is a compare-and-swap on the
// serialized record, retried against the fresh value when another writer wins.
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
        QuarterResult,
        Transition,
        UserId,
    },
    pool::{
        Allocation,
        GiveawayOutcome,
    },
};
use anyhow::Context;
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Serialize,
    de::DeserializeOwned,
};
use sled::{
    Config,
    Db,
    Transactional,
    Tree,
    transaction::{
        ConflictableTransactionError,
        ConflictableTransactionResult,
        TransactionError,
    },
};
use std::path::Path;

#[derive(Clone)]
pub struct SledPoolStorage {
    games: Tree,
    boxes: Tree,
    results: Tree,
    profiles: Tree,
    admins: Tree,
    giveaways: Tree,
}

impl SledPoolStorage {
    pub fn new(db: &Db) -> crate::Result<Self> {
        let games = db.open_tree("games").context("open games tree")?;
        let boxes = db.open_tree("boxes").context("open boxes tree")?;
        let results = db
            .open_tree("quarter_results")
            .context("open quarter_results tree")?;
        let profiles = db.open_tree("profiles").context("open profiles tree")?;
        let admins = db.open_tree("admins").context("open admins tree")?;
        let giveaways = db.open_tree("giveaways").context("open giveaways tree")?;

        Ok(Self {
            games,
            boxes,
            results,
            profiles,
            admins,
            giveaways,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let config = Config::default().path(path);
        let db = config.open().context("open sled database")?;
        Self::new(&db)
    }

    fn game_key(id: GameId) -> [u8; 4] {
        id.0.to_be_bytes()
    }

    /// Game id then row then column, so a prefix scan yields grid order.
    fn box_key(game: GameId, cell: Cell) -> [u8; 6] {
        let [a, b, c, d] = game.0.to_be_bytes();
        [a, b, c, d, cell.row, cell.col]
    }

    fn result_key(result: &QuarterResult) -> [u8; 5] {
        let [a, b, c, d] = result.game_id.0.to_be_bytes();
        [a, b, c, d, result.quarter.number()]
    }

    fn candidate_cells(scope: BoxScope<'_>) -> Vec<Cell> {
        match scope {
            BoxScope::All | BoxScope::Limit(_) => Cell::all().collect(),
            BoxScope::Cells(cells) => cells.to_vec(),
        }
    }
}

impl PoolStorage for SledPoolStorage {
    fn game(&self, id: GameId) -> crate::Result<Option<Game>> {
        self.games
            .get(Self::game_key(id))
            .context("read game")?
            .map(|bytes| deserialize(&bytes))
            .transpose()
    }

    fn games(&self) -> crate::Result<Vec<Game>> {
        values(&self.games, "games")
    }

    fn insert_game(&mut self, game: &Game) -> crate::Result<bool> {
        // cells first, so a crash between the two writes heals on the next start
        for cell in Cell::all() {
            let bytes = serialize_record(&GridBox::available(game.id, cell), "grid box")?;
            let _ = self
                .boxes
                .compare_and_swap(Self::box_key(game.id, cell), None as Option<&[u8]>, Some(bytes))
                .context("create grid box")?;
        }
        self.boxes.flush().context("flush grid boxes")?;

        let bytes = serialize_record(game, "game")?;
        let created = self
            .games
            .compare_and_swap(Self::game_key(game.id), None as Option<&[u8]>, Some(bytes))
            .context("create game")?
            .is_ok();
        self.games.flush().context("flush games")?;
        Ok(created)
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
        let updated = swap_record(&self.games, &Self::game_key(id), "game", |game: &Game| {
            guard(game).then(|| apply(game))
        })?;
        self.games.flush().context("flush games")?;
        Ok(updated)
    }

    fn boxes(&self, game: GameId) -> crate::Result<Vec<GridBox>> {
        self.boxes
            .scan_prefix(Self::game_key(game))
            .map(|entry| {
                let (_, bytes) = entry.context("iterate grid boxes")?;
                deserialize(&bytes)
            })
            .collect()
    }

    fn transition_boxes(
        &mut self,
        game: GameId,
        scope: BoxScope<'_>,
        transition: &Transition,
    ) -> crate::Result<Vec<GridBox>> {
        let limit = match scope {
            BoxScope::Limit(n) => Some(n),
            _ => None,
        };
        let mut written = Vec::new();
        for cell in Self::candidate_cells(scope) {
            if limit.is_some_and(|n| written.len() >= n) {
                break;
            }
            let key = Self::box_key(game, cell);
            let next = swap_record(&self.boxes, &key, "grid box", |current: &GridBox| {
                transition
                    .applies_to(current)
                    .then(|| transition.apply(current))
            })?;
            written.extend(next);
        }
        if !written.is_empty() {
            self.boxes.flush().context("flush grid boxes")?;
        }
        Ok(written)
    }

    fn quarter_results(&self, game: GameId) -> crate::Result<Vec<QuarterResult>> {
        self.results
            .scan_prefix(Self::game_key(game))
            .map(|entry| {
                let (_, bytes) = entry.context("iterate quarter results")?;
                deserialize(&bytes)
            })
            .collect()
    }

    fn upsert_quarter_result(&mut self, result: &QuarterResult) -> crate::Result<()> {
        let bytes = serialize_record(result, "quarter result")?;
        self.results
            .insert(Self::result_key(result), bytes)
            .context("persist quarter result")?;
        self.results.flush().context("flush quarter results")?;
        Ok(())
    }

    fn clear_winning_user(&mut self, user: &UserId) -> crate::Result<usize> {
        let mut cleared = 0;
        for entry in self.results.iter() {
            let (key, _) = entry.context("iterate quarter results")?;
            let updated = swap_record(
                &self.results,
                key.as_ref(),
                "quarter result",
                |result: &QuarterResult| {
                    (result.winning_user_id.as_ref() == Some(user)).then(|| QuarterResult {
                        winning_user_id: None,
                        ..result.clone()
                    })
                },
            )?;
            if updated.is_some() {
                cleared += 1;
            }
        }
        self.results.flush().context("flush quarter results")?;
        Ok(cleared)
    }

    fn profile(&self, user: &UserId) -> crate::Result<Option<Profile>> {
        self.profiles
            .get(user.as_str())
            .context("read profile")?
            .map(|bytes| deserialize(&bytes))
            .transpose()
    }

    fn profiles(&self) -> crate::Result<Vec<Profile>> {
        values(&self.profiles, "profiles")
    }

    fn upsert_profile(&mut self, profile: &Profile) -> crate::Result<()> {
        let bytes = serialize_record(profile, "profile")?;
        self.profiles
            .insert(profile.user_id.as_str(), bytes)
            .context("persist profile")?;
        self.profiles.flush().context("flush profiles")?;
        Ok(())
    }

    fn delete_profile(&mut self, user: &UserId) -> crate::Result<bool> {
        let removed = self
            .profiles
            .remove(user.as_str())
            .context("remove profile")?;
        self.profiles.flush().context("flush profiles")?;
        Ok(removed.is_some())
    }

    fn is_admin(&self, user: &UserId) -> crate::Result<bool> {
        self.admins
            .contains_key(user.as_str())
            .context("read admin membership")
    }

    fn add_admin(&mut self, user: &UserId) -> crate::Result<()> {
        self.admins
            .insert(user.as_str(), &[] as &[u8])
            .context("persist admin")?;
        self.admins.flush().context("flush admins")?;
        Ok(())
    }

    fn remove_admin(&mut self, user: &UserId) -> crate::Result<bool> {
        let removed = self.admins.remove(user.as_str()).context("remove admin")?;
        self.admins.flush().context("flush admins")?;
        Ok(removed.is_some())
    }

    fn giveaway(&self, request_id: &str) -> crate::Result<Option<GiveawayOutcome>> {
        self.giveaways
            .get(request_id)
            .context("read giveaway")?
            .map(|bytes| deserialize(&bytes))
            .transpose()
    }

    fn apply_giveaway(
        &mut self,
        game: GameId,
        request_id: &str,
        allocations: &[Allocation],
        at: DateTime<Utc>,
    ) -> crate::Result<(GiveawayOutcome, Vec<GridBox>)> {
        type Applied = (GiveawayOutcome, Vec<GridBox>);
        let applied = (&self.boxes, &self.giveaways).transaction(
            |(boxes, giveaways)| -> ConflictableTransactionResult<Applied, anyhow::Error> {
                if let Some(bytes) = giveaways.get(request_id)? {
                    let outcome: GiveawayOutcome =
                        deserialize(&bytes).map_err(ConflictableTransactionError::Abort)?;
                    return Ok((outcome, Vec::new()));
                }
                let (outcome, written) = allocate_in_grid_order::<
                    ConflictableTransactionError<anyhow::Error>,
                    _,
                >(allocations, at, |cell, grant| {
                    let key = Self::box_key(game, cell);
                    let Some(bytes) = boxes.get(&key[..])? else {
                        return Ok(None);
                    };
                    let current: GridBox =
                        deserialize(&bytes).map_err(ConflictableTransactionError::Abort)?;
                    if !grant.applies_to(&current) {
                        return Ok(None);
                    }
                    let next = grant.apply(&current);
                    let next_bytes = serialize_record(&next, "grid box")
                        .map_err(ConflictableTransactionError::Abort)?;
                    boxes.insert(&key[..], next_bytes)?;
                    Ok(Some(next))
                })?;
                let bytes = serialize_record(&outcome, "giveaway outcome")
                    .map_err(ConflictableTransactionError::Abort)?;
                giveaways.insert(request_id, bytes)?;
                Ok((outcome, written))
            },
        );
        let (outcome, written) = applied.map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => {
                anyhow::Error::new(e).context("giveaway transaction")
            }
        })?;
        self.boxes.flush().context("flush grid boxes")?;
        self.giveaways.flush().context("flush giveaways")?;
        Ok((outcome, written))
    }
}

/// Replace the record at `key` with `update(current)` using compare-and-swap.
/// `None` from `update`, or a missing record, leaves the tree untouched.
fn swap_record<T, F>(tree: &Tree, key: &[u8], label: &str, update: F) -> crate::Result<Option<T>>
where
    T: Serialize + DeserializeOwned,
    F: Fn(&T) -> Option<T>,
{
    loop {
        let Some(current_bytes) = tree.get(key).with_context(|| format!("read {label}"))?
        else {
            return Ok(None);
        };
        let current: T = deserialize(&current_bytes)?;
        let Some(next) = update(&current) else {
            return Ok(None);
        };
        let next_bytes = serialize_record(&next, label)?;
        let swapped = tree
            .compare_and_swap(key, Some(current_bytes), Some(next_bytes))
            .with_context(|| format!("swap {label}"))?;
        if swapped.is_ok() {
            return Ok(Some(next));
        }
        tracing::debug!("lost {label} swap race, retrying");
    }
}

fn values<T: DeserializeOwned>(tree: &Tree, label: &str) -> crate::Result<Vec<T>> {
    tree.iter()
        .map(|entry| {
            let (_, bytes) = entry.with_context(|| format!("iterate {label}"))?;
            deserialize(&bytes)
        })
        .collect()
}

fn serialize_record<T: Serialize>(value: &T, label: &str) -> crate::Result<Vec<u8>> {
    serde_json::to_vec(value).with_context(|| format!("serialize {label}"))
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> crate::Result<T> {
    serde_json::from_slice(bytes).context("deserialize sled record")
}
