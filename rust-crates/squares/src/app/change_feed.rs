// Push notification of cell changes and the merge-by-cell consumer side.
use crate::grid::{
    Cell,
    GameId,
    GridBox,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1_024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxChange {
    pub seq: u64,
    pub row: GridBox,
}

/// Fan-out of written cells. Delivery is best effort: lagging subscribers
/// lose events and are expected to resync from a board snapshot.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<BoxChange>,
    seq: Arc<AtomicU64>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoxChange> {
        self.sender.subscribe()
    }

    /// Sequence number of the most recent published change.
    pub fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn publish(&self, rows: impl IntoIterator<Item = GridBox>) {
        for row in rows {
            let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
            // no subscribers is not an error
            let _ = self.sender.send(BoxChange { seq, row });
        }
    }
}

/// Client-side view of one game's grid. Changes may arrive duplicated or out
/// of order; each cell keeps the row with the highest sequence number seen.
#[derive(Debug, Clone)]
pub struct GridView {
    game_id: GameId,
    cells: BTreeMap<Cell, (u64, GridBox)>,
}

impl GridView {
    /// Seed from a board snapshot taken at feed position `seq`.
    pub fn new(game_id: GameId, seq: u64, boxes: impl IntoIterator<Item = GridBox>) -> Self {
        let cells = boxes
            .into_iter()
            .filter(|row| row.game_id == game_id)
            .map(|row| (row.cell, (seq, row)))
            .collect();
        Self { game_id, cells }
    }

    /// Returns whether the change replaced the stored row.
    pub fn apply(&mut self, change: &BoxChange) -> bool {
        if change.row.game_id != self.game_id {
            return false;
        }
        match self.cells.get(&change.row.cell) {
            Some((seen, _)) if *seen >= change.seq => false,
            _ => {
                self.cells
                    .insert(change.row.cell, (change.seq, change.row.clone()));
                true
            }
        }
    }

    pub fn get(&self, cell: Cell) -> Option<&GridBox> {
        self.cells.get(&cell).map(|(_, row)| row)
    }

    pub fn boxes(&self) -> impl Iterator<Item = &GridBox> {
        self.cells.values().map(|(_, row)| row)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::grid::{
        BoxStatus,
        Transition,
        UserId,
    };
    use chrono::Utc;

    fn claimed(game: GameId, cell: Cell, user: &str) -> GridBox {
        Transition::Claim {
            user: UserId::new(user),
            at: Utc::now(),
        }
        .apply(&GridBox::available(game, cell))
    }

    fn empty_view(game: GameId) -> GridView {
        GridView::new(game, 0, Cell::all().map(|cell| GridBox::available(game, cell)))
    }

    #[tokio::test]
    async fn publish__subscribers_receive_rows_in_sequence() {
        // given
        let feed = ChangeFeed::default();
        let mut receiver = feed.subscribe();
        let row = claimed(GameId(1), Cell::new(1, 2), "alice");

        // when
        feed.publish([row.clone(), GridBox::available(GameId(1), Cell::new(1, 2))]);

        // then
        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first, BoxChange { seq: 1, row });
        assert_eq!(second.seq, 2);
        assert_eq!(feed.current_seq(), 2);
    }

    #[test]
    fn publish__without_subscribers__still_advances_sequence() {
        let feed = ChangeFeed::new(4);
        feed.publish([GridBox::available(GameId(1), Cell::new(0, 0))]);
        assert_eq!(feed.current_seq(), 1);
    }

    #[test]
    fn apply__out_of_order_delivery__keeps_latest_write() {
        // given
        let game = GameId(1);
        let cell = Cell::new(3, 3);
        let mut view = empty_view(game);
        let newer = BoxChange {
            seq: 5,
            row: GridBox::available(game, cell),
        };
        let older = BoxChange {
            seq: 4,
            row: claimed(game, cell, "alice"),
        };

        // when
        let applied_newer = view.apply(&newer);
        let applied_older = view.apply(&older);

        // then
        assert!(applied_newer);
        assert!(!applied_older);
        assert_eq!(view.get(cell).unwrap().status, BoxStatus::Available);
    }

    #[test]
    fn apply__duplicate_delivery__is_idempotent() {
        // given
        let game = GameId(1);
        let mut view = empty_view(game);
        let change = BoxChange {
            seq: 1,
            row: claimed(game, Cell::new(0, 9), "bob"),
        };

        // when
        view.apply(&change);
        let again = view.apply(&change);

        // then
        assert!(!again);
        assert_eq!(view.boxes().count(), 100);
        assert_eq!(view.get(Cell::new(0, 9)), Some(&change.row));
    }

    #[test]
    fn apply__other_game__is_ignored() {
        let mut view = empty_view(GameId(1));
        let change = BoxChange {
            seq: 1,
            row: claimed(GameId(2), Cell::new(0, 0), "bob"),
        };
        assert!(!view.apply(&change));
        assert_eq!(view.get(Cell::new(0, 0)).unwrap().status, BoxStatus::Available);
    }

    #[test]
    fn apply__change_older_than_snapshot__is_ignored() {
        // given
        let game = GameId(1);
        let cell = Cell::new(2, 2);
        let mut view = GridView::new(game, 10, [claimed(game, cell, "alice")]);

        // when
        let applied = view.apply(&BoxChange {
            seq: 9,
            row: GridBox::available(game, cell),
        });

        // then
        assert!(!applied);
        assert_eq!(view.get(cell).unwrap().status, BoxStatus::Reserved);
    }
}
