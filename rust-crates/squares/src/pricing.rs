use crate::grid::{
    GridBox,
    UserId,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashMap;

/// Volume pricing in whole dollars: singles, ten-packs and twenty-packs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSchedule {
    pub per_box: u64,
    pub ten_pack: u64,
    pub twenty_pack: u64,
}

impl Default for PriceSchedule {
    fn default() -> Self {
        Self {
            per_box: 5,
            ten_pack: 35,
            twenty_pack: 60,
        }
    }
}

impl PriceSchedule {
    pub fn new(per_box: u64, ten_pack: u64, twenty_pack: u64) -> Self {
        Self {
            per_box,
            ten_pack,
            twenty_pack,
        }
    }

    /// Saturates at `u64::MAX` instead of overflowing on absurd counts.
    pub fn price(&self, count: u64) -> u64 {
        if count >= 20 {
            (count / 20)
                .saturating_mul(self.twenty_pack)
                .saturating_add(self.price(count % 20))
        } else if count >= 10 {
            (count / 10)
                .saturating_mul(self.ten_pack)
                .saturating_add((count % 10).saturating_mul(self.per_box))
        } else {
            count.saturating_mul(self.per_box)
        }
    }

    /// Sum of per-owner prices over paid holds. Discounts apply to each owner's
    /// own count, never to the pool as a whole; gifted cells are excluded.
    pub fn pot<'a>(&self, boxes: impl IntoIterator<Item = &'a GridBox>) -> u64 {
        paid_counts(boxes)
            .into_values()
            .map(|count| self.price(count))
            .sum()
    }

    /// Marginal charge for adding `additional` cells to `existing` paid ones.
    pub fn upgrade_delta(&self, existing: u64, additional: u64) -> u64 {
        if additional == 0 {
            return 0;
        }
        self.price(existing.saturating_add(additional))
            .saturating_sub(self.price(existing))
    }
}

pub fn price(count: u64) -> u64 {
    PriceSchedule::default().price(count)
}

pub fn paid_counts<'a>(
    boxes: impl IntoIterator<Item = &'a GridBox>,
) -> HashMap<&'a UserId, u64> {
    let mut counts = HashMap::new();
    for cell in boxes.into_iter().filter(|cell| cell.is_paid_hold()) {
        if let Some(user) = cell.user_id.as_ref() {
            *counts.entry(user).or_insert(0) += 1;
        }
    }
    counts
}
