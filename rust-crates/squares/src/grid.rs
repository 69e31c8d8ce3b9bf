// Domain types for the 10x10 squares grid and the per-cell claim state machine.
use crate::pricing::PriceSchedule;
use chrono::{
    DateTime,
    Utc,
};
use pool_config::GameConfig;
use rand::Rng;
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

pub const GRID_SIZE: u8 = 10;
pub const CELL_COUNT: usize = GRID_SIZE as usize * GRID_SIZE as usize;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GameId(pub u32);

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Grid coordinates. Rows carry the home digit, columns the away digit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Cell {
    pub row: u8,
    pub col: u8,
}

impl Cell {
    pub const fn new(row: u8, col: u8) -> Self {
        Self { row, col }
    }

    pub fn is_on_grid(&self) -> bool {
        self.row < GRID_SIZE && self.col < GRID_SIZE
    }

    pub fn index(&self) -> usize {
        self.row as usize * GRID_SIZE as usize + self.col as usize
    }

    /// Every cell in row-major order.
    pub fn all() -> impl Iterator<Item = Cell> {
        (0..GRID_SIZE).flat_map(|row| (0..GRID_SIZE).map(move |col| Cell { row, col }))
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxStatus {
    Available,
    Reserved,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridBox {
    pub game_id: GameId,
    pub cell: Cell,
    pub user_id: Option<UserId>,
    pub status: BoxStatus,
    pub reserved_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub is_free: bool,
}

impl GridBox {
    pub fn available(game_id: GameId, cell: Cell) -> Self {
        Self {
            game_id,
            cell,
            user_id: None,
            status: BoxStatus::Available,
            reserved_at: None,
            confirmed_at: None,
            is_free: false,
        }
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        self.user_id.as_ref() == Some(user)
    }

    /// Counts toward the owner's paid total.
    pub fn is_paid_hold(&self) -> bool {
        matches!(self.status, BoxStatus::Reserved | BoxStatus::Confirmed)
            && self.user_id.is_some()
            && !self.is_free
    }

    /// An owner is present exactly when the cell is not available.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            BoxStatus::Available => self.user_id.is_none(),
            BoxStatus::Reserved | BoxStatus::Confirmed => self.user_id.is_some(),
        }
    }
}

/// A guarded change to a single cell. Storage applies a transition only to
/// cells for which `applies_to` holds at write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Claim { user: UserId, at: DateTime<Utc> },
    Confirm { user: UserId, at: DateTime<Utc> },
    Release { user: UserId },
    Expire { cutoff: DateTime<Utc> },
    Grant { user: UserId, at: DateTime<Utc> },
    Revoke { user: UserId },
}

impl Transition {
    pub fn applies_to(&self, current: &GridBox) -> bool {
        match self {
            Transition::Claim { .. } | Transition::Grant { .. } => {
                current.status == BoxStatus::Available
            }
            Transition::Confirm { user, .. } | Transition::Release { user } => {
                current.status == BoxStatus::Reserved && current.is_owned_by(user)
            }
            Transition::Expire { cutoff } => {
                current.status == BoxStatus::Reserved
                    && current.reserved_at.is_none_or(|at| at < *cutoff)
            }
            Transition::Revoke { user } => {
                current.status != BoxStatus::Available && current.is_owned_by(user)
            }
        }
    }

    pub fn apply(&self, current: &GridBox) -> GridBox {
        match self {
            Transition::Claim { user, at } => GridBox {
                user_id: Some(user.clone()),
                status: BoxStatus::Reserved,
                reserved_at: Some(*at),
                confirmed_at: None,
                is_free: false,
                ..current.clone()
            },
            Transition::Confirm { at, .. } => GridBox {
                status: BoxStatus::Confirmed,
                confirmed_at: Some(*at),
                ..current.clone()
            },
            Transition::Grant { user, at } => GridBox {
                user_id: Some(user.clone()),
                status: BoxStatus::Confirmed,
                reserved_at: Some(*at),
                confirmed_at: Some(*at),
                is_free: true,
                ..current.clone()
            },
            Transition::Release { .. }
            | Transition::Expire { .. }
            | Transition::Revoke { .. } => {
                GridBox::available(current.game_id, current.cell)
            }
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Selling,
    NumbersAssigned,
    Live,
    Final,
}

/// A permutation of the digits 0-9, indexed by grid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct DigitPermutation([u8; 10]);

impl DigitPermutation {
    /// Fisher-Yates shuffle of 0..=9.
    pub fn shuffled<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut digits = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        for i in (1..digits.len()).rev() {
            let j = rng.random_range(0..=i);
            digits.swap(i, j);
        }
        Self(digits)
    }

    pub fn position(&self, digit: u8) -> Option<usize> {
        self.0.iter().position(|d| *d == digit)
    }

    pub fn digits(&self) -> &[u8; 10] {
        &self.0
    }
}

impl TryFrom<Vec<u8>> for DigitPermutation {
    type Error = String;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let digits: [u8; 10] = value
            .try_into()
            .map_err(|v: Vec<u8>| format!("expected 10 digits, got {}", v.len()))?;
        let mut seen = [false; 10];
        for digit in digits {
            let slot = seen
                .get_mut(digit as usize)
                .ok_or_else(|| format!("digit {digit} is out of range"))?;
            if *slot {
                return Err(format!("digit {digit} appears more than once"));
            }
            *slot = true;
        }
        Ok(Self(digits))
    }
}

impl From<DigitPermutation> for Vec<u8> {
    fn from(value: DigitPermutation) -> Self {
        value.0.to_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Numbers {
    pub row_numbers: DigitPermutation,
    pub col_numbers: DigitPermutation,
}

impl Numbers {
    /// Two independent draws, one for rows and one for columns.
    pub fn draw<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let row_numbers = DigitPermutation::shuffled(rng);
        let col_numbers = DigitPermutation::shuffled(rng);
        Self {
            row_numbers,
            col_numbers,
        }
    }

    pub fn cell_for(&self, home_digit: u8, away_digit: u8) -> Option<Cell> {
        let row = self.row_numbers.position(home_digit)?;
        let col = self.col_numbers.position(away_digit)?;
        Some(Cell::new(row as u8, col as u8))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub abbreviation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Quarter(u8);

impl Quarter {
    pub const ALL: [Quarter; 4] = [Quarter(1), Quarter(2), Quarter(3), Quarter(4)];

    pub fn new(number: u8) -> Option<Self> {
        (1..=4).contains(&number).then_some(Self(number))
    }

    pub fn number(&self) -> u8 {
        self.0
    }

    fn index(&self) -> usize {
        self.0 as usize - 1
    }
}

impl TryFrom<u8> for Quarter {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Quarter::new(value).ok_or_else(|| format!("quarter {value} is not in 1..=4"))
    }
}

impl From<Quarter> for u8 {
    fn from(value: Quarter) -> Self {
        value.0
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

/// Quarter payouts in basis points of the pot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayoutSplit([u32; 4]);

impl PayoutSplit {
    pub fn new(bps: [u32; 4]) -> Self {
        Self(bps)
    }

    pub fn basis_points(&self, quarter: Quarter) -> u32 {
        self.0[quarter.index()]
    }

    /// Payout in cents for a pot expressed in whole dollars.
    pub fn payout_cents(&self, pot_dollars: u64, quarter: Quarter) -> u64 {
        pot_dollars * u64::from(self.basis_points(quarter)) / 100
    }
}

impl Default for PayoutSplit {
    fn default() -> Self {
        Self([2_500; 4])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub home: Team,
    pub away: Team,
    pub kickoff_time: DateTime<Utc>,
    pub provider_event_id: String,
    pub prices: PriceSchedule,
    pub payouts: PayoutSplit,
    pub numbers: Option<Numbers>,
    pub status: GameStatus,
}

impl Game {
    pub fn from_config(config: &GameConfig) -> Self {
        Self {
            id: GameId(config.id),
            home: Team {
                name: config.home.name.clone(),
                abbreviation: config.home.abbreviation.clone(),
            },
            away: Team {
                name: config.away.name.clone(),
                abbreviation: config.away.abbreviation.clone(),
            },
            kickoff_time: config.kickoff_time,
            provider_event_id: config.provider_event_id.clone(),
            prices: PriceSchedule::new(
                config.price_per_box,
                config.price_10_boxes,
                config.price_20_boxes,
            ),
            payouts: PayoutSplit::new(config.payout_bps),
            numbers: None,
            status: GameStatus::Selling,
        }
    }

    pub fn numbers_assigned(&self) -> bool {
        self.numbers.is_some()
    }

    pub fn with_numbers(&self, numbers: Numbers) -> Self {
        Self {
            numbers: Some(numbers),
            status: self.status.max(GameStatus::NumbersAssigned),
            ..self.clone()
        }
    }

    pub fn without_numbers(&self) -> Self {
        Self {
            numbers: None,
            status: GameStatus::Selling,
            ..self.clone()
        }
    }

    /// The game at `status`, if that is strictly further along than now.
    pub fn advanced_to(&self, status: GameStatus) -> Option<Self> {
        (status > self.status).then(|| Self {
            status,
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub full_name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarterResult {
    pub game_id: GameId,
    pub quarter: Quarter,
    pub home_score: u32,
    pub away_score: u32,
    pub home_last_digit: u8,
    pub away_last_digit: u8,
    pub winning_cell: Cell,
    pub winning_user_id: Option<UserId>,
    pub payout_cents: u64,
    pub recorded_at: DateTime<Utc>,
}
