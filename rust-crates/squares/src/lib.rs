pub mod app;

pub mod error;

pub mod grid;

pub mod pool;

pub mod pricing;

pub mod score;

pub mod settlement;

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod test_helpers;
