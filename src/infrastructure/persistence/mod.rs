pub mod candle_repository;
pub mod database;

pub use candle_repository::{InMemoryCandleRepository, SqliteCandleRepository};
pub use database::Database;
