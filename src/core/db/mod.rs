//! Database layer: pool setup, entity models and repositories.

pub mod models;
pub mod pool;
pub mod repositories;
