//! Unauthenticated catalog surface over public sale/rent tables.

pub mod api;

pub use api::{PublicApiState, public_api_router};
