//! Row data management over the dynamic schemas.

pub mod api;

pub use api::{RowApiState, row_api_router};
