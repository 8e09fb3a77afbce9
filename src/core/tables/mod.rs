//! Table and column management: schema CRUD, ordering, bulk actions
//! and structural cloning.

pub mod api;

pub use api::{TableApiState, table_api_router};
