//! Dynamic table engine: user-defined tables with typed columns,
//! ordered schemas, commerce-aware column protection and a public
//! read-only catalog, backed by PostgreSQL.

pub mod core;
