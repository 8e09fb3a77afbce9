//! Core engine modules: access resolution, schema and row storage,
//! validation, and the HTTP API surfaces.

pub mod access;
pub mod config;
pub mod db;
pub mod identity;
pub mod protection;
pub mod public;
pub mod rows;
pub mod tables;
pub mod validation;
