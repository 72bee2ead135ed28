//! Core of the apiview review service: domain types, the SQLite store, the
//! token renderers and the inline diff engine.

pub mod db;
pub mod diff;
pub mod error;
pub mod render;
pub mod schema;
pub mod store;
pub mod types;

pub use error::{Error, Result};
