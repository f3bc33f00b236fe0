//! Database models and queries.

mod context;
pub mod health;
pub mod kv;
pub mod models;
pub mod timetable;
pub mod tokens;
pub mod users;

pub use context::DbContext;
