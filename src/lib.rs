pub mod auth;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod idempotency;
pub mod limits;
pub mod model;
pub mod observability;
pub mod service;
pub mod sql;
pub mod sweeper;
pub mod wal;
pub mod wire;
