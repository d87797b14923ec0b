pub mod calendar;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod profile;
pub mod resolver;
pub mod retry;
pub mod sweeper;
pub mod wal;
