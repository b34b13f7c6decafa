pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod live_cache;
pub mod model;
pub mod persistence;
pub mod predictions;
pub mod processor;
pub mod query;
pub mod replay;
pub mod schedule;
pub mod store;
pub mod strategy;
pub mod timeout;
pub mod vehicle;
