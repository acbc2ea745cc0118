// src/traceweave/mod.rs

pub mod aggregator;
pub mod classifier;
pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod history;
pub mod ingest;
pub mod model;
pub mod nodes;
pub mod persistence;
pub mod ticker;
pub mod trace_cache;
pub mod watchdog;

// Export the engine so callers can write traceweave::TurnEngine
// instead of traceweave::engine::TurnEngine.
pub use engine::TurnEngine;
