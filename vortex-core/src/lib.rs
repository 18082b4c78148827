//! Vortex Core — historical market data download orchestration engine.
//!
//! This crate contains the heart of the download pipeline:
//! - Domain types (instrument, period, price series)
//! - Provider capability (Yahoo, Barchart, IBKR) with a uniform fetch contract
//! - Resilience layer (retry, circuit breaker, recovery planning)
//! - Storage capability (CSV, Parquet)
//! - Job planner and fairness scheduler
//! - Per-job downloader state machine and run-wide job processor
//! - Correlation-aware structured logging support

pub mod config;
pub mod correlation;
pub mod downloader;
pub mod error;
pub mod instrument;
pub mod period;
pub mod planner;
pub mod processor;
pub mod provider;
pub mod resilience;
pub mod scheduler;
pub mod series;
pub mod storage;
