//! shellac-engine - music-library cleanup pipeline
//!
//! Streaming pipeline that discovers, analyzes, quality-scores,
//! deduplicates, and relocates audio files from chaotic source trees into
//! a canonical genre/decade-organized target tree. Originals are never
//! destroyed; every filesystem mutation goes through the atomic operation
//! log, and progress is checkpointed so any interruption is recoverable.
//!
//! Phase sequence:
//! Discovery -> Analysis -> Corruption Filter -> Grouping -> Organization

pub mod db;
pub mod extractors;
pub mod models;
pub mod services;
pub mod utils;

pub use services::workflow_orchestrator::CleanupOrchestrator;
