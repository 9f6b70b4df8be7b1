//! Indexing pipelines: the main indexer, the overlay indexer, and the
//! per-track orchestrator that drives both across a whole manifest.

pub mod main;
pub mod orchestrator;
pub mod overlay;

pub use main::{MainBuildReport, MainIndexer};
pub use orchestrator::{Orchestrator, TrackOutcome};
pub use overlay::{BuildOutcome, OverlayIndexer};
