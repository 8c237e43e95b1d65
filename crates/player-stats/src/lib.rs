//! Performance statistics for the media player: process/thread CPU sampling from `/proc`
//! and per-element dropped-frame accounting.
//!
//! Everything hangs off [`context::StatsContext`], which is created once at startup and
//! shared (behind an `Arc`) between the pipeline threads that report frame counters and
//! the timer that renders the statistics blocks.

pub mod config;
pub mod context;
pub mod frames;
pub mod procfs;
pub mod report;
pub mod sampler;
