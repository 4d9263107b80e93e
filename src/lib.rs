//! # enrichq
//!
//! Demand-driven metadata enrichment scheduler.
//!
//! Items become relevant (visible, hovered, inserted); the scheduler
//! debounces that demand, deduplicates it per key, runs a bounded number of
//! enrichment pipelines against slow remote sources, caches every result
//! and pushes each stage's output to all subscribers of the item.

pub mod badge;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod media;
pub mod model;
pub mod provider;
pub mod source;
pub mod subscription;
pub mod telemetry;

pub use engine::{Scheduler, SchedulerBuilder, SchedulerStats};
pub use error::{Error, Result};
