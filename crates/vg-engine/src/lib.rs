//! Vigil telemetry engine.
//!
//! Provides:
//! - The score processor (normalization, weighted axes, half-window trends)
//! - The aggregator (versioned snapshots, bounded history, broadcast fan-out)
//! - [`TelemetryEngine`], which wires gateway, store, alerts, exporter and
//!   risk controller together and runs the periodic loops

pub mod aggregator;
pub mod engine;
pub mod processor;

pub use aggregator::Aggregator;
pub use engine::{Component, EngineBuilder, EngineEvent, TelemetryEngine};
pub use processor::{direction, weighted_score, DomainScores, ProcessorOutput, ScoreProcessor};
