//! Alert engine for Vigil.
//!
//! Provides:
//! - Threshold rules evaluated against aggregated snapshots
//! - A bounded, deduplicated alert book with resolution tracking
//! - Ingestion of alerts pushed by the upstream feed
//! - Ordered fan-out of raised and resolved alerts to pluggable notification
//!   channels

pub mod book;
pub mod engine;
pub mod notify;
pub mod rules;

pub use book::{AlertBook, BookChange};
pub use engine::{AlertChanges, AlertEngine};
pub use notify::{
    AlertNotification, ChangeKind, ChannelError, ForwardChannel, LogChannel, MemoryChannel,
    NotificationChannel, NotificationQueue, Notifier,
};
pub use rules::{evaluate_rule, RuleOutcome};
