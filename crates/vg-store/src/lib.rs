//! Telemetry store for Vigil.
//!
//! Owns one [`RollingWindow`] per metric series. Ingestion writes and
//! periodic reads share an `Arc<TelemetryStore>`; readers always receive
//! copies taken under a read lock.

pub mod store;
pub mod window;

pub use store::{StoreStats, TelemetryStore, DEFAULT_CAPACITY};
pub use window::RollingWindow;
