//! Aggregator: versioned snapshots, bounded history and fan-out.

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use vg_store::RollingWindow;
use vg_types::{AggregatedSnapshot, FieldSelection, HealthStatus, ScoreSet, VgError, VgResult};

use crate::processor::{DomainScores, ProcessorOutput};

const BROADCAST_CAPACITY: usize = 64;

struct History {
    next_version: u64,
    snapshots: RollingWindow<AggregatedSnapshot>,
}

/// Sole owner of snapshot history. Consumers get clones or projections.
pub struct Aggregator {
    history: RwLock<History>,
    tx: broadcast::Sender<AggregatedSnapshot>,
}

impl Aggregator {
    pub fn new(window_size: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            history: RwLock::new(History {
                next_version: 1,
                snapshots: RollingWindow::new(window_size),
            }),
            tx,
        }
    }

    /// Classify, version, store and broadcast one processor output.
    ///
    /// Never waits on subscribers: with nobody listening the send simply
    /// fails, and lagging receivers lose the oldest snapshots.
    pub fn publish(&self, output: ProcessorOutput) -> AggregatedSnapshot {
        let snapshot = {
            let mut history = self.history.write();
            let snapshot = AggregatedSnapshot {
                version: history.next_version,
                timestamp: output.timestamp,
                system: score_set(output.system),
                market: score_set(output.market),
                trading: score_set(output.trading),
                raw: output.raw,
            };
            history.next_version += 1;
            history.snapshots.push(snapshot.clone());
            snapshot
        };

        match self.tx.send(snapshot.clone()) {
            Ok(receivers) => trace!(version = snapshot.version, receivers, "snapshot published"),
            Err(_) => trace!(version = snapshot.version, "snapshot published without subscribers"),
        }
        debug!(
            version = snapshot.version,
            system = ?snapshot.system.status,
            market = ?snapshot.market.status,
            trading = ?snapshot.trading.status,
            "snapshot aggregated"
        );
        snapshot
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AggregatedSnapshot> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<AggregatedSnapshot> {
        self.history.read().snapshots.latest().cloned()
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<AggregatedSnapshot> {
        self.history.read().snapshots.to_vec()
    }

    pub fn len(&self) -> usize {
        self.history.read().snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.read().snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.history.read().snapshots.capacity()
    }

    /// History projected through `selection`, oldest first.
    pub fn view(&self, selection: &FieldSelection) -> VgResult<Vec<Value>> {
        let history = self.history.read();
        history
            .snapshots
            .iter()
            .map(|snapshot| serde_json::to_value(selection.view(snapshot)).map_err(VgError::from))
            .collect()
    }
}

fn score_set(scores: DomainScores) -> ScoreSet {
    ScoreSet {
        status: HealthStatus::from_score(scores.composite),
        composite: scores.composite,
        axes: scores.axes,
        metrics: scores.metrics,
        trends: scores.trends,
    }
}
