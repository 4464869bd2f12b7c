use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::bridge_store::{BridgeEvent, BridgeStore};
use crate::db::{BridgePair, PairStore};
use crate::event::Platform;
use crate::kv::KvStore;
use crate::pipeline::{
    delivery_queue_name, spawn_worker, DeliveryJob, DeliveryWorker, JobQueue, QueuePolicy,
};

struct WorkerSet {
    stop: watch::Sender<bool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

/// Maintains one delivery worker set per active bridge: a consumer on each
/// of the bridge's two per-target-channel queues. Start is idempotent and
/// stopping an unknown bridge is a no-op.
pub struct WorkerSupervisor {
    bridge_store: Arc<BridgeStore>,
    pairs: Arc<dyn PairStore>,
    delivery: Arc<DeliveryWorker>,
    kv: Arc<dyn KvStore>,
    sets: Mutex<HashMap<i64, WorkerSet>>,
}

impl WorkerSupervisor {
    pub fn new(
        bridge_store: Arc<BridgeStore>,
        pairs: Arc<dyn PairStore>,
        delivery: Arc<DeliveryWorker>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            bridge_store,
            pairs,
            delivery,
            kv,
            sets: Mutex::new(HashMap::new()),
        }
    }

    /// Startup: repair pairs missing webhook credentials, then bring up a
    /// worker set for every active bridge.
    pub async fn start(&self) -> anyhow::Result<()> {
        match self.bridge_store.repair_missing().await {
            Ok(0) => {}
            Ok(repaired) => info!(repaired, "repaired bridges with missing webhooks"),
            Err(e) => warn!(error = %e, "startup webhook repair failed"),
        }

        let pairs = self.pairs.list_active_pairs().await?;
        let count = pairs.len();
        for pair in pairs {
            self.start_set(&pair).await;
        }
        info!(bridges = count, "worker supervisor started");
        Ok(())
    }

    pub async fn start_set(&self, pair: &BridgePair) {
        let mut sets = self.sets.lock().await;
        if sets.contains_key(&pair.id) {
            debug!(pair_id = pair.id, "worker set already running");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut handles = Vec::new();
        for platform in [Platform::Discord, Platform::Fluxer] {
            let queue: JobQueue<DeliveryJob> = JobQueue::new(
                delivery_queue_name(platform, pair.channel_on(platform)),
                self.kv.clone(),
                QueuePolicy::delivery(),
            );
            handles.push(spawn_worker(queue, self.delivery.clone(), stop_rx.clone()));
        }

        sets.insert(
            pair.id,
            WorkerSet {
                stop: stop_tx,
                handles,
            },
        );
        info!(
            pair_id = pair.id,
            discord_channel = %pair.discord_channel_id,
            fluxer_channel = %pair.fluxer_channel_id,
            "delivery worker set started"
        );
    }

    pub async fn stop_set(&self, pair_id: i64) {
        let set = self.sets.lock().await.remove(&pair_id);
        let Some(set) = set else {
            debug!(pair_id, "no worker set to stop");
            return;
        };

        let _ = set.stop.send(true);
        for handle in set.handles {
            if let Err(e) = handle.await {
                warn!(pair_id, error = %e, "delivery worker exited abnormally");
            }
        }
        info!(pair_id, "delivery worker set stopped");
    }

    pub async fn running_sets(&self) -> usize {
        self.sets.lock().await.len()
    }

    pub async fn is_running(&self, pair_id: i64) -> bool {
        self.sets.lock().await.contains_key(&pair_id)
    }

    /// Consumes bridge lifecycle events until the channel closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<BridgeEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                BridgeEvent::Created { pair } => {
                    if pair.is_active {
                        self.start_set(&pair).await;
                    }
                }
                BridgeEvent::Toggled { pair } => {
                    if pair.is_active {
                        self.start_set(&pair).await;
                    } else {
                        self.stop_set(pair.id).await;
                    }
                }
                BridgeEvent::Deleted { pair_id } => {
                    self.stop_set(pair_id).await;
                }
            }
        }
        debug!("bridge event channel closed");
    }

    /// Stops every worker set; queued jobs stay in the KV for the next run.
    pub async fn shutdown(&self) {
        let ids: Vec<i64> = self.sets.lock().await.keys().copied().collect();
        for pair_id in ids {
            self.stop_set(pair_id).await;
        }
        info!("worker supervisor stopped");
    }
}
