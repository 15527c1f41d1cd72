//! The watchdog actor: per-order deadlines, peer-liveness reactions and the
//! crash-safe backup of in-flight orders.
//!
//! The watchdog is the single redundancy mechanism in the system. Nothing is
//! retried at the RPC layer; any order that is not confirmed complete within
//! its deadline is reinjected into the local distributor under its original
//! id, so in-flight copies on other nodes merge instead of duplicating.
//!
//! All state mutations rewrite one on-disk file (write temp, atomic rename),
//! which is how in-flight orders survive a power cycle.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};

use crate::config;
use crate::distribution::DistributionMsg;
use crate::order::{unix_now, NodeId, Order, OrderId};
use crate::print;

/// Messages accepted by the watchdog actor.
#[derive(Debug)]
pub enum WatchdogMsg {
    /// Arm a deadline for an order this node was chosen to watch.
    NewOrder(Order),
    /// Completion broadcast: disarm the order if we hold it.
    OrderComplete(Order),
    /// Cluster notification: a peer appeared.
    NodeUp(NodeId),
    /// Cluster notification: a peer disappeared.
    NodeDown(NodeId),
}

/// Self-describing on-disk image of the watchdog state.
#[derive(Serialize, Deserialize, Default)]
struct Backup {
    active: Vec<BackupEntry>,
    standby: Vec<Order>,
}

#[derive(Serialize, Deserialize)]
struct BackupEntry {
    order: Order,
    deadline_unix: u64,
}

/// Watchdog bookkeeping. Public for unit tests; the actor in [`run`] is the
/// only production user.
pub struct Watchdog {
    active: HashMap<OrderId, Order>,
    standby: HashMap<OrderId, Order>,
    timers: HashMap<OrderId, Instant>,
    backup_path: PathBuf,
}

impl Watchdog {
    /// Restores the watchdog from its backup file.
    ///
    /// ## Behavior
    /// - Active entries older than [`config::ACTIVE_MAX_AGE`] and standby
    ///   entries older than [`config::STANDBY_MAX_AGE`] are discarded as too
    ///   stale to be meaningful.
    /// - Retained active entries get fresh deadlines; an entry whose saved
    ///   deadline already passed is armed with zero delay so it reinjects at
    ///   the next tick.
    /// - A missing or corrupt file starts the watchdog empty.
    pub fn load(backup_path: PathBuf) -> Self {
        let mut wd = Watchdog {
            active: HashMap::new(),
            standby: HashMap::new(),
            timers: HashMap::new(),
            backup_path,
        };

        let backup: Backup = match fs::read_to_string(&wd.backup_path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(b) => b,
                Err(e) => {
                    print::err(format!("Corrupt watchdog backup, starting empty: {}", e));
                    return wd;
                }
            },
            Err(_) => return wd,
        };

        let now_unix = unix_now();
        for entry in backup.active {
            if entry.order.age_secs(now_unix) > config::ACTIVE_MAX_AGE.as_secs() {
                continue;
            }
            let delay = entry.deadline_unix.saturating_sub(now_unix);
            wd.timers
                .insert(entry.order.id.clone(), Instant::now() + Duration::from_secs(delay));
            wd.active.insert(entry.order.id.clone(), entry.order);
        }
        for order in backup.standby {
            if order.age_secs(now_unix) > config::STANDBY_MAX_AGE.as_secs() {
                continue;
            }
            wd.standby.insert(order.id.clone(), order);
        }

        if !wd.active.is_empty() || !wd.standby.is_empty() {
            print::info(format!(
                "Restored {} active and {} standby orders from backup",
                wd.active.len(),
                wd.standby.len()
            ));
        }
        wd
    }

    /// Arms a deadline for `order` and persists.
    pub fn arm(&mut self, order: Order) {
        self.timers
            .insert(order.id.clone(), Instant::now() + config::WATCHDOG_TIMEOUT);
        self.active.insert(order.id.clone(), order);
        self.persist();
    }

    /// Disarms `order` if it is being watched, and persists.
    pub fn disarm(&mut self, order: &Order) {
        let was_active = self.active.remove(&order.id).is_some();
        self.timers.remove(&order.id);
        let was_standby = self.standby.remove(&order.id).is_some();
        if was_active || was_standby {
            self.persist();
        }
    }

    /// Removes and returns every active order whose deadline has passed.
    pub fn take_expired(&mut self) -> Vec<Order> {
        let now = Instant::now();
        let expired: Vec<OrderId> = self
            .timers
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut orders = Vec::new();
        for id in expired {
            self.timers.remove(&id);
            if let Some(order) = self.active.remove(&id) {
                orders.push(order);
            }
        }
        if !orders.is_empty() {
            self.persist();
        }
        orders
    }

    /// Partitions the watched orders of a node that went down.
    ///
    /// ## Returns
    /// The hall orders to reinject immediately. The node's cab orders move
    /// to standby, since nobody else may serve them.
    pub fn node_down(&mut self, node: &NodeId) -> Vec<Order> {
        let ids: Vec<OrderId> = self
            .active
            .values()
            .filter(|o| o.node == *node)
            .map(|o| o.id.clone())
            .collect();

        let mut reinject = Vec::new();
        for id in &ids {
            self.timers.remove(id);
            if let Some(order) = self.active.remove(id) {
                if order.button.is_hall() {
                    reinject.push(order);
                } else {
                    self.standby.insert(order.id.clone(), order);
                }
            }
        }
        if !ids.is_empty() {
            self.persist();
        }
        reinject
    }

    /// Removes and returns the standby orders owned by a node that came
    /// back, for replay through the auction.
    pub fn node_up(&mut self, node: &NodeId) -> Vec<Order> {
        let ids: Vec<OrderId> = self
            .standby
            .values()
            .filter(|o| o.node == *node)
            .map(|o| o.id.clone())
            .collect();

        let orders: Vec<Order> = ids.iter().filter_map(|id| self.standby.remove(id)).collect();
        if !orders.is_empty() {
            self.persist();
        }
        orders
    }

    /// Number of orders currently under an armed deadline.
    pub fn active_len(&self) -> usize {
        debug_assert_eq!(self.active.len(), self.timers.len());
        self.active.len()
    }

    /// Number of orders parked in standby.
    pub fn standby_len(&self) -> usize {
        self.standby.len()
    }

    /// Rewrites the backup file: serialize everything to a temp file, then
    /// atomically rename it over the old one.
    fn persist(&self) {
        let now = Instant::now();
        let now_unix = unix_now();
        let backup = Backup {
            active: self
                .active
                .values()
                .map(|order| {
                    let remaining = self
                        .timers
                        .get(&order.id)
                        .map(|d| d.saturating_duration_since(now).as_secs())
                        .unwrap_or(0);
                    BackupEntry { order: order.clone(), deadline_unix: now_unix + remaining }
                })
                .collect(),
            standby: self.standby.values().cloned().collect(),
        };

        let text = match serde_json::to_string_pretty(&backup) {
            Ok(t) => t,
            Err(e) => {
                print::err(format!("Failed to serialize watchdog backup: {}", e));
                return;
            }
        };

        let tmp = self.backup_path.with_extension("tmp");
        if let Err(e) = fs::write(&tmp, text).and_then(|_| fs::rename(&tmp, &self.backup_path)) {
            print::err(format!("Failed to write watchdog backup: {}", e));
        }
    }
}

/// Runs the watchdog actor.
///
/// ## Parameters
/// - `inbox`: the actor's serialized inbox, fed by the local order server,
///   the RPC server and the discovery layer.
/// - `distribution_tx`: local distributor inbox, target of reinjections.
/// - `backup_path`: location of the backup file.
pub async fn run(
    mut inbox: mpsc::Receiver<WatchdogMsg>,
    distribution_tx: mpsc::Sender<DistributionMsg>,
    backup_path: PathBuf,
) {
    let mut wd = Watchdog::load(backup_path);

    loop {
        while let Ok(msg) = inbox.try_recv() {
            match msg {
                WatchdogMsg::NewOrder(order) => {
                    wd.arm(order);
                }
                WatchdogMsg::OrderComplete(order) => {
                    wd.disarm(&order);
                }
                WatchdogMsg::NodeDown(node) => {
                    print::warn(format!("Node {} down, repartitioning its orders", node));
                    for order in wd.node_down(&node) {
                        let _ = distribution_tx.send(DistributionMsg::NewOrder(order)).await;
                    }
                }
                WatchdogMsg::NodeUp(node) => {
                    for order in wd.node_up(&node) {
                        print::info(format!("Replaying standby order {} for {}", order.id, node));
                        let _ = distribution_tx.send(DistributionMsg::NewOrder(order)).await;
                    }
                }
            }
        }

        for order in wd.take_expired() {
            print::warn(format!(
                "Order {} missed its deadline, reinjecting",
                order.id
            ));
            let _ = distribution_tx.send(DistributionMsg::NewOrder(order)).await;
        }

        sleep(config::POLL_PERIOD).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::ButtonType;
    use tokio::time::advance;

    fn order(node: &str, floor: u8, button: ButtonType) -> Order {
        let mut o = Order::from_button(node, floor, button).unwrap();
        o.node = node.to_string();
        o
    }

    fn temp_wd() -> (Watchdog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let wd = Watchdog::load(dir.path().join("watchdog_backup.txt"));
        (wd, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_hands_back_the_order_once() {
        let (mut wd, _dir) = temp_wd();
        let o = order("a", 1, ButtonType::HallUp);
        wd.arm(o.clone());

        advance(config::WATCHDOG_TIMEOUT + Duration::from_secs(1)).await;
        let expired = wd.take_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, o.id);
        assert_eq!(wd.active_len(), 0);
        assert!(wd.take_expired().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completion_disarms_before_the_deadline() {
        let (mut wd, _dir) = temp_wd();
        let o = order("a", 1, ButtonType::HallUp);
        wd.arm(o.clone());
        wd.disarm(&o);

        advance(config::WATCHDOG_TIMEOUT + Duration::from_secs(1)).await;
        assert!(wd.take_expired().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn node_down_reinjects_halls_and_parks_cabs() {
        let (mut wd, _dir) = temp_wd();
        let hall = order("b", 1, ButtonType::HallUp);
        let cab = order("b", 2, ButtonType::Cab);
        let other = order("c", 2, ButtonType::HallDown);
        wd.arm(hall.clone());
        wd.arm(cab.clone());
        wd.arm(other.clone());

        let reinject = wd.node_down(&"b".to_string());
        assert_eq!(reinject.len(), 1);
        assert_eq!(reinject[0].id, hall.id);
        assert_eq!(wd.standby_len(), 1);
        // The unrelated node's order keeps its deadline.
        assert_eq!(wd.active_len(), 1);

        // The parked cab order never expires while its node is away.
        advance(config::WATCHDOG_TIMEOUT + Duration::from_secs(1)).await;
        let expired = wd.take_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, other.id);

        let replay = wd.node_up(&"b".to_string());
        assert_eq!(replay.len(), 1);
        assert_eq!(replay[0].id, cab.id);
        assert_eq!(wd.standby_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backup_restores_fresh_orders_and_drops_stale_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog_backup.txt");

        let fresh_active = order("a", 1, ButtonType::HallUp);
        let mut stale_active = order("a", 2, ButtonType::HallDown);
        stale_active.time = unix_now() - config::ACTIVE_MAX_AGE.as_secs() - 60;
        let fresh_standby = order("b", 2, ButtonType::Cab);
        let mut stale_standby = order("b", 3, ButtonType::Cab);
        stale_standby.time = unix_now() - config::STANDBY_MAX_AGE.as_secs() - 60;

        {
            let mut wd = Watchdog::load(path.clone());
            wd.arm(fresh_active.clone());
            wd.arm(stale_active.clone());
            wd.arm(fresh_standby.clone());
            wd.arm(stale_standby.clone());
            wd.node_down(&"b".to_string());
        }

        let mut restored = Watchdog::load(path);
        assert_eq!(restored.active_len(), 1);
        assert_eq!(restored.standby_len(), 1);

        // The restored deadline is in the future, not already expired.
        assert!(restored.take_expired().is_empty());
        advance(config::WATCHDOG_TIMEOUT + Duration::from_secs(1)).await;
        let expired = restored.take_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, fresh_active.id);
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadlines_rearm_with_zero_delay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog_backup.txt");

        let o = order("a", 1, ButtonType::HallUp);
        {
            let mut wd = Watchdog::load(path.clone());
            wd.arm(o.clone());
            // Let the deadline pass without the watchdog noticing.
            advance(config::WATCHDOG_TIMEOUT + Duration::from_secs(5)).await;
            wd.persist();
        }

        let mut restored = Watchdog::load(path);
        let expired = restored.take_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, o.id);
    }

    #[test]
    fn corrupt_backup_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog_backup.txt");
        fs::write(&path, "not json at all {{{").unwrap();

        let wd = Watchdog::load(path);
        assert_eq!(wd.active_len(), 0);
        assert_eq!(wd.standby_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn actor_reinjects_after_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let (wd_tx, wd_rx) = mpsc::channel(32);
        let (dist_tx, mut dist_rx) = mpsc::channel(32);
        tokio::spawn(run(wd_rx, dist_tx, dir.path().join("watchdog_backup.txt")));

        let o = order("b", 1, ButtonType::HallUp);
        wd_tx.send(WatchdogMsg::NewOrder(o.clone())).await.unwrap();

        // Virtual time runs past the deadline while the actor polls.
        let reinjected = match dist_rx.recv().await.unwrap() {
            DistributionMsg::NewOrder(r) => r,
            _ => panic!("expected a reinjection"),
        };
        assert_eq!(reinjected.id, o.id);
    }
}
