//! The order server actor: holds the local queue, computes bids, hands work
//! to the lift and broadcasts completions.
//!
//! Every node's queue mirrors all hall orders in the fleet (that is what the
//! auction broadcast produces), while cab orders are keyed per node. The
//! server answers cost queries from any peer's auctioneer, dispatches its
//! own cheapest pending order to the local lift whenever the lift is free,
//! and on completion notifies every watchdog in the fleet.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout, Instant};

use crate::config;
use crate::elevio::Dirn;
use crate::lift::{LiftMsg, LiftReply};
use crate::network::rpc;
use crate::network::PeerMap;
use crate::order::{ButtonType, NodeId, Order, OrderId, OrderKey};
use crate::print;
use crate::watchdog::WatchdogMsg;

/// Messages accepted by the order server actor.
pub enum OrderServerMsg {
    /// Bid request from an auctioneer (local or remote).
    EvaluateCost {
        /// The order up for auction.
        order: Order,
        /// Bid reply.
        reply: oneshot::Sender<Bid>,
    },
    /// Query whether a queue key already has an outstanding order. Used by
    /// the local distributor to suppress repeated presses of a lit button.
    IsPending {
        /// The key to look up.
        key: OrderKey,
        /// Lookup reply.
        reply: oneshot::Sender<bool>,
    },
    /// Assignment from an auction winner (broadcast to every node).
    NewOrder(Order),
    /// The local lift finished its active order.
    OrderComplete(Order),
    /// A peer broadcast that an order completed somewhere in the fleet.
    PeerComplete(Order),
    /// Position refresh from the local lift.
    UpdateLiftPosition {
        /// Last floor the lift passed.
        floor: u8,
        /// Travel direction at that point.
        dirn: Dirn,
    },
    /// The local lift found a floor and can take orders.
    LiftReady,
    /// Stop the actor. Sent by the lift when the cab is stuck.
    Shutdown,
}

/// Reply to an [`OrderServerMsg::EvaluateCost`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bid {
    /// The node can serve the order at this cost.
    Cost(u32),
    /// The order is already served (or pending under another identity);
    /// the auction must abort.
    Completed,
    /// The node is not a valid auction participant right now.
    NotReady,
}

struct QueueEntry {
    order: Order,
    inserted_at: Instant,
}

/// State owned by the order server actor. Public for unit tests.
pub struct OrderServer {
    self_id: NodeId,
    queue: HashMap<OrderKey, QueueEntry>,
    history: HashMap<OrderId, Instant>,
    floor: Option<u8>,
    dirn: Dirn,
    ready: bool,
    dispatched: Option<OrderId>,
}

impl OrderServer {
    /// Creates an empty server for the given node identity.
    pub fn new(self_id: NodeId) -> Self {
        OrderServer {
            self_id,
            queue: HashMap::new(),
            history: HashMap::new(),
            floor: None,
            dirn: Dirn::Down,
            ready: false,
            dispatched: None,
        }
    }

    /// Computes the bid for `order`.
    ///
    /// Deterministic in the lift position, direction, readiness and queue
    /// contents, so equal states on different peers produce equal costs. The
    /// cost is the floor distance plus a direction penalty (zero when the
    /// order lies on the current travel direction, small when idle, larger
    /// for a reversal) plus a busy penalty per order already queued for this
    /// node.
    pub fn evaluate_cost(&self, order: &Order) -> Bid {
        if self.history.contains_key(&order.id) {
            return Bid::Completed;
        }
        if let Some(entry) = self.queue.get(&order.key()) {
            if entry.order.id != order.id {
                // The same button is already covered by a different order;
                // letting this copy win would arm a second watchdog for
                // work that is already in flight.
                return Bid::Completed;
            }
        }
        if order.button == ButtonType::Cab && order.node != self.self_id {
            return Bid::NotReady;
        }
        let floor = match (self.ready, self.floor) {
            (true, Some(f)) => f,
            _ => return Bid::NotReady,
        };

        let distance = floor_distance(floor, order.floor);

        let direction_penalty = if self.dispatched.is_none() {
            config::IDLE_PENALTY
        } else if moving_toward(floor, self.dirn, order.floor) {
            0
        } else {
            config::REVERSE_PENALTY
        };

        let pending = self
            .queue
            .values()
            .filter(|e| e.order.node == self.self_id)
            .count() as u32;

        Bid::Cost(distance + direction_penalty + config::BUSY_PENALTY * pending)
    }

    /// True when the key already holds an outstanding order.
    pub fn is_pending(&self, key: &OrderKey) -> bool {
        self.queue.contains_key(key)
    }

    /// Inserts or refreshes an auction assignment.
    ///
    /// The insert is idempotent: the same id refreshes the stored copy (the
    /// responsible node may have changed on reinjection). When two different
    /// ids race for the same key, every node adopts the lexicographically
    /// smaller id so the fleet converges on one identity per button.
    ///
    /// ## Returns
    /// `true` if the queue changed.
    pub fn insert(&mut self, order: Order) -> bool {
        let key = order.key();
        match self.queue.get_mut(&key) {
            None => {}
            Some(entry) if entry.order.id == order.id => {
                entry.order = order;
                entry.inserted_at = Instant::now();
                return false;
            }
            Some(entry) => {
                if order.id < entry.order.id {
                    print::info(format!(
                        "Merging duplicate order {} into {}",
                        entry.order.id, order.id
                    ));
                } else {
                    return false;
                }
            }
        }
        self.queue.insert(
            key,
            QueueEntry { order, inserted_at: Instant::now() },
        );
        true
    }

    /// Removes the completed order and remembers it for auction dedup.
    ///
    /// ## Returns
    /// `true` if a queue entry was removed (the lamp should go out).
    pub fn complete(&mut self, order: &Order) -> bool {
        self.history.insert(order.id.clone(), Instant::now());
        if self.dispatched.as_ref() == Some(&order.id) {
            self.dispatched = None;
        }
        let key = order.key();
        match self.queue.get(&key) {
            Some(entry) if entry.order.id == order.id => {
                self.queue.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Picks the most urgent undispatched order assigned to this node.
    pub fn next_own_order(&self) -> Option<Order> {
        let floor = self.floor?;
        self.queue
            .values()
            .filter(|e| e.order.node == self.self_id)
            .filter(|e| Some(&e.order.id) != self.dispatched.as_ref())
            .min_by_key(|e| (floor_distance(floor, e.order.floor), e.order.id.clone()))
            .map(|e| e.order.clone())
    }

    /// Drops mirror entries for other nodes' orders that have seen neither a
    /// completion nor a reinjection broadcast for a long time. A live order
    /// is rebroadcast by its watchdog well inside this horizon, so whatever
    /// is left this long is a completion notice this node missed.
    fn purge_stale_mirrors(&mut self) {
        let horizon = config::HISTORY_MAX_AGE;
        let self_id = self.self_id.clone();
        let before = self.queue.len();
        self.queue
            .retain(|_, e| e.order.node == self_id || e.inserted_at.elapsed() < horizon);
        if self.queue.len() != before {
            print::warn("Dropped stale mirrored orders without a completion".to_string());
        }
        let history_horizon = config::HISTORY_MAX_AGE;
        self.history.retain(|_, t| t.elapsed() < history_horizon);
    }
}

fn floor_distance(a: u8, b: u8) -> u32 {
    let d = if a > b { a - b } else { b - a };
    d as u32
}

fn moving_toward(floor: u8, dirn: Dirn, target: u8) -> bool {
    match dirn {
        Dirn::Up => target > floor,
        Dirn::Down => target < floor,
        Dirn::Stop => true,
    }
}

/// Runs the order server actor.
///
/// ## Parameters
/// - `self_id`: this node's name.
/// - `inbox`: the actor's serialized inbox.
/// - `lift_tx`: local lift inbox, for dispatch and lamp control.
/// - `watchdog_tx`: local watchdog inbox, disarmed on completion.
/// - `peers_rx`: current peer snapshot, for the completion broadcast.
pub async fn run(
    self_id: NodeId,
    mut inbox: mpsc::Receiver<OrderServerMsg>,
    lift_tx: mpsc::Sender<LiftMsg>,
    watchdog_tx: mpsc::Sender<WatchdogMsg>,
    peers_rx: watch::Receiver<PeerMap>,
) {
    let mut st = OrderServer::new(self_id);

    loop {
        while let Ok(msg) = inbox.try_recv() {
            match msg {
                OrderServerMsg::EvaluateCost { order, reply } => {
                    let _ = reply.send(st.evaluate_cost(&order));
                }
                OrderServerMsg::IsPending { key, reply } => {
                    let _ = reply.send(st.is_pending(&key));
                }
                OrderServerMsg::NewOrder(order) => {
                    let lamp = order.button.is_hall() || order.node == st.self_id;
                    if st.insert(order.clone()) && lamp {
                        let _ = lift_tx
                            .send(LiftMsg::SetCallLamp {
                                floor: order.floor,
                                button: order.button,
                                on: true,
                            })
                            .await;
                    }
                    dispatch_if_free(&mut st, &lift_tx).await;
                }
                OrderServerMsg::OrderComplete(order) => {
                    let lamp = order.button.is_hall() || order.node == st.self_id;
                    if st.complete(&order) && lamp {
                        let _ = lift_tx
                            .send(LiftMsg::SetCallLamp {
                                floor: order.floor,
                                button: order.button,
                                on: false,
                            })
                            .await;
                    }
                    // Disarm every watchdog in the fleet, own node included.
                    let _ = watchdog_tx.send(WatchdogMsg::OrderComplete(order.clone())).await;
                    rpc::broadcast_complete(peers_rx.borrow().clone(), order);
                    dispatch_if_free(&mut st, &lift_tx).await;
                }
                OrderServerMsg::PeerComplete(order) => {
                    // Cab lamps belong to the owning cab; only hall lamps go
                    // out fleet-wide.
                    let lamp = order.button.is_hall() || order.node == st.self_id;
                    if st.complete(&order) && lamp {
                        let _ = lift_tx
                            .send(LiftMsg::SetCallLamp {
                                floor: order.floor,
                                button: order.button,
                                on: false,
                            })
                            .await;
                    }
                }
                OrderServerMsg::UpdateLiftPosition { floor, dirn } => {
                    st.floor = Some(floor);
                    if dirn != Dirn::Stop {
                        st.dirn = dirn;
                    }
                }
                OrderServerMsg::LiftReady => {
                    st.ready = true;
                    print::ok("Lift ready, joining auctions".to_string());
                    dispatch_if_free(&mut st, &lift_tx).await;
                }
                OrderServerMsg::Shutdown => {
                    print::warn("Order server shutting down".to_string());
                    return;
                }
            }
        }

        st.purge_stale_mirrors();
        sleep(config::POLL_PERIOD).await;
    }
}

/// Hands the cheapest pending own order to the lift if it is free.
async fn dispatch_if_free(st: &mut OrderServer, lift_tx: &mpsc::Sender<LiftMsg>) {
    if !st.ready || st.dispatched.is_some() {
        return;
    }
    let order = match st.next_own_order() {
        Some(o) => o,
        None => return,
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    let _ = lift_tx
        .send(LiftMsg::NewOrder { order: order.clone(), reply: reply_tx })
        .await;
    match timeout(config::RPC_TIMEOUT, reply_rx).await {
        Ok(Ok(LiftReply::Accepted)) => {
            st.dispatched = Some(order.id);
        }
        _ => {
            // Keep it queued, the next event retries.
        }
    }
}
