//! The order distributor: auctions every new order to the cheapest cab.
//!
//! There is no leader and no quorum. Each auction is a bounded fan-out of
//! `EvaluateCost` calls with a one second deadline; late bidders are silent
//! non-votes. The optimistic outcome is made correct by the watchdog, which
//! reinjects any order that is never confirmed complete.

use rand::seq::SliceRandom;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;

use crate::config;
use crate::network::rpc;
use crate::network::PeerMap;
use crate::order::{ButtonType, NodeId, Order};
use crate::order_server::{Bid, OrderServerMsg};
use crate::print;
use crate::watchdog::WatchdogMsg;

/// Messages accepted by the distributor actor.
pub enum DistributionMsg {
    /// A raw button press on this node. A fresh order is synthesized.
    NewCall {
        /// Floor of the press.
        floor: u8,
        /// Button kind.
        button: ButtonType,
    },
    /// An existing order entering (or re-entering) the auction pipeline.
    /// The id is preserved so in-flight copies merge instead of duplicating.
    NewOrder(Order),
}

/// Runs the distributor actor.
///
/// Auctions are handled one at a time; the inbox serializes them.
pub async fn run(
    self_id: NodeId,
    mut inbox: mpsc::Receiver<DistributionMsg>,
    order_server_tx: mpsc::Sender<OrderServerMsg>,
    watchdog_tx: mpsc::Sender<WatchdogMsg>,
    peers_rx: watch::Receiver<PeerMap>,
) {
    while let Some(msg) = inbox.recv().await {
        let order = match msg {
            DistributionMsg::NewCall { floor, button } => {
                match Order::from_button(&self_id, floor, button) {
                    Some(order) => {
                        if key_already_pending(&order, &order_server_tx).await {
                            continue;
                        }
                        order
                    }
                    None => {
                        print::warn(format!(
                            "Rejecting illegal call: floor {} {:?}",
                            floor, button
                        ));
                        continue;
                    }
                }
            }
            DistributionMsg::NewOrder(order) => order,
        };

        auction(&self_id, order, &order_server_tx, &watchdog_tx, &peers_rx).await;
    }
}

/// Asks the local order server whether the order's key is already queued.
/// Every node mirrors all hall orders, so a lit button is pending locally.
async fn key_already_pending(
    order: &Order,
    order_server_tx: &mpsc::Sender<OrderServerMsg>,
) -> bool {
    let (reply_tx, reply_rx) = oneshot::channel();
    let _ = order_server_tx
        .send(OrderServerMsg::IsPending { key: order.key(), reply: reply_tx })
        .await;
    matches!(timeout(config::RPC_TIMEOUT, reply_rx).await, Ok(Ok(true)))
}

/// Runs one auction: collect bids, resolve the winner, assign a watcher and
/// broadcast the result.
async fn auction(
    self_id: &NodeId,
    mut order: Order,
    order_server_tx: &mpsc::Sender<OrderServerMsg>,
    watchdog_tx: &mpsc::Sender<WatchdogMsg>,
    peers_rx: &watch::Receiver<PeerMap>,
) {
    let peers = peers_rx.borrow().clone();

    // A cab order is only ever served by its owner; its auction is just the
    // duplicate check against the fleet.
    let cab_owner = if order.button == ButtonType::Cab {
        Some(order.node.clone())
    } else {
        None
    };

    let mut bids: Vec<(NodeId, Bid)> = Vec::new();
    match &cab_owner {
        Some(owner) if owner == self_id => {
            if let Some(bid) = local_bid(&order, order_server_tx).await {
                bids.push((self_id.clone(), bid));
            }
        }
        Some(owner) => {
            if let Some(addr) = peers.get(owner) {
                let replies =
                    rpc::multi_call(vec![(owner.clone(), *addr)], rpc::Request::EvaluateCost(order.clone()))
                        .await;
                bids.extend(reply_bids(replies));
            }
        }
        None => {
            if let Some(bid) = local_bid(&order, order_server_tx).await {
                bids.push((self_id.clone(), bid));
            }
            let targets: Vec<_> = peers.iter().map(|(n, a)| (n.clone(), *a)).collect();
            let replies =
                rpc::multi_call(targets, rpc::Request::EvaluateCost(order.clone())).await;
            bids.extend(reply_bids(replies));
        }
    }

    let fallback = cab_owner.unwrap_or_else(|| self_id.clone());
    let winner = match resolve_winner(&bids, &fallback) {
        Some(w) => w,
        None => {
            // Someone already holds or held this order. Drop it silently.
            return;
        }
    };

    order.node = winner.clone();

    let mut candidates: Vec<NodeId> = peers.keys().cloned().collect();
    candidates.push(self_id.clone());
    order.watch_dog = pick_watcher(&candidates, &winner);

    print::auction(format!(
        "Order {} (floor {} {:?}) -> {} watched by {}",
        order.id, order.floor, order.button, order.node, order.watch_dog
    ));

    // Assignment goes to every order server in the fleet.
    let _ = order_server_tx.send(OrderServerMsg::NewOrder(order.clone())).await;
    rpc::broadcast_new_order(peers.clone(), order.clone());

    // The watcher's watchdog arms the deadline.
    if order.watch_dog == *self_id {
        let _ = watchdog_tx.send(WatchdogMsg::NewOrder(order)).await;
    } else {
        let addr = peers.get(&order.watch_dog).copied();
        let armed = match addr {
            Some(addr) => rpc::call(addr, rpc::Request::WatchdogNewOrder(order.clone()))
                .await
                .is_ok(),
            None => false,
        };
        if !armed {
            print::warn(format!(
                "Could not arm watchdog at {}, watching {} locally",
                order.watch_dog, order.id
            ));
            order.watch_dog = self_id.clone();
            let _ = watchdog_tx.send(WatchdogMsg::NewOrder(order)).await;
        }
    }
}

/// Collects the local order server's bid, bounded by the auction deadline.
async fn local_bid(
    order: &Order,
    order_server_tx: &mpsc::Sender<OrderServerMsg>,
) -> Option<Bid> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let _ = order_server_tx
        .send(OrderServerMsg::EvaluateCost { order: order.clone(), reply: reply_tx })
        .await;
    match timeout(config::RPC_TIMEOUT, reply_rx).await {
        Ok(Ok(bid)) => Some(bid),
        _ => None,
    }
}

fn reply_bids(replies: Vec<(NodeId, Option<rpc::Reply>)>) -> Vec<(NodeId, Bid)> {
    replies
        .into_iter()
        .filter_map(|(node, reply)| {
            let bid = match reply? {
                rpc::Reply::Cost(c) => Bid::Cost(c),
                rpc::Reply::Completed => Bid::Completed,
                rpc::Reply::NotReady => Bid::NotReady,
                rpc::Reply::Ok => return None,
            };
            Some((node, bid))
        })
        .collect()
}

/// Resolves the auction from a bid vector.
///
/// ## Returns
/// - `None` when any bidder reports the order completed: the auction aborts
///   and nothing is assigned.
/// - Otherwise the minimum-cost bidder, ties broken by lexicographic node
///   identity so every peer resolves the same winner from the same bids.
/// - With no cost bids at all, `fallback` wins by default.
pub fn resolve_winner(bids: &[(NodeId, Bid)], fallback: &NodeId) -> Option<NodeId> {
    if bids.iter().any(|(_, b)| *b == Bid::Completed) {
        return None;
    }
    bids.iter()
        .filter_map(|(node, bid)| match bid {
            Bid::Cost(c) => Some((*c, node.clone())),
            _ => None,
        })
        .min()
        .map(|(_, node)| node)
        .or_else(|| Some(fallback.clone()))
}

/// Picks the watcher for an order: uniformly random among the candidates
/// excluding the winner, or the winner itself when it is alone. Spreading
/// the deadline away from the serving node means a crash of that node still
/// leaves an armed timer somewhere.
pub fn pick_watcher(candidates: &[NodeId], winner: &NodeId) -> NodeId {
    let others: Vec<&NodeId> = candidates.iter().filter(|n| *n != winner).collect();
    others
        .choose(&mut rand::thread_rng())
        .map(|n| (*n).clone())
        .unwrap_or_else(|| winner.clone())
}
