//! Core order data model shared by every component and by the inter-node wire format.
//!
//! An [`Order`] is the unit of work in the system. It is created at the node
//! where a button was pressed, circulates through exactly one auction, and is
//! destroyed when its completion is broadcast. Its [`OrderId`] never changes,
//! which is what lets reinjected orders merge with in-flight copies on other
//! nodes instead of duplicating them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config;

/// A node is identified by the human-readable name it was started with.
///
/// Lexicographic ordering on the name is the fleet-wide tiebreak order used
/// by the auction, so every peer resolves the same winner from the same bids.
pub type NodeId = String;

/// Process-wide counter backing [`next_order_id`].
static ORDER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Returns the current wall-clock time as whole seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Unique handle of an order: creating node plus a monotonic local counter.
///
/// Equality on the id governs all lookup and completion matching.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderId {
    /// Name of the node that created the order.
    pub node: NodeId,
    /// Monotonic counter local to the creating process.
    pub seq: u64,
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.node, self.seq)
    }
}

/// Mints a fresh [`OrderId`] for an order created on this node.
pub fn next_order_id(node: &str) -> OrderId {
    OrderId {
        node: node.to_string(),
        seq: ORDER_SEQ.fetch_add(1, Ordering::SeqCst),
    }
}

/// The three kinds of call buttons.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonType {
    /// An up button on a landing. Any cab may serve it.
    HallUp,
    /// A down button on a landing. Any cab may serve it.
    HallDown,
    /// A button inside a cab. Only the originating cab may serve it.
    Cab,
}

impl ButtonType {
    /// True for the two landing button kinds.
    pub fn is_hall(&self) -> bool {
        matches!(self, ButtonType::HallUp | ButtonType::HallDown)
    }
}

/// The unit of work: one button press somewhere in the fleet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Order {
    /// Process-wide unique handle. Never mutates.
    pub id: OrderId,
    /// Target floor, in `[0, NUM_FLOORS - 1]`.
    pub floor: u8,
    /// Which button produced the order.
    pub button: ButtonType,
    /// The node currently responsible for serving the order. Initially the
    /// creator, reassigned by the auction winner. For cab orders this is the
    /// creator forever.
    pub node: NodeId,
    /// The node currently holding the deadline timer for this order.
    pub watch_dog: NodeId,
    /// Wall-clock creation time in Unix seconds, used to age out stale
    /// backup entries on restart.
    pub time: u64,
}

impl Order {
    /// Creates a new order for a button press on `node`, validating the
    /// floor/button combination at the creation boundary.
    ///
    /// ## Returns
    /// - `None` for illegal input: hall-up at the top floor, hall-down at
    ///   floor 0, or a floor outside the configured range. Illegal presses
    ///   never enter the auction.
    pub fn from_button(node: &str, floor: u8, button: ButtonType) -> Option<Order> {
        if floor >= config::NUM_FLOORS {
            return None;
        }
        match button {
            ButtonType::HallUp if floor == config::NUM_FLOORS - 1 => return None,
            ButtonType::HallDown if floor == 0 => return None,
            _ => {}
        }
        Some(Order {
            id: next_order_id(node),
            floor,
            button,
            node: node.to_string(),
            watch_dog: node.to_string(),
            time: unix_now(),
        })
    }

    /// The queue key this order occupies, see [`OrderKey`].
    pub fn key(&self) -> OrderKey {
        OrderKey {
            floor: self.floor,
            button: self.button,
            node: if self.button == ButtonType::Cab {
                Some(self.node.clone())
            } else {
                None
            },
        }
    }

    /// Age of the order relative to `now` (Unix seconds).
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.time)
    }
}

/// Key under which at most one outstanding order may exist in a queue.
///
/// A hall key is fleet-wide: every node's queue mirrors the same entry. A cab
/// key carries the owning node as well, so each cab has its own column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderKey {
    /// Target floor.
    pub floor: u8,
    /// Button kind.
    pub button: ButtonType,
    /// Owning node, present for cab orders only.
    pub node: Option<NodeId>,
}
