//! Node identity and the peer registry shared with the networking tasks.

pub mod rpc;
pub mod udp_broadcast;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::OnceLock;

use local_ip_address::local_ip;

use crate::order::NodeId;

/// Snapshot of the currently known peers: node name to RPC address.
///
/// Published on a `watch` channel by the discovery listener; the auctioneer
/// and the order server read the latest snapshot whenever they fan out.
pub type PeerMap = HashMap<NodeId, SocketAddr>;

/// This node's name, set once during initialization.
static SELF_NAME: OnceLock<String> = OnceLock::new();

/// Sets this node's name. Called once from init; later calls are ignored.
pub fn set_self_name(name: &str) {
    let _ = SELF_NAME.set(name.to_string());
}

/// Returns this node's name.
///
/// ## Note
/// The value is `"unnamed"` if initialization has not run.
pub fn read_self_name() -> String {
    SELF_NAME
        .get()
        .cloned()
        .unwrap_or_else(|| "unnamed".to_string())
}

/// Returns the local IPv4 address of the machine as `IpAddr`.
///
/// If no local IPv4 address is found, returns `local_ip_address::Error`.
pub fn get_self_ip() -> Result<IpAddr, local_ip_address::Error> {
    let ip = match local_ip() {
        Ok(ip) => ip,
        Err(e) => {
            return Err(e);
        }
    };
    Ok(ip)
}
