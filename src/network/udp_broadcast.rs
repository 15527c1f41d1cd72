//! ## Node discovery over UDP broadcast
//!
//! Every node broadcasts a small authenticated beacon once a second. The
//! listener registers unknown senders as peers and a liveness sweep declares
//! a peer down after a few missed beacons. Both edges are forwarded to the
//! watchdog, which owns the standby/replay reaction.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Instant};

use crate::config;
use crate::network::{read_self_name, PeerMap};
use crate::order::NodeId;
use crate::print;
use crate::watchdog::WatchdogMsg;

/// The discovery payload every node broadcasts once per beacon period.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct Beacon {
    key: String,
    name: String,
    rpc_port: u16,
}

/// Creates a reusable, broadcast-enabled UDP socket bound to `addr`.
fn create_broadcast_socket(addr: &str) -> tokio::io::Result<UdpSocket> {
    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|_| tokio::io::Error::new(tokio::io::ErrorKind::InvalidInput, "invalid address"))?;
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;

    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&socket_addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Broadcasts this node's beacon once per [`config::BEACON_PERIOD`].
///
/// ## Parameters
/// - `udp_port`: the fleet's discovery port.
/// - `rpc_port`: the local RPC listener port, advertised to peers.
///
/// ## Note
/// This function is permanently blocking and should be spawned as a task.
pub async fn start_udp_broadcaster(udp_port: u16, rpc_port: u16) -> tokio::io::Result<()> {
    let broadcast_addr: SocketAddr = format!("{}:{}", config::BC_ADDR, udp_port)
        .parse()
        .map_err(|_| tokio::io::Error::new(tokio::io::ErrorKind::InvalidInput, "invalid address"))?;
    let socket = create_broadcast_socket(&format!("{}:0", config::BC_LISTEN_ADDR))?;

    let beacon = Beacon {
        key: config::KEY_STR.to_string(),
        name: read_self_name(),
        rpc_port,
    };
    let bytes = bincode::serialize(&beacon)
        .map_err(|e| tokio::io::Error::new(tokio::io::ErrorKind::InvalidData, e))?;

    loop {
        if let Err(e) = socket.send_to(&bytes, &broadcast_addr).await {
            print::warn(format!("Beacon send failed: {}", e));
        }
        sleep(config::BEACON_PERIOD).await;
    }
}

/// Listens for peer beacons, maintains the peer snapshot and emits
/// `NodeUp`/`NodeDown` to the watchdog.
///
/// ## Behavior
/// - Beacons without our cluster cookie are dropped; so are our own.
/// - A beacon from an unknown name registers the peer and emits `NodeUp`.
/// - A peer silent for [`config::PEER_TIMEOUT`] is removed and `NodeDown`
///   is emitted.
///
/// ## Note
/// This function is permanently blocking and should be spawned as a task.
pub async fn start_udp_listener(
    udp_port: u16,
    peers_tx: watch::Sender<PeerMap>,
    watchdog_tx: mpsc::Sender<WatchdogMsg>,
) -> tokio::io::Result<()> {
    let socket = create_broadcast_socket(&format!("{}:{}", config::BC_LISTEN_ADDR, udp_port))?;
    let self_name = read_self_name();

    let mut buf = [0; config::UDP_BUFFER];
    let mut peers = PeerMap::new();
    let mut last_seen: HashMap<NodeId, Instant> = HashMap::new();

    loop {
        match timeout(config::BEACON_PERIOD, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                if let Ok(beacon) = bincode::deserialize::<Beacon>(&buf[..len]) {
                    // Verify the beacon is from one of 'our' nodes.
                    if beacon.key == config::KEY_STR && beacon.name != self_name {
                        let rpc_addr = SocketAddr::new(from.ip(), beacon.rpc_port);
                        last_seen.insert(beacon.name.clone(), Instant::now());

                        let known = peers.get(&beacon.name) == Some(&rpc_addr);
                        if !known {
                            let fresh = peers.insert(beacon.name.clone(), rpc_addr).is_none();
                            let _ = peers_tx.send(peers.clone());
                            if fresh {
                                print::ok(format!("Node {} up at {}", beacon.name, rpc_addr));
                                let _ = watchdog_tx
                                    .send(WatchdogMsg::NodeUp(beacon.name.clone()))
                                    .await;
                            }
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                return Err(e);
            }
            Err(_) => {
                // Quiet period, fall through to the liveness sweep.
            }
        }

        let dead: Vec<NodeId> = last_seen
            .iter()
            .filter(|(_, seen)| seen.elapsed() > config::PEER_TIMEOUT)
            .map(|(name, _)| name.clone())
            .collect();
        for name in dead {
            last_seen.remove(&name);
            peers.remove(&name);
            let _ = peers_tx.send(peers.clone());
            print::warn(format!("Node {} down (beacons stopped)", name));
            let _ = watchdog_tx.send(WatchdogMsg::NodeDown(name)).await;
        }
    }
}
