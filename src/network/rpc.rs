//! Inter-node RPC over short-lived TCP connections.
//!
//! Each node runs one listener. A call is one length-prefixed bincode frame
//! with the request, answered by one frame with the reply. Every client call
//! is bounded by [`config::RPC_TIMEOUT`]; a late or failed call is simply a
//! non-vote, recovery belongs to the watchdog.

use std::io;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::config;
use crate::network::PeerMap;
use crate::order::{NodeId, Order};
use crate::order_server::{Bid, OrderServerMsg};
use crate::print;
use crate::watchdog::WatchdogMsg;

/// The RPC request vocabulary.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum Request {
    /// Ask the peer's order server for a bid.
    EvaluateCost(Order),
    /// Deliver an auction assignment to the peer's order server.
    NewOrder(Order),
    /// Arm the peer's watchdog for the order.
    WatchdogNewOrder(Order),
    /// Announce a completed order to the peer's order server and watchdog.
    OrderComplete(Order),
}

/// The RPC reply vocabulary.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Bid: the peer can serve the order at this cost.
    Cost(u32),
    /// Bid: the order is already done, the auction must abort.
    Completed,
    /// Bid: the peer is not a valid participant right now.
    NotReady,
    /// Plain acknowledgement.
    Ok,
}

fn to_io<E: std::error::Error + Send + Sync + 'static>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

async fn write_frame<T: Serialize>(stream: &mut TcpStream, value: &T) -> io::Result<()> {
    let bytes = bincode::serialize(value).map_err(to_io)?;
    stream.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    Ok(())
}

async fn read_frame<T: for<'de> Deserialize<'de>>(stream: &mut TcpStream) -> io::Result<T> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > config::UDP_BUFFER * 64 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "oversized frame"));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    bincode::deserialize(&buf).map_err(to_io)
}

/// Performs one RPC against `addr`, bounded by [`config::RPC_TIMEOUT`].
pub async fn call(addr: SocketAddr, req: Request) -> io::Result<Reply> {
    timeout(config::RPC_TIMEOUT, async {
        let mut stream = TcpStream::connect(addr).await?;
        write_frame(&mut stream, &req).await?;
        read_frame(&mut stream).await
    })
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "rpc deadline"))?
}

/// Fans one request out to many peers in parallel and collects the
/// per-peer outcomes.
///
/// ## Returns
/// One entry per peer: the reply, or `None` when the peer failed to answer
/// inside the deadline.
pub async fn multi_call(
    peers: Vec<(NodeId, SocketAddr)>,
    req: Request,
) -> Vec<(NodeId, Option<Reply>)> {
    let mut handles = Vec::with_capacity(peers.len());
    for (node, addr) in peers {
        let req = req.clone();
        handles.push(tokio::spawn(async move {
            let reply = call(addr, req).await.ok();
            (node, reply)
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(outcome) = handle.await {
            outcomes.push(outcome);
        }
    }
    outcomes
}

/// Fire-and-forget broadcast of an auction assignment to every peer.
pub fn broadcast_new_order(peers: PeerMap, order: Order) {
    for (_, addr) in peers {
        let order = order.clone();
        tokio::spawn(async move {
            let _ = call(addr, Request::NewOrder(order)).await;
        });
    }
}

/// Fire-and-forget broadcast of a completion notice to every peer, so their
/// order servers drop the mirror entry and their watchdogs disarm.
pub fn broadcast_complete(peers: PeerMap, order: Order) {
    for (_, addr) in peers {
        let order = order.clone();
        tokio::spawn(async move {
            let _ = call(addr, Request::OrderComplete(order)).await;
        });
    }
}

/// Serves incoming RPCs, routing each request into the right actor inbox.
///
/// ## Note
/// This function is permanently blocking and should be spawned as a task.
pub async fn serve(
    listener: TcpListener,
    order_server_tx: mpsc::Sender<OrderServerMsg>,
    watchdog_tx: mpsc::Sender<WatchdogMsg>,
) -> io::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let os_tx = order_server_tx.clone();
        let wd_tx = watchdog_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, os_tx, wd_tx).await {
                print::warn(format!("RPC connection failed: {}", e));
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    order_server_tx: mpsc::Sender<OrderServerMsg>,
    watchdog_tx: mpsc::Sender<WatchdogMsg>,
) -> io::Result<()> {
    let request: Request = read_frame(&mut stream).await?;

    let reply = match request {
        Request::EvaluateCost(order) => {
            let (reply_tx, reply_rx) = oneshot::channel();
            let _ = order_server_tx
                .send(OrderServerMsg::EvaluateCost { order, reply: reply_tx })
                .await;
            match timeout(config::RPC_TIMEOUT, reply_rx).await {
                Ok(Ok(Bid::Cost(c))) => Reply::Cost(c),
                Ok(Ok(Bid::Completed)) => Reply::Completed,
                _ => Reply::NotReady,
            }
        }
        Request::NewOrder(order) => {
            let _ = order_server_tx.send(OrderServerMsg::NewOrder(order)).await;
            Reply::Ok
        }
        Request::WatchdogNewOrder(order) => {
            let _ = watchdog_tx.send(WatchdogMsg::NewOrder(order)).await;
            Reply::Ok
        }
        Request::OrderComplete(order) => {
            let _ = order_server_tx
                .send(OrderServerMsg::PeerComplete(order.clone()))
                .await;
            let _ = watchdog_tx.send(WatchdogMsg::OrderComplete(order)).await;
            Reply::Ok
        }
    };

    write_frame(&mut stream, &reply).await
}
