//! Two-node coordination tests.
//!
//! These spin up the order server, watchdog and distributor actors of two
//! in-process nodes, connected by real loopback RPC, with the lift replaced
//! by a probe that accepts every dispatch. The hardware driver and UDP
//! discovery stay out; peer snapshots are wired directly.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use elevatorfleet::distribution::{self, DistributionMsg};
use elevatorfleet::elevio::Dirn;
use elevatorfleet::lift::{LiftMsg, LiftReply};
use elevatorfleet::network::{rpc, PeerMap};
use elevatorfleet::order::{ButtonType, Order};
use elevatorfleet::order_server::{self, OrderServerMsg};
use elevatorfleet::watchdog::{self, WatchdogMsg};

struct TestNode {
    name: String,
    addr: std::net::SocketAddr,
    os_tx: mpsc::Sender<OrderServerMsg>,
    dist_tx: mpsc::Sender<DistributionMsg>,
    wd_tx: mpsc::Sender<WatchdogMsg>,
    peers_tx: watch::Sender<PeerMap>,
    /// Orders the node's lift was asked to serve.
    dispatched_rx: mpsc::Receiver<Order>,
    _backup_dir: tempfile::TempDir,
}

/// Starts one node's coordination actors at the given lift position.
async fn spawn_node(name: &str, floor: u8) -> TestNode {
    let (lift_tx, mut lift_rx) = mpsc::channel(64);
    let (os_tx, os_rx) = mpsc::channel(64);
    let (dist_tx, dist_rx) = mpsc::channel(64);
    let (wd_tx, wd_rx) = mpsc::channel(64);
    let (peers_tx, peers_rx) = watch::channel(PeerMap::new());
    let (dispatched_tx, dispatched_rx) = mpsc::channel(64);

    let backup_dir = tempfile::tempdir().unwrap();

    // Lift probe: accept every handover, ignore lamp traffic.
    tokio::spawn(async move {
        while let Some(msg) = lift_rx.recv().await {
            if let LiftMsg::NewOrder { order, reply } = msg {
                let _ = reply.send(LiftReply::Accepted);
                let _ = dispatched_tx.send(order).await;
            }
        }
    });

    tokio::spawn(order_server::run(
        name.to_string(),
        os_rx,
        lift_tx,
        wd_tx.clone(),
        peers_rx.clone(),
    ));
    tokio::spawn(watchdog::run(
        wd_rx,
        dist_tx.clone(),
        backup_dir.path().join("watchdog_backup.txt"),
    ));
    tokio::spawn(distribution::run(
        name.to_string(),
        dist_rx,
        os_tx.clone(),
        wd_tx.clone(),
        peers_rx,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(rpc::serve(listener, os_tx.clone(), wd_tx.clone()));

    os_tx
        .send(OrderServerMsg::UpdateLiftPosition { floor, dirn: Dirn::Up })
        .await
        .unwrap();
    os_tx.send(OrderServerMsg::LiftReady).await.unwrap();

    TestNode {
        name: name.to_string(),
        addr,
        os_tx,
        dist_tx,
        wd_tx,
        peers_tx,
        dispatched_rx,
        _backup_dir: backup_dir,
    }
}

/// Makes two nodes see each other.
fn connect(a: &TestNode, b: &TestNode) {
    let mut a_peers = PeerMap::new();
    a_peers.insert(b.name.clone(), b.addr);
    a.peers_tx.send(a_peers).unwrap();

    let mut b_peers = PeerMap::new();
    b_peers.insert(a.name.clone(), a.addr);
    b.peers_tx.send(b_peers).unwrap();
}

async fn expect_dispatch(node: &mut TestNode) -> Order {
    timeout(Duration::from_secs(5), node.dispatched_rx.recv())
        .await
        .expect("no dispatch in time")
        .expect("lift probe closed")
}

async fn expect_no_dispatch(node: &mut TestNode) {
    assert!(
        timeout(Duration::from_millis(300), node.dispatched_rx.recv())
            .await
            .is_err(),
        "unexpected dispatch at {}",
        node.name
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn nearest_cab_wins_the_auction_and_completion_clears_the_fleet() {
    // Node a idles at floor 0, node b at floor 3. Hall-up at floor 1 is
    // closer to a, so a must win on both nodes' books.
    let mut a = spawn_node("a", 0).await;
    let mut b = spawn_node("b", 3).await;
    connect(&a, &b);

    a.dist_tx
        .send(DistributionMsg::NewCall { floor: 1, button: ButtonType::HallUp })
        .await
        .unwrap();

    let order = expect_dispatch(&mut a).await;
    assert_eq!(order.node, "a");
    assert_eq!(order.floor, 1);
    // The only possible watcher is the other node.
    assert_eq!(order.watch_dog, "b");
    expect_no_dispatch(&mut b).await;

    // While the order is in flight, b's mirror refuses a racing duplicate.
    let racing = Order::from_button("b", 1, ButtonType::HallUp).unwrap();
    let reply = rpc::call(b.addr, rpc::Request::EvaluateCost(racing)).await.unwrap();
    assert_eq!(reply, rpc::Reply::Completed);

    // a completes; the broadcast clears b's mirror and disarms b's watchdog.
    a.os_tx
        .send(OrderServerMsg::OrderComplete(order.clone()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The completed id answers Completed from history...
    let reply = rpc::call(b.addr, rpc::Request::EvaluateCost(order.clone())).await.unwrap();
    assert_eq!(reply, rpc::Reply::Completed);

    // ...but the button itself is free again: a fresh order gets a cost.
    let fresh = Order::from_button("b", 1, ButtonType::HallUp).unwrap();
    let reply = rpc::call(b.addr, rpc::Request::EvaluateCost(fresh)).await.unwrap();
    assert!(matches!(reply, rpc::Reply::Cost(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn cab_calls_stay_with_their_node_even_when_a_peer_is_closer() {
    // b sits exactly at the requested floor, but the cab button was pressed
    // inside a's cab.
    let mut a = spawn_node("a", 0).await;
    let mut b = spawn_node("b", 2).await;
    connect(&a, &b);

    a.dist_tx
        .send(DistributionMsg::NewCall { floor: 2, button: ButtonType::Cab })
        .await
        .unwrap();

    let order = expect_dispatch(&mut a).await;
    assert_eq!(order.node, "a");
    assert_eq!(order.button, ButtonType::Cab);
    expect_no_dispatch(&mut b).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reinjecting_a_completed_order_assigns_nothing() {
    let mut a = spawn_node("a", 0).await;
    let mut b = spawn_node("b", 3).await;
    connect(&a, &b);

    a.dist_tx
        .send(DistributionMsg::NewCall { floor: 1, button: ButtonType::HallUp })
        .await
        .unwrap();
    let order = expect_dispatch(&mut a).await;
    a.os_tx
        .send(OrderServerMsg::OrderComplete(order.clone()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // A watchdog racing the completion broadcast reinjects the same id.
    // Some bidder still remembers it, so the auction aborts silently.
    a.dist_tx.send(DistributionMsg::NewOrder(order)).await.unwrap();
    expect_no_dispatch(&mut a).await;
    expect_no_dispatch(&mut b).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn node_down_moves_cab_orders_to_standby_and_node_up_replays_them() {
    // b watches a cab order owned by a. When a dies the order parks in
    // standby; when a returns it replays through the auction and lands on
    // a again.
    let mut a = spawn_node("a", 0).await;
    let mut b = spawn_node("b", 3).await;
    connect(&a, &b);

    let mut cab = Order::from_button("a", 2, ButtonType::Cab).unwrap();
    cab.watch_dog = "b".to_string();
    b.wd_tx.send(WatchdogMsg::NewOrder(cab.clone())).await.unwrap();

    b.wd_tx.send(WatchdogMsg::NodeDown("a".to_string())).await.unwrap();
    // Standby orders are not reinjected while the owner is away.
    expect_no_dispatch(&mut a).await;

    b.wd_tx.send(WatchdogMsg::NodeUp("a".to_string())).await.unwrap();
    let replayed = expect_dispatch(&mut a).await;
    assert_eq!(replayed.id, cab.id);
    assert_eq!(replayed.node, "a");
}

#[tokio::test(flavor = "multi_thread")]
async fn hall_orders_of_a_dead_node_are_reinjected_at_once() {
    let mut a = spawn_node("a", 0).await;
    let mut b = spawn_node("b", 3).await;
    connect(&a, &b);

    // b watches a hall order served by a. a dies: any cab may take over,
    // so b's watchdog reinjects immediately and b (sole bidder) serves.
    let mut hall = Order::from_button("a", 2, ButtonType::HallUp).unwrap();
    hall.watch_dog = "b".to_string();
    b.wd_tx.send(WatchdogMsg::NewOrder(hall.clone())).await.unwrap();

    // Drop a from b's view before the notification, like a real crash.
    b.peers_tx.send(PeerMap::new()).unwrap();
    b.wd_tx.send(WatchdogMsg::NodeDown("a".to_string())).await.unwrap();

    let taken = expect_dispatch(&mut b).await;
    assert_eq!(taken.id, hall.id);
    assert_eq!(taken.node, "b");
}
