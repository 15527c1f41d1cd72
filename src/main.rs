use std::path::PathBuf;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use elevatorfleet::network::{self, rpc, udp_broadcast, PeerMap};
use elevatorfleet::{config, distribution, init, lift, order_server, print, watchdog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match init::parse_args() {
        Some(args) => args,
        None => return Ok(()),
    };
    network::set_self_name(&args.name);

    print::info(format!(
        "Starting node '{}' on discovery port {}",
        args.name, args.udp_port
    ));
    if let Ok(ip) = network::get_self_ip() {
        print::info(format!("Local IP: {}", ip));
    }

/* START ----------- Init of local channels ---------------------- */
    let (lift_tx, lift_rx) = mpsc::channel(64);
    let (order_server_tx, order_server_rx) = mpsc::channel(64);
    let (distribution_tx, distribution_rx) = mpsc::channel(64);
    let (watchdog_tx, watchdog_rx) = mpsc::channel(64);
    let (peers_tx, peers_rx) = watch::channel(PeerMap::new());
/* END ------------- Init of local channels ---------------------- */

/* START ----------- Hardware ------------------------------------ */
    let elevator = init::start_hardware(lift_tx.clone(), distribution_tx.clone())?;
/* END ------------- Hardware ------------------------------------ */

/* START ----------- Network tasks ------------------------------- */
    let listener = TcpListener::bind("0.0.0.0:0").await?;
    let rpc_port = listener.local_addr()?.port();

    {
        let order_server_tx = order_server_tx.clone();
        let watchdog_tx = watchdog_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = rpc::serve(listener, order_server_tx, watchdog_tx).await {
                print::err(format!("RPC listener stopped: {}", e));
            }
        });
    }
    {
        let udp_port = args.udp_port;
        tokio::spawn(async move {
            if let Err(e) = udp_broadcast::start_udp_broadcaster(udp_port, rpc_port).await {
                print::err(format!("Beacon broadcaster stopped: {}", e));
            }
        });
    }
    {
        let udp_port = args.udp_port;
        let watchdog_tx = watchdog_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = udp_broadcast::start_udp_listener(udp_port, peers_tx, watchdog_tx).await
            {
                print::err(format!("Beacon listener stopped: {}", e));
            }
        });
    }
/* END ------------- Network tasks ------------------------------- */

/* START ----------- Core actors --------------------------------- */
    {
        let distribution_tx = distribution_tx.clone();
        let backup_path = PathBuf::from(config::BACKUP_PATH.lock().unwrap().clone());
        tokio::spawn(watchdog::run(watchdog_rx, distribution_tx, backup_path));
    }
    {
        let name = args.name.clone();
        let lift_tx = lift_tx.clone();
        let watchdog_tx = watchdog_tx.clone();
        let peers_rx = peers_rx.clone();
        tokio::spawn(order_server::run(
            name,
            order_server_rx,
            lift_tx,
            watchdog_tx,
            peers_rx,
        ));
    }
    {
        let name = args.name.clone();
        let order_server_tx = order_server_tx.clone();
        let watchdog_tx = watchdog_tx.clone();
        tokio::spawn(distribution::run(
            name,
            distribution_rx,
            order_server_tx,
            watchdog_tx,
            peers_rx,
        ));
    }
    let lift_task = tokio::spawn(lift::run(lift_rx, order_server_tx.clone(), elevator));
/* END ------------- Core actors --------------------------------- */

    tokio::select! {
        _ = lift_task => {
            // The cab is jammed mid-shaft. Exit normally so supervision
            // restarts the node from init with a clean queue; peers reinject
            // our hall orders on their deadlines and our cab orders replay
            // from standby once we are back.
            print::err("Lift stopped, exiting for a supervised restart".to_string());
            std::process::exit(0);
        }
        _ = tokio::signal::ctrl_c() => {
            print::info("Shutting down".to_string());
        }
    }
    Ok(())
}
