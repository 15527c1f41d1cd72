//! System initialization: argument parsing and hardware bring-up.

use std::env;

use crossbeam_channel as cbc;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config;
use crate::distribution::DistributionMsg;
use crate::elevio::{self, elev::Elevator, CallButton};
use crate::lift::LiftMsg;
use crate::print;

/// The two startup parameters every node takes.
pub struct BootArgs {
    /// Human-readable node name, the identity used in auctions.
    pub name: String,
    /// UDP port for node discovery.
    pub udp_port: u16,
}

/// ### Reads arguments from `cargo run`
///
/// A node is started with a name and optionally a discovery port:
///
/// `elevator_fleet <name> [udp_port]`
///
/// Additional options modify what is printed during runtime:
///
/// `print_err::(true/false)` &rarr; Prints error messages
/// `print_warn::(true/false)` &rarr; Prints warning messages
/// `print_ok::(true/false)` &rarr; Prints OK messages
/// `print_info::(true/false)` &rarr; Prints informational messages
/// `print_else::(true/false)` &rarr; Prints other messages, including auction logs
/// `backup_file::(path)` &rarr; Location of the watchdog backup file
/// `debug::` &rarr; Disables all prints except error messages
/// `help` &rarr; Displays all possible arguments without starting the program
///
/// ## Returns
/// - `Some(BootArgs)` when a name was given.
/// - `None` when the arguments were incomplete; usage has been printed.
pub fn parse_args() -> Option<BootArgs> {
    let args: Vec<String> = env::args().collect();

    let mut name: Option<String> = None;
    let mut udp_port: u16 = config::DISCOVERY_PORT;

    for arg in &args[1..] {
        let parts: Vec<&str> = arg.split("::").collect();
        if parts.len() == 2 {
            let key = parts[0].to_lowercase();
            let value = parts[1].to_string();
            let is_true = value.to_lowercase() == "true";

            match key.as_str() {
                "print_err" => *config::PRINT_ERR_ON.lock().unwrap() = is_true,
                "print_warn" => *config::PRINT_WARN_ON.lock().unwrap() = is_true,
                "print_ok" => *config::PRINT_OK_ON.lock().unwrap() = is_true,
                "print_info" => *config::PRINT_INFO_ON.lock().unwrap() = is_true,
                "print_else" => *config::PRINT_ELSE_ON.lock().unwrap() = is_true,
                "backup_file" => *config::BACKUP_PATH.lock().unwrap() = value,
                "debug" => {
                    *config::PRINT_WARN_ON.lock().unwrap() = false;
                    *config::PRINT_OK_ON.lock().unwrap() = false;
                    *config::PRINT_INFO_ON.lock().unwrap() = false;
                    *config::PRINT_ELSE_ON.lock().unwrap() = false;
                }
                _ => {}
            }
        } else if arg.to_lowercase() == "help" {
            println!("Usage: elevator_fleet <name> [udp_port] [options]");
            println!("Options:");
            println!("  print_err::true/false");
            println!("  print_warn::true/false");
            println!("  print_ok::true/false");
            println!("  print_info::true/false");
            println!("  print_else::true/false");
            println!("  backup_file::<path>");
            println!("  debug:: (only error messages are shown)");
            std::process::exit(0);
        } else if name.is_none() {
            name = Some(arg.clone());
        } else if let Ok(port) = arg.parse::<u16>() {
            udp_port = port;
        }
    }

    match name {
        Some(name) => Some(BootArgs { name, udp_port }),
        None => {
            println!("Usage: elevator_fleet <name> [udp_port] [options]");
            None
        }
    }
}

/// Connects to the elevator hardware and starts the pollers.
///
/// ## Behavior
/// - Opens the driver connection.
/// - Spawns one OS thread per input class (call buttons, floor sensor,
///   stop button, obstruction), each feeding a crossbeam channel.
/// - Spawns an async task that routes the events into the node: floor and
///   obstruction events to the lift, button presses to the distributor.
///
/// ## Returns
/// The hardware handle, to be handed to the lift actor.
pub fn start_hardware(
    lift_tx: mpsc::Sender<LiftMsg>,
    distribution_tx: mpsc::Sender<DistributionMsg>,
) -> std::io::Result<Elevator> {
    let elevator = Elevator::init(config::LOCAL_ELEV_ADDR, config::NUM_FLOORS)?;

    let (call_button_tx, call_button_rx) = cbc::unbounded::<CallButton>();
    let (floor_sensor_tx, floor_sensor_rx) = cbc::unbounded::<u8>();
    let (stop_button_tx, stop_button_rx) = cbc::unbounded::<bool>();
    let (obstruction_tx, obstruction_rx) = cbc::unbounded::<bool>();

    {
        let elevator = elevator.clone();
        std::thread::spawn(move || {
            elevio::poll::call_buttons(elevator, call_button_tx, config::ELEV_POLL)
        });
    }
    {
        let elevator = elevator.clone();
        std::thread::spawn(move || {
            elevio::poll::floor_sensor(elevator, floor_sensor_tx, config::ELEV_POLL)
        });
    }
    {
        let elevator = elevator.clone();
        std::thread::spawn(move || {
            elevio::poll::stop_button(elevator, stop_button_tx, config::ELEV_POLL)
        });
    }
    {
        let elevator = elevator.clone();
        std::thread::spawn(move || {
            elevio::poll::obstruction(elevator, obstruction_tx, config::ELEV_POLL)
        });
    }

    tokio::spawn(route_hardware_events(
        call_button_rx,
        floor_sensor_rx,
        stop_button_rx,
        obstruction_rx,
        lift_tx,
        distribution_tx,
    ));

    Ok(elevator)
}

/// Forwards hardware events from the poller threads into the actors.
async fn route_hardware_events(
    call_button_rx: cbc::Receiver<CallButton>,
    floor_sensor_rx: cbc::Receiver<u8>,
    stop_button_rx: cbc::Receiver<bool>,
    obstruction_rx: cbc::Receiver<bool>,
    lift_tx: mpsc::Sender<LiftMsg>,
    distribution_tx: mpsc::Sender<DistributionMsg>,
) {
    loop {
        if let Ok(call_button) = call_button_rx.try_recv() {
            print::info(format!("Callbutton: {:?}", call_button));
            let _ = distribution_tx
                .send(DistributionMsg::NewCall {
                    floor: call_button.floor,
                    button: call_button.button,
                })
                .await;
        }

        if let Ok(floor) = floor_sensor_rx.try_recv() {
            print::info(format!("Floor: {:?}", floor));
            let _ = lift_tx.send(LiftMsg::AtFloor(floor)).await;
        }

        if let Ok(stop) = stop_button_rx.try_recv() {
            // The stop button has no role in order coordination.
            print::info(format!("Stop button: {:?}", stop));
        }

        if let Ok(obstruction) = obstruction_rx.try_recv() {
            print::info(format!("Obstruction: {:?}", obstruction));
            let _ = lift_tx.send(LiftMsg::Obstruction(obstruction)).await;
        }

        sleep(config::POLL_PERIOD).await;
    }
}
