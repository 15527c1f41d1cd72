//! # config.rs – Centralized Parameter Store
//!
//! This module holds all static program parameters used throughout the system.
//! Keeping configuration in one place makes tuning, experimentation, and testing easier.

use std::sync::Mutex;
use std::time::Duration;
use once_cell::sync::Lazy;

//
// ──────────────────────────────────────────────────────────────
//   1. NETWORK SETTINGS
// ──────────────────────────────────────────────────────────────
//

/// Default UDP port for node discovery broadcasts
pub const DISCOVERY_PORT: u16 = 20000;

/// UDP broadcast listen address (bind address)
pub static BC_LISTEN_ADDR: &str = "0.0.0.0";

/// Broadcast address used for system-wide discovery
pub static BC_ADDR: &str = "255.255.255.255";

/// Shared authentication cookie, filters out beacons from foreign clusters
pub const KEY_STR: &str = "Gruppe 25";

/// Localhost address of the elevator hardware server
pub static LOCAL_ELEV_ADDR: &str = "localhost:15657";

/// Size of UDP receive buffer in bytes
pub const UDP_BUFFER: usize = 1024;

//
// ──────────────────────────────────────────────────────────────
//   2. SYSTEM & ELEVATOR PARAMETERS
// ──────────────────────────────────────────────────────────────
//

/// Number of floors served by every cab in the fleet.
/// Must be identical on every node.
pub const NUM_FLOORS: u8 = 4;

/// Duration between elevator hardware polls
pub const ELEV_POLL: Duration = Duration::from_millis(25);

/// General actor poll period (10 ms)
pub const POLL_PERIOD: Duration = Duration::from_millis(10);

//
// ──────────────────────────────────────────────────────────────
//   3. TIMING & TIMEOUTS & INTERVALS
// ──────────────────────────────────────────────────────────────
//

/// Time the door stays open before the cab resumes
pub const DOOR_OPEN_DURATION: Duration = Duration::from_secs(2);

/// Maximum time between floor sensor events before the cab is considered stuck
pub const MOTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Deadline a watchdog holds per order before reinjecting it.
/// Must exceed the worst-case service time of one order plus auction overhead.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for a single inter-node RPC, including bid collection
pub const RPC_TIMEOUT: Duration = Duration::from_secs(1);

/// Time between discovery beacon transmissions
pub const BEACON_PERIOD: Duration = Duration::from_secs(1);

/// Beacon silence after which a peer is declared down
pub const PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum age of a restored in-flight order on watchdog boot
pub const ACTIVE_MAX_AGE: Duration = Duration::from_secs(120);

/// Maximum age of a restored standby cab order on watchdog boot.
/// Bounds how long a power-cycled node may miss its cab calls.
pub const STANDBY_MAX_AGE: Duration = Duration::from_secs(600);

/// How long a completed order is remembered for auction deduplication
pub const HISTORY_MAX_AGE: Duration = Duration::from_secs(120);

//
// ──────────────────────────────────────────────────────────────
//   4. COST WEIGHTS
// ──────────────────────────────────────────────────────────────
//

/// Added to a bid for every order already queued for the bidding cab
pub const BUSY_PENALTY: u32 = 4;

/// Added to a bid when the bidding cab is idle
pub const IDLE_PENALTY: u32 = 1;

/// Added to a bid when serving the order requires reversing travel direction
pub const REVERSE_PENALTY: u32 = 6;

//
// ──────────────────────────────────────────────────────────────
//   5. PERSISTENCE
// ──────────────────────────────────────────────────────────────
//

/// Path of the watchdog backup file, overridable with `backup_file::<path>`
pub static BACKUP_PATH: Lazy<Mutex<String>> =
    Lazy::new(|| Mutex::new("watchdog_backup.txt".to_string()));

//
// ──────────────────────────────────────────────────────────────
//   6. LOGGING CONFIGURATION
// ──────────────────────────────────────────────────────────────
//

/// Enable/disable printing of errors
pub static PRINT_ERR_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of warnings
pub static PRINT_WARN_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of success messages
pub static PRINT_OK_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of general info
pub static PRINT_INFO_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable miscellaneous debug prints
pub static PRINT_ELSE_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));
