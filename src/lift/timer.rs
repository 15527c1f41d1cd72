//! Timer utility for the poll-style deadlines in the lift state machine.
//!
//! A timer is inactive until `timer_start()` is called. When active, it
//! measures elapsed time against its timeout duration. A timer that is
//! superseded by an event is stopped with `timer_stop()` before any
//! replacement is armed, so a stale deadline can never fire.

use tokio::time::{Duration, Instant};

/// A simple timer for managing timeouts in asynchronous poll loops.
pub struct Timer {
    timer_active: bool,
    timeout_duration: Duration,
    start_time: Instant,
}

impl Timer {
    /// Creates a new, inactive timer with the specified timeout duration.
    pub fn new(timeout_duration: Duration) -> Timer {
        Timer {
            timer_active: false,
            timeout_duration,
            start_time: Instant::now(),
        }
    }

    /// Starts the timer by setting it as active and resetting the start time.
    pub fn timer_start(&mut self) {
        self.timer_active = true;
        self.start_time = Instant::now();
    }

    /// Cancels the timer. An inactive timer never reports a timeout.
    pub fn timer_stop(&mut self) {
        self.timer_active = false;
    }

    /// Checks if the timer has timed out.
    ///
    /// The timer is considered timed out if it is active and the elapsed
    /// time exceeds its timeout duration.
    pub fn timer_timeouted(&self) -> bool {
        self.timer_active && Instant::now() - self.start_time > self.timeout_duration
    }
}

/// The two deadlines tracked by the lift state machine.
pub struct LiftTimers {
    /// Timer for automatic door closing.
    pub door: Timer,
    /// Timer detecting a cab that stopped producing floor sensor events.
    pub motion: Timer,
}

impl LiftTimers {
    /// Creates both timers, inactive, with the given durations.
    pub fn new(door_duration: Duration, motion_duration: Duration) -> Self {
        LiftTimers {
            door: Timer::new(door_duration),
            motion: Timer::new(motion_duration),
        }
    }
}
