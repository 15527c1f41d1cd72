//! Low-level handle to the elevator hardware server.
//!
//! The server speaks a fixed protocol of 4-byte command packets over TCP.
//! This is the standard interface of the lab hardware; see
//! [https://github.com/TTK4145/driver-rust/tree/master/src/elevio].

use std::fmt;
use std::io::{Read, Result, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

/// Motor command: drive downwards.
pub const DIRN_DOWN: u8 = u8::MAX;
/// Motor command: stop.
pub const DIRN_STOP: u8 = 0;
/// Motor command: drive upwards.
pub const DIRN_UP: u8 = 1;

/// Driver encoding of a hall-up button.
pub const HALL_UP: u8 = 0;
/// Driver encoding of a hall-down button.
pub const HALL_DOWN: u8 = 1;
/// Driver encoding of a cab button.
pub const CAB: u8 = 2;

/// Cloneable handle to one physical elevator.
#[derive(Clone)]
pub struct Elevator {
    socket: Arc<Mutex<TcpStream>>,
    /// Number of floors the hardware serves.
    pub num_floors: u8,
}

impl Elevator {
    /// Connects to the hardware server at `addr`.
    pub fn init(addr: &str, num_floors: u8) -> Result<Elevator> {
        Ok(Self {
            socket: Arc::new(Mutex::new(TcpStream::connect(addr)?)),
            num_floors,
        })
    }

    /// Sets the motor direction, one of [`DIRN_UP`], [`DIRN_DOWN`], [`DIRN_STOP`].
    pub fn motor_direction(&self, dirn: u8) {
        let buf = [1, dirn, 0, 0];
        let mut sock = self.socket.lock().unwrap();
        sock.write(&buf).unwrap();
    }

    /// Sets one call button lamp.
    pub fn call_button_light(&self, floor: u8, call: u8, on: bool) {
        let buf = [2, call, floor, on as u8];
        let mut sock = self.socket.lock().unwrap();
        sock.write(&buf).unwrap();
    }

    /// Sets the floor indicator panel.
    pub fn floor_indicator(&self, floor: u8) {
        let buf = [3, floor, 0, 0];
        let mut sock = self.socket.lock().unwrap();
        sock.write(&buf).unwrap();
    }

    /// Sets the door-open lamp.
    pub fn door_light(&self, on: bool) {
        let buf = [4, on as u8, 0, 0];
        let mut sock = self.socket.lock().unwrap();
        sock.write(&buf).unwrap();
    }

    /// Sets the stop button lamp.
    pub fn stop_button_light(&self, on: bool) {
        let buf = [5, on as u8, 0, 0];
        let mut sock = self.socket.lock().unwrap();
        sock.write(&buf).unwrap();
    }

    /// Reads one call button state.
    pub fn call_button(&self, floor: u8, call: u8) -> bool {
        let mut buf = [0; 4];
        let mut sock = self.socket.lock().unwrap();
        sock.write(&[6, call, floor, 0]).unwrap();
        sock.read(&mut buf).unwrap();
        buf[1] != 0
    }

    /// Reads the floor sensor. `None` between floors.
    pub fn floor_sensor(&self) -> Option<u8> {
        let mut buf = [0; 4];
        let mut sock = self.socket.lock().unwrap();
        sock.write(&[7, 0, 0, 0]).unwrap();
        sock.read(&mut buf).unwrap();
        if buf[1] != 0 {
            Some(buf[2])
        } else {
            None
        }
    }

    /// Reads the stop button state.
    pub fn stop_button(&self) -> bool {
        let mut buf = [0; 4];
        let mut sock = self.socket.lock().unwrap();
        sock.write(&[8, 0, 0, 0]).unwrap();
        sock.read(&mut buf).unwrap();
        buf[1] != 0
    }

    /// Reads the obstruction switch state.
    pub fn obstruction(&self) -> bool {
        let mut buf = [0; 4];
        let mut sock = self.socket.lock().unwrap();
        sock.write(&[9, 0, 0, 0]).unwrap();
        sock.read(&mut buf).unwrap();
        buf[1] != 0
    }
}

impl fmt::Display for Elevator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self.socket.lock().unwrap().peer_addr().unwrap();
        write!(f, "Elevator@{}({})", addr, self.num_floors)
    }
}
