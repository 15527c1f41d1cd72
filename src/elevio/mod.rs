//! ## Elevator I/O module for the local elevator
//!
//! The low-level hardware protocol lives in [`elev`], the edge-detecting
//! pollers in [`poll`]. This module adds the message types the pollers emit
//! into the rest of the node, and the conversions between the driver's byte
//! encodings and the typed order model.

#[doc(hidden)]
pub mod elev;
pub mod poll;

use serde::{Deserialize, Serialize};

use crate::order::ButtonType;
use crate::print;

/// Travel direction of a cab, encoded so it can be fed straight to the motor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Dirn {
    /// Downwards.
    Down = u8::MAX,
    /// Motor stopped.
    Stop = 0,
    /// Upwards.
    Up = 1,
}

/// Represents different types of elevator messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElevMsgType {
    /// Call button press event.
    CallButton,
    /// Floor sensor event.
    FloorSensor,
    /// Stop button press event.
    StopButton,
    /// Obstruction detected event.
    Obstruction,
}

/// A single call button press, as reported by the hardware poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallButton {
    /// The floor where the call was made.
    pub floor: u8,
    /// The type of call.
    pub button: ButtonType,
}

/// Represents a message related to elevator events.
#[derive(Debug, Clone)]
pub struct ElevMessage {
    /// The type of elevator message.
    pub msg_type: ElevMsgType,
    /// Optional call button information, if applicable.
    pub call_button: Option<CallButton>,
    /// Optional floor sensor reading, indicating the current floor.
    pub floor_sensor: Option<u8>,
    /// Optional stop button state (`true` if pressed).
    pub stop_button: Option<bool>,
    /// Optional obstruction status (`true` if obstruction detected).
    pub obstruction: Option<bool>,
}

/// Converts a driver button code into a [`ButtonType`].
///
/// Unknown codes are logged and dropped.
pub fn button_from_driver(call: u8) -> Option<ButtonType> {
    match call {
        elev::HALL_UP => Some(ButtonType::HallUp),
        elev::HALL_DOWN => Some(ButtonType::HallDown),
        elev::CAB => Some(ButtonType::Cab),
        _ => {
            print::cosmic_err("Call type does not exist".to_string());
            None
        }
    }
}

/// Converts a [`ButtonType`] into the driver's button code.
pub fn button_to_driver(button: ButtonType) -> u8 {
    match button {
        ButtonType::HallUp => elev::HALL_UP,
        ButtonType::HallDown => elev::HALL_DOWN,
        ButtonType::Cab => elev::CAB,
    }
}
