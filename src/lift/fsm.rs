//! State-transition helpers for the lift.
//!
//! Each handler takes the mutable lift state, the timers, the hardware
//! handle and the order server inbox, mirroring the event decomposition of
//! the run loop in [`super::run`].

use tokio::sync::{mpsc, oneshot};

use crate::elevio::elev::Elevator;
use crate::elevio::Dirn;
use crate::order::Order;
use crate::order_server::OrderServerMsg;
use crate::print;

use super::timer::LiftTimers;
use super::{Behaviour, LiftReply, LiftState};

/// Handles a floor sensor event.
///
/// ## Behavior
/// - In `Init`: stops the motor, records the floor, announces `LiftReady`
///   and goes to `Idle`. This is the only way out of `Init`.
/// - In `Moving`: cancels the motion-stuck timer. Arrival at the active
///   order's floor opens the door; any other floor reasserts motion.
/// - Otherwise the event only refreshes the cached floor.
pub async fn on_floor_arrival(
    st: &mut LiftState,
    timers: &mut LiftTimers,
    e: &Elevator,
    order_server_tx: &mpsc::Sender<OrderServerMsg>,
    floor: u8,
) {
    st.stuck_strikes = 0;
    match st.behaviour {
        Behaviour::Init => {
            e.motor_direction(Dirn::Stop as u8);
            e.floor_indicator(floor);
            st.floor = Some(floor);
            enter_idle(st, e);
            let _ = order_server_tx
                .send(OrderServerMsg::UpdateLiftPosition { floor, dirn: st.dirn })
                .await;
            let _ = order_server_tx.send(OrderServerMsg::LiftReady).await;
        }
        Behaviour::Moving => {
            timers.motion.timer_stop();
            st.floor = Some(floor);
            e.floor_indicator(floor);

            let target = st.order.as_ref().map(|o| o.floor);
            if target == Some(floor) {
                enter_door_open(st, timers, e);
            } else {
                enter_moving(st, timers, e, order_server_tx).await;
            }
        }
        _ => {
            st.floor = Some(floor);
            e.floor_indicator(floor);
        }
    }
}

/// Handles an order handed over by the order server.
///
/// Rejected with [`LiftReply::NotReady`] while the lift has not yet found a
/// floor. The order server hands out one order at a time, so receiving one
/// outside `Idle` is a dispatch bug on the caller's side and is refused.
pub async fn on_new_order(
    st: &mut LiftState,
    timers: &mut LiftTimers,
    e: &Elevator,
    order_server_tx: &mpsc::Sender<OrderServerMsg>,
    order: Order,
    reply: oneshot::Sender<LiftReply>,
) {
    match st.behaviour {
        Behaviour::Init => {
            let _ = reply.send(LiftReply::NotReady);
        }
        Behaviour::Idle => {
            let here = match st.floor {
                Some(f) => f,
                None => {
                    let _ = reply.send(LiftReply::NotReady);
                    return;
                }
            };
            let target = order.floor;
            st.order = Some(order);
            let _ = reply.send(LiftReply::Accepted);

            if target == here {
                enter_door_open(st, timers, e);
            } else {
                st.dirn = if target > here { Dirn::Up } else { Dirn::Down };
                enter_moving(st, timers, e, order_server_tx).await;
            }
        }
        _ => {
            print::warn(format!(
                "Lift got an order while busy ({:?}), refusing it",
                st.behaviour
            ));
            let _ = reply.send(LiftReply::NotReady);
        }
    }
}

/// Closes the door after the hold interval: reports the active order as
/// complete, clears it and returns to `Idle`.
pub async fn on_door_timeout(
    st: &mut LiftState,
    timers: &mut LiftTimers,
    e: &Elevator,
    order_server_tx: &mpsc::Sender<OrderServerMsg>,
) {
    timers.door.timer_stop();
    if let Some(order) = st.order.take() {
        let _ = order_server_tx.send(OrderServerMsg::OrderComplete(order)).await;
    }
    enter_idle(st, e);
}

/// Handles a motion-stuck timeout (no floor sensor event within the limit).
///
/// The first strike assumes a transient sensor glitch: reassert the motor
/// and rearm the timer. A second consecutive strike means the cab is jammed
/// mid-shaft; the queue cannot be trusted anymore, so the order server is
/// told to shut down and the run loop exits so supervision restarts the
/// node from `Init`.
///
/// ## Returns
/// `true` when the lift must terminate.
pub async fn on_motion_timeout(
    st: &mut LiftState,
    timers: &mut LiftTimers,
    e: &Elevator,
    order_server_tx: &mpsc::Sender<OrderServerMsg>,
) -> bool {
    e.motor_direction(st.dirn as u8);
    timers.motion.timer_start();
    st.stuck_strikes += 1;

    if st.stuck_strikes < 2 {
        print::warn("No floor sensor event in time, reasserting motor".to_string());
        return false;
    }

    print::err("Cab appears stuck mid-shaft, restarting for a clean init".to_string());
    let _ = order_server_tx.send(OrderServerMsg::Shutdown).await;
    true
}

fn enter_idle(st: &mut LiftState, e: &Elevator) {
    e.motor_direction(Dirn::Stop as u8);
    e.door_light(false);
    st.behaviour = Behaviour::Idle;
}

fn enter_door_open(st: &mut LiftState, timers: &mut LiftTimers, e: &Elevator) {
    e.motor_direction(Dirn::Stop as u8);
    e.door_light(true);
    timers.door.timer_start();
    st.behaviour = Behaviour::DoorOpen;
}

async fn enter_moving(
    st: &mut LiftState,
    timers: &mut LiftTimers,
    e: &Elevator,
    order_server_tx: &mpsc::Sender<OrderServerMsg>,
) {
    e.door_light(false);
    if let Some(floor) = st.floor {
        let _ = order_server_tx
            .send(OrderServerMsg::UpdateLiftPosition { floor, dirn: st.dirn })
            .await;
    }
    e.motor_direction(st.dirn as u8);
    timers.motion.timer_start();
    st.behaviour = Behaviour::Moving;
}
