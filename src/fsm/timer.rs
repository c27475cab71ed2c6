use std::cmp::min;

use crate::inst::Message;
use crate::packet::OpenPacket;
use crate::task::{Timer, TimerType};

use super::peer::{Event, Peer};

macro_rules! start_repeater {
    ($peer:expr, $time:expr, $ev:expr) => {{
        let ident = $peer.ident;
        let tx = $peer.tx.clone();

        Timer::new(Timer::second($time), TimerType::Infinite, move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Message::Event(ident, $ev));
            }
        })
    }};
}

fn start_hold_timer(peer: &Peer) -> Timer {
    start_repeater!(peer, peer.param.hold_time as u64, Event::HoldTimerExpires)
}

fn start_keepalive_timer(peer: &Peer) -> Timer {
    start_repeater!(
        peer,
        peer.param.keepalive as u64,
        Event::KeepaliveTimerExpires
    )
}

/// Negotiate hold time from a received OPEN and arm the session timers.
/// A negotiated hold time of zero leaves both timers unarmed.
pub fn update_open_timers(peer: &mut Peer, packet: &OpenPacket) {
    peer.param.hold_time = min(peer.hold_time, packet.hold_time);
    peer.param.keepalive = peer.param.hold_time / 3;

    if peer.param.keepalive > 0 {
        peer.timer.keepalive = Some(start_keepalive_timer(peer));
    }
    if peer.param.hold_time > 0 {
        peer.timer.hold_timer = Some(start_hold_timer(peer));
    }
}

pub fn refresh_hold_timer(peer: &Peer) {
    if let Some(hold_timer) = peer.timer.hold_timer.as_ref() {
        hold_timer.refresh();
    }
}
