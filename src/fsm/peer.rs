use std::net::Ipv4Addr;
use std::time::Instant;

use bytes::BytesMut;
use ipnet::Ipv4Net;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::inst::Message;
use crate::packet::*;
use crate::rib::Route;
use crate::task::{Task, Timer};

use super::timer::{refresh_hold_timer, update_open_timers};

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum State {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
}

impl State {
    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Connect => "CONNECT",
            Self::Active => "ACTIVE",
            Self::OpenSent => "OPEN_SENT",
            Self::OpenConfirm => "OPEN_CONFIRM",
            Self::Established => "ESTABLISHED",
        }
    }

    pub fn is_established(&self) -> bool {
        *self == State::Established
    }
}

#[derive(Debug)]
pub enum Event {
    Stop,                         // administrative close
    Connected(TcpStream),         // TCP established, either direction
    ConnFail,                     // TCP failure, EOF or body decode error
    HeaderErr,                    // header decode failure
    BGPOpen(OpenPacket),
    KeepAliveMsg,
    UpdateMsg(UpdatePacket),
    NotifMsg(NotificationPacket),
    HoldTimerExpires,
    KeepaliveTimerExpires,
}

#[derive(Debug, Default)]
pub struct PeerTask {
    pub reader: Option<Task<()>>,
    pub writer: Option<Task<()>>,
}

#[derive(Debug, Default)]
pub struct PeerTimer {
    pub hold_timer: Option<Timer>,
    pub keepalive: Option<Timer>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PeerCounter {
    pub sent: u64,
    pub rcvd: u64,
}

/// Hold time and keepalive interval after OPEN negotiation.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerParam {
    pub hold_time: u16,
    pub keepalive: u16,
}

#[derive(Debug)]
pub struct Peer {
    pub ident: Ipv4Addr,
    pub local_as: u16,
    pub router_id: Ipv4Addr,
    pub peer_as: u16,
    pub remote_as: Option<u16>,
    pub hold_time: u16,
    pub param: PeerParam,
    pub state: State,
    pub task: PeerTask,
    pub timer: PeerTimer,
    pub counter: [PeerCounter; BgpType::Max as usize],
    pub packet_tx: Option<UnboundedSender<BytesMut>>,
    pub tx: UnboundedSender<Message>,
    pub originated: Vec<Ipv4Net>,
    pub adj_rib_in: Vec<Route>,
    pub start_time: Option<Instant>,
}

impl Peer {
    pub fn new(
        ident: Ipv4Addr,
        local_as: u16,
        router_id: Ipv4Addr,
        peer_as: u16,
        hold_time: u16,
        originated: Vec<Ipv4Net>,
        tx: UnboundedSender<Message>,
    ) -> Self {
        Self {
            ident,
            local_as,
            router_id,
            peer_as,
            remote_as: None,
            hold_time,
            param: PeerParam::default(),
            state: State::Idle,
            task: PeerTask::default(),
            timer: PeerTimer::default(),
            counter: [PeerCounter::default(); BgpType::Max as usize],
            packet_tx: None,
            tx,
            originated,
            adj_rib_in: Vec::new(),
            start_time: None,
        }
    }

    pub fn msgs_sent(&self) -> u64 {
        self.counter.iter().map(|counter| counter.sent).sum()
    }

    pub fn msgs_received(&self) -> u64 {
        self.counter.iter().map(|counter| counter.rcvd).sum()
    }
}

pub fn fsm(peer: &mut Peer, event: Event) {
    let prev_state = peer.state;
    peer.state = match event {
        Event::Stop => State::Idle,
        Event::Connected(stream) => fsm_connected(peer, stream),
        Event::ConnFail => fsm_conn_fail(peer),
        Event::HeaderErr => fsm_header_err(peer),
        Event::BGPOpen(packet) => fsm_bgp_open(peer, packet),
        Event::KeepAliveMsg => fsm_bgp_keepalive(peer),
        Event::UpdateMsg(packet) => fsm_bgp_update(peer, packet),
        Event::NotifMsg(packet) => fsm_bgp_notification(peer, packet),
        Event::HoldTimerExpires => fsm_holdtimer_expires(peer),
        Event::KeepaliveTimerExpires => fsm_keepalive_expires(peer),
    };
    if prev_state != peer.state {
        debug!(peer = %peer.ident, "state {} -> {}", prev_state.to_str(), peer.state.to_str());
    }
    if !prev_state.is_established() && peer.state.is_established() {
        info!(peer = %peer.ident, "session established");
    }
    if prev_state != State::Idle && peer.state == State::Idle {
        info!(peer = %peer.ident, "session closed");
        fsm_stop(peer);
    }
}

/// Single close path. Detaching the writer lets a queued NOTIFICATION drain
/// before the write half is dropped; the reader and timers are cancelled.
pub fn fsm_stop(peer: &mut Peer) -> State {
    if let Some(mut writer) = peer.task.writer.take() {
        writer.detach();
    }
    peer.packet_tx = None;
    peer.task.reader = None;
    peer.timer.hold_timer = None;
    peer.timer.keepalive = None;
    State::Idle
}

pub fn fsm_connected(peer: &mut Peer, stream: TcpStream) -> State {
    if peer.state != State::Idle {
        drop(stream);
        return peer.state;
    }
    peer.start_time = Some(Instant::now());
    let (packet_tx, packet_rx) = mpsc::unbounded_channel::<BytesMut>();
    peer.packet_tx = Some(packet_tx);
    let (read_half, write_half) = stream.into_split();
    peer.task.reader = Some(peer_start_reader(peer, read_half));
    peer.task.writer = Some(peer_start_writer(write_half, packet_rx));
    peer_send_open(peer);
    State::OpenSent
}

pub fn fsm_conn_fail(peer: &mut Peer) -> State {
    if peer.state != State::Idle {
        info!(peer = %peer.ident, "connection lost");
    }
    State::Idle
}

pub fn fsm_header_err(peer: &mut Peer) -> State {
    warn!(peer = %peer.ident, "message header error");
    peer_send_notification(
        peer,
        NotifyCode::MsgHeaderError,
        HEADER_NOT_SYNCED,
        Vec::new(),
    );
    State::Idle
}

pub fn fsm_bgp_open(peer: &mut Peer, packet: OpenPacket) -> State {
    peer.counter[BgpType::Open as usize].rcvd += 1;
    match peer.state {
        State::OpenSent => {
            peer.remote_as = Some(packet.asn);
            update_open_timers(peer, &packet);
            info!(
                peer = %peer.ident,
                remote_as = packet.asn,
                hold_time = peer.param.hold_time,
                "received OPEN"
            );
            peer_send_keepalive(peer);
            State::OpenConfirm
        }
        State::OpenConfirm => {
            warn!(peer = %peer.ident, "unexpected OPEN in OPEN_CONFIRM");
            peer_send_notification(
                peer,
                NotifyCode::FsmError,
                FSM_UNEXPECTED_MESSAGE,
                Vec::new(),
            );
            State::Idle
        }
        _ => {
            warn!(peer = %peer.ident, state = peer.state.to_str(), "unexpected OPEN");
            peer.state
        }
    }
}

pub fn fsm_bgp_keepalive(peer: &mut Peer) -> State {
    peer.counter[BgpType::Keepalive as usize].rcvd += 1;
    refresh_hold_timer(peer);
    match peer.state {
        State::OpenConfirm => {
            peer_send_update(peer);
            State::Established
        }
        State::Established => State::Established,
        State::OpenSent => {
            warn!(peer = %peer.ident, "unexpected KEEPALIVE in OPEN_SENT");
            peer_send_notification(
                peer,
                NotifyCode::FsmError,
                FSM_UNEXPECTED_MESSAGE,
                Vec::new(),
            );
            State::Idle
        }
        _ => peer.state,
    }
}

pub fn fsm_bgp_update(peer: &mut Peer, packet: UpdatePacket) -> State {
    peer.counter[BgpType::Update as usize].rcvd += 1;
    refresh_hold_timer(peer);
    match peer.state {
        State::Established => {
            rib_in_merge(peer, packet);
            State::Established
        }
        State::OpenSent => {
            warn!(peer = %peer.ident, "unexpected UPDATE in OPEN_SENT");
            peer_send_notification(
                peer,
                NotifyCode::FsmError,
                FSM_UNEXPECTED_MESSAGE,
                Vec::new(),
            );
            State::Idle
        }
        _ => {
            warn!(peer = %peer.ident, state = peer.state.to_str(), "unexpected UPDATE");
            peer.state
        }
    }
}

pub fn fsm_bgp_notification(peer: &mut Peer, packet: NotificationPacket) -> State {
    peer.counter[BgpType::Notification as usize].rcvd += 1;
    info!(peer = %peer.ident, "received NOTIFICATION {}", packet);
    State::Idle
}

pub fn fsm_holdtimer_expires(peer: &mut Peer) -> State {
    if peer.state == State::Idle {
        return State::Idle;
    }
    warn!(peer = %peer.ident, "hold timer expired");
    peer_send_notification(peer, NotifyCode::HoldTimerExpired, 0, Vec::new());
    State::Idle
}

pub fn fsm_keepalive_expires(peer: &mut Peer) -> State {
    peer_send_keepalive(peer);
    peer.state
}

/// Append learned prefixes to this peer's Adj-RIB-In. NEXT_HOP is taken
/// best-effort from the attributes; AS_PATH is recorded empty.
fn rib_in_merge(peer: &mut Peer, packet: UpdatePacket) {
    let next_hop = packet
        .bgp_attr
        .as_ref()
        .and_then(|attr| attr.nexthop.as_ref())
        .map(|nexthop| nexthop.nexthop);
    for prefix in packet.updates.iter() {
        peer.adj_rib_in.push(Route {
            prefix: *prefix,
            next_hop,
            as_path: Vec::new(),
            origin: Origin::Igp,
        });
    }
    info!(
        peer = %peer.ident,
        prefixes = packet.updates.len(),
        "received UPDATE"
    );
}

fn packet_event(packet: BgpPacket) -> Event {
    match packet {
        BgpPacket::Open(packet) => Event::BGPOpen(*packet),
        BgpPacket::Keepalive(_) => Event::KeepAliveMsg,
        BgpPacket::Notification(packet) => Event::NotifMsg(packet),
        BgpPacket::Update(packet) => Event::UpdateMsg(*packet),
    }
}

pub async fn peer_read(
    ident: Ipv4Addr,
    tx: UnboundedSender<Message>,
    mut read_half: OwnedReadHalf,
) {
    let mut buf = BytesMut::with_capacity(BGP_PACKET_LEN * 2);
    loop {
        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                let _ = tx.send(Message::Event(ident, Event::ConnFail));
                return;
            }
            Ok(_) => {
                while buf.len() >= BGP_HEADER_LEN as usize {
                    let length = peek_bgp_length(&buf);
                    if length < BGP_HEADER_LEN as usize || length > BGP_PACKET_LEN {
                        let _ = tx.send(Message::Event(ident, Event::HeaderErr));
                        return;
                    }
                    if buf.len() < length {
                        break;
                    }
                    let remain = buf.split_off(length);
                    match parse_bgp_packet(&buf) {
                        Ok(packet) => {
                            let _ = tx.send(Message::Event(ident, packet_event(packet)));
                        }
                        Err(err) if err.is_header_error() => {
                            warn!(peer = %ident, %err, "framing error");
                            let _ = tx.send(Message::Event(ident, Event::HeaderErr));
                            return;
                        }
                        Err(err) => {
                            warn!(peer = %ident, %err, "message decode error");
                            let _ = tx.send(Message::Event(ident, Event::ConnFail));
                            return;
                        }
                    }
                    buf = remain;
                    buf.reserve(BGP_PACKET_LEN);
                }
            }
            Err(err) => {
                debug!(peer = %ident, %err, "read error");
                let _ = tx.send(Message::Event(ident, Event::ConnFail));
                return;
            }
        }
    }
}

pub fn peer_start_reader(peer: &Peer, read_half: OwnedReadHalf) -> Task<()> {
    let ident = peer.ident;
    let tx = peer.tx.clone();
    Task::spawn(async move {
        peer_read(ident, tx, read_half).await;
    })
}

pub fn peer_start_writer(
    mut write_half: OwnedWriteHalf,
    mut rx: UnboundedReceiver<BytesMut>,
) -> Task<()> {
    Task::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let _ = write_half.write_all(&msg).await;
        }
    })
}

pub fn peer_send_open(peer: &mut Peer) {
    let Some(packet_tx) = peer.packet_tx.as_ref() else {
        return;
    };
    let open = OpenPacket::new(peer.local_as, peer.hold_time, &peer.router_id);
    let bytes: BytesMut = open.into();
    peer.counter[BgpType::Open as usize].sent += 1;
    info!(peer = %peer.ident, "sending OPEN");
    let _ = packet_tx.send(bytes);
}

pub fn peer_send_keepalive(peer: &mut Peer) {
    let Some(packet_tx) = peer.packet_tx.as_ref() else {
        return;
    };
    let header = BgpHeader::new(BgpType::Keepalive, BGP_HEADER_LEN);
    let bytes: BytesMut = header.into();
    peer.counter[BgpType::Keepalive as usize].sent += 1;
    let _ = packet_tx.send(bytes);
}

pub fn peer_send_notification(peer: &mut Peer, code: NotifyCode, sub_code: u8, data: Vec<u8>) {
    let Some(packet_tx) = peer.packet_tx.as_ref() else {
        return;
    };
    let notification = NotificationPacket::new(code, sub_code, data);
    info!(peer = %peer.ident, "sending NOTIFICATION {}", notification);
    let bytes: BytesMut = notification.into();
    peer.counter[BgpType::Notification as usize].sent += 1;
    let _ = packet_tx.send(bytes);
}

/// Advertise the locally originated prefixes: ORIGIN IGP, AS_PATH of the
/// local ASN, NEXT_HOP of the local router ID.
pub fn peer_send_update(peer: &mut Peer) {
    if peer.originated.is_empty() {
        return;
    }
    let Some(packet_tx) = peer.packet_tx.as_ref() else {
        return;
    };
    let mut update = UpdatePacket::new();
    update.bgp_attr = Some(BgpAttr {
        origin: Some(Origin::Igp),
        aspath: Some(AsPath::from_asns(vec![peer.local_as])),
        nexthop: Some(NexthopAttr {
            nexthop: peer.router_id,
        }),
    });
    update.updates = peer.originated.clone();
    let count = update.updates.len();
    let bytes: BytesMut = update.into();
    peer.counter[BgpType::Update as usize].sent += 1;
    info!(peer = %peer.ident, prefixes = count, "sending UPDATE");
    let _ = packet_tx.send(bytes);
}
