use std::net::Ipv4Addr;

use bgp_speaker::fsm::peer::{fsm, Event, Peer, State};
use bgp_speaker::inst::Message;
use bgp_speaker::packet::*;
use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver};

async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (server, client) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    (server.unwrap().0, client.unwrap())
}

fn test_peer(tx: mpsc::UnboundedSender<Message>) -> Peer {
    Peer::new(
        "2.2.2.2".parse().unwrap(),
        65001,
        "1.1.1.1".parse().unwrap(),
        65002,
        180,
        vec!["10.0.0.0/24".parse().unwrap()],
        tx,
    )
}

async fn read_message(stream: &mut TcpStream) -> BgpPacket {
    let mut header = [0u8; 19];
    stream.read_exact(&mut header).await.unwrap();
    let length = u16::from_be_bytes([header[16], header[17]]) as usize;
    let mut buf = header.to_vec();
    buf.resize(length, 0);
    if length > 19 {
        stream.read_exact(&mut buf[19..]).await.unwrap();
    }
    parse_bgp_packet(&buf).unwrap()
}

#[tokio::test]
async fn attach_sends_one_open() {
    let (server, mut client) = socket_pair().await;
    let (tx, _rx): (_, UnboundedReceiver<Message>) = mpsc::unbounded_channel();
    let mut peer = test_peer(tx);

    fsm(&mut peer, Event::Connected(server));
    assert_eq!(peer.state, State::OpenSent);
    assert_eq!(peer.msgs_sent(), 1);
    assert!(peer.start_time.is_some());

    let BgpPacket::Open(open) = read_message(&mut client).await else {
        panic!("expected OPEN");
    };
    assert_eq!(open.version, 4);
    assert_eq!(open.asn, 65001);
    assert_eq!(open.hold_time, 180);
    assert_eq!(open.router_id(), "1.1.1.1".parse::<Ipv4Addr>().unwrap());
}

#[tokio::test]
async fn open_negotiates_hold_time() {
    let (server, mut client) = socket_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peer = test_peer(tx);
    fsm(&mut peer, Event::Connected(server));
    read_message(&mut client).await;

    let remote_id: Ipv4Addr = "2.2.2.2".parse().unwrap();
    fsm(&mut peer, Event::BGPOpen(OpenPacket::new(65002, 90, &remote_id)));

    assert_eq!(peer.state, State::OpenConfirm);
    assert_eq!(peer.remote_as, Some(65002));
    assert_eq!(peer.param.hold_time, 90);
    assert_eq!(peer.param.keepalive, 30);
    assert!(peer.timer.hold_timer.is_some());
    assert!(peer.timer.keepalive.is_some());

    assert!(matches!(
        read_message(&mut client).await,
        BgpPacket::Keepalive(_)
    ));
}

#[tokio::test]
async fn zero_hold_time_leaves_timers_unarmed() {
    let (server, mut client) = socket_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peer = test_peer(tx);
    fsm(&mut peer, Event::Connected(server));
    read_message(&mut client).await;

    let remote_id: Ipv4Addr = "2.2.2.2".parse().unwrap();
    fsm(&mut peer, Event::BGPOpen(OpenPacket::new(65002, 0, &remote_id)));

    assert_eq!(peer.state, State::OpenConfirm);
    assert_eq!(peer.param.hold_time, 0);
    assert!(peer.timer.hold_timer.is_none());
    assert!(peer.timer.keepalive.is_none());
}

#[tokio::test]
async fn keepalive_establishes_and_advertises() {
    let (server, mut client) = socket_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peer = test_peer(tx);
    fsm(&mut peer, Event::Connected(server));
    read_message(&mut client).await;
    let remote_id: Ipv4Addr = "2.2.2.2".parse().unwrap();
    fsm(&mut peer, Event::BGPOpen(OpenPacket::new(65002, 90, &remote_id)));
    read_message(&mut client).await;

    fsm(&mut peer, Event::KeepAliveMsg);
    assert_eq!(peer.state, State::Established);

    let BgpPacket::Update(update) = read_message(&mut client).await else {
        panic!("expected UPDATE");
    };
    assert_eq!(
        update.updates,
        vec!["10.0.0.0/24".parse::<ipnet::Ipv4Net>().unwrap()]
    );
    let attr = update.bgp_attr.unwrap();
    assert_eq!(attr.origin, Some(Origin::Igp));
    assert_eq!(attr.aspath.unwrap().asns(), vec![65001]);
    assert_eq!(
        attr.nexthop.unwrap().nexthop,
        "1.1.1.1".parse::<Ipv4Addr>().unwrap()
    );
}

#[tokio::test]
async fn no_update_without_originated_prefixes() {
    let (server, mut client) = socket_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peer = Peer::new(
        "2.2.2.2".parse().unwrap(),
        65001,
        "1.1.1.1".parse().unwrap(),
        65002,
        180,
        Vec::new(),
        tx,
    );
    fsm(&mut peer, Event::Connected(server));
    read_message(&mut client).await;
    let remote_id: Ipv4Addr = "2.2.2.2".parse().unwrap();
    fsm(&mut peer, Event::BGPOpen(OpenPacket::new(65002, 90, &remote_id)));
    read_message(&mut client).await;

    fsm(&mut peer, Event::KeepAliveMsg);
    assert_eq!(peer.state, State::Established);
    assert_eq!(peer.counter[BgpType::Update as usize].sent, 0);
}

#[tokio::test]
async fn hold_expiry_notifies_and_closes() {
    let (server, mut client) = socket_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peer = test_peer(tx);
    fsm(&mut peer, Event::Connected(server));
    read_message(&mut client).await;
    let remote_id: Ipv4Addr = "2.2.2.2".parse().unwrap();
    fsm(&mut peer, Event::BGPOpen(OpenPacket::new(65002, 90, &remote_id)));
    read_message(&mut client).await;
    fsm(&mut peer, Event::KeepAliveMsg);
    read_message(&mut client).await;

    fsm(&mut peer, Event::HoldTimerExpires);
    assert_eq!(peer.state, State::Idle);
    assert!(peer.timer.hold_timer.is_none());
    assert!(peer.timer.keepalive.is_none());
    assert!(peer.packet_tx.is_none());

    let BgpPacket::Notification(notification) = read_message(&mut client).await else {
        panic!("expected NOTIFICATION");
    };
    assert_eq!(notification.code, NotifyCode::HoldTimerExpired);
    assert_eq!(notification.sub_code, 0);

    // Writer drains and the stream closes.
    let mut byte = [0u8; 1];
    let n = client.read(&mut byte).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn open_in_open_confirm_is_fsm_error() {
    let (server, mut client) = socket_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peer = test_peer(tx);
    fsm(&mut peer, Event::Connected(server));
    read_message(&mut client).await;
    let remote_id: Ipv4Addr = "2.2.2.2".parse().unwrap();
    fsm(&mut peer, Event::BGPOpen(OpenPacket::new(65002, 90, &remote_id)));
    read_message(&mut client).await;

    fsm(&mut peer, Event::BGPOpen(OpenPacket::new(65002, 90, &remote_id)));
    assert_eq!(peer.state, State::Idle);

    let BgpPacket::Notification(notification) = read_message(&mut client).await else {
        panic!("expected NOTIFICATION");
    };
    assert_eq!(notification.code, NotifyCode::FsmError);
    assert_eq!(notification.sub_code, 1);
}

#[tokio::test]
async fn keepalive_in_open_sent_is_fsm_error() {
    let (server, mut client) = socket_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peer = test_peer(tx);
    fsm(&mut peer, Event::Connected(server));
    read_message(&mut client).await;

    fsm(&mut peer, Event::KeepAliveMsg);
    assert_eq!(peer.state, State::Idle);

    let BgpPacket::Notification(notification) = read_message(&mut client).await else {
        panic!("expected NOTIFICATION");
    };
    assert_eq!(notification.code, NotifyCode::FsmError);
    assert_eq!(notification.sub_code, 1);
}

#[tokio::test]
async fn notification_in_open_sent_closes() {
    let (server, mut client) = socket_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peer = test_peer(tx);
    fsm(&mut peer, Event::Connected(server));
    read_message(&mut client).await;

    fsm(
        &mut peer,
        Event::NotifMsg(NotificationPacket::new(NotifyCode::Cease, 0, Vec::new())),
    );
    assert_eq!(peer.state, State::Idle);
}

#[tokio::test]
async fn update_merges_into_adj_rib_in() {
    let (server, mut client) = socket_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peer = test_peer(tx);
    fsm(&mut peer, Event::Connected(server));
    read_message(&mut client).await;
    let remote_id: Ipv4Addr = "2.2.2.2".parse().unwrap();
    fsm(&mut peer, Event::BGPOpen(OpenPacket::new(65002, 90, &remote_id)));
    read_message(&mut client).await;
    fsm(&mut peer, Event::KeepAliveMsg);
    read_message(&mut client).await;

    let mut update = UpdatePacket::new();
    update.bgp_attr = Some(BgpAttr {
        origin: Some(Origin::Egp),
        aspath: Some(AsPath::from_asns(vec![65002])),
        nexthop: Some(NexthopAttr {
            nexthop: "2.2.2.2".parse().unwrap(),
        }),
    });
    update.updates = vec!["172.16.0.0/16".parse().unwrap()];
    fsm(&mut peer, Event::UpdateMsg(update));

    assert_eq!(peer.state, State::Established);
    assert_eq!(peer.adj_rib_in.len(), 1);
    let route = &peer.adj_rib_in[0];
    assert_eq!(route.prefix.to_string(), "172.16.0.0/16");
    assert_eq!(route.next_hop, Some("2.2.2.2".parse().unwrap()));
    assert!(route.as_path.is_empty());
    assert_eq!(route.origin, Origin::Igp);
}

#[tokio::test]
async fn counters_advance() {
    let (server, mut client) = socket_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut peer = test_peer(tx);
    fsm(&mut peer, Event::Connected(server));
    read_message(&mut client).await;
    let remote_id: Ipv4Addr = "2.2.2.2".parse().unwrap();
    fsm(&mut peer, Event::BGPOpen(OpenPacket::new(65002, 90, &remote_id)));
    read_message(&mut client).await;
    fsm(&mut peer, Event::KeepAliveMsg);
    read_message(&mut client).await;

    // OPEN + KEEPALIVE + UPDATE sent; OPEN + KEEPALIVE received.
    assert_eq!(peer.msgs_sent(), 3);
    assert_eq!(peer.msgs_received(), 2);

    fsm(&mut peer, Event::KeepaliveTimerExpires);
    assert_eq!(peer.msgs_sent(), 4);
    assert_eq!(peer.state, State::Established);
}

#[tokio::test]
async fn reader_feeds_events_to_the_channel() {
    use tokio::io::AsyncWriteExt;

    let (server, mut client) = socket_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut peer = test_peer(tx);
    fsm(&mut peer, Event::Connected(server));
    read_message(&mut client).await;

    let remote_id: Ipv4Addr = "2.2.2.2".parse().unwrap();
    let bytes: BytesMut = OpenPacket::new(65002, 90, &remote_id).into();
    client.write_all(&bytes).await.unwrap();

    let Some(Message::Event(ident, Event::BGPOpen(open))) = rx.recv().await else {
        panic!("expected BGPOpen event");
    };
    assert_eq!(ident, "2.2.2.2".parse::<Ipv4Addr>().unwrap());
    assert_eq!(open.asn, 65002);

    // A desynchronized frame raises a header error event.
    client.write_all(&[0u8; 19]).await.unwrap();
    let Some(Message::Event(_, Event::HeaderErr)) = rx.recv().await else {
        panic!("expected HeaderErr event");
    };
}
