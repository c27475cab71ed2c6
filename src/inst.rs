use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::{BgpConfig, PeerConfig};
use crate::fsm::peer::{fsm, Event, Peer};
use crate::mgmt;
use crate::show;
use crate::task::Task;

pub const DIAL_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// One management query routed through the event loop so the response is a
/// consistent snapshot of the session table.
#[derive(Debug)]
pub struct ShowRequest {
    pub command: String,
    pub resp: oneshot::Sender<serde_json::Value>,
}

#[derive(Debug)]
pub enum Message {
    Event(Ipv4Addr, Event),
    Accept(TcpStream, SocketAddr),
    Connected(Ipv4Addr, TcpStream),
    Show(ShowRequest),
}

pub struct Bgp {
    pub config: BgpConfig,
    pub sessions: BTreeMap<Ipv4Addr, Peer>,
    pub tx: UnboundedSender<Message>,
    pub rx: UnboundedReceiver<Message>,
    pub listen_addr: Option<SocketAddr>,
    pub listen_task: Option<Task<()>>,
    pub mgmt_task: Option<Task<()>>,
    pub dial_tasks: Vec<Task<()>>,
}

impl Bgp {
    pub fn new(config: BgpConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            sessions: BTreeMap::new(),
            tx,
            rx,
            listen_addr: None,
            listen_task: None,
            mgmt_task: None,
            dial_tasks: Vec::new(),
        }
    }

    fn new_session(&self, ident: Ipv4Addr, peer_config: &PeerConfig) -> Peer {
        Peer::new(
            ident,
            self.config.local.asn,
            self.config.local.router_id,
            peer_config.remote_as,
            peer_config.hold_time,
            self.config.originated_prefixes.clone(),
            self.tx.clone(),
        )
    }

    pub fn process_msg(&mut self, msg: Message) {
        match msg {
            Message::Event(ident, event) => {
                if let Some(peer) = self.sessions.get_mut(&ident) {
                    fsm(peer, event);
                }
            }
            Message::Accept(stream, sockaddr) => {
                accept(self, stream, sockaddr);
            }
            Message::Connected(ident, stream) => {
                connected(self, ident, stream);
            }
            Message::Show(req) => {
                let resp = show::show(self, &req.command);
                let _ = req.resp.send(resp);
            }
        }
    }

    pub async fn listen(&mut self) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.local.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind BGP listener on {}", addr))?;
        self.listen_addr = listener.local_addr().ok();
        info!(%addr, "BGP listening");
        let tx = self.tx.clone();
        self.listen_task = Some(Task::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, sockaddr)) => {
                        if tx.send(Message::Accept(stream, sockaddr)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "accept error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }));
        Ok(())
    }

    pub fn serve_mgmt(&mut self) -> anyhow::Result<()> {
        let task = mgmt::serve(&self.config.local.socket_path, self.tx.clone())?;
        self.mgmt_task = Some(task);
        Ok(())
    }

    pub fn start_dialers(&mut self) {
        for peer_config in self.config.peers.clone() {
            self.dial_tasks
                .push(start_dialer(&peer_config, self.tx.clone()));
        }
    }

    pub async fn run(&mut self) {
        loop {
            tokio::select! {
                Some(msg) = self.rx.recv() => {
                    self.process_msg(msg);
                }
            }
        }
    }

    pub async fn event_loop(&mut self) -> anyhow::Result<()> {
        self.serve_mgmt()?;
        self.listen().await?;
        self.start_dialers();
        self.run().await;
        Ok(())
    }
}

/// Inbound association. Unknown source addresses and peers that already
/// have a session are dropped without touching existing state.
pub fn accept(bgp: &mut Bgp, stream: TcpStream, sockaddr: SocketAddr) {
    let IpAddr::V4(peer_ip) = sockaddr.ip() else {
        drop(stream);
        return;
    };
    if bgp.sessions.contains_key(&peer_ip) {
        warn!(peer = %peer_ip, "session already exists, dropping new connection");
        drop(stream);
        return;
    }
    let Some(peer_config) = bgp.config.peer(&peer_ip) else {
        warn!(peer = %peer_ip, "connection from unknown peer, closing");
        drop(stream);
        return;
    };
    let peer_config = peer_config.clone();
    info!(peer = %peer_ip, "accepted connection");
    let mut peer = bgp.new_session(peer_ip, &peer_config);
    fsm(&mut peer, Event::Connected(stream));
    bgp.sessions.insert(peer_ip, peer);
}

/// Outbound association handed over by a dialer. The session table is
/// re-checked here because an accept may have raced the connect.
pub fn connected(bgp: &mut Bgp, ident: Ipv4Addr, stream: TcpStream) {
    if bgp.sessions.contains_key(&ident) {
        info!(peer = %ident, "session appeared while dialing, dropping stream");
        drop(stream);
        return;
    }
    let Some(peer_config) = bgp.config.peer(&ident) else {
        drop(stream);
        return;
    };
    let peer_config = peer_config.clone();
    info!(peer = %ident, "connected");
    let mut peer = bgp.new_session(ident, &peer_config);
    fsm(&mut peer, Event::Connected(stream));
    bgp.sessions.insert(ident, peer);
}

/// One dialer per configured peer. Connect failures are retried every
/// `DIAL_RETRY_INTERVAL` forever; a successful connect ends the task.
pub fn start_dialer(peer_config: &PeerConfig, tx: UnboundedSender<Message>) -> Task<()> {
    let ident = peer_config.ip;
    let addr = SocketAddr::from((peer_config.ip, peer_config.port));
    Task::spawn(async move {
        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let _ = tx.send(Message::Connected(ident, stream));
                    return;
                }
                Err(err) => {
                    warn!(peer = %ident, %err, "connect failed, retrying");
                    tokio::time::sleep(DIAL_RETRY_INTERVAL).await;
                }
            }
        }
    })
}
