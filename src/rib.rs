use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::packet::Origin;

/// One Adj-RIB-In entry as learned from a peer UPDATE. The table is
/// append-only; no withdraw processing is performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: Ipv4Net,
    pub next_hop: Option<Ipv4Addr>,
    pub as_path: Vec<u16>,
    pub origin: Origin,
}

impl Route {
    pub fn next_hop_str(&self) -> String {
        match self.next_hop {
            Some(addr) => addr.to_string(),
            None => "Unknown".to_string(),
        }
    }
}
