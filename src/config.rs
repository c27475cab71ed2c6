use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use ipnet::Ipv4Net;
use serde::Deserialize;

use crate::packet::BGP_PORT;

pub const DEFAULT_HOLD_TIME: u16 = 180;
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/bgp_agent.sock";

fn default_port() -> u16 {
    BGP_PORT
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_hold_time() -> u16 {
    DEFAULT_HOLD_TIME
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    pub asn: u16,
    pub router_id: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub ip: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
    pub remote_as: u16,
    #[serde(default = "default_hold_time")]
    pub hold_time: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BgpConfig {
    pub local: LocalConfig,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default)]
    pub originated_prefixes: Vec<Ipv4Net>,
}

impl BgpConfig {
    pub fn peer(&self, addr: &Ipv4Addr) -> Option<&PeerConfig> {
        self.peers.iter().find(|peer| peer.ip == *addr)
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<BgpConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: BgpConfig = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let doc = r#"
local:
  asn: 65001
  router_id: 1.1.1.1
peers:
  - ip: 2.2.2.2
    remote_as: 65002
originated_prefixes:
  - 10.0.0.0/24
"#;
        let config: BgpConfig = serde_yaml::from_str(doc).unwrap();
        assert_eq!(config.local.asn, 65001);
        assert_eq!(config.local.port, 179);
        assert_eq!(config.local.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].port, 179);
        assert_eq!(config.peers[0].hold_time, 180);
        assert_eq!(config.originated_prefixes.len(), 1);
        assert!(config.peer(&"2.2.2.2".parse().unwrap()).is_some());
        assert!(config.peer(&"9.9.9.9".parse().unwrap()).is_none());
    }

    #[test]
    fn config_overrides() {
        let doc = r#"
local:
  asn: 64512
  router_id: 10.255.0.1
  port: 1790
  socket_path: /run/bgp.sock
peers:
  - ip: 10.0.12.2
    port: 1790
    remote_as: 64513
    hold_time: 90
"#;
        let config: BgpConfig = serde_yaml::from_str(doc).unwrap();
        assert_eq!(config.local.port, 1790);
        assert_eq!(config.local.socket_path, PathBuf::from("/run/bgp.sock"));
        assert_eq!(config.peers[0].hold_time, 90);
        assert!(config.originated_prefixes.is_empty());
    }
}
