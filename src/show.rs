use serde::Serialize;
use serde_json::{json, Value};

use crate::inst::Bgp;

#[derive(Serialize)]
struct Neighbor {
    peer_ip: String,
    remote_as: u16,
    state: String,
    uptime: String,
    msgs_sent: u64,
    msgs_received: u64,
}

#[derive(Serialize)]
struct ReceivedRoute {
    prefix: String,
    next_hop: String,
    as_path: String,
    origin: String,
    remote_as: u16,
    received_from: String,
}

/// Wall clock delta as `H:MM:SS`, hours unpadded.
pub fn format_uptime(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

fn success(rows: impl Serialize) -> Value {
    match serde_json::to_value(rows) {
        Ok(data) => json!({"status": "success", "data": data}),
        Err(err) => json!({"status": "error", "message": err.to_string()}),
    }
}

pub fn show_neighbors(bgp: &Bgp) -> Value {
    let mut neighbors = Vec::new();
    for peer in bgp.sessions.values() {
        let uptime = match peer.start_time {
            Some(start_time) if peer.state.is_established() => {
                format_uptime(start_time.elapsed().as_secs())
            }
            _ => "N/A".to_string(),
        };
        neighbors.push(Neighbor {
            peer_ip: peer.ident.to_string(),
            remote_as: peer.remote_as.unwrap_or(0),
            state: peer.state.to_str().to_string(),
            uptime,
            msgs_sent: peer.msgs_sent(),
            msgs_received: peer.msgs_received(),
        });
    }
    success(neighbors)
}

pub fn show_routes_received(bgp: &Bgp) -> Value {
    let mut routes = Vec::new();
    for peer in bgp.sessions.values() {
        for route in peer.adj_rib_in.iter() {
            routes.push(ReceivedRoute {
                prefix: route.prefix.to_string(),
                next_hop: route.next_hop_str(),
                as_path: format!("{:?}", route.as_path),
                origin: route.origin.as_str().to_string(),
                remote_as: peer.remote_as.unwrap_or(0),
                received_from: bgp.config.local.router_id.to_string(),
            });
        }
    }
    success(routes)
}

pub fn show_routes_advertised(bgp: &Bgp) -> Value {
    let prefixes: Vec<String> = bgp
        .config
        .originated_prefixes
        .iter()
        .map(|prefix| prefix.to_string())
        .collect();
    success(prefixes)
}

pub fn show(bgp: &Bgp, command: &str) -> Value {
    match command {
        "show_neighbors" => show_neighbors(bgp),
        "show_routes_received" => show_routes_received(bgp),
        "show_routes_advertised" => show_routes_advertised(bgp),
        _ => json!({"status": "error", "message": "Unknown command"}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_format() {
        assert_eq!(format_uptime(0), "0:00:00");
        assert_eq!(format_uptime(5), "0:00:05");
        assert_eq!(format_uptime(3725), "1:02:05");
        assert_eq!(format_uptime(90061), "25:01:01");
    }
}
