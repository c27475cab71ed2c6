use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "bgpctl", about = "BGP speaker control utility")]
struct Cli {
    #[arg(long, default_value = "/tmp/bgp_agent.sock", help = "Management socket path")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show information
    #[command(subcommand)]
    Show(ShowCommand),
}

#[derive(Subcommand)]
enum ShowCommand {
    /// Show BGP neighbors
    Neighbors,
    /// Show routes
    #[command(subcommand)]
    Routes(RoutesCommand),
}

#[derive(Subcommand)]
enum RoutesCommand {
    /// Show routes received from neighbors
    Received,
    /// Show routes advertised to neighbors
    Advertised,
}

fn main() {
    let cli = Cli::parse();
    let command = match &cli.command {
        Command::Show(ShowCommand::Neighbors) => "show_neighbors",
        Command::Show(ShowCommand::Routes(RoutesCommand::Received)) => "show_routes_received",
        Command::Show(ShowCommand::Routes(RoutesCommand::Advertised)) => "show_routes_advertised",
    };
    if let Err(err) = run(&cli.socket, command) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run(socket: &Path, command: &str) -> anyhow::Result<()> {
    let response = send_command(socket, command)?;
    if response.get("status").and_then(Value::as_str) != Some("success") {
        let message = response
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("{message}");
    }
    let empty = Vec::new();
    let data = response
        .get("data")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    match command {
        "show_neighbors" => render_neighbors(data),
        "show_routes_received" => render_routes_received(data),
        _ => render_routes_advertised(data),
    }
    Ok(())
}

fn send_command(socket: &Path, command: &str) -> anyhow::Result<Value> {
    let mut stream = UnixStream::connect(socket)
        .with_context(|| format!("failed to connect to {}", socket.display()))?;
    let request = json!({"command": command}).to_string();
    stream.write_all(request.as_bytes())?;
    stream.shutdown(Shutdown::Write)?;
    let mut data = String::new();
    stream.read_to_string(&mut data)?;
    serde_json::from_str(&data).context("invalid response from speaker")
}

fn field<'a>(row: &'a Value, name: &str) -> &'a str {
    row.get(name).and_then(Value::as_str).unwrap_or("")
}

fn num(row: &Value, name: &str) -> u64 {
    row.get(name).and_then(Value::as_u64).unwrap_or(0)
}

fn render_neighbors(rows: &[Value]) {
    println!(
        "{:<16} {:>9} {:<13} {:>10} {:>9} {:>9}",
        "Neighbor", "Remote-AS", "State", "Uptime", "MsgSent", "MsgRcvd"
    );
    for row in rows {
        println!(
            "{:<16} {:>9} {:<13} {:>10} {:>9} {:>9}",
            field(row, "peer_ip"),
            num(row, "remote_as"),
            field(row, "state"),
            field(row, "uptime"),
            num(row, "msgs_sent"),
            num(row, "msgs_received"),
        );
    }
}

fn render_routes_received(rows: &[Value]) {
    println!(
        "{:<18} {:<15} {:<12} {:<10} {:>9} {:<15}",
        "Prefix", "Next Hop", "AS Path", "Origin", "Remote-AS", "Received From"
    );
    for row in rows {
        println!(
            "{:<18} {:<15} {:<12} {:<10} {:>9} {:<15}",
            field(row, "prefix"),
            field(row, "next_hop"),
            field(row, "as_path"),
            field(row, "origin"),
            num(row, "remote_as"),
            field(row, "received_from"),
        );
    }
}

fn render_routes_advertised(rows: &[Value]) {
    println!("{:<18}", "Prefix");
    for row in rows {
        if let Some(prefix) = row.as_str() {
            println!("{:<18}", prefix);
        }
    }
}
