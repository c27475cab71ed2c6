use std::path::Path;

use anyhow::Context;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::inst::{Message, ShowRequest};
use crate::task::Task;

const MGMT_REQUEST_MAX: usize = 4096;

/// Bind the management socket and serve one JSON request per connection.
/// A stale socket file from a previous run is removed first.
pub fn serve(path: &Path, tx: UnboundedSender<Message>) -> anyhow::Result<Task<()>> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind management socket {}", path.display()))?;
    info!(path = %path.display(), "management listening");
    Ok(Task::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(handle_client(stream, tx.clone()));
                }
                Err(err) => {
                    warn!(%err, "management accept error");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }))
}

async fn handle_client(mut stream: UnixStream, tx: UnboundedSender<Message>) {
    let mut buf = vec![0u8; MGMT_REQUEST_MAX];
    let reply = match stream.read(&mut buf).await {
        Ok(0) => return,
        Ok(n) => match handle_request(&buf[..n], &tx).await {
            Ok(value) => value,
            Err(err) => json!({"status": "error", "message": err.to_string()}),
        },
        Err(err) => {
            warn!(%err, "management read error");
            return;
        }
    };
    let _ = stream.write_all(reply.to_string().as_bytes()).await;
}

async fn handle_request(data: &[u8], tx: &UnboundedSender<Message>) -> anyhow::Result<Value> {
    let request: Value = serde_json::from_slice(data).context("invalid JSON request")?;
    let command = request
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let (resp_tx, resp_rx) = oneshot::channel();
    tx.send(Message::Show(ShowRequest {
        command,
        resp: resp_tx,
    }))
    .context("event loop is gone")?;
    resp_rx.await.context("no response from event loop")
}
