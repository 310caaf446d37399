//! The mailbox adapter: answer request files in a mailbox directory by
//! relaying them to a pipe server.
//!
//! A request file stays on disk while its request is in flight and is
//! deleted once the response file has been written.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use tw_domain::config::{MailboxConfig, ServerCommand};
use tw_protocol::mailbox::{
    decode_request_file, list_request_files, remove_if_present, response_file_name,
    write_atomically,
};
use tw_protocol::{Message, Response, RpcError};

use crate::child::{ChildServer, Delivery, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::error::{AdapterError, Result};
use crate::ADAPTER_CLIENT_NAME;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct MailboxAdapter {
    child: ChildServer<PathBuf>,
    deliveries: mpsc::UnboundedReceiver<Delivery<PathBuf>>,
    requests_dir: PathBuf,
    responses_dir: PathBuf,
    poll_interval: Duration,
    in_flight: HashSet<PathBuf>,
}

impl MailboxAdapter {
    pub fn new(
        child: ChildServer<PathBuf>,
        deliveries: mpsc::UnboundedReceiver<Delivery<PathBuf>>,
        requests_dir: impl Into<PathBuf>,
        responses_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            child,
            deliveries,
            requests_dir: requests_dir.into(),
            responses_dir: responses_dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            in_flight: HashSet::new(),
        }
    }

    /// Spawn `command`, complete the handshake and serve the directories
    /// named in `config`.
    pub async fn start(command: &ServerCommand, config: &MailboxConfig) -> Result<Self> {
        let (child, deliveries) = ChildServer::spawn(command)?;
        if let Err(e) = child.handshake(ADAPTER_CLIENT_NAME, DEFAULT_HANDSHAKE_TIMEOUT).await {
            child.shutdown().await;
            return Err(e);
        }
        Ok(
            Self::new(child, deliveries, &config.requests_dir, &config.responses_dir)
                .with_poll_interval(config.server_poll_interval()),
        )
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Request files forwarded and not yet answered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn requests_dir(&self) -> &Path {
        &self.requests_dir
    }

    pub async fn ensure_dirs(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.requests_dir).await?;
        tokio::fs::create_dir_all(&self.responses_dir).await
    }

    /// One scan of the requests directory.  Returns how many requests were
    /// forwarded to the child.
    pub async fn scan(&mut self) -> usize {
        let files = match list_request_files(&self.requests_dir).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(dir = %self.requests_dir.display(), error = %e, "cannot scan requests directory");
                return 0;
            }
        };

        let mut forwarded = 0;
        for path in files {
            if self.in_flight.contains(&path) {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot read request file");
                    continue;
                }
            };
            let request = match decode_request_file(&bytes) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "deleting malformed request file");
                    if let Err(e) = remove_if_present(&path).await {
                        tracing::warn!(path = %path.display(), error = %e, "cannot delete request file");
                    }
                    continue;
                }
            };

            let id = request.id;
            self.in_flight.insert(path.clone());
            let span = tracing::info_span!("mailbox.request", id, path = %path.display());
            match self.child.forward(request, path.clone()).instrument(span).await {
                Ok(()) => forwarded += 1,
                Err(e) => {
                    tracing::warn!(id, error = %e, "cannot forward request");
                    let response = Response::failure(id, RpcError::internal(e.to_string()));
                    if let Err(e) = self.complete(Delivery { route: path, response }).await {
                        tracing::warn!(id, error = %e, "failed to answer request file");
                    }
                }
            }
        }
        forwarded
    }

    /// Write the response file for a delivery and delete its request file.
    pub async fn complete(&mut self, delivery: Delivery<PathBuf>) -> Result<()> {
        let Delivery {
            route: request_path,
            response,
        } = delivery;
        self.in_flight.remove(&request_path);

        let id = response.id;
        let json = Message::from(response).encode()?;
        write_atomically(&self.responses_dir.join(response_file_name(id)), json.as_bytes()).await?;
        remove_if_present(&request_path).await?;
        tracing::debug!(id, "request file answered");
        Ok(())
    }

    /// Poll and relay until `shutdown` is cancelled or the child exits.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.ensure_dirs().await?;
        tracing::info!(
            requests = %self.requests_dir.display(),
            responses = %self.responses_dir.display(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "mailbox adapter polling"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.child.shutdown().await;
                    tracing::info!(abandoned = self.in_flight.len(), "mailbox adapter stopped");
                    return Ok(());
                }
                delivery = self.deliveries.recv() => match delivery {
                    Some(delivery) => {
                        if let Err(e) = self.complete(delivery).await {
                            tracing::warn!(error = %e, "failed to answer request file");
                        }
                    }
                    None => {
                        tracing::error!("server process exited, mailbox adapter stopping");
                        return Err(AdapterError::ChildExited);
                    }
                },
                _ = ticker.tick() => {
                    self.scan().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::FramedRead;
    use tw_protocol::LineFramer;

    #[tokio::test]
    async fn scan_skips_in_flight_files_and_deletes_malformed_ones() {
        let dir = tempfile::tempdir().unwrap();
        let requests = dir.path().join("mailbox-requests");
        let responses = dir.path().join("mailbox-responses");

        let (ours, theirs) = tokio::io::duplex(8192);
        let (our_read, our_write) = tokio::io::split(ours);
        let (their_read, mut their_write) = tokio::io::split(theirs);
        let (child, deliveries) = ChildServer::from_io("fake", our_read, our_write);
        let mut adapter = MailboxAdapter::new(child, deliveries, &requests, &responses);
        adapter.ensure_dirs().await.unwrap();

        std::fs::write(
            requests.join("request-4.json"),
            json!({"jsonrpc": "2.0", "id": 4, "method": "ping"}).to_string(),
        )
        .unwrap();
        std::fs::write(requests.join("request-5.json"), "garbage").unwrap();

        assert_eq!(adapter.scan().await, 1);
        assert_eq!(adapter.in_flight(), 1);
        assert!(!requests.join("request-5.json").exists());
        // Still waiting on the child: not forwarded twice.
        assert_eq!(adapter.scan().await, 0);

        let mut frames = FramedRead::new(their_read, LineFramer::new());
        let Message::Request(sent) = Message::decode(&frames.next().await.unwrap().unwrap()).unwrap() else {
            panic!("expected request");
        };
        let line = Message::from(Response::success(sent.id, json!({}))).encode_line().unwrap();
        their_write.write_all(line.as_bytes()).await.unwrap();

        let delivery = adapter.deliveries.recv().await.unwrap();
        adapter.complete(delivery).await.unwrap();

        assert_eq!(adapter.in_flight(), 0);
        assert!(!requests.join("request-4.json").exists());
        let raw = std::fs::read_to_string(responses.join("response-4.json")).unwrap();
        let response: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(response["id"], 4);
        assert_eq!(response["result"], json!({}));
    }
}
