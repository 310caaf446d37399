//! Mailbox transport: one JSON file per request and per response in a pair
//! of shared directories, discovered by polling.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use tw_domain::config::MailboxConfig;
use tw_protocol::mailbox::{request_file_name, response_file_name, write_atomically};
use tw_protocol::mcp::methods;
use tw_protocol::{Message, Request, RequestId, Response, ToolCallResult, ToolsListResult};

use crate::correlation::RequestIds;
use crate::error::ClientError;
use crate::transport::{call_params, decode_result, ToolClient};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MailboxClient {
    requests_dir: PathBuf,
    responses_dir: PathBuf,
    poll_interval: Duration,
    timeout: Duration,
    ids: RequestIds,
}

impl MailboxClient {
    pub fn new(requests_dir: impl Into<PathBuf>, responses_dir: impl Into<PathBuf>) -> Self {
        Self {
            requests_dir: requests_dir.into(),
            responses_dir: responses_dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            ids: RequestIds::new(),
        }
    }

    pub fn from_config(config: &MailboxConfig) -> Self {
        Self::new(&config.requests_dir, &config.responses_dir)
            .with_poll_interval(config.client_poll_interval())
            .with_timeout(config.timeout())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn request_path(&self, id: RequestId) -> PathBuf {
        self.requests_dir.join(request_file_name(id))
    }

    pub fn response_path(&self, id: RequestId) -> PathBuf {
        self.responses_dir.join(response_file_name(id))
    }

    /// Create both mailbox directories if they are missing.
    pub async fn ensure_dirs(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.requests_dir).await?;
        tokio::fs::create_dir_all(&self.responses_dir).await
    }

    /// Publish `request` as `request-<id>.json`.
    pub async fn send_request(&self, request: &Request) -> Result<(), ClientError> {
        let path = self.request_path(request.id);
        let json = Message::from(request.clone()).encode()?;
        write_atomically(&path, json.as_bytes()).await?;
        tracing::debug!(id = request.id, method = %request.method, path = %path.display(), "request file written");
        Ok(())
    }

    /// Poll for `response-<id>.json` until it appears or `timeout` elapses.
    ///
    /// The file is deleted once read.  A file that does not hold a response
    /// for `id` is deleted and polling continues.
    pub async fn wait_for_response(
        &self,
        id: RequestId,
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        let path = self.response_path(id);
        let deadline = Instant::now() + timeout;

        loop {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        tracing::debug!(path = %path.display(), error = %e, "could not remove response file");
                    }
                    match parse_response(&bytes, id) {
                        Ok(response) => return Ok(response),
                        Err(reason) => {
                            tracing::warn!(path = %path.display(), %reason, "discarding malformed response file");
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(ClientError::Io(e)),
            }

            if Instant::now() >= deadline {
                return Err(ClientError::Timeout { id, after: timeout });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Send a request and wait for its result under the configured timeout.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let request = Request::new(self.ids.next(), method, params);
        self.send_request(&request).await?;
        let response = self.wait_for_response(request.id, self.timeout).await?;
        Ok(response.into_result()?)
    }

    pub fn requests_dir(&self) -> &Path {
        &self.requests_dir
    }

    pub fn responses_dir(&self) -> &Path {
        &self.responses_dir
    }
}

fn parse_response(bytes: &[u8], id: RequestId) -> Result<Response, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
    match Message::decode(text).map_err(|e| e.to_string())? {
        Message::Response(r) if r.id == id => Ok(r),
        Message::Response(r) => Err(format!("expected id {id}, found {}", r.id)),
        _ => Err("not a response".into()),
    }
}

#[async_trait]
impl ToolClient for MailboxClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.ensure_dirs().await.map_err(|e| {
            ClientError::ConnectionFailed(format!(
                "cannot prepare mailbox {}: {e}",
                self.requests_dir.display()
            ))
        })
    }

    async fn list_tools(&self) -> Result<ToolsListResult, ClientError> {
        let value = self.request(methods::TOOLS_LIST, None).await?;
        decode_result(methods::TOOLS_LIST, value)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, ClientError> {
        let value = self
            .request(methods::TOOLS_CALL, Some(call_params(name, arguments)?))
            .await?;
        decode_result(methods::TOOLS_CALL, value)
    }

    async fn close(&self) -> Result<(), ClientError> {
        Ok(())
    }

    fn endpoint(&self) -> String {
        format!(
            "{} -> {}",
            self.requests_dir.display(),
            self.responses_dir.display()
        )
    }
}
