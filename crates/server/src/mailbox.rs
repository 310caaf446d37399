//! The mailbox server loop: poll a directory for request files, answer each
//! one with a response file, then delete the request.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use tw_domain::config::MailboxConfig;
use tw_protocol::mailbox::{
    decode_request_file, list_request_files, remove_if_present, response_file_name,
    write_atomically,
};
use tw_protocol::Message;

use crate::dispatch::Dispatcher;
use crate::error::Result;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct MailboxServer {
    dispatcher: Dispatcher,
    requests_dir: PathBuf,
    responses_dir: PathBuf,
    poll_interval: Duration,
}

impl MailboxServer {
    pub fn new(
        dispatcher: Dispatcher,
        requests_dir: impl Into<PathBuf>,
        responses_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dispatcher,
            requests_dir: requests_dir.into(),
            responses_dir: responses_dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_config(dispatcher: Dispatcher, config: &MailboxConfig) -> Self {
        Self::new(dispatcher, &config.requests_dir, &config.responses_dir)
            .with_poll_interval(config.server_poll_interval())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn ensure_dirs(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.requests_dir).await?;
        tokio::fs::create_dir_all(&self.responses_dir).await
    }

    /// One scan of the requests directory.  Returns how many request files
    /// were answered.  A failure on one file is logged and does not stop
    /// the others.
    pub async fn process_requests(&self) -> usize {
        let files = match list_request_files(&self.requests_dir).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(dir = %self.requests_dir.display(), error = %e, "cannot scan requests directory");
                return 0;
            }
        };

        let mut answered = 0;
        for path in files {
            match self.process_file(&path).await {
                Ok(true) => answered += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to process request file");
                }
            }
        }
        answered
    }

    /// Answer one request file.  `Ok(false)` when the file vanished or was
    /// malformed and discarded.
    async fn process_file(&self, path: &Path) -> Result<bool> {
        let span = tracing::info_span!("mailbox.request", path = %path.display());
        self.answer_file(path).instrument(span).await
    }

    async fn answer_file(&self, path: &Path) -> Result<bool> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let request = match decode_request_file(&bytes) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "deleting malformed request file");
                remove_if_present(path).await?;
                return Ok(false);
            }
        };

        let id = request.id;
        let method = request.method.clone();
        let response = self.dispatcher.dispatch(request).await;
        let json = Message::from(response).encode()?;

        let out = self.responses_dir.join(response_file_name(id));
        write_atomically(&out, json.as_bytes()).await?;
        remove_if_present(path).await?;

        tracing::debug!(id, method = %method, "request answered");
        Ok(true)
    }

    /// Scan every poll interval until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> io::Result<()> {
        self.ensure_dirs().await?;
        tracing::info!(
            requests = %self.requests_dir.display(),
            responses = %self.responses_dir.display(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "mailbox server polling"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.process_requests().await;
                }
            }
        }
        tracing::info!("mailbox server stopped");
        Ok(())
    }
}
