//! File naming and write discipline for the mailbox transport.
//!
//! Requests live in `<requests_dir>/request-<id>.json`, responses in
//! `<responses_dir>/response-<id>.json`.  Files are written to a hidden
//! temporary name and renamed into place so a poller never reads a
//! half-written message.

use std::io;
use std::path::{Path, PathBuf};

use crate::message::{Message, ProtocolError, Request, RequestId};

const REQUEST_PREFIX: &str = "request-";
const RESPONSE_PREFIX: &str = "response-";
const SUFFIX: &str = ".json";

pub fn request_file_name(id: RequestId) -> String {
    format!("{REQUEST_PREFIX}{id}{SUFFIX}")
}

pub fn response_file_name(id: RequestId) -> String {
    format!("{RESPONSE_PREFIX}{id}{SUFFIX}")
}

/// Whether `name` looks like a request file (`request-*.json`).
pub fn is_request_file_name(name: &str) -> bool {
    name.starts_with(REQUEST_PREFIX) && name.ends_with(SUFFIX) && name.len() > REQUEST_PREFIX.len() + SUFFIX.len()
}

/// Write `contents` to `path` via a sibling temp file and a rename.
pub async fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = temp_path_for(path)?;
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("{} has no file name", path.display()))
    })?;
    let tmp_name = format!(".{}.tmp", name.to_string_lossy());
    Ok(path.with_file_name(tmp_name))
}

/// Remove `path`, treating "already gone" as success.
pub async fn remove_if_present(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Request files in `dir`, sorted by name.
pub async fn list_request_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if is_request_file_name(&entry.file_name().to_string_lossy()) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Decode the contents of a request file.  Anything other than a request
/// with an id is a parse error.
pub fn decode_request_file(bytes: &[u8]) -> Result<Request, ProtocolError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ProtocolError::Parse(format!("request file is not UTF-8: {e}")))?;
    match Message::decode(text)? {
        Message::Request(request) => Ok(request),
        Message::Notification(n) => Err(ProtocolError::Parse(format!(
            "notification {} carries no id",
            n.method
        ))),
        Message::Response(_) => Err(ProtocolError::Parse(
            "expected a request, found a response".into(),
        )),
    }
}
