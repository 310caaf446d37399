use tw_protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("failed to spawn server {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake with server failed: {0}")]
    Handshake(String),

    #[error("server process exited")]
    ChildExited,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, AdapterError>;
