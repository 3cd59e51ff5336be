use thiserror::Error;

/// Errors raised by the bridge.
///
/// Lookups that can legitimately miss during teardown (registry resolution,
/// progress ids) return `Option` instead of one of these.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Client '{0}' is not registered")]
    ClientNotRegistered(String),

    #[error("Document '{0}' is not registered")]
    DocumentNotRegistered(String),

    #[error("Document '{document}' is already open in client '{client_id}'")]
    DocumentAlreadyOpen { document: String, client_id: String },

    #[error("Malformed '{kind}' action: {source}")]
    MalformedAction {
        kind: String,
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Connection to the GLSP server is closed")]
    ConnectionClosed,

    #[error("GLSP server is not ready: {0}")]
    NotReady(String),

    #[error("Collaboration error: {0}")]
    Collaboration(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
