use thiserror::Error;

/// Connection-class failures surfaced by the mail transport.
///
/// Every variant is non-fatal to the process: the supervisor reacts by
/// entering its backoff-and-reconnect cycle.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("mailbox error: {0}")]
    Mailbox(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("session closed")]
    Closed,
}

impl From<async_imap::error::Error> for TransportError {
    fn from(err: async_imap::error::Error) -> Self {
        match err {
            async_imap::error::Error::Io(e) => TransportError::Connection(e.to_string()),
            async_imap::error::Error::No(msg) => TransportError::Mailbox(msg),
            async_imap::error::Error::Bad(msg) => TransportError::BadResponse(msg),
            async_imap::error::Error::Parse(e) => TransportError::BadResponse(e.to_string()),
            async_imap::error::Error::Validate(e) => TransportError::BadResponse(e.to_string()),
            async_imap::error::Error::ConnectionLost => TransportError::Closed,
            other => TransportError::Connection(other.to_string()),
        }
    }
}

impl From<tokio_native_tls::native_tls::Error> for TransportError {
    fn from(err: tokio_native_tls::native_tls::Error) -> Self {
        TransportError::Tls(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Connection(err.to_string())
    }
}
