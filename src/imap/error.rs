use thiserror::Error;

/// Error classes the worker branches on (spec §4.1): connection/IO failures,
/// TLS, credential rejection, timeouts, and protocol-level (IMAP NO/BAD)
/// errors.
#[derive(Debug, Error, Clone)]
pub enum ImapError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<async_imap::error::Error> for ImapError {
    fn from(err: async_imap::error::Error) -> Self {
        match err {
            async_imap::error::Error::No(msg) | async_imap::error::Error::Bad(msg) => {
                ImapError::Protocol(msg)
            }
            async_imap::error::Error::Parse(e) => ImapError::Protocol(e.to_string()),
            async_imap::error::Error::Validate(e) => ImapError::Protocol(e.to_string()),
            async_imap::error::Error::Io(e) => ImapError::Io(e.to_string()),
            other => ImapError::Protocol(other.to_string()),
        }
    }
}

impl From<tokio_native_tls::native_tls::Error> for ImapError {
    fn from(err: tokio_native_tls::native_tls::Error) -> Self {
        ImapError::Tls(err.to_string())
    }
}

impl From<std::io::Error> for ImapError {
    fn from(err: std::io::Error) -> Self {
        ImapError::Io(err.to_string())
    }
}

impl ImapError {
    /// True for the credential-rejection class (spec §4.1, §7: AuthError).
    pub fn is_auth(&self) -> bool {
        matches!(self, ImapError::Auth(_))
    }

    /// True for the timeout class (spec §7: Timeout).
    pub fn is_timeout(&self) -> bool {
        matches!(self, ImapError::Timeout(_))
    }
}
