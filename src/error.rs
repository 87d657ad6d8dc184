//! Error taxonomy shared by every reconnaissance module.
//!
//! Only input problems detected before any network work (bad port syntax,
//! an unresolvable target) travel back to the caller as `Err`. Everything
//! that goes wrong inside a single probe is folded into a
//! [`ProbeState`](crate::scanner::task::ProbeState) instead.
use std::{io, time::Duration};
use thiserror::Error;

/// Errors raised by the reconnaissance modules.
#[derive(Debug, Error)]
pub enum Error {
    /// The name does not resolve (NXDOMAIN, no answer, resolver failure).
    #[error("could not resolve {0}")]
    Resolution(String),

    /// The remote end actively refused the connection.
    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    /// No answer arrived inside the deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The optional external scanning tool is missing or failed to run.
    #[error("external scanner unavailable: {0}")]
    ToolUnavailable(String),

    /// A collaborator returned something we could not make sense of.
    #[error("malformed {what}: {detail}")]
    Parse {
        /// What was being parsed.
        what: &'static str,
        /// Parser message.
        detail: String,
    },

    /// Certificate transparency, WHOIS or another upstream service is unreachable.
    #[error("upstream service unavailable: {0}")]
    Upstream(String),

    /// Fatal user input error, reported before any probe is sent.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Socket or file I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// TLS connector setup failure.
    #[error(transparent)]
    Tls(#[from] native_tls::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn parse(what: &'static str, detail: impl ToString) -> Self {
        Self::Parse {
            what,
            detail: detail.to_string(),
        }
    }
}
