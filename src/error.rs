use serde_json::Value;
use thiserror::Error;

use crate::tiles::TileKey;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A raw record could not be decoded. The offending record is kept verbatim.
    #[error("failed to parse {reason}: {record}")]
    Parse { reason: String, record: Value },

    #[error("request {method} failed: {reason}")]
    RequestFailed { method: String, reason: String },

    /// The backend answered with a body that is not JSON, which means the
    /// cookies are no longer accepted. Re-authenticate before retrying.
    #[error("session expired, cookies may be stale")]
    SessionExpired,

    #[error("{} tile(s) still unresolved after the retry budget", unresolved.len())]
    IncompleteResult { unresolved: Vec<TileKey> },

    #[error("\"{0}\" is not one of [\"all\", \"faction\", \"alerts\"]")]
    InvalidTab(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("invalid config: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn parse(reason: impl Into<String>, record: &Value) -> Self {
        Error::Parse {
            reason: reason.into(),
            record: record.clone(),
        }
    }

    pub(crate) fn request(method: &str, reason: impl Into<String>) -> Self {
        Error::RequestFailed {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether a caller-level retry may succeed. Parse and config errors are
    /// deterministic and never worth repeating.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RequestFailed { .. })
    }
}
