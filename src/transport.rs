use std::future::Future;

use serde_json::Value;
use thiserror::Error;

/// Failures below the level of a decoded backend answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// HTTP 400. The payload itself is wrong, repeating it will not help.
    #[error("bad request")]
    BadRequest,
    #[error("http status {0}")]
    Status(u16),
    /// Body was not JSON. The backend serves its login page in that case.
    #[error("malformed response body: {0}")]
    Malformed(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("login failed: {0}")]
    Login(String),
}

/// The single primitive the engine needs from the backend connection.
///
/// `send` posts `payload` to the named backend method and returns the
/// decoded JSON body, which is `{"result": ..}` or `{"error": ..}`.
/// Implementations are responsible for attaching session credentials.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        method: &str,
        payload: Value,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;
}
