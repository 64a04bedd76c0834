use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::tiles::TileKey;
use crate::transport::{Transport, TransportError};

pub const GET_ENTITIES: &str = "getEntities";
pub const GET_PORTAL_DETAILS: &str = "getPortalDetails";
pub const GET_PLEXTS: &str = "getPlexts";

/// Shared front door to the backend: every request passes the same
/// concurrency gate and the same per-call retry policy.
pub struct Client<T> {
    transport: Arc<T>,
    gate: Arc<Semaphore>,
    attempts: u32,
    backoff: Backoff,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, workers: usize, attempts: u32, backoff: Backoff) -> Self {
        Self {
            transport: Arc::new(transport),
            gate: Arc::new(Semaphore::new(workers.max(1))),
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(transport: T, config: &ClientConfig) -> Self {
        let (min, max) = config.backoff_range();
        Self::new(
            transport,
            config.effective_workers(),
            config.request_retries,
            Backoff::new(min, max),
        )
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Requests currently allowed through the gate without waiting.
    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    /// Sends one request and unwraps its `result`. Backend errors, bad
    /// statuses and network failures are retried; a 400 or an expired
    /// session is returned immediately.
    pub async fn call(&self, method: &str, payload: Value) -> Result<Value> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::request(method, "request gate closed"))?;

        let mut last_failure = String::new();
        for attempt in 1..=self.attempts {
            match self.transport.send(method, payload.clone()).await {
                Ok(body) => match unwrap_result(body) {
                    Ok(result) => return Ok(result),
                    Err(reason) => {
                        error!(method, attempt, %reason, "backend returned an error");
                        last_failure = reason;
                    }
                },
                Err(TransportError::BadRequest) => {
                    return Err(Error::request(method, "bad request"));
                }
                Err(TransportError::Malformed(detail)) => {
                    warn!(method, %detail, "unparseable response, cookies may be expired");
                    return Err(Error::SessionExpired);
                }
                Err(TransportError::Login(reason)) => return Err(Error::Login(reason)),
                Err(err) => {
                    last_failure = err.to_string();
                }
            }

            if attempt < self.attempts {
                let delay = self.backoff.next_delay();
                debug!(
                    method,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "request failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        error!(method, attempts = self.attempts, "retry limit reached");
        Err(Error::request(
            method,
            format!("retries limit reached ({last_failure})"),
        ))
    }

    pub async fn get_entities(&self, keys: &[TileKey]) -> Result<Value> {
        let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
        self.call(GET_ENTITIES, json!({ "tileKeys": keys })).await
    }

    pub async fn get_portal_details(&self, guid: &str) -> Result<Value> {
        self.call(GET_PORTAL_DETAILS, json!({ "guid": guid })).await
    }
}

fn unwrap_result(body: Value) -> std::result::Result<Value, String> {
    match body {
        Value::Object(mut map) => {
            if let Some(result) = map.remove("result") {
                return Ok(result);
            }
            match map.remove("error") {
                Some(Value::String(message)) => Err(message),
                Some(other) => Err(other.to_string()),
                None => Err("bad response".to_string()),
            }
        }
        _ => Err("bad response".to_string()),
    }
}
