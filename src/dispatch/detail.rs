use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use tracing::{error, warn};

use crate::backoff::Backoff;
use crate::client::{Client, GET_PORTAL_DETAILS};
use crate::entity::{decode_payload, GameEntity, Portal, DETAIL_TIMESTAMP_MS};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Fetches detail-level portals one guid at a time.
pub struct DetailFetcher<T> {
    client: Arc<Client<T>>,
    attempts: u32,
    backoff: Backoff,
    concurrency: usize,
}

impl<T: Transport> DetailFetcher<T> {
    pub fn new(client: Arc<Client<T>>, attempts: u32, backoff: Backoff, concurrency: usize) -> Self {
        Self {
            client,
            attempts: attempts.max(1),
            backoff,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn portal(&self, guid: &str) -> Result<Portal> {
        for attempt in 1..=self.attempts {
            match self.client.get_portal_details(guid).await {
                Ok(payload) => return decode_detail(guid, &payload),
                Err(err) if err.is_transient() => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        guid,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "portal detail request failed"
                    );
                    if attempt < self.attempts && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        error!(guid, "could not fetch portal details");
        Err(Error::request(GET_PORTAL_DETAILS, "retries limit reached"))
    }

    /// Fetches many portals concurrently. With `ordered` the results come
    /// back in the order of `guids`, otherwise as soon as each completes.
    pub fn portals<'a>(
        &'a self,
        guids: Vec<String>,
        ordered: bool,
    ) -> impl Stream<Item = Result<Portal>> + 'a {
        let requests = stream::iter(guids).map(move |guid| async move { self.portal(&guid).await });
        if ordered {
            requests.buffered(self.concurrency).left_stream()
        } else {
            requests.buffer_unordered(self.concurrency).right_stream()
        }
    }
}

fn decode_detail(guid: &str, payload: &serde_json::Value) -> Result<Portal> {
    match decode_payload(guid, DETAIL_TIMESTAMP_MS, payload)? {
        GameEntity::Portal(portal) => Ok(portal),
        other => Err(Error::parse(
            format!("portal detail returned a {:?}", other.kind()),
            payload,
        )),
    }
}
