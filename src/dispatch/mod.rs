//! Round based tile fetching.
//!
//! Each round splits the pending keys into batch-sized chunks, sends every
//! chunk at once through the client's gate and waits for all of them.
//! Tiles the backend has not computed yet are carried into the next round.
//! A chunk whose request fails after the client's own retries ends the fetch.
//! The tile set is only touched here, never from inside a request task.

pub mod detail;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::client::{Client, GET_ENTITIES};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::tiles::{BoundingRegion, TileKey};
use crate::tileset::{Tile, TileSet};
use crate::transport::Transport;

pub use detail::DetailFetcher;

/// Tile keys the backend accepts in one `getEntities` call.
pub const DEFAULT_CHUNK_SIZE: usize = 5;
pub const DEFAULT_MAX_ROUNDS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub chunk_size: usize,
    pub max_rounds: u32,
    /// Fail with [`Error::IncompleteResult`] instead of returning a partial set.
    pub require_complete: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_rounds: DEFAULT_MAX_ROUNDS,
            require_complete: false,
        }
    }
}

impl From<&ClientConfig> for FetchOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            max_rounds: config.max_rounds,
            require_complete: config.require_complete,
        }
    }
}

/// What one chunk request produced, handed back to the controlling loop.
#[derive(Debug, Default)]
struct ChunkOutcome {
    resolved: Vec<Tile>,
    pending: Vec<TileKey>,
}

pub struct Dispatcher<T> {
    client: Arc<Client<T>>,
    options: FetchOptions,
    round_backoff: Backoff,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(client: Arc<Client<T>>, options: FetchOptions, round_backoff: Backoff) -> Self {
        Self {
            client,
            options,
            round_backoff,
        }
    }

    pub fn client(&self) -> &Arc<Client<T>> {
        &self.client
    }

    pub fn options(&self) -> FetchOptions {
        self.options
    }

    pub async fn fetch_region(&self, region: &BoundingRegion) -> Result<TileSet> {
        info!(%region, "fetching tiles");
        self.fetch_keys(region.tile_keys()).await
    }

    pub async fn fetch_keys(&self, keys: Vec<TileKey>) -> Result<TileSet> {
        let mut seen = HashSet::new();
        let mut pending: Vec<TileKey> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();
        let mut tiles = TileSet::pending(pending.iter().cloned());
        let chunk_size = self.options.chunk_size.max(1);

        for round in 1..=self.options.max_rounds {
            if pending.is_empty() {
                break;
            }
            if round > 1 {
                self.round_backoff.wait().await;
            }
            debug!(round, pending = pending.len(), "starting round");

            let mut requests = JoinSet::new();
            for chunk in pending.chunks(chunk_size) {
                let client = Arc::clone(&self.client);
                let chunk = chunk.to_vec();
                requests.spawn(async move {
                    let outcome = fetch_chunk(&client, &chunk).await;
                    (chunk, outcome)
                });
            }

            let mut next_round = Vec::new();
            while let Some(joined) = requests.join_next().await {
                let (chunk, outcome) = joined
                    .map_err(|e| Error::request(GET_ENTITIES, format!("request task failed: {e}")))?;
                match outcome {
                    Ok(outcome) => {
                        for tile in outcome.resolved {
                            tiles.add(tile);
                        }
                        next_round.extend(outcome.pending);
                    }
                    Err(err) => {
                        error!(round, tiles = chunk.len(), %err, "chunk request failed");
                        return Err(err);
                    }
                }
            }
            pending = next_round;
        }

        if pending.is_empty() {
            info!(tiles = tiles.len(), "all tiles resolved");
        } else {
            for key in &pending {
                warn!(tile = %key, "tile still unresolved");
            }
            error!(
                unresolved = tiles.unresolved_count(),
                resolved = tiles.len(),
                "tile retry budget exhausted"
            );
            if self.options.require_complete {
                return Err(Error::IncompleteResult {
                    unresolved: tiles.unresolved().cloned().collect(),
                });
            }
        }
        Ok(tiles)
    }
}

async fn fetch_chunk<T: Transport>(client: &Client<T>, keys: &[TileKey]) -> Result<ChunkOutcome> {
    let result = client.get_entities(keys).await?;
    let map = result
        .get("map")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::parse("getEntities result without map", &result))?;

    let mut outcome = ChunkOutcome::default();
    for key in keys {
        let entities = map
            .get(&key.to_string())
            .and_then(|tile| tile.get("gameEntities"))
            .and_then(Value::as_array);
        match entities {
            Some(raw) => outcome.resolved.push(Tile::decode(key.clone(), raw)?),
            None => {
                debug!(tile = %key, "tile not ready");
                outcome.pending.push(key.clone());
            }
        }
    }
    Ok(outcome)
}
