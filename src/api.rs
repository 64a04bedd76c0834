use std::sync::Arc;

use futures::Stream;
use tracing::info;

use crate::backoff::Backoff;
use crate::client::Client;
use crate::config::ClientConfig;
use crate::dispatch::{DetailFetcher, Dispatcher, FetchOptions};
use crate::entity::Portal;
use crate::error::Result;
use crate::paginator::{Paginator, PlextQuery, TimeBound};
use crate::tiles::{to_e6, BoundingRegion, MAX_ZOOM};
use crate::tileset::TileSet;
use crate::transport::Transport;

/// Entry point bundling the tile dispatcher, detail fetcher and message
/// paginator over one shared client.
pub struct IntelApi<T> {
    client: Arc<Client<T>>,
    dispatcher: Dispatcher<T>,
    details: DetailFetcher<T>,
}

pub struct IntelApiBuilder<T> {
    client: Client<T>,
    options: FetchOptions,
    round_backoff: Backoff,
    detail_attempts: u32,
    detail_backoff: Backoff,
    detail_concurrency: usize,
}

impl<T: Transport> IntelApiBuilder<T> {
    pub fn new(client: Client<T>) -> Self {
        Self {
            client,
            options: FetchOptions::default(),
            round_backoff: Backoff::none(),
            detail_attempts: 5,
            detail_backoff: Backoff::none(),
            detail_concurrency: 1,
        }
    }

    pub fn from_config(transport: T, config: &ClientConfig) -> Self {
        let (min, max) = config.backoff_range();
        let (detail_min, detail_max) = config.detail_backoff_range();
        Self::new(Client::from_config(transport, config))
            .with_fetch_options(FetchOptions::from(config))
            .with_round_backoff(Backoff::new(min, max))
            .with_detail_retries(config.detail_retries, Backoff::new(detail_min, detail_max))
            .with_detail_concurrency(config.effective_workers())
    }

    pub fn with_fetch_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_round_backoff(mut self, backoff: Backoff) -> Self {
        self.round_backoff = backoff;
        self
    }

    pub fn with_detail_retries(mut self, attempts: u32, backoff: Backoff) -> Self {
        self.detail_attempts = attempts;
        self.detail_backoff = backoff;
        self
    }

    pub fn with_detail_concurrency(mut self, concurrency: usize) -> Self {
        self.detail_concurrency = concurrency;
        self
    }

    pub fn build(self) -> IntelApi<T> {
        let client = Arc::new(self.client);
        IntelApi {
            dispatcher: Dispatcher::new(Arc::clone(&client), self.options, self.round_backoff),
            details: DetailFetcher::new(
                Arc::clone(&client),
                self.detail_attempts,
                self.detail_backoff,
                self.detail_concurrency,
            ),
            client,
        }
    }
}

impl<T: Transport> IntelApi<T> {
    pub fn builder(client: Client<T>) -> IntelApiBuilder<T> {
        IntelApiBuilder::new(client)
    }

    pub fn client(&self) -> &Arc<Client<T>> {
        &self.client
    }

    pub async fn entities(&self, region: &BoundingRegion) -> Result<TileSet> {
        self.dispatcher.fetch_region(region).await
    }

    pub async fn portal(&self, guid: &str) -> Result<Portal> {
        self.details.portal(guid).await
    }

    pub fn portals<'a>(
        &'a self,
        guids: Vec<String>,
        ordered: bool,
    ) -> impl Stream<Item = Result<Portal>> + 'a {
        self.details.portals(guids, ordered)
    }

    /// Portals in the zoom 15 tile under a point, nearest first, with their
    /// squared E6 distance.
    pub async fn nearest_portals(&self, lat: f64, lng: f64, limit: usize) -> Result<Vec<(Portal, f64)>> {
        let region = BoundingRegion::from_square(lat, lng, 0.0, MAX_ZOOM);
        let tiles = self.dispatcher.fetch_region(&region).await?;
        let (lat_e6, lng_e6) = (to_e6(lat) as f64, to_e6(lng) as f64);

        let mut ranked: Vec<(Portal, f64)> = tiles
            .portals()
            .map(|p| {
                let d = (p.lat_e6 as f64 - lat_e6).powi(2) + (p.lng_e6 as f64 - lng_e6).powi(2);
                (p.clone(), d)
            })
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked.truncate(limit);
        info!(found = ranked.len(), "nearest portals ranked");
        Ok(ranked)
    }

    pub fn plexts(
        &self,
        region: &BoundingRegion,
        tab: &str,
        start: impl Into<TimeBound>,
        end: impl Into<TimeBound>,
        reverse: bool,
    ) -> Result<Paginator<T>> {
        let query = PlextQuery::new(region, tab, start, end, reverse)?;
        Ok(Paginator::new(Arc::clone(&self.client), query))
    }
}
