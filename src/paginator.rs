//! Cursor driven paging over the COMM message feed.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::{Client, GET_PLEXTS};
use crate::entity::plext::{split_record, Plext};
use crate::error::{Error, Result};
use crate::tiles::BoundingRegion;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommTab {
    All,
    Faction,
    Alerts,
}

impl CommTab {
    pub fn as_str(self) -> &'static str {
        match self {
            CommTab::All => "all",
            CommTab::Faction => "faction",
            CommTab::Alerts => "alerts",
        }
    }
}

impl FromStr for CommTab {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(CommTab::All),
            "faction" => Ok(CommTab::Faction),
            "alerts" => Ok(CommTab::Alerts),
            other => Err(Error::InvalidTab(other.to_string())),
        }
    }
}

impl fmt::Display for CommTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way the window moves between pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Newest first. Each page lowers the max bound.
    #[default]
    Backward,
    /// Oldest first. Each page raises the min bound.
    Forward,
}

impl Direction {
    /// The backend's `reverse` flag means ascending timestamps.
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }

    fn ascending(self) -> bool {
        self == Direction::Forward
    }
}

/// A time bound in epoch milliseconds. `-1` leaves the side open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeBound(pub i64);

impl TimeBound {
    pub const UNBOUNDED: TimeBound = TimeBound(-1);

    pub fn millis(self) -> i64 {
        self.0
    }
}

impl From<i64> for TimeBound {
    fn from(ms: i64) -> Self {
        TimeBound(ms)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for TimeBound {
    fn from(at: DateTime<Tz>) -> Self {
        TimeBound(at.timestamp_millis())
    }
}

/// Parameters of one feed window.
#[derive(Debug, Clone, PartialEq)]
pub struct PlextQuery {
    pub min_lat_e6: i64,
    pub max_lat_e6: i64,
    pub min_lng_e6: i64,
    pub max_lng_e6: i64,
    pub min_timestamp_ms: i64,
    pub max_timestamp_ms: i64,
    pub tab: CommTab,
    pub direction: Direction,
}

impl PlextQuery {
    /// Validates `tab` before anything is sent.
    pub fn new(
        region: &BoundingRegion,
        tab: &str,
        start: impl Into<TimeBound>,
        end: impl Into<TimeBound>,
        reverse: bool,
    ) -> Result<Self> {
        let tab = tab.parse()?;
        Ok(Self {
            min_lat_e6: region.min_lat_e6(),
            max_lat_e6: region.max_lat_e6(),
            min_lng_e6: region.min_lng_e6(),
            max_lng_e6: region.max_lng_e6(),
            min_timestamp_ms: start.into().millis(),
            max_timestamp_ms: end.into().millis(),
            tab,
            direction: Direction::from_reverse(reverse),
        })
    }
}

/// Pulls one message at a time, fetching the next page only when the
/// current one is used up. Once a page comes back empty the paginator is
/// finished for good; start over with a new one.
pub struct Paginator<T> {
    client: Arc<Client<T>>,
    query: PlextQuery,
    cursor: Option<String>,
    buffer: VecDeque<Plext>,
    pages: u32,
    finished: bool,
}

impl<T: Transport> Paginator<T> {
    pub fn new(client: Arc<Client<T>>, query: PlextQuery) -> Self {
        Self {
            client,
            query,
            cursor: None,
            buffer: VecDeque::new(),
            pages: 0,
            finished: false,
        }
    }

    pub fn query(&self) -> &PlextQuery {
        &self.query
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages
    }

    pub fn is_finished(&self) -> bool {
        self.finished && self.buffer.is_empty()
    }

    pub async fn next(&mut self) -> Option<Result<Plext>> {
        loop {
            if let Some(plext) = self.buffer.pop_front() {
                return Some(Ok(plext));
            }
            if self.finished {
                return None;
            }
            if let Err(err) = self.fetch_page().await {
                self.finished = true;
                return Some(Err(err));
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Plext>> {
        stream::unfold(self, |mut pager| async move {
            let item = pager.next().await?;
            Some((item, pager))
        })
    }

    fn request_payload(&self) -> Value {
        let q = &self.query;
        // The backend reads a zero lower bound as "now".
        let min_timestamp_ms = if q.min_timestamp_ms == 0 {
            Utc::now().timestamp_millis()
        } else {
            q.min_timestamp_ms
        };
        let mut payload = json!({
            "minLatE6": q.min_lat_e6,
            "maxLatE6": q.max_lat_e6,
            "minLngE6": q.min_lng_e6,
            "maxLngE6": q.max_lng_e6,
            "minTimestampMs": min_timestamp_ms,
            "maxTimestampMs": q.max_timestamp_ms,
            "tab": q.tab.as_str(),
            "ascendingTimestampOrder": q.direction.ascending(),
        });
        if let Some(guid) = &self.cursor {
            payload["plextContinuationGuid"] = Value::String(guid.clone());
        }
        payload
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let payload = self.request_payload();
        let result = self.client.call(GET_PLEXTS, payload).await?;
        self.pages += 1;

        let records = result
            .as_array()
            .ok_or_else(|| Error::parse("getPlexts result", &result))?;
        let Some(last) = records.last() else {
            debug!(pages = self.pages, "feed exhausted");
            self.finished = true;
            return Ok(());
        };

        let parsed = records.iter().map(Plext::parse).collect::<Result<Vec<_>>>()?;
        let (guid, timestamp_ms, _) = split_record(last)?;

        let unchanged_bound = match self.query.direction {
            Direction::Backward => self.query.max_timestamp_ms == timestamp_ms,
            Direction::Forward => self.query.min_timestamp_ms == timestamp_ms,
        };
        if unchanged_bound && self.cursor.as_deref() == Some(guid) {
            warn!(guid, "feed returned the same page twice, stopping");
            self.finished = true;
            return Ok(());
        }

        match self.query.direction {
            Direction::Backward => self.query.max_timestamp_ms = timestamp_ms,
            Direction::Forward => self.query.min_timestamp_ms = timestamp_ms,
        }
        self.cursor = Some(guid.to_string());
        debug!(
            page = self.pages,
            messages = parsed.len(),
            cursor = guid,
            "page received"
        );
        self.buffer.extend(parsed);
        Ok(())
    }
}
