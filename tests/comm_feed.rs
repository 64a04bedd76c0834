mod common;

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;

use intelsync::{
    backoff::Backoff, BoundingRegion, Client, Direction, Error, IntelApiBuilder, Paginator,
    PlextQuery, Team, Transport, TransportError,
};

use common::FeedBackend;

fn region() -> BoundingRegion {
    BoundingRegion::from_box(35.60, 139.60, 35.80, 139.80, 15)
}

/// Keeps a handle on the feed after the client takes ownership.
struct SharedFeed(Arc<FeedBackend>);

impl Transport for SharedFeed {
    async fn send(&self, method: &str, payload: Value) -> Result<Value, TransportError> {
        self.0.send(method, payload).await
    }
}

fn paginator(feed: &Arc<FeedBackend>, start: i64, end: i64, reverse: bool) -> Paginator<SharedFeed> {
    let client = Arc::new(Client::new(SharedFeed(Arc::clone(feed)), 1, 1, Backoff::none()));
    let query = PlextQuery::new(&region(), "all", start, end, reverse).unwrap();
    Paginator::new(client, query)
}

fn timestamps(requests: &[Value], field: &str) -> Vec<i64> {
    requests.iter().map(|r| r[field].as_i64().unwrap()).collect()
}

#[tokio::test]
async fn ascending_feed_yields_every_message_once() {
    let feed = Arc::new(FeedBackend::new(&[&[100, 200], &[300, 400], &[500, 600]]));
    let mut pager = paginator(&feed, 0, -1, true);
    assert_eq!(pager.query().direction, Direction::Forward);

    let mut seen = Vec::new();
    while let Some(plext) = pager.next().await {
        let plext = plext.unwrap();
        assert_eq!(plext.team, Some(Team::Enlightened));
        seen.push(plext.timestamp_ms);
    }

    assert_eq!(seen, vec![100, 200, 300, 400, 500, 600]);
    // three full pages and the empty one that ends the feed
    assert_eq!(feed.requests().len(), 4);
    assert_eq!(pager.pages_fetched(), 4);
    assert!(pager.is_finished());

    assert!(pager.next().await.is_none());
    assert_eq!(feed.requests().len(), 4);
}

#[tokio::test]
async fn ascending_feed_raises_the_lower_bound() {
    let feed = Arc::new(FeedBackend::new(&[&[100, 200], &[300, 400], &[500, 600]]));
    let pager = paginator(&feed, 50, 1_000, true);
    let all: Vec<_> = pager.into_stream().collect().await;
    assert_eq!(all.len(), 6);

    let requests = feed.requests();
    assert_eq!(timestamps(&requests, "maxTimestampMs"), vec![1_000; 4]);
    assert_eq!(timestamps(&requests, "minTimestampMs"), vec![50, 200, 400, 600]);
    assert!(requests.iter().all(|r| r["ascendingTimestampOrder"] == true));
    assert!(requests[0].get("plextContinuationGuid").is_none());
    assert_eq!(requests[1]["plextContinuationGuid"], "m200");
    assert_eq!(requests[3]["plextContinuationGuid"], "m600");
}

#[tokio::test]
async fn descending_feed_lowers_the_upper_bound() {
    let feed = Arc::new(FeedBackend::new(&[&[600, 500], &[400, 300], &[200, 100]]));
    let pager = paginator(&feed, 50, -1, false);
    let seen: Vec<i64> = pager
        .into_stream()
        .map(|plext| plext.unwrap().timestamp_ms)
        .collect()
        .await;
    assert_eq!(seen, vec![600, 500, 400, 300, 200, 100]);

    let requests = feed.requests();
    assert_eq!(timestamps(&requests, "maxTimestampMs"), vec![-1, 500, 300, 100]);
    assert_eq!(timestamps(&requests, "minTimestampMs"), vec![50; 4]);
    assert!(requests.iter().all(|r| r["ascendingTimestampOrder"] == false));
    assert!(requests.iter().all(|r| r["tab"] == "all"));
}

#[tokio::test]
async fn zero_lower_bound_is_sent_as_now() {
    let feed = Arc::new(FeedBackend::new(&[]));
    let mut pager = paginator(&feed, 0, -1, false);
    assert!(pager.next().await.is_none());

    let requests = feed.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0]["minTimestampMs"].as_i64().unwrap() > 1_600_000_000_000);
}

#[tokio::test]
async fn stream_can_stop_early() {
    let feed = Arc::new(FeedBackend::new(&[&[100, 200], &[300, 400], &[500, 600]]));
    let pager = paginator(&feed, 50, -1, true);
    let first: Vec<_> = pager.into_stream().take(3).collect().await;
    assert_eq!(first.len(), 3);
    // the third page is never requested
    assert_eq!(feed.requests().len(), 2);
}

#[tokio::test]
async fn unknown_tab_fails_before_any_request() {
    let feed = Arc::new(FeedBackend::new(&[&[100]]));
    let client = Client::new(SharedFeed(Arc::clone(&feed)), 1, 1, Backoff::none());
    let api = IntelApiBuilder::new(client).build();

    let err = api.plexts(&region(), "global", 0i64, -1i64, false).err();
    assert!(matches!(err, Some(Error::InvalidTab(tab)) if tab == "global"));
    assert!(feed.requests().is_empty());
}

struct LoginPage;

impl Transport for LoginPage {
    async fn send(&self, _method: &str, _payload: Value) -> Result<Value, TransportError> {
        Err(TransportError::Malformed("<!DOCTYPE html>".into()))
    }
}

#[tokio::test]
async fn expired_session_ends_the_feed_with_an_error() {
    let client = Arc::new(Client::new(LoginPage, 1, 3, Backoff::none()));
    let query = PlextQuery::new(&region(), "faction", 50i64, -1i64, false).unwrap();
    let mut pager = Paginator::new(client, query);

    assert!(matches!(pager.next().await, Some(Err(Error::SessionExpired))));
    assert!(pager.next().await.is_none());
}
