#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Map, Value};

use intelsync::{Transport, TransportError};

pub fn summary_portal(guid: &str, lat_e6: i64, lng_e6: i64) -> Value {
    json!([
        guid,
        1_700_000_000_000i64,
        [
            "p", "E", lat_e6, lng_e6, 5, 80, 6, null, format!("portal {guid}"),
            [], false, false, null, 1_699_000_000_000i64, 0
        ]
    ])
}

/// In-memory `getEntities` backend.
///
/// Each tile resolves after the configured number of "not ready" answers
/// (default zero). Tiles listed in `never` never resolve.
#[derive(Default)]
pub struct TileBackend {
    pub delays: Mutex<HashMap<String, u32>>,
    pub never: Vec<String>,
    pub entities: HashMap<String, Vec<Value>>,
    pub fail_batches_containing: Mutex<HashMap<String, u32>>,
    pub latency: Duration,
    pub requests: Mutex<Vec<Vec<String>>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl TileBackend {
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested_count(&self, key: &str) -> usize {
        self.requests()
            .iter()
            .filter(|batch| batch.iter().any(|k| k == key))
            .count()
    }
}

impl Transport for TileBackend {
    async fn send(&self, method: &str, payload: Value) -> Result<Value, TransportError> {
        assert_eq!(method, "getEntities");
        let keys: Vec<String> = serde_json::from_value(payload["tileKeys"].clone()).unwrap();
        assert!(keys.len() <= 5, "batch of {} keys", keys.len());
        self.requests.lock().unwrap().push(keys.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let fail = {
            let mut failing = self.fail_batches_containing.lock().unwrap();
            keys.iter().any(|k| match failing.get_mut(k) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            })
        };
        if fail {
            return Err(TransportError::Status(503));
        }

        let mut map = Map::new();
        let mut delays = self.delays.lock().unwrap();
        for key in keys {
            let not_ready = self.never.contains(&key)
                || match delays.get_mut(&key) {
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        true
                    }
                    _ => false,
                };
            let tile = if not_ready {
                json!({"error": "TIMEOUT"})
            } else {
                let entities = self.entities.get(&key).cloned().unwrap_or_default();
                json!({ "gameEntities": entities })
            };
            map.insert(key, tile);
        }
        Ok(json!({ "result": { "map": map } }))
    }
}

/// In-memory `getPlexts` backend serving fixed pages, selected by the
/// continuation guid the way the real feed does.
#[derive(Default)]
pub struct FeedBackend {
    pub pages: Vec<Vec<(String, i64)>>,
    pub requests: Mutex<Vec<Value>>,
}

impl FeedBackend {
    pub fn new(pages: &[&[i64]]) -> Self {
        let pages = pages
            .iter()
            .map(|page| page.iter().map(|ts| (format!("m{ts}"), *ts)).collect())
            .collect();
        Self {
            pages,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for FeedBackend {
    async fn send(&self, method: &str, payload: Value) -> Result<Value, TransportError> {
        assert_eq!(method, "getPlexts");
        self.requests.lock().unwrap().push(payload.clone());

        let page_index = match payload.get("plextContinuationGuid").and_then(Value::as_str) {
            None => 0,
            Some(guid) => match self
                .pages
                .iter()
                .position(|page| page.last().is_some_and(|(g, _)| g == guid))
            {
                Some(i) => i + 1,
                None => self.pages.len(),
            },
        };

        let records: Vec<Value> = self
            .pages
            .get(page_index)
            .map(|page| {
                page.iter()
                    .map(|(guid, ts)| {
                        json!([guid, ts, {"plext": {
                            "text": format!("message at {ts}"),
                            "team": "ENLIGHTENED",
                            "markup": [["TEXT", {"plain": "hello"}]],
                            "plextType": "PLAYER_GENERATED",
                            "categories": 2
                        }}])
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "result": records }))
    }
}
