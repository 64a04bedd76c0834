use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Team;
use crate::error::{Error, Result};

/// One message from the COMM feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plext {
    pub guid: String,
    pub timestamp_ms: i64,
    pub text: Option<String>,
    pub team: Option<Team>,
    pub markup: Vec<MarkupSpan>,
    pub plext_type: Option<String>,
    pub categories: Option<u32>,
}

/// A `[kind, attributes]` pair from a message's markup list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkupSpan {
    pub kind: String,
    pub attrs: Value,
}

#[derive(Deserialize)]
struct Envelope {
    plext: Body,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Body {
    text: Option<String>,
    team: Option<String>,
    #[serde(default)]
    markup: Vec<(String, Value)>,
    plext_type: Option<String>,
    categories: Option<u32>,
}

impl Plext {
    /// Parses one `[guid, timestampMs, {"plext": {...}}]` record.
    pub fn parse(record: &Value) -> Result<Self> {
        let (guid, timestamp_ms, body) = split_record(record)?;
        let envelope: Envelope = serde_json::from_value(body.clone())
            .map_err(|err| Error::parse(format!("plext body ({err})"), record))?;
        let body = envelope.plext;
        let team = body
            .team
            .map(|code| {
                Team::from_code(&code).ok_or_else(|| Error::parse(format!("team '{code}'"), record))
            })
            .transpose()?;

        Ok(Plext {
            guid: guid.to_string(),
            timestamp_ms,
            text: body.text,
            team,
            markup: body
                .markup
                .into_iter()
                .map(|(kind, attrs)| MarkupSpan { kind, attrs })
                .collect(),
            plext_type: body.plext_type,
            categories: body.categories,
        })
    }
}

/// Guid and timestamp of a raw feed record, used to advance the cursor.
pub(crate) fn split_record(record: &Value) -> Result<(&str, i64, &Value)> {
    let parts = record
        .as_array()
        .filter(|parts| parts.len() == 3)
        .ok_or_else(|| Error::parse("plext record", record))?;
    let guid = parts[0]
        .as_str()
        .ok_or_else(|| Error::parse("plext guid", record))?;
    let timestamp_ms = parts[1]
        .as_i64()
        .ok_or_else(|| Error::parse("plext timestamp", record))?;
    Ok((guid, timestamp_ms, &parts[2]))
}
