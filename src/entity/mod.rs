//! Typed game entities decoded from the backend's positional arrays.
//!
//! Every entity arrives as `[guid, timestampMs, payload]` where `payload[0]`
//! is a one letter tag: `p` for portals, `e` for links, `r` for fields.

pub mod plext;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

pub use plext::{MarkupSpan, Plext};

/// Timestamp used for entities fetched on demand rather than from a tile.
pub const DETAIL_TIMESTAMP_MS: i64 = -1;

const SUMMARY_LEN: usize = 14;
const DETAIL_LEN: usize = SUMMARY_LEN + 4;
const LINK_LEN: usize = 8;
const FIELD_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Team {
    Enlightened,
    Resistance,
    Neutral,
}

impl Team {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "E" | "ENLIGHTENED" => Some(Team::Enlightened),
            "R" | "RESISTANCE" => Some(Team::Resistance),
            "N" | "NEUTRAL" => Some(Team::Neutral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityKind {
    Portal,
    Link,
    Field,
}

impl EntityKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "p" => Some(EntityKind::Portal),
            "e" => Some(EntityKind::Link),
            "r" => Some(EntityKind::Field),
            _ => None,
        }
    }
}

/// Location of a portal as referenced by a link or field endpoint. This is
/// a plain copy of the portal's identity, not a handle to a [`Portal`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PortalRef {
    pub guid: String,
    pub lat_e6: i64,
    pub lng_e6: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mod {
    pub owner: String,
    pub name: String,
    pub rarity: String,
    pub stats: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resonator {
    pub owner: String,
    pub level: u8,
    pub energy: u32,
}

/// Blocks only present on `getPortalDetails` responses. A `null` block is
/// `None`; empty slots inside a block are `None` too.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortalDetail {
    pub mods: Option<Vec<Option<Mod>>>,
    pub resonators: Option<Vec<Option<Resonator>>>,
    pub owner: Option<String>,
    pub artifact_detail: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portal {
    pub guid: String,
    pub timestamp_ms: i64,
    pub team: Team,
    pub lat_e6: i64,
    pub lng_e6: i64,
    pub level: u8,
    pub health: u8,
    pub res_count: u8,
    pub image: Option<String>,
    pub title: String,
    pub ornaments: Vec<String>,
    pub mission: bool,
    pub mission50plus: bool,
    pub artifact_brief: Option<Value>,
    /// Last-modified time carried inside the payload itself.
    pub updated_ms: i64,
    pub history: Option<u64>,
    pub detail: Option<PortalDetail>,
}

impl Portal {
    pub fn portal_ref(&self) -> PortalRef {
        PortalRef {
            guid: self.guid.clone(),
            lat_e6: self.lat_e6,
            lng_e6: self.lng_e6,
        }
    }

    pub fn is_detailed(&self) -> bool {
        self.detail.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub guid: String,
    pub timestamp_ms: i64,
    pub team: Team,
    pub origin: PortalRef,
    pub destination: PortalRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub guid: String,
    pub timestamp_ms: i64,
    pub team: Team,
    pub vertices: [PortalRef; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GameEntity {
    Portal(Portal),
    Link(Link),
    Field(Field),
}

impl GameEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            GameEntity::Portal(_) => EntityKind::Portal,
            GameEntity::Link(_) => EntityKind::Link,
            GameEntity::Field(_) => EntityKind::Field,
        }
    }

    pub fn guid(&self) -> &str {
        match self {
            GameEntity::Portal(p) => &p.guid,
            GameEntity::Link(l) => &l.guid,
            GameEntity::Field(f) => &f.guid,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        match self {
            GameEntity::Portal(p) => p.timestamp_ms,
            GameEntity::Link(l) => l.timestamp_ms,
            GameEntity::Field(f) => f.timestamp_ms,
        }
    }

    pub fn team(&self) -> Team {
        match self {
            GameEntity::Portal(p) => p.team,
            GameEntity::Link(l) => l.team,
            GameEntity::Field(f) => f.team,
        }
    }
}

/// Decodes one `[guid, timestampMs, payload]` record from a tile.
pub fn decode_entity(record: &Value) -> Result<GameEntity> {
    let parts = record
        .as_array()
        .filter(|parts| parts.len() == 3)
        .ok_or_else(|| Error::parse("entity record", record))?;
    let guid = parts[0]
        .as_str()
        .ok_or_else(|| Error::parse("entity guid", record))?;
    let timestamp_ms = parts[1]
        .as_i64()
        .ok_or_else(|| Error::parse("entity timestamp", record))?;
    decode_payload(guid, timestamp_ms, &parts[2])
}

/// Decodes a bare payload whose guid and timestamp are known out of band,
/// as returned by the portal detail query.
pub fn decode_payload(guid: &str, timestamp_ms: i64, payload: &Value) -> Result<GameEntity> {
    let fields = payload
        .as_array()
        .ok_or_else(|| Error::parse("entity payload", payload))?;
    let tag = fields
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| Error::parse("entity type tag", payload))?;
    let reader = Reader {
        fields,
        raw: payload,
    };
    match EntityKind::from_tag(tag) {
        Some(EntityKind::Portal) => decode_portal(guid, timestamp_ms, &reader).map(GameEntity::Portal),
        Some(EntityKind::Link) => decode_link(guid, timestamp_ms, &reader).map(GameEntity::Link),
        Some(EntityKind::Field) => decode_field(guid, timestamp_ms, &reader).map(GameEntity::Field),
        None => Err(Error::parse(format!("unknown entity type '{tag}'"), payload)),
    }
}

fn decode_portal(guid: &str, timestamp_ms: i64, r: &Reader<'_>) -> Result<Portal> {
    let (detailed, history_at) = match r.len() {
        SUMMARY_LEN => (false, None),
        n if n == SUMMARY_LEN + 1 => (false, Some(SUMMARY_LEN)),
        DETAIL_LEN => (true, None),
        n if n == DETAIL_LEN + 1 => (true, Some(DETAIL_LEN)),
        n => return Err(r.fail(format!("portal with {n} fields"))),
    };

    let detail = if detailed {
        Some(PortalDetail {
            mods: r.slots(14, decode_mod)?,
            resonators: r.slots(15, decode_resonator)?,
            owner: r.opt_str(16)?,
            artifact_detail: r.opt_value(17),
        })
    } else {
        None
    };

    Ok(Portal {
        guid: guid.to_string(),
        timestamp_ms,
        team: r.team(1)?,
        lat_e6: r.int(2)?,
        lng_e6: r.int(3)?,
        level: r.small(4)?,
        health: r.small(5)?,
        res_count: r.small(6)?,
        image: r.opt_str(7)?,
        title: r.str(8)?.to_string(),
        ornaments: r.strings(9)?,
        mission: r.flag(10)?,
        mission50plus: r.flag(11)?,
        artifact_brief: r.opt_value(12),
        updated_ms: r.int(13)?,
        history: history_at.map(|i| r.bitfield(i)).transpose()?,
        detail,
    })
}

fn decode_link(guid: &str, timestamp_ms: i64, r: &Reader<'_>) -> Result<Link> {
    if r.len() != LINK_LEN {
        return Err(r.fail(format!("link with {} fields", r.len())));
    }
    Ok(Link {
        guid: guid.to_string(),
        timestamp_ms,
        team: r.team(1)?,
        origin: PortalRef {
            guid: r.str(2)?.to_string(),
            lat_e6: r.int(3)?,
            lng_e6: r.int(4)?,
        },
        destination: PortalRef {
            guid: r.str(5)?.to_string(),
            lat_e6: r.int(6)?,
            lng_e6: r.int(7)?,
        },
    })
}

fn decode_field(guid: &str, timestamp_ms: i64, r: &Reader<'_>) -> Result<Field> {
    if r.len() != FIELD_LEN {
        return Err(r.fail(format!("field with {} fields", r.len())));
    }
    let points = r.fields[2]
        .as_array()
        .filter(|points| points.len() == 3)
        .ok_or_else(|| r.fail("field vertices"))?;
    let mut vertices = Vec::with_capacity(3);
    for point in points {
        let triple = Reader {
            fields: point.as_array().ok_or_else(|| r.fail("field vertex"))?,
            raw: r.raw,
        };
        if triple.len() != 3 {
            return Err(r.fail("field vertex"));
        }
        vertices.push(PortalRef {
            guid: triple.str(0)?.to_string(),
            lat_e6: triple.int(1)?,
            lng_e6: triple.int(2)?,
        });
    }
    let vertices: [PortalRef; 3] = vertices
        .try_into()
        .map_err(|_| r.fail("field vertices"))?;

    Ok(Field {
        guid: guid.to_string(),
        timestamp_ms,
        team: r.team(1)?,
        vertices,
    })
}

fn decode_mod(value: &Value) -> Option<Mod> {
    let parts = value.as_array()?;
    let stats = parts
        .get(3)
        .and_then(Value::as_object)
        .map(|stats| {
            stats
                .iter()
                .map(|(k, v)| {
                    let v = v.as_str().map_or_else(|| v.to_string(), ToString::to_string);
                    (k.clone(), v)
                })
                .collect()
        })
        .unwrap_or_default();
    Some(Mod {
        owner: parts.first()?.as_str()?.to_string(),
        name: parts.get(1)?.as_str()?.to_string(),
        rarity: parts.get(2)?.as_str()?.to_string(),
        stats,
    })
}

fn decode_resonator(value: &Value) -> Option<Resonator> {
    let parts = value.as_array()?;
    Some(Resonator {
        owner: parts.first()?.as_str()?.to_string(),
        level: u8::try_from(parts.get(1)?.as_u64()?).ok()?,
        energy: u32::try_from(parts.get(2)?.as_u64()?).ok()?,
    })
}

/// Positional access into a payload array; every failure reports the whole
/// payload.
struct Reader<'a> {
    fields: &'a [Value],
    raw: &'a Value,
}

impl<'a> Reader<'a> {
    fn len(&self) -> usize {
        self.fields.len()
    }

    fn fail(&self, reason: impl Into<String>) -> Error {
        Error::parse(reason, self.raw)
    }

    fn get(&self, index: usize) -> Result<&'a Value> {
        self.fields
            .get(index)
            .ok_or_else(|| self.fail(format!("missing field {index}")))
    }

    fn str(&self, index: usize) -> Result<&'a str> {
        self.get(index)?
            .as_str()
            .ok_or_else(|| self.fail(format!("field {index} is not a string")))
    }

    fn opt_str(&self, index: usize) -> Result<Option<String>> {
        match self.get(index)? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            _ => Err(self.fail(format!("field {index} is not a string"))),
        }
    }

    fn int(&self, index: usize) -> Result<i64> {
        self.get(index)?
            .as_i64()
            .ok_or_else(|| self.fail(format!("field {index} is not an integer")))
    }

    fn small(&self, index: usize) -> Result<u8> {
        let value = self.int(index)?;
        u8::try_from(value).map_err(|_| self.fail(format!("field {index} out of range")))
    }

    fn flag(&self, index: usize) -> Result<bool> {
        match self.get(index)? {
            Value::Bool(b) => Ok(*b),
            Value::Null => Ok(false),
            _ => Err(self.fail(format!("field {index} is not a flag"))),
        }
    }

    fn team(&self, index: usize) -> Result<Team> {
        let code = self.str(index)?;
        Team::from_code(code).ok_or_else(|| self.fail(format!("team '{code}'")))
    }

    fn opt_value(&self, index: usize) -> Option<Value> {
        self.fields.get(index).filter(|v| !v.is_null()).cloned()
    }

    fn strings(&self, index: usize) -> Result<Vec<String>> {
        match self.get(index)? {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(ToString::to_string)
                        .ok_or_else(|| self.fail(format!("field {index} has a non-string entry")))
                })
                .collect(),
            _ => Err(self.fail(format!("field {index} is not a list"))),
        }
    }

    /// A list of nullable slots, e.g. the eight resonator positions.
    fn bitfield(&self, index: usize) -> Result<u64> {
        let raw = self.int(index)?;
        u64::try_from(raw).map_err(|_| self.fail(format!("field {index} is negative ({raw})")))
    }

    fn slots<T>(
        &self,
        index: usize,
        decode: fn(&Value) -> Option<T>,
    ) -> Result<Option<Vec<Option<T>>>> {
        match self.get(index)? {
            Value::Null => Ok(None),
            Value::Array(items) => Ok(Some(items.iter().map(decode).collect())),
            _ => Err(self.fail(format!("field {index} is not a list"))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;

    pub(crate) fn summary_portal(guid: &str, lat_e6: i64, lng_e6: i64) -> Value {
        json!([
            guid,
            1_700_000_000_000i64,
            [
                "p", "E", lat_e6, lng_e6, 7, 100, 8,
                "https://img.example/p.jpg", "Shrine Gate",
                [], false, false, null, 1_699_999_000_000i64, 0
            ]
        ])
    }

    fn detail_payload() -> Value {
        json!([
            "p", "R", 35_600_000, 139_700_000, 8, 92, 8,
            null, "Clock Tower",
            ["sc5_p"], true, true, [], 1_699_999_000_000i64,
            [["agent1", "Portal Shield", "VERY_RARE", {"MITIGATION": "60"}], null, null, null],
            [["agent1", 8, 6000], ["agent2", 7, 5000], null, null, null, null, null, null],
            "agent1",
            [],
            3
        ])
    }

    #[test]
    fn test_summary_portal_has_no_detail() {
        let record = summary_portal("pg1", 35_600_000, 139_700_000);
        let entity = decode_entity(&record).unwrap();
        let GameEntity::Portal(portal) = entity else {
            panic!("expected a portal");
        };
        assert_eq!(portal.guid, "pg1");
        assert_eq!(portal.timestamp_ms, 1_700_000_000_000);
        assert_eq!(portal.team, Team::Enlightened);
        assert_eq!(portal.level, 7);
        assert_eq!(portal.title, "Shrine Gate");
        assert_eq!(portal.artifact_brief, None);
        assert_eq!(portal.history, Some(0));
        assert!(portal.detail.is_none());
    }

    #[test]
    fn test_detail_portal_is_populated() {
        let entity = decode_payload("pg2", DETAIL_TIMESTAMP_MS, &detail_payload()).unwrap();
        let GameEntity::Portal(portal) = entity else {
            panic!("expected a portal");
        };
        assert_eq!(portal.timestamp_ms, -1);
        assert_eq!(portal.image, None);
        assert_eq!(portal.ornaments, vec!["sc5_p".to_string()]);
        assert_eq!(portal.history, Some(3));
        let detail = portal.detail.unwrap();
        assert_eq!(detail.owner.as_deref(), Some("agent1"));
        let mods = detail.mods.unwrap();
        assert_eq!(mods.len(), 4);
        assert_eq!(mods[0].as_ref().unwrap().rarity, "VERY_RARE");
        assert_eq!(mods[0].as_ref().unwrap().stats["MITIGATION"], "60");
        let resonators = detail.resonators.unwrap();
        assert_eq!(resonators.iter().flatten().count(), 2);
        assert_eq!(resonators[1].as_ref().unwrap().level, 7);
        assert_eq!(detail.artifact_detail, Some(json!([])));
    }

    #[test]
    fn test_null_detail_blocks_are_absent_not_empty() {
        let mut payload = detail_payload();
        payload[14] = Value::Null;
        payload[15] = json!([]);
        let GameEntity::Portal(portal) = decode_payload("pg3", DETAIL_TIMESTAMP_MS, &payload).unwrap()
        else {
            panic!("expected a portal");
        };
        let detail = portal.detail.unwrap();
        assert_eq!(detail.mods, None);
        assert_eq!(detail.resonators, Some(Vec::new()));
    }

    #[test]
    fn test_negative_history_is_a_parse_error() {
        let mut payload = detail_payload();
        payload[18] = json!(-4);
        let err = decode_payload("pg4", DETAIL_TIMESTAMP_MS, &payload).unwrap_err();
        assert!(matches!(err, Error::Parse { reason, .. } if reason.contains("negative")));
    }

    #[test]
    fn test_portal_with_unexpected_length_is_rejected() {
        let payload = json!(["p", "E", 1, 2, 3]);
        let err = decode_payload("g", 0, &payload).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_link_decodes_both_endpoints() {
        let record = json!([
            "lg1", 5,
            ["e", "R", "pa", 35_000_000, 139_000_000, "pb", 35_100_000, 139_100_000]
        ]);
        let GameEntity::Link(link) = decode_entity(&record).unwrap() else {
            panic!("expected a link");
        };
        assert_eq!(link.team, Team::Resistance);
        assert_eq!(link.origin.guid, "pa");
        assert_eq!(link.destination.lng_e6, 139_100_000);
    }

    #[test]
    fn test_field_flattens_vertices_in_order() {
        let record = json!([
            "fg1", 6,
            ["r", "N", [["pa", 1, 2], ["pb", 3, 4], ["pc", 5, 6]]]
        ]);
        let GameEntity::Field(field) = decode_entity(&record).unwrap() else {
            panic!("expected a field");
        };
        assert_eq!(field.team, Team::Neutral);
        let guids: Vec<_> = field.vertices.iter().map(|v| v.guid.as_str()).collect();
        assert_eq!(guids, ["pa", "pb", "pc"]);
        assert_eq!(field.vertices[2].lng_e6, 6);
    }

    #[test]
    fn test_unknown_tag_is_a_parse_error() {
        let record = json!(["xg", 1, ["x", "E"]]);
        match decode_entity(&record) {
            Err(Error::Parse { record: raw, .. }) => assert_eq!(raw, json!(["x", "E"])),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_team_is_a_parse_error() {
        let record = json!(["lg", 1, ["e", "Q", "a", 1, 2, "b", 3, 4]]);
        assert!(matches!(decode_entity(&record), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_malformed_record_shape() {
        assert!(decode_entity(&json!(["only-guid"])).is_err());
        assert!(decode_entity(&json!({"guid": "g"})).is_err());
        assert!(decode_entity(&json!(["g", "not-a-ts", ["p"]])).is_err());
    }
}
