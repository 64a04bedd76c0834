use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::entity::{decode_entity, Field, GameEntity, Link, Portal};
use crate::error::Result;
use crate::tiles::TileKey;

/// Decoded contents of one tile, partitioned by entity kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    name: TileKey,
    portals: Vec<Portal>,
    links: Vec<Link>,
    fields: Vec<Field>,
}

impl Tile {
    pub fn empty(name: TileKey) -> Self {
        Self {
            name,
            portals: Vec::new(),
            links: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn from_entities(name: TileKey, entities: impl IntoIterator<Item = GameEntity>) -> Self {
        let mut tile = Self::empty(name);
        for entity in entities {
            match entity {
                GameEntity::Portal(p) => tile.portals.push(p),
                GameEntity::Link(l) => tile.links.push(l),
                GameEntity::Field(f) => tile.fields.push(f),
            }
        }
        tile
    }

    /// Decodes a tile's `gameEntities` list. One bad record fails the tile.
    pub fn decode(name: TileKey, raw_entities: &[Value]) -> Result<Self> {
        let entities = raw_entities
            .iter()
            .map(decode_entity)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_entities(name, entities))
    }

    pub fn name(&self) -> &TileKey {
        &self.name
    }

    pub fn portals(&self) -> &[Portal] {
        &self.portals
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Portals, then links, then fields.
    pub fn entities(&self) -> Vec<GameEntity> {
        self.portals
            .iter()
            .cloned()
            .map(GameEntity::Portal)
            .chain(self.links.iter().cloned().map(GameEntity::Link))
            .chain(self.fields.iter().cloned().map(GameEntity::Field))
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.portals.len() + self.links.len() + self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count() == 0
    }
}

/// Result of a tile fetch: resolved tiles in insertion order plus the keys
/// that never resolved. A key is never in both.
#[derive(Debug, Clone, Default)]
pub struct TileSet {
    tiles: Vec<Tile>,
    index: HashMap<TileKey, usize>,
    unresolved: BTreeSet<TileKey>,
}

impl TileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set where every key starts out unresolved.
    pub fn pending(keys: impl IntoIterator<Item = TileKey>) -> Self {
        Self {
            unresolved: keys.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Inserts or replaces a tile and clears its key from the unresolved set.
    /// A replaced tile keeps its original position.
    pub fn add(&mut self, tile: Tile) {
        self.unresolved.remove(tile.name());
        match self.index.get(tile.name()) {
            Some(&slot) => self.tiles[slot] = tile,
            None => {
                self.index.insert(tile.name().clone(), self.tiles.len());
                self.tiles.push(tile);
            }
        }
    }

    pub fn remove(&mut self, key: &TileKey) -> Option<Tile> {
        self.unresolved.remove(key);
        let slot = self.index.remove(key)?;
        let tile = self.tiles.remove(slot);
        for position in self.index.values_mut() {
            if *position > slot {
                *position -= 1;
            }
        }
        Some(tile)
    }

    /// The tile stored under `key`, or an empty one if the key never resolved.
    pub fn get(&self, key: &TileKey) -> Cow<'_, Tile> {
        match self.index.get(key) {
            Some(&slot) => Cow::Borrowed(&self.tiles[slot]),
            None => Cow::Owned(Tile::empty(key.clone())),
        }
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> + '_ {
        self.tiles.iter()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &TileKey> + '_ {
        self.unresolved.iter()
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn portals(&self) -> impl Iterator<Item = &Portal> + '_ {
        self.tiles.iter().flat_map(|t| t.portals.iter())
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> + '_ {
        self.tiles.iter().flat_map(|t| t.links.iter())
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> + '_ {
        self.tiles.iter().flat_map(|t| t.fields.iter())
    }
}
