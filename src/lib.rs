pub mod api;
pub mod backoff;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod paginator;
pub mod session;
pub mod tiles;
pub mod tileset;
pub mod transport;

pub use api::{IntelApi, IntelApiBuilder};
pub use client::Client;
pub use config::{ClientConfig, ConfigLoader};
pub use entity::{Field, GameEntity, Link, Plext, Portal, Team};
pub use error::{Error, Result};
pub use paginator::{CommTab, Direction, Paginator, PlextQuery, TimeBound};
pub use tiles::{BoundingRegion, TileKey};
pub use tileset::{Tile, TileSet};
pub use transport::{Transport, TransportError};
