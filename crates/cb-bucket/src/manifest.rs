//! Collections manifest (spec §4.4 supplement): maps `(scope, collection)`
//! names to the 32-bit ids the wire protocol actually routes key/value
//! frames on. Fetched once per bucket via `GET_COLLECTIONS_MANIFEST` and
//! re-fetched whenever a session reports `UNKNOWN_COLLECTION`/
//! `NOT_MY_COLLECTION`.

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

fn hex_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let raw = String::deserialize(d)?;
    u32::from_str_radix(raw.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}

fn hex_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let raw = String::deserialize(d)?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
struct WireCollection {
    name: String,
    #[serde(deserialize_with = "hex_u32")]
    uid: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct WireScope {
    name: String,
    collections: Vec<WireCollection>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireManifest {
    #[serde(deserialize_with = "hex_u64")]
    uid: u64,
    scopes: Vec<WireScope>,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionsManifest {
    uid: u64,
    ids: HashMap<(String, String), u32>,
}

impl CollectionsManifest {
    pub fn parse(body: &[u8]) -> serde_json::Result<Self> {
        let wire: WireManifest = serde_json::from_slice(body)?;
        let mut ids = HashMap::new();
        for scope in wire.scopes {
            for collection in scope.collections {
                ids.insert((scope.name.clone(), collection.name), collection.uid);
            }
        }
        Ok(Self { uid: wire.uid, ids })
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn collection_id(&self, scope: &str, collection: &str) -> Option<u32> {
        self.ids.get(&(scope.to_string(), collection.to_string())).copied()
    }
}
