//! Barrel identity and bounds.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::DocId;
use crate::error::{QuiverError, Result};

/// Collection identifier; each collection has its own base document id.
pub type CollectionId = u32;

/// Encoding of a barrel's posting streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CompressionKind {
    #[default]
    Varbyte,
}

impl CompressionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionKind::Varbyte => "varbyte",
        }
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionKind {
    type Err = QuiverError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "varbyte" => Ok(CompressionKind::Varbyte),
            other => Err(QuiverError::barrel(format!(
                "unknown compression kind: {other}"
            ))),
        }
    }
}

/// Metadata of one barrel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrelInfo {
    pub name: String,
    /// First document id of every collection stored in the barrel.
    pub base_doc_ids: BTreeMap<CollectionId, DocId>,
    pub doc_count: u32,
    pub max_doc_id: DocId,
    /// Whether the barrel holds updates of documents from older barrels.
    pub is_update: bool,
    pub searchable: bool,
    /// Whether the barrel still lives only in memory.
    pub in_memory: bool,
    pub compression: CompressionKind,
}

impl BarrelInfo {
    /// A fresh, empty in-memory barrel.
    pub fn new(name: impl Into<String>) -> Self {
        BarrelInfo {
            name: name.into(),
            base_doc_ids: BTreeMap::new(),
            doc_count: 0,
            max_doc_id: 0,
            is_update: false,
            searchable: true,
            in_memory: true,
            compression: CompressionKind::Varbyte,
        }
    }

    /// Smallest base document id over all collections.
    pub fn base_doc_id(&self) -> DocId {
        self.base_doc_ids.values().copied().min().unwrap_or(0)
    }

    /// Account for one more document of `collection`.
    pub fn record_document(&mut self, collection: CollectionId, doc_id: DocId) {
        self.base_doc_ids.entry(collection).or_insert(doc_id);
        if self.doc_count == 0 || doc_id > self.max_doc_id {
            self.max_doc_id = doc_id;
        }
        self.doc_count += 1;
    }

    /// Check that no base document id exceeds the maximum one.
    pub fn validate(&self) -> Result<()> {
        if let Some((collection, base)) = self
            .base_doc_ids
            .iter()
            .find(|&(_, &base)| base > self.max_doc_id)
        {
            return Err(QuiverError::barrel(format!(
                "barrel {}: base doc id {base} of collection {collection} exceeds max doc id {}",
                self.name, self.max_doc_id
            )));
        }
        Ok(())
    }

    /// Encode the base document ids as `collection:base` pairs.
    pub fn doc_begin_string(&self) -> String {
        self.base_doc_ids
            .iter()
            .map(|(collection, base)| format!("{collection}:{base}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse the output of [`BarrelInfo::doc_begin_string`].
    pub fn parse_doc_begin(value: &str) -> Result<BTreeMap<CollectionId, DocId>> {
        let mut map = BTreeMap::new();
        for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (collection, base) = pair
                .split_once(':')
                .ok_or_else(|| QuiverError::barrel(format!("malformed doc_begin entry: {pair}")))?;
            let collection = collection
                .parse()
                .map_err(|e| QuiverError::barrel(format!("bad collection id {collection}: {e}")))?;
            let base = base
                .parse()
                .map_err(|e| QuiverError::barrel(format!("bad base doc id {base}: {e}")))?;
            map.insert(collection, base);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_documents() {
        let mut info = BarrelInfo::new("_0");
        assert_eq!(info.base_doc_id(), 0);

        info.record_document(1, 40);
        info.record_document(0, 42);
        info.record_document(1, 45);

        assert_eq!(info.doc_count, 3);
        assert_eq!(info.max_doc_id, 45);
        assert_eq!(info.base_doc_id(), 40);
        assert_eq!(info.doc_begin_string(), "0:42,1:40");
        info.validate().unwrap();
    }

    #[test]
    fn test_doc_begin_round_trip() {
        let map = BarrelInfo::parse_doc_begin("0:42, 1:40").unwrap();
        assert_eq!(map.get(&0), Some(&42));
        assert_eq!(map.get(&1), Some(&40));
        assert!(BarrelInfo::parse_doc_begin("").unwrap().is_empty());
        assert!(BarrelInfo::parse_doc_begin("0-42").is_err());
        assert!(BarrelInfo::parse_doc_begin("x:1").is_err());
    }

    #[test]
    fn test_base_above_max_is_invalid() {
        let mut info = BarrelInfo::new("_1");
        info.base_doc_ids.insert(0, 10);
        info.max_doc_id = 5;
        assert!(matches!(info.validate(), Err(QuiverError::Barrel(_))));
    }

    #[test]
    fn test_compression_kind() {
        assert_eq!("varbyte".parse::<CompressionKind>().unwrap(), CompressionKind::Varbyte);
        assert_eq!(CompressionKind::Varbyte.to_string(), "varbyte");
        assert!("lz4".parse::<CompressionKind>().is_err());
    }
}
