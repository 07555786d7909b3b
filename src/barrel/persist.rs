//! XML persistence of the barrel registry.
//!
//! The registry is written to `barrels.tmp` and renamed over `barrels`, so a
//! crash leaves either the previous or the new file in place, never a torn
//! one. A leftover `barrels.tmp` is ignored and removed on open.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::DocId;
use crate::barrel::info::{BarrelInfo, CompressionKind};
use crate::error::{QuiverError, Result};
use crate::storage::Storage;

/// Registry file name.
pub const REGISTRY_FILE: &str = "barrels";

/// Temporary file the registry is written to before the rename.
pub const REGISTRY_TEMP_FILE: &str = "barrels.tmp";

/// Current metadata format version.
pub const FORMAT_VERSION: u32 = 1;

/// Registry state that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedRegistry {
    pub barrel_counter: u64,
    pub max_doc: DocId,
    pub barrels: Vec<BarrelInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "barrels_info")]
struct BarrelsDocument {
    version: u32,
    barrel_counter: u64,
    barrel_count: u32,
    maxdoc: DocId,
    #[serde(default)]
    barrels: BarrelList,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BarrelList {
    #[serde(rename = "barrel", default)]
    barrel: Vec<BarrelElement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BarrelElement {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@doc_begin")]
    doc_begin: String,
    #[serde(rename = "@doc_count")]
    doc_count: u32,
    #[serde(rename = "@max_doc")]
    max_doc: DocId,
    #[serde(rename = "@is_update")]
    is_update: bool,
    #[serde(rename = "@searchable")]
    searchable: bool,
    #[serde(rename = "@is_in_memory_barrel")]
    is_in_memory_barrel: bool,
    #[serde(rename = "@compress")]
    compress: String,
}

impl From<&BarrelInfo> for BarrelElement {
    fn from(info: &BarrelInfo) -> Self {
        BarrelElement {
            name: info.name.clone(),
            doc_begin: info.doc_begin_string(),
            doc_count: info.doc_count,
            max_doc: info.max_doc_id,
            is_update: info.is_update,
            searchable: info.searchable,
            is_in_memory_barrel: info.in_memory,
            compress: info.compression.to_string(),
        }
    }
}

impl TryFrom<BarrelElement> for BarrelInfo {
    type Error = QuiverError;

    fn try_from(element: BarrelElement) -> Result<Self> {
        let info = BarrelInfo {
            base_doc_ids: BarrelInfo::parse_doc_begin(&element.doc_begin)?,
            name: element.name,
            doc_count: element.doc_count,
            max_doc_id: element.max_doc,
            is_update: element.is_update,
            searchable: element.searchable,
            in_memory: element.is_in_memory_barrel,
            compression: element.compress.parse::<CompressionKind>()?,
        };
        info.validate()?;
        Ok(info)
    }
}

/// Render the registry as XML.
pub fn to_xml(registry: &PersistedRegistry) -> Result<String> {
    let document = BarrelsDocument {
        version: FORMAT_VERSION,
        barrel_counter: registry.barrel_counter,
        barrel_count: registry.barrels.len() as u32,
        maxdoc: registry.max_doc,
        barrels: BarrelList {
            barrel: registry.barrels.iter().map(BarrelElement::from).collect(),
        },
    };

    quick_xml::se::to_string(&document).map_err(|e| QuiverError::xml(e.to_string()))
}

/// Parse XML produced by [`to_xml`].
pub fn from_xml(xml: &str) -> Result<PersistedRegistry> {
    let document: BarrelsDocument =
        quick_xml::de::from_str(xml).map_err(|e| QuiverError::xml(e.to_string()))?;

    if document.version > FORMAT_VERSION {
        return Err(QuiverError::xml(format!(
            "unsupported barrel metadata version {}",
            document.version
        )));
    }
    if document.barrel_count as usize != document.barrels.barrel.len() {
        return Err(QuiverError::xml(format!(
            "barrel_count {} disagrees with {} listed barrels",
            document.barrel_count,
            document.barrels.barrel.len()
        )));
    }

    let barrels = document
        .barrels
        .barrel
        .into_iter()
        .map(BarrelInfo::try_from)
        .collect::<Result<Vec<_>>>()?;

    Ok(PersistedRegistry {
        barrel_counter: document.barrel_counter,
        max_doc: document.maxdoc,
        barrels,
    })
}

/// Write the registry through the temporary file and rename it into place.
pub fn save(storage: &dyn Storage, registry: &PersistedRegistry) -> Result<()> {
    let xml = to_xml(registry)?;

    let mut output = storage.create_output(REGISTRY_TEMP_FILE)?;
    output.write_all(xml.as_bytes())?;
    output.flush_and_sync()?;
    output.close()?;
    storage.rename_file(REGISTRY_TEMP_FILE, REGISTRY_FILE)?;

    debug!(barrels = registry.barrels.len(), bytes = xml.len(), "saved barrel registry");
    Ok(())
}

/// Load the registry, or `None` when it has never been saved.
pub fn load(storage: &dyn Storage) -> Result<Option<PersistedRegistry>> {
    if !storage.file_exists(REGISTRY_FILE) {
        return Ok(None);
    }

    let mut input = storage.open_input(REGISTRY_FILE)?;
    let mut xml = String::new();
    input.read_to_string(&mut xml)?;
    from_xml(&xml).map(Some)
}
