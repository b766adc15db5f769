//! Saving and restoring the page table in the session database.
//!
//! The table is stored as an array under [`TRACE_RECORD_KEY`]:
//!
//! ```json
//! { "tracerecord": [ { "module": "app.exe", "rva": "0x1000", "type": "0x2", "data": "0102..." } ] }
//! ```
//!
//! Pages with no module store `"module": ""` and their raw page address as `rva`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::layout::{PageData, PageLayout};
use crate::module::{NO_MODULE, PageKey};
use crate::table::{PageTable, TracedPage};

/// Key of the page table section in the session database.
pub const TRACE_RECORD_KEY: &str = "tracerecord";

/// Binary-to-text encoding for page buffers.
pub trait TextCodec {
    fn encode(&self, bytes: &[u8]) -> String;
    fn decode(&self, text: &str) -> Option<Vec<u8>>;
}

/// Upper-case hexadecimal.
#[derive(Clone, Copy, Debug, Default)]
pub struct HexCodec;

impl TextCodec for HexCodec {
    fn encode(&self, bytes: &[u8]) -> String {
        hex::encode_upper(bytes)
    }

    fn decode(&self, text: &str) -> Option<Vec<u8>> {
        hex::decode(text).ok()
    }
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("malformed {TRACE_RECORD_KEY} section: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad page entry {module}+{rva:#x}: {reason}")]
    BadEntry {
        module: String,
        rva: u64,
        reason: &'static str,
    },
}

#[derive(Serialize, Deserialize)]
struct PageEntry {
    module: String,
    #[serde(with = "hex_u64")]
    rva: u64,
    #[serde(rename = "type", with = "hex_u64")]
    layout: u64,
    data: String,
}

mod hex_u64 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{value:#X}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let text = String::deserialize(d)?;
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(&text);
        u64::from_str_radix(digits, 16).map_err(D::Error::custom)
    }
}

impl PageTable {
    /// Write every armed page into `root`. Nothing is written for an empty table.
    pub fn save(&self, root: &mut Map<String, Value>, codec: &dyn TextCodec) -> Result<(), PersistError> {
        let inner = self.inner.read();
        if inner.pages.is_empty() {
            return Ok(());
        }

        let mut entries: Vec<(PageKey, PageEntry)> = inner
            .pages
            .iter()
            .map(|(key, page)| {
                let data = page.data.lock();
                let entry = match inner.modules.get(page.module_index) {
                    Some(name) if page.module_index != NO_MODULE => PageEntry {
                        module: name.to_string(),
                        rva: page.rva,
                        layout: u64::from(data.layout().tag()),
                        data: codec.encode(&data.to_bytes()),
                    },
                    _ => PageEntry {
                        module: String::new(),
                        rva: key.0,
                        layout: u64::from(data.layout().tag()),
                        data: codec.encode(&data.to_bytes()),
                    },
                };
                (*key, entry)
            })
            .collect();
        entries.sort_by_key(|(key, _)| *key);

        let entries: Vec<PageEntry> = entries.into_iter().map(|(_, e)| e).collect();
        let count = entries.len();
        root.insert(TRACE_RECORD_KEY.to_string(), serde_json::to_value(entries)?);
        debug!(pages = count, "saved page table");
        Ok(())
    }

    /// Replace the table with the pages stored in `root`.
    ///
    /// Entries with an unknown layout, undecodable data or a data length that
    /// does not match their layout are skipped. Returns the number of pages
    /// restored.
    pub fn load(&self, root: &Map<String, Value>, codec: &dyn TextCodec) -> Result<usize, PersistError> {
        let mut inner = self.inner.write();
        inner.clear();

        let Some(section) = root.get(TRACE_RECORD_KEY) else {
            return Ok(0);
        };
        let values: Vec<Value> = serde_json::from_value(section.clone())?;

        for value in values {
            let entry: PageEntry = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping malformed page entry");
                    continue;
                }
            };
            let (layout, data) = match decode_entry(&entry, codec) {
                Ok(decoded) => decoded,
                Err(err) => {
                    warn!(error = %err, "skipping page entry");
                    continue;
                }
            };

            let (key, module_index) = if entry.module.is_empty() {
                (PageKey::raw(entry.rva), NO_MODULE)
            } else {
                let hash = self.resolver().module_hash(&entry.module);
                (
                    PageKey::in_module(hash, entry.rva),
                    inner.modules.intern(&entry.module),
                )
            };
            debug_assert_eq!(data.layout(), layout);
            inner.pages.insert(
                key,
                TracedPage {
                    data: Mutex::new(data),
                    module_index,
                    rva: entry.rva,
                },
            );
        }

        let count = inner.pages.len();
        debug!(pages = count, "loaded page table");
        Ok(count)
    }
}

fn decode_entry(entry: &PageEntry, codec: &dyn TextCodec) -> Result<(PageLayout, PageData), PersistError> {
    let bad = |reason| PersistError::BadEntry {
        module: entry.module.clone(),
        rva: entry.rva,
        reason,
    };
    let layout = u8::try_from(entry.layout)
        .ok()
        .and_then(|tag| PageLayout::try_from(tag).ok())
        .ok_or_else(|| bad("unknown layout"))?;
    let bytes = codec.decode(&entry.data).ok_or_else(|| bad("undecodable data"))?;
    let data = PageData::from_bytes(layout, &bytes).ok_or_else(|| bad("data size does not match layout"))?;
    Ok((layout, data))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::module::{ModuleResolver, NoModules};
    use crate::{ByteClass, PAGE_SIZE};

    struct AppModule {
        base: u64,
    }

    impl ModuleResolver for AppModule {
        fn module_name(&self, addr: u64) -> Option<String> {
            (self.base..self.base + 0x10_0000)
                .contains(&addr)
                .then(|| "app.exe".to_string())
        }

        fn module_base(&self, addr: u64) -> Option<u64> {
            (self.base..self.base + 0x10_0000)
                .contains(&addr)
                .then_some(self.base)
        }
    }

    #[test]
    fn test_save_format() {
        let table = PageTable::new(AppModule { base: 0x40_0000 });
        table.arm(0x40_1000, Some(PageLayout::ByteCounter)).unwrap();
        table.arm(0x7000_0000, Some(PageLayout::BitExec)).unwrap();
        table.record_execution(0x40_1000, 1);

        let mut root = Map::new();
        table.save(&mut root, &HexCodec).unwrap();
        let entries = root[TRACE_RECORD_KEY].as_array().unwrap();
        assert_eq!(entries.len(), 2);

        let app = entries.iter().find(|e| e["module"] == "app.exe").unwrap();
        assert_eq!(app["rva"], "0x1000");
        assert_eq!(app["type"], "0x2");
        let data = app["data"].as_str().unwrap();
        assert_eq!(data.len(), PAGE_SIZE * 2);
        assert!(data.starts_with("4100"));

        let raw = entries.iter().find(|e| e["module"] == "").unwrap();
        assert_eq!(raw["rva"], "0x70000000");
        assert_eq!(raw["type"], "0x1");
    }

    #[test]
    fn test_save_empty_table_writes_nothing() {
        let table = PageTable::new(NoModules);
        let mut root = Map::new();
        table.save(&mut root, &HexCodec).unwrap();
        assert!(root.is_empty());
    }

    #[test]
    fn test_round_trip_across_rebase() {
        let table = PageTable::new(AppModule { base: 0x40_0000 });
        table.arm(0x40_2000, Some(PageLayout::WordCounter)).unwrap();
        table.arm(0x6000_0000, Some(PageLayout::BitExec)).unwrap();
        table.record_execution(0x40_2010, 3);
        table.record_execution(0x40_2010, 3);
        table.record_execution(0x6000_0004, 2);

        let mut root = Map::new();
        table.save(&mut root, &HexCodec).unwrap();

        // The module loads at a different base in the next session.
        let restored = PageTable::new(AppModule { base: 0x1_4000_0000 });
        assert_eq!(restored.load(&root, &HexCodec).unwrap(), 2);
        assert_eq!(restored.layout_of(0x1_4000_2000), Some(PageLayout::WordCounter));
        assert_eq!(restored.hit_count(0x1_4000_2011), 2);
        assert_eq!(restored.byte_type(0x1_4000_2011), ByteClass::Overlapped);
        assert!(restored.is_executed(0x6000_0005));
        let pages = restored.pages();
        let app = pages
            .iter()
            .find(|p| p.layout == PageLayout::WordCounter)
            .unwrap();
        assert_eq!(app.module, "app.exe");
        assert_eq!(app.rva, 0x2000);
    }

    #[test]
    fn test_load_drops_mismatched_entries() {
        let root = json!({
            "tracerecord": [
                { "module": "", "rva": "0x1000", "type": "0x2", "data": "00" },
                { "module": "", "rva": "0x2000", "type": "0x9", "data": "" },
                { "module": "", "rva": "0x3000", "type": "0x1", "data": "zz" },
                { "module": "", "rva": 12 },
                { "module": "", "rva": "0x4000", "type": "0x1", "data": "00".repeat(512) }
            ]
        });
        let table = PageTable::new(NoModules);
        table.arm(0x9000, Some(PageLayout::BitExec)).unwrap();
        let loaded = table
            .load(root.as_object().unwrap(), &HexCodec)
            .unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(table.layout_of(0x4000), Some(PageLayout::BitExec));
        // Loading replaces what was armed before.
        assert_eq!(table.layout_of(0x9000), None);
    }

    #[test]
    fn test_load_rejects_non_array_section() {
        let root = json!({ "tracerecord": "nope" });
        let table = PageTable::new(NoModules);
        let err = table.load(root.as_object().unwrap(), &HexCodec).unwrap_err();
        assert!(matches!(err, PersistError::Json(_)));
    }
}
