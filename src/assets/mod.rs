//! Byte-oriented asset access.
//!
//! The archive container (MPQ) is an external collaborator; the engine
//! only consumes named virtual paths. Paths are case-insensitive and
//! backslash-separated; [`normalize_path`] is the single place that
//! canonicalizes them.
//!
//! Implementations must be safe for concurrent `read` calls: the tile
//! streamer's worker pool reads terrain, model and texture assets in
//! parallel.

use crate::error::{EngineError, EngineResult};
use crate::parse::dbc::{parse_table, Table};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Canonical form of a virtual path: lowercase, backslash separators.
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for ch in path.chars() {
        match ch {
            '/' => out.push('\\'),
            c => out.extend(c.to_lowercase()),
        }
    }
    out
}

/// Stable 64-bit id for a virtual path, used to key uploaded models
/// and textures. A CRC of the normalized form, so spelling variants of
/// the same path collapse to one id and ids survive across sessions
/// (the floor cache stores them on disk).
pub fn asset_id(path: &str) -> u64 {
    crc32fast::hash(normalize_path(path).as_bytes()) as u64
}

/// Read access to the archive set.
pub trait AssetSource: Send + Sync {
    /// Read a file; `None` means absent (including empty reads).
    fn read(&self, path: &str) -> Option<Vec<u8>>;

    fn exists(&self, path: &str) -> bool {
        self.read(path).is_some()
    }

    /// Open a client database table by name (e.g. `AreaTable`).
    fn open_table(&self, name: &str) -> EngineResult<Table> {
        let path = format!("DBFilesClient\\{name}.dbc");
        let bytes = self.read(&path).ok_or(EngineError::MissingAsset {
            path: path.clone(),
        })?;
        parse_table(&bytes).map_err(|e| e.at(&path))
    }
}

/// In-memory archive used by tests and tooling.
#[derive(Default)]
pub struct MemoryArchive {
    files: RwLock<FxHashMap<String, Vec<u8>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, bytes: Vec<u8>) {
        self.files.write().insert(normalize_path(path), bytes);
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl AssetSource for MemoryArchive {
    fn read(&self, path: &str) -> Option<Vec<u8>> {
        let files = self.files.read();
        let bytes = files.get(&normalize_path(path))?;
        if bytes.is_empty() {
            // Empty reads surface as "file absent" per the error policy.
            return None;
        }
        Some(bytes.clone())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.read().contains_key(&normalize_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_case_and_separator_insensitive() {
        let archive = MemoryArchive::new();
        archive.insert("World\\Maps\\Azeroth\\Azeroth_32_48.adt", vec![1, 2, 3]);
        assert!(archive.exists("world/maps/azeroth/AZEROTH_32_48.ADT"));
        assert_eq!(
            archive.read("WORLD\\MAPS\\azeroth\\azeroth_32_48.adt"),
            Some(vec![1, 2, 3])
        );
    }

    #[test]
    fn asset_id_collapses_spelling_variants() {
        assert_eq!(
            asset_id("World/Maps/Azeroth/x.adt"),
            asset_id("WORLD\\MAPS\\AZEROTH\\X.ADT")
        );
        assert_ne!(asset_id("a.blp"), asset_id("b.blp"));
    }

    #[test]
    fn asset_id_is_stable_across_sessions() {
        // Pinned: ids are persisted by the floor cache, so the hash
        // must not change between builds.
        assert_eq!(asset_id("a.blp"), 0xf083_3b34);
        assert_eq!(asset_id("World/Maps/Azeroth/x.adt"), 0x1f62_d63d);
    }

    #[test]
    fn empty_bytes_read_as_absent() {
        let archive = MemoryArchive::new();
        archive.insert("empty.blp", vec![]);
        assert!(archive.exists("empty.blp"));
        assert_eq!(archive.read("empty.blp"), None);
    }
}
