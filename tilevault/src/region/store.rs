//! Durable registry of offline regions.
//!
//! Each region is persisted as one JSON record under the store's root
//! directory. Writes go through a temporary file followed by a rename, so a
//! crash mid-write never leaves a partially-written record behind.

use std::fs;
use std::path::{Path, PathBuf};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::{Region, RegionDefinition};
use crate::error::{Error, Result};

/// File extension for persisted region records.
const RECORD_EXT: &str = "json";

/// Durable registry of named offline regions.
///
/// Region ids map one-to-one to record files. The in-memory map is the
/// source of truth while the process runs; the directory is reloaded on
/// construction. Mutations take the map's per-id entry guard, giving at
/// most one writer per region id at a time.
#[derive(Debug)]
pub struct RegionStore {
    root: PathBuf,
    regions: DashMap<String, Region>,
}

impl RegionStore {
    /// Open a store rooted at `root`, creating the directory if needed and
    /// loading any persisted region records.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let regions = DashMap::new();
        for entry in fs::read_dir(&root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            match Self::load_record(&path) {
                Ok(region) => {
                    debug!(id = %region.id, "loaded region record");
                    regions.insert(region.id.clone(), region);
                }
                Err(e) => {
                    // A malformed record is skipped, not fatal: it may be a
                    // leftover from a partial delete.
                    warn!(path = %path.display(), error = %e, "skipping unreadable region record");
                }
            }
        }

        info!(root = %root.display(), count = regions.len(), "region store opened");
        Ok(Self { root, regions })
    }

    fn load_record(path: &Path) -> Result<Region> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.{}", id, RECORD_EXT))
    }

    /// Validate and persist a new region.
    ///
    /// Fails with [`Error::Validation`] for malformed definitions or a
    /// duplicate id. The record file is written atomically before the
    /// definition becomes visible to readers.
    pub fn define(&self, definition: RegionDefinition) -> Result<Region> {
        definition.validate()?;
        let region: Region = definition.into();

        match self.regions.entry(region.id.clone()) {
            Entry::Occupied(_) => Err(Error::validation(format!(
                "region '{}' is already defined",
                region.id
            ))),
            Entry::Vacant(slot) => {
                self.write_record(&region)?;
                debug!(id = %region.id, "region defined");
                slot.insert(region.clone());
                Ok(region)
            }
        }
    }

    /// Atomic per-region write: serialize to a sibling temp file, then
    /// rename over the final path.
    fn write_record(&self, region: &Region) -> Result<()> {
        let path = self.record_path(&region.id);
        let tmp = path.with_extension("tmp");
        let data = serde_json::to_vec_pretty(region)?;
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Look up a region by id.
    pub fn get(&self, id: &str) -> Result<Region> {
        self.regions
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// True if a region with the given id is defined.
    pub fn contains(&self, id: &str) -> bool {
        self.regions.contains_key(id)
    }

    /// Remove a region and its record file.
    pub fn remove(&self, id: &str) -> Result<()> {
        match self.regions.entry(id.to_string()) {
            Entry::Occupied(slot) => {
                let path = self.record_path(id);
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    // The map entry is authoritative; a missing file just
                    // means the record never hit disk or was already gone.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                slot.remove();
                debug!(id, "region removed");
                Ok(())
            }
            Entry::Vacant(_) => Err(Error::NotFound(id.to_string())),
        }
    }

    /// Remove every region and its backing file.
    pub fn clear_all(&self) -> Result<()> {
        let ids: Vec<String> = self.regions.iter().map(|r| r.key().clone()).collect();
        for id in ids {
            match self.remove(&id) {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!("region store cleared");
        Ok(())
    }

    /// Number of defined regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// True if no regions are defined.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::test_support::rectangle_definition;

    fn temp_store() -> (tempfile::TempDir, RegionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RegionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_define_and_get() {
        let (_dir, store) = temp_store();
        let region = store.define(rectangle_definition("nantes")).unwrap();
        assert_eq!(region.id, "nantes");
        assert_eq!(store.get("nantes").unwrap(), region);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (_dir, store) = temp_store();
        store.define(rectangle_definition("nantes")).unwrap();
        let err = store.define(rectangle_definition("nantes")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("already defined"));
    }

    #[test]
    fn test_get_unknown_fails() {
        let (_dir, store) = temp_store();
        assert!(matches!(store.get("missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_remove() {
        let (_dir, store) = temp_store();
        store.define(rectangle_definition("nantes")).unwrap();
        store.remove("nantes").unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.remove("nantes"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RegionStore::open(dir.path()).unwrap();
            store.define(rectangle_definition("nantes")).unwrap();
            store.define(rectangle_definition("rennes")).unwrap();
        }
        let store = RegionStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.contains("nantes"));
        assert!(store.contains("rennes"));
    }

    #[test]
    fn test_invalid_definition_leaves_no_record() {
        let (dir, store) = temp_store();
        let def = rectangle_definition("bad").with_pixel_ratio(-1.0);
        assert!(store.define(def).is_err());
        assert!(store.is_empty());
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(files.is_empty());
    }

    #[test]
    fn test_clear_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegionStore::open(dir.path()).unwrap();
        store.define(rectangle_definition("a")).unwrap();
        store.define(rectangle_definition("b")).unwrap();
        store.clear_all().unwrap();
        assert!(store.is_empty());

        // Backing files released too.
        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_unreadable_record_skipped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RegionStore::open(dir.path()).unwrap();
            store.define(rectangle_definition("good")).unwrap();
        }
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        let store = RegionStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.contains("good"));
    }
}
