pub mod data_file;
pub mod entry;

pub use data_file::{file_name, DataFile};
pub use entry::{DataType, Entry, HashMark, Meta, DATA_TYPE_COUNT, ENTRY_HEADER_SIZE};

use crate::config::RwMethod;
use crate::error::{EmberError, EmberResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Segment files found on disk, grouped by data type. Vectors are indexed by
/// [`DataType::index`]. The archived map never contains the active id.
pub struct BuiltFiles {
    pub archived: Vec<BTreeMap<u32, DataFile>>,
    pub active_ids: Vec<u32>,
}

/// Scans the data directory for segment files, groups them by type and sorts
/// ids ascending. The highest id per type becomes the active segment; the
/// rest are opened as archived files. A type with no files on disk gets
/// active id 0 and an empty archived set.
pub fn build(dir: &Path, method: RwMethod, block_size: u64) -> EmberResult<BuiltFiles> {
    let mut ids: Vec<Vec<u32>> = vec![Vec::new(); DATA_TYPE_COUNT];

    for dir_entry in fs::read_dir(dir).map_err(|e| EmberError::io(dir, e))? {
        let dir_entry = dir_entry.map_err(|e| EmberError::io(dir, e))?;
        let name = dir_entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.contains(".data") {
            continue;
        }

        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() != 3 || parts[1] != "data" {
            warn!(file = name, "ignoring unrecognized file in data directory");
            continue;
        }
        let Ok(id) = parts[0].parse::<u32>() else {
            warn!(file = name, "ignoring data file with invalid id");
            continue;
        };
        match DataType::ALL.iter().find(|t| t.suffix() == parts[2]) {
            Some(data_type) => ids[data_type.index()].push(id),
            None => warn!(file = name, "ignoring data file with unknown suffix"),
        }
    }

    let mut archived = Vec::with_capacity(DATA_TYPE_COUNT);
    let mut active_ids = Vec::with_capacity(DATA_TYPE_COUNT);
    for data_type in DataType::ALL {
        let type_ids = &mut ids[data_type.index()];
        type_ids.sort_unstable();

        let active_id = type_ids.last().copied().unwrap_or(0);
        let mut files = BTreeMap::new();
        for &id in type_ids.iter().take(type_ids.len().saturating_sub(1)) {
            files.insert(id, DataFile::open(dir, id, method, block_size, data_type)?);
        }
        archived.push(files);
        active_ids.push(active_id);
    }

    Ok(BuiltFiles {
        archived,
        active_ids,
    })
}
