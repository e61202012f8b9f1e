use super::{Db, TypeState};
use crate::config::Config;
use crate::error::{EmberError, EmberResult};
use crate::hash::HashStore;
use crate::index::Indexer;
use crate::storage::entry::{unix_now_secs, DataType, Entry, HashMark};
use crate::storage::DataFile;
use std::collections::HashMap;
use std::io;
use tracing::{error, trace};

impl Db {
    /// Replays all segment files to rebuild the in-memory indexes and
    /// expiration tables, one worker per data type. Replay errors are fatal:
    /// the engine refuses to open rather than silently truncate.
    pub(crate) fn load_indexes(&self) -> EmberResult<()> {
        std::thread::scope(|scope| {
            let mut workers = Vec::with_capacity(DataType::ALL.len());
            for data_type in DataType::ALL {
                workers.push(scope.spawn(move || self.load_type(data_type)));
            }
            // The join is the barrier: the engine only opens once every
            // type's replay has finished.
            for worker in workers {
                worker.join().map_err(|_| {
                    EmberError::io(
                        &self.config.dir_path,
                        io::Error::new(io::ErrorKind::Other, "recovery worker panicked"),
                    )
                })??;
            }
            Ok(())
        })
    }

    fn load_type(&self, data_type: DataType) -> EmberResult<()> {
        let mut guard = self.states.write_one(data_type);
        let TypeState {
            active,
            archived,
            hash,
            expires,
        } = &mut *guard;

        // Archived files replay first, ascending by id; the active file has
        // the highest id and replays last. Later records overwrite earlier
        // ones for the same key and field.
        for file in archived.values() {
            replay_file(&self.config, file, hash, expires)?;
        }

        let active_file = active.as_mut().ok_or(EmberError::ActiveFileMissing)?;
        let end = replay_file(&self.config, active_file, hash, expires)?;
        // Pin the append position to the end of the last valid record; the
        // file length observed at open overshoots for pre-truncated maps.
        active_file.set_offset(end);
        Ok(())
    }
}

/// Replays a single segment, returning the end offset of the last record
/// that carried a key.
fn replay_file(
    config: &Config,
    file: &DataFile,
    hash: &mut HashStore,
    expires: &mut HashMap<Vec<u8>, i64>,
) -> EmberResult<u64> {
    let mut offset = 0u64;
    let mut end = 0u64;
    while offset <= config.block_size {
        let entry = match file.read(offset) {
            Ok(entry) => entry,
            Err(EmberError::Eof) => break,
            Err(err) => {
                error!(file = ?file.path(), offset, error = %err, "replay failed, refusing to open");
                return Err(err);
            }
        };
        let size = entry.size();
        // A record without a key is a hole (zeroed tail of a pre-truncated
        // map); the writer never produces one, the reader skips it.
        if entry.meta.key_size > 0 {
            let indexer = Indexer {
                meta: entry.meta.clone(),
                file_id: file.id(),
                offset,
            };
            build_index(&entry, &indexer, hash, expires);
            end = offset + size;
        }
        offset += size;
    }
    Ok(end)
}

fn build_index(
    entry: &Entry,
    indexer: &Indexer,
    hash: &mut HashStore,
    expires: &mut HashMap<Vec<u8>, i64>,
) {
    trace!(
        file_id = indexer.file_id,
        offset = indexer.offset,
        mark = entry.mark(),
        "replaying record"
    );
    match entry.data_type() {
        Some(DataType::Hash) => build_hash_index(entry, hash, expires),
        None => {}
    }
}

fn build_hash_index(entry: &Entry, hash: &mut HashStore, expires: &mut HashMap<Vec<u8>, i64>) {
    let key = &entry.meta.key;
    match HashMark::from_u8(entry.mark()) {
        Some(HashMark::Set) => {
            hash.hset(key, &entry.meta.extra, entry.meta.value.clone());
        }
        Some(HashMark::Del) => {
            hash.hdel(key, &entry.meta.extra);
        }
        Some(HashMark::Clear) => {
            hash.hclear(key);
        }
        Some(HashMark::Expire) => {
            // The timestamp carries the absolute deadline. A deadline that
            // already passed while the engine was down clears the key now.
            if (entry.timestamp as i64) < unix_now_secs() {
                hash.hclear(key);
                expires.remove(key);
            } else {
                expires.insert(key.clone(), entry.timestamp as i64);
            }
        }
        None => {}
    }
}
