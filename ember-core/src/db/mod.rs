mod hash_ops;
mod recovery;

use crate::config::Config;
use crate::error::{EmberError, EmberResult};
use crate::hash::HashStore;
use crate::lock::LockTable;
use crate::storage::entry::{unix_now_secs, DataType, Entry, HashMark};
use crate::storage::{self, DataFile};
use fs4::fs_std::FileExt;
use parking_lot::{Mutex, RwLockWriteGuard};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// File name of the JSON config snapshot written on clean close.
const CONFIG_SAVE_FILE: &str = "DB.CFG";

/// Transient directory used while reclaiming; removed when reclaim exits.
const RECLAIM_DIR: &str = "ember_reclaim";

/// Advisory lock file preventing two processes from opening the same dir.
const DIR_LOCK_FILE: &str = ".lock";

/// Reserved two-byte separator; extra bytes may not contain it.
const EXTRA_SEPARATOR: &[u8] = b"\\0";

/// Everything the engine holds for one data type, guarded by that type's
/// reader-writer lock: the active segment, the archived segments, the
/// in-memory index and the expiration table.
pub(crate) struct TypeState {
    pub active: Option<DataFile>,
    pub archived: BTreeMap<u32, DataFile>,
    pub hash: HashStore,
    pub expires: HashMap<Vec<u8>, i64>,
}

/// A log-structured hash-of-hashes storage engine.
///
/// Every mutation is appended as a record to the active segment of its data
/// type and then applied to the in-memory index; reads consult only the
/// index. Opening a directory replays all segments to rebuild the index.
pub struct Db {
    config: Config,
    states: LockTable<TypeState>,
    // Holds the advisory directory lock; released on close or drop.
    dir_lock: Mutex<Option<File>>,
    is_reclaiming: AtomicBool,
    closed: AtomicBool,
}

impl Db {
    /// Opens an engine instance. Call [`Db::close`] when done with it.
    pub fn open(config: Config) -> EmberResult<Db> {
        config.validate()?;
        fs::create_dir_all(&config.dir_path)
            .map_err(|e| EmberError::io(&config.dir_path, e))?;

        let lock_path = config.dir_path.join(DIR_LOCK_FILE);
        let dir_lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| EmberError::io(&lock_path, e))?;
        dir_lock
            .try_lock_exclusive()
            .map_err(|e| EmberError::io(&lock_path, e))?;

        let built = storage::build(&config.dir_path, config.rw_method, config.block_size)?;

        let mut states = Vec::with_capacity(DataType::ALL.len());
        for (data_type, archived) in DataType::ALL.into_iter().zip(built.archived) {
            let active = DataFile::open(
                &config.dir_path,
                built.active_ids[data_type.index()],
                config.rw_method,
                config.block_size,
                data_type,
            )?;
            states.push(TypeState {
                active: Some(active),
                archived,
                hash: HashStore::new(),
                expires: HashMap::new(),
            });
        }

        let db = Db {
            config,
            states: LockTable::new(states),
            dir_lock: Mutex::new(Some(dir_lock)),
            is_reclaiming: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };

        db.load_indexes()?;
        info!(dir = ?db.config.dir_path, "ember engine opened");
        Ok(db)
    }

    /// Reopens the engine from the config snapshot a clean close left in
    /// `dir`.
    pub fn reopen(dir: &Path) -> EmberResult<Db> {
        let cfg_path = dir.join(CONFIG_SAVE_FILE);
        if !cfg_path.exists() {
            return Err(EmberError::ConfigNotExist);
        }
        let bytes = fs::read(&cfg_path).map_err(|e| EmberError::io(&cfg_path, e))?;
        let config: Config =
            serde_json::from_slice(&bytes).map_err(|e| EmberError::Config(e.to_string()))?;
        Db::open(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flushes and closes all segment files and writes the config snapshot.
    /// Idempotent; operations issued after close fail with `DbClosed`.
    pub fn close(&self) -> EmberResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.save_config()?;

        let mut guards = self.states.write(&DataType::ALL);
        for state in guards.iter_mut() {
            if let Some(active) = state.active.take() {
                active.close(true)?;
            }
            for (_, file) in std::mem::take(&mut state.archived) {
                file.close(true)?;
            }
        }
        drop(guards);

        // Dropping the lock file releases the advisory lock, so the
        // directory can be reopened while this instance is still in scope.
        self.dir_lock.lock().take();
        info!(dir = ?self.config.dir_path, "ember engine closed");
        Ok(())
    }

    /// Flushes the active segment of every data type.
    pub fn sync(&self) -> EmberResult<()> {
        self.ensure_open()?;
        let guards = self.states.read(&DataType::ALL);
        for state in guards.iter() {
            if let Some(active) = &state.active {
                active.sync()?;
            }
        }
        Ok(())
    }

    /// Copies the whole data directory to `dir`.
    pub fn backup(&self, dir: &Path) -> EmberResult<()> {
        self.ensure_open()?;
        // Quiesce writers so the copy sees a consistent directory.
        let _guards = self.states.read(&DataType::ALL);
        copy_dir(&self.config.dir_path, dir)
            .map_err(|e| EmberError::io(dir, e))
    }

    pub(crate) fn ensure_open(&self) -> EmberResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EmberError::DbClosed);
        }
        Ok(())
    }

    fn save_config(&self) -> EmberResult<()> {
        let path = self.config.dir_path.join(CONFIG_SAVE_FILE);
        let bytes =
            serde_json::to_vec(&self.config).map_err(|e| EmberError::Config(e.to_string()))?;
        fs::write(&path, bytes).map_err(|e| EmberError::io(&path, e))
    }

    pub(crate) fn check_key(&self, key: &[u8]) -> EmberResult<()> {
        if key.is_empty() {
            return Err(EmberError::EmptyKey);
        }
        if key.len() as u32 > self.config.max_key_size {
            return Err(EmberError::KeyTooLarge);
        }
        Ok(())
    }

    pub(crate) fn check_key_value(&self, key: &[u8], values: &[&[u8]]) -> EmberResult<()> {
        self.check_key(key)?;
        for value in values {
            if value.len() as u32 > self.config.max_value_size {
                return Err(EmberError::ValueTooLarge);
            }
        }
        Ok(())
    }

    pub(crate) fn check_extra(extra: &[u8]) -> EmberResult<()> {
        if extra
            .windows(EXTRA_SEPARATOR.len())
            .any(|window| window == EXTRA_SEPARATOR)
        {
            return Err(EmberError::ExtraContainsSeparator);
        }
        Ok(())
    }

    /// Appends a record to its type's active segment, rolling over to a new
    /// segment first when the append would push the file past the block
    /// size. Fsyncs afterwards when the config asks for it.
    pub(crate) fn store(&self, state: &mut TypeState, entry: &Entry) -> EmberResult<()> {
        let data_type = entry.data_type().ok_or(EmberError::InvalidEntry)?;

        let needs_rollover = match &state.active {
            Some(active) => active.offset() + entry.size() > self.config.block_size,
            None => return Err(EmberError::ActiveFileMissing),
        };
        if needs_rollover {
            if let Some(retired) = state.active.take() {
                retired.sync()?;
                let next_id = retired.id() + 1;
                state.archived.insert(retired.id(), retired);
                state.active = Some(DataFile::open(
                    &self.config.dir_path,
                    next_id,
                    self.config.rw_method,
                    self.config.block_size,
                    data_type,
                )?);
            }
        }

        let active = state.active.as_mut().ok_or(EmberError::ActiveFileMissing)?;
        active.write(entry)?;
        if self.config.sync {
            active.sync()?;
        }
        Ok(())
    }

    /// Expiration is lazy: called at the top of every keyed operation while
    /// the type's write lock is held. A past-due key gets a clear record
    /// appended, its index entry purged and its deadline dropped; the caller
    /// then proceeds as if the key never existed. Returns true when the key
    /// was expired here.
    pub(crate) fn check_expired(
        &self,
        state: &mut TypeState,
        data_type: DataType,
        key: &[u8],
    ) -> bool {
        let Some(&deadline) = state.expires.get(key) else {
            return false;
        };
        if unix_now_secs() <= deadline {
            return false;
        }

        state.hash.hclear(key);
        let entry = Entry::new_no_extra(
            key.to_vec(),
            Vec::new(),
            data_type,
            HashMark::Clear as u8,
        );
        if let Err(err) = self.store(state, &entry) {
            // The deadline stays recorded so the next operation retries the
            // clear record.
            warn!(error = %err, "failed to persist expiration clear");
            return true;
        }
        state.expires.remove(key);
        true
    }

    /// Read-path variant: peeks at the deadline under the read lock and only
    /// takes the write lock when a purge is actually due.
    pub(crate) fn expire_if_due(&self, data_type: DataType, key: &[u8]) -> bool {
        let due = {
            let state = self.states.read_one(data_type);
            match state.expires.get(key) {
                Some(&deadline) => unix_now_secs() > deadline,
                None => false,
            }
        };
        if !due {
            return false;
        }
        let mut state = self.states.write_one(data_type);
        self.check_expired(&mut state, data_type, key)
    }

    /// Rewrites archived segments, keeping only records the index still
    /// reflects, and swaps them in atomically. Readers and writers are
    /// blocked for the duration; this is an operator-invoked maintenance
    /// step.
    pub fn reclaim(&self) -> EmberResult<()> {
        self.ensure_open()?;
        if self.is_reclaiming.swap(true, Ordering::SeqCst) {
            return Err(EmberError::Reclaiming);
        }
        let result = self.reclaim_locked();
        self.is_reclaiming.store(false, Ordering::SeqCst);
        result
    }

    fn reclaim_locked(&self) -> EmberResult<()> {
        let mut guards = self.states.write(&DataType::ALL);

        let reclaimable = guards
            .iter()
            .any(|state| state.archived.len() >= self.config.reclaim_threshold);
        if !reclaimable {
            return Err(EmberError::ReclaimUnreached);
        }

        let scratch = self.config.dir_path.join(RECLAIM_DIR);
        fs::create_dir_all(&scratch).map_err(|e| EmberError::io(&scratch, e))?;
        let outcome = self.reclaim_types(&mut guards, &scratch);
        if let Err(err) = fs::remove_dir_all(&scratch) {
            warn!(error = %err, "failed to remove reclaim scratch directory");
        }
        outcome
    }

    fn reclaim_types(
        &self,
        guards: &mut [RwLockWriteGuard<'_, TypeState>],
        scratch: &Path,
    ) -> EmberResult<()> {
        for data_type in DataType::ALL {
            let state = &mut *guards[data_type.index()];
            if state.archived.len() < self.config.reclaim_threshold {
                continue;
            }
            self.reclaim_type(state, data_type, scratch)?;
        }
        Ok(())
    }

    fn reclaim_type(
        &self,
        state: &mut TypeState,
        data_type: DataType,
        scratch: &Path,
    ) -> EmberResult<()> {
        // Collect the records the index still reflects, in file-id-then-
        // offset order.
        let mut live = Vec::new();
        let state_ref: &TypeState = state;
        for file in state_ref.archived.values() {
            let mut offset = 0u64;
            while offset <= self.config.block_size {
                let entry = match file.read(offset) {
                    Ok(entry) => entry,
                    Err(EmberError::Eof) => break,
                    Err(err) => return Err(err),
                };
                let size = entry.size();
                if entry.meta.key_size > 0 && self.valid_entry(state_ref, &entry) {
                    live.push(entry);
                }
                offset += size;
            }
        }
        info!(
            data_type = ?data_type,
            archived = state.archived.len(),
            live = live.len(),
            "reclaiming archived segments"
        );

        // Rewrite them into fresh segments inside the scratch directory,
        // rolling over at the block size.
        let mut rewritten: Vec<DataFile> = Vec::new();
        let mut current: Option<DataFile> = None;
        let mut next_id = 0u32;
        for entry in &live {
            let needs_new = match &current {
                Some(file) => file.offset() + entry.size() > self.config.block_size,
                None => true,
            };
            if needs_new {
                if let Some(full) = current.take() {
                    rewritten.push(full);
                }
                current = Some(DataFile::open(
                    scratch,
                    next_id,
                    self.config.rw_method,
                    self.config.block_size,
                    data_type,
                )?);
                next_id += 1;
            }
            if let Some(file) = current.as_mut() {
                file.write(entry)?;
            }
        }
        if let Some(file) = current.take() {
            rewritten.push(file);
        }

        // Delete the superseded archived files, then move the rewritten
        // segments into the data directory. The rename is the commit point;
        // the in-memory archived map is only replaced once every rename
        // succeeded.
        for file in state.archived.values() {
            fs::remove_file(file.path()).map_err(|e| EmberError::io(file.path(), e))?;
        }
        let mut rebuilt = BTreeMap::new();
        for file in rewritten {
            let id = file.id();
            let from = file.path().to_path_buf();
            file.close(true)?;
            let to = self
                .config
                .dir_path
                .join(storage::file_name(id, data_type));
            fs::rename(&from, &to).map_err(|e| EmberError::io(&to, e))?;
            rebuilt.insert(
                id,
                DataFile::open(
                    &self.config.dir_path,
                    id,
                    self.config.rw_method,
                    self.config.block_size,
                    data_type,
                )?,
            );
        }
        state.archived = rebuilt;
        Ok(())
    }

    /// Liveness predicate for reclaim. A set record is live iff it still
    /// reflects the current value of its `(key, field)`; an expire record is
    /// live iff its key still has a future deadline. Delete and clear
    /// records represent absence and need no on-disk witness once the
    /// records they superseded are gone.
    fn valid_entry(&self, state: &TypeState, entry: &Entry) -> bool {
        match entry.data_type() {
            Some(DataType::Hash) => match HashMark::from_u8(entry.mark()) {
                Some(HashMark::Expire) => state
                    .expires
                    .get(&entry.meta.key)
                    .is_some_and(|&deadline| deadline > unix_now_secs()),
                Some(HashMark::Set) => state
                    .hash
                    .hget(&entry.meta.key, &entry.meta.extra)
                    == Some(entry.meta.value.as_slice()),
                _ => false,
            },
            None => false,
        }
    }
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for dir_entry in fs::read_dir(from)? {
        let dir_entry = dir_entry?;
        let target = to.join(dir_entry.file_name());
        if dir_entry.file_type()?.is_dir() {
            copy_dir(&dir_entry.path(), &target)?;
        } else {
            fs::copy(dir_entry.path(), &target)?;
        }
    }
    Ok(())
}
