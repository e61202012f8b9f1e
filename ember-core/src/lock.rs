use crate::storage::entry::{DataType, DATA_TYPE_COUNT};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One reader-writer lock per data type. Multi-type acquisition happens in
/// the order the caller passes the types; callers that lock several types
/// together pass them in ascending order to avoid deadlock. Guards release
/// on drop, on every exit path.
pub(crate) struct LockTable<T> {
    locks: Vec<RwLock<T>>,
}

impl<T> LockTable<T> {
    pub fn new(states: Vec<T>) -> LockTable<T> {
        debug_assert_eq!(states.len(), DATA_TYPE_COUNT);
        LockTable {
            locks: states.into_iter().map(RwLock::new).collect(),
        }
    }

    pub fn write_one(&self, data_type: DataType) -> RwLockWriteGuard<'_, T> {
        self.locks[data_type.index()].write()
    }

    pub fn read_one(&self, data_type: DataType) -> RwLockReadGuard<'_, T> {
        self.locks[data_type.index()].read()
    }

    /// Write-locks the given types in order.
    pub fn write(&self, types: &[DataType]) -> Vec<RwLockWriteGuard<'_, T>> {
        types.iter().map(|t| self.locks[t.index()].write()).collect()
    }

    /// Read-locks the given types in order.
    pub fn read(&self, types: &[DataType]) -> Vec<RwLockReadGuard<'_, T>> {
        types.iter().map(|t| self.locks[t.index()].read()).collect()
    }
}
