use super::Db;
use crate::error::{EmberError, EmberResult};
use crate::storage::entry::{unix_now_secs, DataType, Entry, HashMark};

impl Db {
    /// Sets `field` of hash `key` to `value`. Returns 1 when the field was
    /// created, 0 when an existing value was replaced.
    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> EmberResult<u32> {
        self.ensure_open()?;
        self.check_key_value(key, &[value])?;
        Self::check_extra(field)?;

        let mut state = self.states.write_one(DataType::Hash);
        self.check_expired(&mut state, DataType::Hash, key);

        let entry = Entry::new(
            key.to_vec(),
            value.to_vec(),
            field.to_vec(),
            DataType::Hash,
            HashMark::Set as u8,
        );
        self.store(&mut state, &entry)?;

        let created = state.hash.hset(key, field, value.to_vec());
        Ok(created as u32)
    }

    /// Sets `field` only when it does not exist yet. Returns 1 when the
    /// field was inserted, 0 otherwise. Nothing is appended when the field
    /// already exists.
    pub fn hsetnx(&self, key: &[u8], field: &[u8], value: &[u8]) -> EmberResult<u32> {
        self.ensure_open()?;
        self.check_key_value(key, &[value])?;
        Self::check_extra(field)?;

        let mut state = self.states.write_one(DataType::Hash);
        self.check_expired(&mut state, DataType::Hash, key);

        if state.hash.hexists(key, field) {
            return Ok(0);
        }
        let entry = Entry::new(
            key.to_vec(),
            value.to_vec(),
            field.to_vec(),
            DataType::Hash,
            HashMark::Set as u8,
        );
        self.store(&mut state, &entry)?;

        state.hash.hsetnx(key, field, value.to_vec());
        Ok(1)
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> EmberResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.check_key(key)?;
        if self.expire_if_due(DataType::Hash, key) {
            return Ok(None);
        }

        let state = self.states.read_one(DataType::Hash);
        Ok(state.hash.hget(key, field).map(<[u8]>::to_vec))
    }

    /// All fields and values of `key`, alternating, in unspecified order.
    pub fn hgetall(&self, key: &[u8]) -> EmberResult<Vec<Vec<u8>>> {
        self.ensure_open()?;
        self.check_key(key)?;
        if self.expire_if_due(DataType::Hash, key) {
            return Ok(Vec::new());
        }

        let state = self.states.read_one(DataType::Hash);
        Ok(state.hash.hgetall(key))
    }

    /// Deletes the given fields. A delete record is appended per field; the
    /// returned count only reflects fields that actually existed.
    pub fn hdel(&self, key: &[u8], fields: &[&[u8]]) -> EmberResult<usize> {
        self.ensure_open()?;
        self.check_key(key)?;
        if fields.is_empty() {
            return Ok(0);
        }
        for field in fields {
            Self::check_extra(field)?;
        }

        let mut state = self.states.write_one(DataType::Hash);
        self.check_expired(&mut state, DataType::Hash, key);

        let mut removed = 0;
        for field in fields {
            let entry = Entry::new(
                key.to_vec(),
                Vec::new(),
                field.to_vec(),
                DataType::Hash,
                HashMark::Del as u8,
            );
            self.store(&mut state, &entry)?;
            if state.hash.hdel(key, field) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> EmberResult<bool> {
        self.ensure_open()?;
        self.check_key(key)?;
        if self.expire_if_due(DataType::Hash, key) {
            return Ok(false);
        }

        let state = self.states.read_one(DataType::Hash);
        Ok(state.hash.hexists(key, field))
    }

    pub fn hlen(&self, key: &[u8]) -> EmberResult<usize> {
        self.ensure_open()?;
        self.check_key(key)?;
        if self.expire_if_due(DataType::Hash, key) {
            return Ok(0);
        }

        let state = self.states.read_one(DataType::Hash);
        Ok(state.hash.hlen(key))
    }

    pub fn hkeys(&self, key: &[u8]) -> EmberResult<Vec<Vec<u8>>> {
        self.ensure_open()?;
        self.check_key(key)?;
        if self.expire_if_due(DataType::Hash, key) {
            return Ok(Vec::new());
        }

        let state = self.states.read_one(DataType::Hash);
        Ok(state.hash.hkeys(key))
    }

    pub fn hvals(&self, key: &[u8]) -> EmberResult<Vec<Vec<u8>>> {
        self.ensure_open()?;
        self.check_key(key)?;
        if self.expire_if_due(DataType::Hash, key) {
            return Ok(Vec::new());
        }

        let state = self.states.read_one(DataType::Hash);
        Ok(state.hash.hvals(key))
    }

    /// Removes the hash at `key` entirely. Returns true when it existed.
    pub fn hclear(&self, key: &[u8]) -> EmberResult<bool> {
        self.ensure_open()?;
        self.check_key(key)?;

        let mut state = self.states.write_one(DataType::Hash);
        self.check_expired(&mut state, DataType::Hash, key);

        if !state.hash.hkey_exists(key) {
            return Ok(false);
        }
        let entry = Entry::new_no_extra(
            key.to_vec(),
            Vec::new(),
            DataType::Hash,
            HashMark::Clear as u8,
        );
        self.store(&mut state, &entry)?;

        state.hash.hclear(key);
        state.expires.remove(key);
        Ok(true)
    }

    /// Gives the hash at `key` a time-to-live in seconds. Returns false when
    /// the key does not exist. The appended expire record carries the
    /// absolute deadline in its timestamp field.
    pub fn hexpire(&self, key: &[u8], ttl_secs: i64) -> EmberResult<bool> {
        if ttl_secs <= 0 {
            return Err(EmberError::InvalidTtl);
        }
        self.ensure_open()?;
        self.check_key(key)?;

        let mut state = self.states.write_one(DataType::Hash);
        self.check_expired(&mut state, DataType::Hash, key);

        if !state.hash.hkey_exists(key) {
            return Ok(false);
        }
        let deadline = unix_now_secs() + ttl_secs;
        let entry = Entry::with_expire(
            key.to_vec(),
            DataType::Hash,
            HashMark::Expire as u8,
            deadline as u64,
        );
        self.store(&mut state, &entry)?;

        state.expires.insert(key.to_vec(), deadline);
        Ok(true)
    }

    /// Remaining time-to-live of the hash at `key` in seconds; 0 when the
    /// key has no deadline or does not exist.
    pub fn httl(&self, key: &[u8]) -> EmberResult<i64> {
        self.ensure_open()?;
        self.check_key(key)?;
        if self.expire_if_due(DataType::Hash, key) {
            return Ok(0);
        }

        let state = self.states.read_one(DataType::Hash);
        match state.expires.get(key) {
            Some(&deadline) => Ok((deadline - unix_now_secs()).max(0)),
            None => Ok(0),
        }
    }
}
