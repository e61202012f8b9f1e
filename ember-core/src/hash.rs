use std::collections::HashMap;

type Fields = HashMap<Vec<u8>, Vec<u8>>;

/// Pure in-memory hash-of-hashes store: outer key to field-to-value map.
/// Mutations here never touch disk; the engine appends a record first and
/// then applies the same change to this store.
#[derive(Debug, Default)]
pub struct HashStore {
    record: HashMap<Vec<u8>, Fields>,
}

impl HashStore {
    pub fn new() -> HashStore {
        HashStore::default()
    }

    /// Inserts or replaces `(key, field)`. Returns true when the field was
    /// created, false when an existing value was replaced.
    pub fn hset(&mut self, key: &[u8], field: &[u8], value: Vec<u8>) -> bool {
        let fields = self.record.entry(key.to_vec()).or_default();
        fields.insert(field.to_vec(), value).is_none()
    }

    /// Inserts only when `(key, field)` is absent. Returns true on insert.
    pub fn hsetnx(&mut self, key: &[u8], field: &[u8], value: Vec<u8>) -> bool {
        let fields = self.record.entry(key.to_vec()).or_default();
        if fields.contains_key(field) {
            return false;
        }
        fields.insert(field.to_vec(), value);
        true
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> Option<&[u8]> {
        self.record
            .get(key)
            .and_then(|fields| fields.get(field))
            .map(Vec::as_slice)
    }

    /// All fields and values of `key`, alternating. Order is unspecified.
    pub fn hgetall(&self, key: &[u8]) -> Vec<Vec<u8>> {
        let Some(fields) = self.record.get(key) else {
            return Vec::new();
        };
        let mut res = Vec::with_capacity(fields.len() * 2);
        for (field, value) in fields {
            res.push(field.clone());
            res.push(value.clone());
        }
        res
    }

    /// Removes one field. Returns true when the field existed. An outer key
    /// whose last field is removed disappears entirely.
    pub fn hdel(&mut self, key: &[u8], field: &[u8]) -> bool {
        let Some(fields) = self.record.get_mut(key) else {
            return false;
        };
        let removed = fields.remove(field).is_some();
        if fields.is_empty() {
            self.record.remove(key);
        }
        removed
    }

    pub fn hkey_exists(&self, key: &[u8]) -> bool {
        self.record.contains_key(key)
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> bool {
        self.record
            .get(key)
            .map_or(false, |fields| fields.contains_key(field))
    }

    pub fn hlen(&self, key: &[u8]) -> usize {
        self.record.get(key).map_or(0, Fields::len)
    }

    pub fn hkeys(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.record
            .get(key)
            .map_or_else(Vec::new, |fields| fields.keys().cloned().collect())
    }

    pub fn hvals(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.record
            .get(key)
            .map_or_else(Vec::new, |fields| fields.values().cloned().collect())
    }

    /// Removes the outer key entirely. Returns true when it existed.
    pub fn hclear(&mut self, key: &[u8]) -> bool {
        self.record.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hset_reports_creation_delta() {
        let mut store = HashStore::new();
        assert!(store.hset(b"h", b"f", b"v1".to_vec()));
        assert!(!store.hset(b"h", b"f", b"v2".to_vec()));
        assert_eq!(store.hget(b"h", b"f"), Some(&b"v2"[..]));
    }

    #[test]
    fn test_hsetnx_keeps_existing_value() {
        let mut store = HashStore::new();
        assert!(store.hsetnx(b"h", b"f", b"v1".to_vec()));
        assert!(!store.hsetnx(b"h", b"f", b"v2".to_vec()));
        assert_eq!(store.hget(b"h", b"f"), Some(&b"v1"[..]));
    }

    #[test]
    fn test_hdel_and_hlen() {
        let mut store = HashStore::new();
        store.hset(b"h", b"f1", b"v1".to_vec());
        store.hset(b"h", b"f2", b"v2".to_vec());
        assert_eq!(store.hlen(b"h"), 2);

        assert!(store.hdel(b"h", b"f1"));
        assert!(!store.hdel(b"h", b"f1"));
        assert_eq!(store.hlen(b"h"), 1);

        assert!(store.hdel(b"h", b"f2"));
        assert!(!store.hkey_exists(b"h"));
        assert_eq!(store.hlen(b"h"), 0);
    }

    #[test]
    fn test_enumeration() {
        let mut store = HashStore::new();
        store.hset(b"h", b"f1", b"v1".to_vec());
        store.hset(b"h", b"f2", b"v2".to_vec());

        let mut keys = store.hkeys(b"h");
        keys.sort();
        assert_eq!(keys, vec![b"f1".to_vec(), b"f2".to_vec()]);

        let mut vals = store.hvals(b"h");
        vals.sort();
        assert_eq!(vals, vec![b"v1".to_vec(), b"v2".to_vec()]);

        let all = store.hgetall(b"h");
        assert_eq!(all.len(), 4);

        assert!(store.hgetall(b"missing").is_empty());
    }

    #[test]
    fn test_hclear() {
        let mut store = HashStore::new();
        store.hset(b"h", b"f", b"v".to_vec());
        assert!(store.hclear(b"h"));
        assert!(!store.hclear(b"h"));
        assert_eq!(store.hget(b"h", b"f"), None);
    }
}
