use crate::error::{EmberError, EmberResult};
use byteorder::{BigEndian, ByteOrder};
use std::time::{SystemTime, UNIX_EPOCH};

/// On-disk record layout:
///
/// ```text
/// | crc32 | key_size | value_size | extra_size | state | timestamp | key | value | extra |
/// |  4B   |    4B    |     4B     |     4B     |  2B   |    8B     | ... |  ...  |  ...  |
/// ```
///
/// All header integers are big-endian so files are portable across
/// endiannesses. The CRC is the IEEE CRC-32 of the value bytes only; key and
/// extra are not integrity-checked on disk (preserved for format
/// compatibility).
pub const ENTRY_HEADER_SIZE: usize = 26;

/// The data structures the engine can persist. The high byte of a record's
/// `state` field names one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Hash = 0,
}

pub const DATA_TYPE_COUNT: usize = 1;

impl DataType {
    pub const ALL: [DataType; DATA_TYPE_COUNT] = [DataType::Hash];

    pub fn from_u8(raw: u8) -> Option<DataType> {
        match raw {
            0 => Some(DataType::Hash),
            _ => None,
        }
    }

    /// Segment file name suffix for this type.
    pub fn suffix(self) -> &'static str {
        match self {
            DataType::Hash => "hash",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Operation marks of the hash type, stored in the low byte of `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HashMark {
    Set = 0,
    Del = 1,
    Clear = 2,
    Expire = 3,
}

impl HashMark {
    pub fn from_u8(raw: u8) -> Option<HashMark> {
        match raw {
            0 => Some(HashMark::Set),
            1 => Some(HashMark::Del),
            2 => Some(HashMark::Clear),
            3 => Some(HashMark::Expire),
            _ => None,
        }
    }
}

/// Variable-length portion of a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Side-channel bytes; the hash type carries the inner field name here.
    pub extra: Vec<u8>,
    pub key_size: u32,
    pub value_size: u32,
    pub extra_size: u32,
}

/// A record appended to a data file.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub meta: Meta,
    /// Packed field: high 8 bits are the data type, low 8 bits the operation
    /// mark.
    pub state: u16,
    pub crc32: u32,
    /// Nanosecond wall-clock at write time. Expire records instead carry the
    /// absolute deadline in unix seconds here.
    pub timestamp: u64,
}

fn pack_state(data_type: DataType, mark: u8) -> u16 {
    ((data_type as u16) << 8) | mark as u16
}

pub(crate) fn unix_now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

pub(crate) fn unix_now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Entry {
    /// Builds a record carrying extra bytes (the hash field name).
    pub fn new(key: Vec<u8>, value: Vec<u8>, extra: Vec<u8>, data_type: DataType, mark: u8) -> Entry {
        Entry {
            state: pack_state(data_type, mark),
            crc32: crc32fast::hash(&value),
            timestamp: unix_now_nanos(),
            meta: Meta {
                key_size: key.len() as u32,
                value_size: value.len() as u32,
                extra_size: extra.len() as u32,
                key,
                value,
                extra,
            },
        }
    }

    pub fn new_no_extra(key: Vec<u8>, value: Vec<u8>, data_type: DataType, mark: u8) -> Entry {
        Entry::new(key, value, Vec::new(), data_type, mark)
    }

    /// Builds an expire record. The absolute deadline (unix seconds) travels
    /// in the timestamp field rather than in the value or extra bytes.
    pub fn with_expire(key: Vec<u8>, data_type: DataType, mark: u8, deadline: u64) -> Entry {
        let mut entry = Entry::new_no_extra(key, Vec::new(), data_type, mark);
        entry.timestamp = deadline;
        entry
    }

    pub fn data_type(&self) -> Option<DataType> {
        DataType::from_u8((self.state >> 8) as u8)
    }

    pub fn mark(&self) -> u8 {
        (self.state & 0xff) as u8
    }

    /// Total on-disk size of the record, header included.
    pub fn size(&self) -> u64 {
        ENTRY_HEADER_SIZE as u64
            + self.meta.key_size as u64
            + self.meta.value_size as u64
            + self.meta.extra_size as u64
    }

    /// Encodes the record into its on-disk form. A record with an empty key
    /// is never written and is rejected here.
    pub fn encode(&self) -> EmberResult<Vec<u8>> {
        if self.meta.key_size == 0 {
            return Err(EmberError::InvalidEntry);
        }

        let (ks, vs, es) = (
            self.meta.key_size as usize,
            self.meta.value_size as usize,
            self.meta.extra_size as usize,
        );
        let mut buf = vec![0u8; self.size() as usize];

        BigEndian::write_u32(&mut buf[4..8], self.meta.key_size);
        BigEndian::write_u32(&mut buf[8..12], self.meta.value_size);
        BigEndian::write_u32(&mut buf[12..16], self.meta.extra_size);
        BigEndian::write_u16(&mut buf[16..18], self.state);
        BigEndian::write_u64(&mut buf[18..26], self.timestamp);
        buf[ENTRY_HEADER_SIZE..ENTRY_HEADER_SIZE + ks].copy_from_slice(&self.meta.key);
        buf[ENTRY_HEADER_SIZE + ks..ENTRY_HEADER_SIZE + ks + vs].copy_from_slice(&self.meta.value);
        if es > 0 {
            buf[ENTRY_HEADER_SIZE + ks + vs..ENTRY_HEADER_SIZE + ks + vs + es]
                .copy_from_slice(&self.meta.extra);
        }

        let crc = crc32fast::hash(&self.meta.value);
        BigEndian::write_u32(&mut buf[0..4], crc);

        Ok(buf)
    }

    /// Decodes the fixed-size header. Key, value and extra are left empty;
    /// the data-file reader fills them from subsequent positional reads and
    /// then verifies the CRC.
    pub fn decode_header(buf: &[u8]) -> EmberResult<Entry> {
        if buf.len() < ENTRY_HEADER_SIZE {
            return Err(EmberError::InvalidEntry);
        }
        Ok(Entry {
            crc32: BigEndian::read_u32(&buf[0..4]),
            meta: Meta {
                key_size: BigEndian::read_u32(&buf[4..8]),
                value_size: BigEndian::read_u32(&buf[8..12]),
                extra_size: BigEndian::read_u32(&buf[12..16]),
                ..Meta::default()
            },
            state: BigEndian::read_u16(&buf[16..18]),
            timestamp: BigEndian::read_u64(&buf[18..26]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_packing() {
        let entry = Entry::new(
            b"key".to_vec(),
            b"value".to_vec(),
            b"field".to_vec(),
            DataType::Hash,
            HashMark::Del as u8,
        );
        assert_eq!(entry.data_type(), Some(DataType::Hash));
        assert_eq!(HashMark::from_u8(entry.mark()), Some(HashMark::Del));
    }

    #[test]
    fn test_size() {
        let entry = Entry::new(
            b"abc".to_vec(),
            b"defg".to_vec(),
            b"hi".to_vec(),
            DataType::Hash,
            HashMark::Set as u8,
        );
        assert_eq!(entry.size(), 26 + 3 + 4 + 2);
    }

    #[test]
    fn test_encode_rejects_empty_key() {
        let entry = Entry::new_no_extra(Vec::new(), b"v".to_vec(), DataType::Hash, 0);
        assert!(matches!(entry.encode(), Err(EmberError::InvalidEntry)));
    }

    #[test]
    fn test_header_round_trip() {
        let entry = Entry::new(
            b"user".to_vec(),
            b"alice".to_vec(),
            b"name".to_vec(),
            DataType::Hash,
            HashMark::Set as u8,
        );
        let encoded = entry.encode().unwrap();
        assert_eq!(encoded.len() as u64, entry.size());

        let decoded = Entry::decode_header(&encoded).unwrap();
        assert_eq!(decoded.state, entry.state);
        assert_eq!(decoded.timestamp, entry.timestamp);
        assert_eq!(decoded.crc32, crc32fast::hash(b"alice"));
        assert_eq!(decoded.meta.key_size, 4);
        assert_eq!(decoded.meta.value_size, 5);
        assert_eq!(decoded.meta.extra_size, 4);

        // The variable-length fields come from subsequent reads.
        let ks = decoded.meta.key_size as usize;
        let vs = decoded.meta.value_size as usize;
        assert_eq!(&encoded[26..26 + ks], b"user");
        assert_eq!(&encoded[26 + ks..26 + ks + vs], b"alice");
    }

    #[test]
    fn test_expire_deadline_in_timestamp() {
        let entry = Entry::with_expire(
            b"user".to_vec(),
            DataType::Hash,
            HashMark::Expire as u8,
            1_900_000_000,
        );
        assert_eq!(entry.timestamp, 1_900_000_000);
        assert_eq!(entry.meta.value_size, 0);
        assert_eq!(entry.meta.extra_size, 0);
    }
}
