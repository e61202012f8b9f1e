use crate::storage::entry::Meta;

/// Describes where a replayed record lives on disk: its metadata plus the
/// segment file id and in-file offset it was read from.
#[derive(Debug, Clone)]
pub struct Indexer {
    pub meta: Meta,
    pub file_id: u32,
    pub offset: u64,
}
