use crate::config::RwMethod;
use crate::error::{EmberError, EmberResult};
use crate::storage::entry::{DataType, Entry, ENTRY_HEADER_SIZE};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Segment file name: nine zero-padded decimal digits, the `data` marker and
/// the data-type suffix, e.g. `000000007.data.hash`.
pub fn file_name(id: u32, data_type: DataType) -> String {
    format!("{:09}.data.{}", id, data_type.suffix())
}

/// An append-only segment file.
///
/// `offset` is the watermark: the next free byte. Everything past it is
/// treated as absent until a successful append advances it. Reads whose
/// header would cross the watermark return [`EmberError::Eof`].
pub struct DataFile {
    id: u32,
    path: PathBuf,
    file: File,
    mmap: Option<MmapMut>,
    offset: u64,
    method: RwMethod,
}

impl DataFile {
    /// Opens (creating if needed) the segment with the given id inside `dir`.
    ///
    /// With the mmap method the file is truncated to `block_size` up front
    /// and mapped; the watermark is taken from the file length observed
    /// before truncation, so a fresh file starts at zero.
    pub fn open(
        dir: &Path,
        id: u32,
        method: RwMethod,
        block_size: u64,
        data_type: DataType,
    ) -> EmberResult<DataFile> {
        let path = dir.join(file_name(id, data_type));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| EmberError::io(&path, e))?;
        let offset = file
            .metadata()
            .map_err(|e| EmberError::io(&path, e))?
            .len();

        let mmap = match method {
            RwMethod::FileIo => None,
            RwMethod::Mmap => {
                file.set_len(block_size)
                    .map_err(|e| EmberError::io(&path, e))?;
                let map =
                    unsafe { MmapMut::map_mut(&file) }.map_err(|e| EmberError::io(&path, e))?;
                Some(map)
            }
        };

        debug!(path = ?path, id, offset, "opened data file");
        Ok(DataFile {
            id,
            path,
            file,
            mmap,
            offset,
            method,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Pins the watermark. Recovery uses this once per active file, after
    /// replay has located the end of the last valid record (the file length
    /// is not a usable watermark for a pre-truncated mmap file).
    pub(crate) fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Reads the record starting at `offset`: header first, then key, value
    /// and extra at the successive positions, then verifies the value CRC.
    pub fn read(&self, offset: u64) -> EmberResult<Entry> {
        if offset + ENTRY_HEADER_SIZE as u64 > self.offset {
            return Err(EmberError::Eof);
        }

        let header = self.read_buf(offset, ENTRY_HEADER_SIZE as u64)?;
        let mut entry = Entry::decode_header(&header)?;

        let mut pos = offset + ENTRY_HEADER_SIZE as u64;
        if entry.meta.key_size > 0 {
            entry.meta.key = self.read_buf(pos, entry.meta.key_size as u64)?;
        }
        pos += entry.meta.key_size as u64;
        if entry.meta.value_size > 0 {
            entry.meta.value = self.read_buf(pos, entry.meta.value_size as u64)?;
        }
        pos += entry.meta.value_size as u64;
        if entry.meta.extra_size > 0 {
            entry.meta.extra = self.read_buf(pos, entry.meta.extra_size as u64)?;
        }

        if crc32fast::hash(&entry.meta.value) != entry.crc32 {
            return Err(EmberError::InvalidCrc);
        }
        Ok(entry)
    }

    fn read_buf(&self, offset: u64, n: u64) -> EmberResult<Vec<u8>> {
        let mut buf = vec![0u8; n as usize];
        match self.method {
            RwMethod::FileIo => {
                self.file
                    .read_exact_at(&mut buf, offset)
                    .map_err(|e| EmberError::io(&self.path, e))?;
            }
            RwMethod::Mmap => {
                let map = self.mmap.as_ref().ok_or(EmberError::ActiveFileMissing)?;
                let end = offset as usize + n as usize;
                if end > map.len() {
                    return Err(EmberError::io(
                        &self.path,
                        io::Error::new(io::ErrorKind::UnexpectedEof, "read past mapped region"),
                    ));
                }
                buf.copy_from_slice(&map[offset as usize..end]);
            }
        }
        Ok(buf)
    }

    /// Appends the record at the watermark and advances it. The watermark is
    /// left unchanged when the write fails, so partial bytes are ignored by
    /// later reads and replays.
    pub fn write(&mut self, entry: &Entry) -> EmberResult<()> {
        if entry.meta.key_size == 0 {
            return Err(EmberError::EmptyEntry);
        }
        let buf = entry.encode()?;
        let offset = self.offset;

        match self.method {
            RwMethod::FileIo => {
                self.file
                    .write_all_at(&buf, offset)
                    .map_err(|e| EmberError::io(&self.path, e))?;
            }
            RwMethod::Mmap => {
                let map = self.mmap.as_mut().ok_or(EmberError::ActiveFileMissing)?;
                let end = offset as usize + buf.len();
                if end > map.len() {
                    return Err(EmberError::io(
                        &self.path,
                        io::Error::new(io::ErrorKind::WriteZero, "record exceeds block size"),
                    ));
                }
                map[offset as usize..end].copy_from_slice(&buf);
            }
        }

        self.offset += entry.size();
        Ok(())
    }

    /// Flushes outstanding writes to disk.
    pub fn sync(&self) -> EmberResult<()> {
        match &self.mmap {
            Some(map) => map.flush().map_err(|e| EmberError::io(&self.path, e)),
            None => self
                .file
                .sync_all()
                .map_err(|e| EmberError::io(&self.path, e)),
        }
    }

    /// Releases the file handle and the map, flushing first when asked.
    pub fn close(self, sync: bool) -> EmberResult<()> {
        if sync {
            self.sync()?;
        }
        Ok(())
    }
}
