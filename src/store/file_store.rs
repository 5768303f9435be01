//! Single-file block store
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("ATREPO\0\0")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes
//!   - block_count: 8 bytes (u64 LE)
//!   - index_offset: 8 bytes (u64 LE, newest index segment, 0 if none)
//!   - heads_offset: 8 bytes (u64 LE)
//!   - heads_count: 8 bytes (u64 LE)
//!   - reserved: 16 bytes
//!
//! [BLOCKS and INDEX SEGMENTS, interleaved in append order]
//!   - block: tag byte + zstd-compressed block data
//!   - segment: prev_segment (u64 LE), count (u64 LE), then
//!     (cid: 34, offset: u64 LE, size: u32 LE) entries sorted by CID
//!   - heads: (did_len: u16 LE, did, commit cid: 34) sorted by DID,
//!     written right after the segment of the same sync
//! ```
//!
//! The file is only ever appended to, apart from the header. A sync writes
//! one segment holding the blocks added since the previous sync, followed by
//! the full heads table, and only then points the header at them. Whatever
//! was appended after the last header write is ignored on open, so a crash
//! loses unsynced writes but never the state the header describes.

use super::{check_expected, ensure_same, verify_block, Block, BlockStore, HeadStore};
use crate::model::{Cid, CID_LEN};
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const HEADER_SIZE: u64 = 64;
const SEGMENT_HEADER_SIZE: u64 = 16;
const INDEX_ENTRY_SIZE: usize = CID_LEN + 8 + 4;

/// Location of a block in the file
#[derive(Clone, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
}

/// Append bookkeeping, guarded as one unit
struct WriteState {
    /// Next append position
    end: u64,
    /// Offset of the newest index segment on disk, 0 if none
    last_segment: u64,
    /// Blocks not yet covered by any segment
    unsynced: Vec<Cid>,
}

/// A content-addressed block store backed by a single file
///
/// The file is held under an exclusive lock while the store is open, so a
/// second process (or a second `FileStore` on the same path) fails with
/// [`Error::Locked`] instead of interleaving appends.
pub struct FileStore {
    path: PathBuf,
    file: RwLock<File>,
    index: RwLock<HashMap<Cid, IndexEntry>>,
    heads: RwLock<HashMap<String, Cid>>,
    state: RwLock<WriteState>,
    heads_dirty: AtomicBool,
}

impl FileStore {
    /// Create a new store file, truncating any existing one
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        lock_exclusive(&file, &path)?;
        file.set_len(0)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), "created block store");

        Ok(FileStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(HashMap::new()),
            heads: RwLock::new(HashMap::new()),
            state: RwLock::new(WriteState {
                end: HEADER_SIZE,
                last_segment: 0,
                unsynced: Vec::new(),
            }),
            heads_dirty: AtomicBool::new(false),
        })
    }

    /// Open an existing store file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        lock_exclusive(&file, &path)?;
        let file_len = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)
            .map_err(|_| Error::InvalidFile("Truncated header".into()))?;

        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }

        let version = read_u32(&header[8..12]);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let block_count = read_u64(&header[16..24]);
        let index_offset = read_u64(&header[24..32]);
        let heads_offset = read_u64(&header[32..40]);
        let heads_count = read_u64(&header[40..48]);

        // Walk the segment chain from newest to oldest
        let mut index = HashMap::new();
        let mut segment = index_offset;
        while segment != 0 {
            if segment < HEADER_SIZE || segment + SEGMENT_HEADER_SIZE > file_len {
                return Err(Error::InvalidFile(format!("Bad index segment at {}", segment)));
            }
            file.seek(SeekFrom::Start(segment))?;
            let mut seg_header = [0u8; SEGMENT_HEADER_SIZE as usize];
            file.read_exact(&mut seg_header)?;
            let prev = read_u64(&seg_header[0..8]);
            let count = read_u64(&seg_header[8..16]);

            for _ in 0..count {
                let mut entry_buf = [0u8; INDEX_ENTRY_SIZE];
                file.read_exact(&mut entry_buf)
                    .map_err(|_| Error::InvalidFile("Truncated index segment".into()))?;

                let cid = Cid::from_bytes(&entry_buf[0..CID_LEN])
                    .map_err(|e| Error::InvalidFile(format!("Bad index entry: {}", e)))?;
                let offset = read_u64(&entry_buf[CID_LEN..CID_LEN + 8]);
                let size = read_u32(&entry_buf[CID_LEN + 8..]);

                // Blocks always precede the segment that indexes them
                if offset < HEADER_SIZE || offset + size as u64 > segment {
                    return Err(Error::InvalidFile(format!("Block {} out of range", cid)));
                }
                index.insert(cid, IndexEntry { offset, size });
            }

            if prev >= segment {
                return Err(Error::InvalidFile("Index segments out of order".into()));
            }
            segment = prev;
        }

        if index.len() as u64 != block_count {
            return Err(Error::InvalidFile(format!(
                "Index holds {} blocks, header says {}",
                index.len(),
                block_count
            )));
        }

        let mut heads = HashMap::new();
        if heads_count > 0 {
            file.seek(SeekFrom::Start(heads_offset))?;
            for _ in 0..heads_count {
                let mut len_buf = [0u8; 2];
                file.read_exact(&mut len_buf)?;
                let did_len = u16::from_le_bytes(len_buf) as usize;

                let mut did_buf = vec![0u8; did_len];
                file.read_exact(&mut did_buf)?;
                let did = String::from_utf8(did_buf)
                    .map_err(|_| Error::InvalidFile("DID is not UTF-8".into()))?;

                let mut cid_buf = [0u8; CID_LEN];
                file.read_exact(&mut cid_buf)?;
                let cid = Cid::from_bytes(&cid_buf)
                    .map_err(|e| Error::InvalidFile(format!("Bad head entry: {}", e)))?;

                heads.insert(did, cid);
            }
        }

        tracing::debug!(
            path = %path.display(),
            blocks = index.len(),
            heads = heads.len(),
            "opened block store"
        );

        Ok(FileStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(index),
            heads: RwLock::new(heads),
            // Anything past the last synced state is dead; append after it
            state: RwLock::new(WriteState {
                end: file_len,
                last_segment: index_offset,
                unsynced: Vec::new(),
            }),
            heads_dirty: AtomicBool::new(false),
        })
    }

    /// Open or create a store file
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Append an index segment and the heads table, then point the header at them
    pub fn sync(&self) -> Result<()> {
        // Same lock order as `put`: write state first
        let mut state = self.state.write();
        if state.unsynced.is_empty() && !self.heads_dirty.load(Ordering::SeqCst) {
            return Ok(());
        }
        let index = self.index.read();
        let heads = self.heads.read();
        let mut file = self.file.write();

        let segment_offset = state.end;
        let mut fresh = state.unsynced.clone();
        fresh.sort();

        let mut buf = Vec::with_capacity(
            SEGMENT_HEADER_SIZE as usize + fresh.len() * INDEX_ENTRY_SIZE,
        );
        buf.extend_from_slice(&state.last_segment.to_le_bytes());
        buf.extend_from_slice(&(fresh.len() as u64).to_le_bytes());
        for cid in &fresh {
            let entry = index
                .get(cid)
                .ok_or_else(|| Error::Integrity(format!("unsynced block {} not indexed", cid)))?;
            buf.extend_from_slice(&cid.to_bytes());
            buf.extend_from_slice(&entry.offset.to_le_bytes());
            buf.extend_from_slice(&entry.size.to_le_bytes());
        }

        let heads_offset = segment_offset + buf.len() as u64;
        let mut head_list: Vec<_> = heads.iter().collect();
        head_list.sort_by_key(|(did, _)| *did);
        for (did, cid) in head_list {
            let did_bytes = did.as_bytes();
            buf.extend_from_slice(&(did_bytes.len() as u16).to_le_bytes());
            buf.extend_from_slice(did_bytes);
            buf.extend_from_slice(&cid.to_bytes());
        }

        file.seek(SeekFrom::Start(segment_offset))?;
        file.write_all(&buf)?;
        file.sync_data()?;

        // The header moves only once everything it points at is durable
        let mut header = [0u8; 32];
        header[0..8].copy_from_slice(&(index.len() as u64).to_le_bytes());
        header[8..16].copy_from_slice(&segment_offset.to_le_bytes());
        header[16..24].copy_from_slice(&heads_offset.to_le_bytes());
        header[24..32].copy_from_slice(&(heads.len() as u64).to_le_bytes());
        file.seek(SeekFrom::Start(16))?;
        file.write_all(&header)?;
        file.sync_all()?;

        state.end = segment_offset + buf.len() as u64;
        state.last_segment = segment_offset;
        state.unsynced.clear();
        self.heads_dirty.store(false, Ordering::SeqCst);

        tracing::debug!(
            blocks = index.len(),
            new_blocks = fresh.len(),
            heads = heads.len(),
            "synced block store"
        );
        Ok(())
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_block(&self, cid: &Cid) -> Result<Option<Block>> {
        let entry = match self.index.read().get(cid).cloned() {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let mut data = vec![0u8; entry.size as usize];
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut data)?;
        }

        Ok(Some(Block::decompress(&data)?))
    }
}

impl BlockStore for FileStore {
    fn put(&self, block: &Block) -> Result<Cid> {
        let cid = block.cid();

        if let Some(existing) = self.read_block(&cid)? {
            ensure_same(&cid, &existing, block)?;
            return Ok(cid);
        }

        let compressed = block.compress()?;
        let size = compressed.len() as u32;

        let mut state = self.state.write();
        // Lost a race with another writer of the same block
        if self.index.read().contains_key(&cid) {
            return Ok(cid);
        }

        let offset = state.end;
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&compressed)?;
        }
        state.end = offset + size as u64;
        state.unsynced.push(cid);

        self.index.write().insert(cid, IndexEntry { offset, size });
        tracing::trace!(%cid, size, "stored block");
        Ok(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Block> {
        let block = self
            .read_block(cid)?
            .ok_or_else(|| Error::NotFound(format!("block {}", cid)))?;
        verify_block(cid, &block)?;
        Ok(block)
    }

    fn has(&self, cid: &Cid) -> bool {
        self.index.read().contains_key(cid)
    }

    fn block_count(&self) -> usize {
        self.index.read().len()
    }

    fn flush(&self) -> Result<()> {
        self.sync()
    }
}

impl HeadStore for FileStore {
    fn head(&self, did: &str) -> Option<Cid> {
        self.heads.read().get(did).copied()
    }

    fn list_heads(&self) -> Vec<(String, Cid)> {
        let mut heads: Vec<_> = self
            .heads
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        heads.sort();
        heads
    }

    fn swap_head(&self, did: &str, expected: Option<Cid>, new: Cid) -> Result<()> {
        if did.len() > u16::MAX as usize {
            return Err(Error::InvalidPath(format!("DID too long: {} bytes", did.len())));
        }
        let mut heads = self.heads.write();
        check_expected(did, heads.get(did).copied(), expected)?;
        heads.insert(did.to_string(), new);
        self.heads_dirty.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        if let Err(e) = self.sync() {
            tracing::warn!(error = %e, path = %self.path.display(), "sync on drop failed");
        }
    }
}

fn lock_exclusive(file: &File, path: &Path) -> Result<()> {
    match file.try_lock() {
        Ok(()) => Ok(()),
        Err(TryLockError::WouldBlock) => Err(Error::Locked(path.display().to_string())),
        Err(TryLockError::Error(e)) => Err(e.into()),
    }
}

fn read_u32(b: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&b[..4]);
    u32::from_le_bytes(arr)
}

fn read_u64(b: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&b[..8]);
    u64::from_le_bytes(arr)
}
