use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use cask_types::BlockId;

use crate::error::{StoreError, StoreResult};

/// Current block file format version.
pub const STORE_VERSION: u32 = 1;

const MAGIC: &[u8; 4] = b"CSKB";

/// File header: magic + version + header-block pointer.
///
/// ```text
/// [4 bytes: magic "CSKB"]
/// [4 bytes: version (big-endian u32)]
/// [8 bytes: offset of the registry header block, 0 = none (little-endian u64)]
/// ```
const FILE_HEADER_SIZE: u64 = 16;
const POINTER_OFFSET: u64 = 8;

/// Frame header per block: length + CRC32 of the payload.
const FRAME_HEADER_SIZE: u64 = 8;

/// BLAKE3 checksum appended after the registry header block's frame.
const HEADER_CHECKSUM_SIZE: u64 = 32;

struct FileState {
    file: File,
    /// Logical end of file; appends always land here.
    end: u64,
}

struct StoreInner {
    path: PathBuf,
    state: Mutex<FileState>,
    closed: AtomicBool,
}

impl StoreInner {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.read(buf)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.read_exact(buf)
    }
}

/// Append-only file of opaque byte blocks, addressed by [`BlockId`].
///
/// New blocks are only ever appended, never overwritten in place, so a block
/// id and any open read range stay valid for the life of the file. Read
/// streams hold a shared reference to the store: the underlying file is only
/// released once the store *and* every outstanding [`BlockReader`] are gone,
/// which is what makes compaction safe to run against live readers.
pub struct BlockStore {
    inner: Arc<StoreInner>,
}

impl BlockStore {
    /// Open (or create) a block file at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            let mut header = Vec::with_capacity(FILE_HEADER_SIZE as usize);
            header.extend_from_slice(MAGIC);
            header.extend_from_slice(&STORE_VERSION.to_be_bytes());
            header.extend_from_slice(&0u64.to_le_bytes());
            file.write_all(&header)?;
            file.sync_all()?;
        } else {
            if len < FILE_HEADER_SIZE {
                return Err(StoreError::CorruptBlock {
                    offset: 0,
                    reason: "file shorter than header".into(),
                });
            }
            let mut header = [0u8; 8];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut header)?;
            if &header[0..4] != MAGIC {
                return Err(StoreError::InvalidMagic {
                    expected: "CSKB".into(),
                    actual: String::from_utf8_lossy(&header[0..4]).into(),
                });
            }
            let version = u32::from_be_bytes(header[4..8].try_into().expect("length checked"));
            if version != STORE_VERSION {
                return Err(StoreError::UnsupportedVersion(version));
            }
        }

        let end = file.metadata()?.len();
        Ok(Self {
            inner: Arc::new(StoreInner {
                path: path.to_path_buf(),
                state: Mutex::new(FileState { file, end }),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Logical file length in bytes.
    pub fn len(&self) -> u64 {
        self.inner.state.lock().expect("store mutex poisoned").end
    }

    /// Returns `true` if the file holds nothing but the file header.
    pub fn is_empty(&self) -> bool {
        self.len() <= FILE_HEADER_SIZE
    }

    /// Number of outstanding read streams on this store.
    pub fn open_readers(&self) -> usize {
        Arc::strong_count(&self.inner) - 1
    }

    /// Close the store: no new appends or reads may start. Already-open
    /// [`BlockReader`] streams are unaffected and keep reading until dropped.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Append a block at end-of-file and return its id.
    ///
    /// The frame is buffered and written with a single `write_all`; on
    /// failure the file is truncated back to its pre-append length so no
    /// partial trailing garbage survives.
    pub fn append_block(&self, bytes: &[u8]) -> StoreResult<BlockId> {
        self.check_open()?;
        let mut state = self.inner.state.lock().expect("store mutex poisoned");
        let offset = state.end;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE as usize + bytes.len());
        frame.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(bytes).to_le_bytes());
        frame.extend_from_slice(bytes);

        let result = state
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| state.file.write_all(&frame));
        if let Err(e) = result {
            warn!(offset, error = %e, "append failed; truncating to pre-append length");
            if let Err(trunc_err) = state.file.set_len(offset) {
                warn!(offset, error = %trunc_err, "truncate after failed append also failed");
            }
            return Err(e.into());
        }

        state.end = offset + frame.len() as u64;
        debug!(offset, len = bytes.len(), "block appended");
        Ok(BlockId::from_offset(offset))
    }

    /// Read a whole block's payload, verifying its CRC.
    pub fn read_block(&self, id: BlockId) -> StoreResult<Vec<u8>> {
        self.check_open()?;
        read_block_inner(&self.inner, id)
    }

    /// Payload length of a block.
    pub fn block_len(&self, id: BlockId) -> StoreResult<u64> {
        self.check_open()?;
        let (len, _) = read_frame_header(&self.inner, id)?;
        Ok(len)
    }

    /// Open a read stream bounded to `[start, end)` of the block's payload.
    ///
    /// The stream holds a reference to the store for its lifetime; the
    /// store's file cannot be deallocated while the stream is open.
    pub fn open_read_range(&self, id: BlockId, start: u64, end: u64) -> StoreResult<BlockReader> {
        self.check_open()?;
        let (len, _) = read_frame_header(&self.inner, id)?;
        if start > end || end > len {
            return Err(StoreError::RangeOutOfBounds { start, end, len });
        }
        Ok(BlockReader {
            inner: Arc::clone(&self.inner),
            pos: id.offset() + FRAME_HEADER_SIZE + start,
            remaining: end - start,
        })
    }

    /// Append the serialized registry as the header block and commit the
    /// leading pointer to it.
    ///
    /// The block is followed by a BLAKE3 checksum of its payload; the
    /// pointer update is the last write and is fsynced, making it the commit
    /// point for a single-file save.
    pub fn write_header(&self, payload: &[u8]) -> StoreResult<BlockId> {
        let id = self.append_block(payload)?;
        let checksum = blake3::hash(payload);

        let mut state = self.inner.state.lock().expect("store mutex poisoned");
        let checksum_offset = state.end;
        state.file.seek(SeekFrom::Start(checksum_offset))?;
        state.file.write_all(checksum.as_bytes())?;
        state.end = checksum_offset + HEADER_CHECKSUM_SIZE;
        state.file.sync_all()?;

        state.file.seek(SeekFrom::Start(POINTER_OFFSET))?;
        state.file.write_all(&id.offset().to_le_bytes())?;
        state.file.sync_all()?;

        debug!(offset = id.offset(), len = payload.len(), "header block committed");
        Ok(id)
    }

    /// Read the registry header block, if one has been committed.
    ///
    /// Returns `Ok(None)` for a store that has never had a header written.
    pub fn read_header(&self) -> StoreResult<Option<Vec<u8>>> {
        self.check_open()?;
        let mut pointer = [0u8; 8];
        self.inner.read_exact_at(POINTER_OFFSET, &mut pointer)?;
        let offset = u64::from_le_bytes(pointer);
        if offset == 0 {
            return Ok(None);
        }

        let payload = read_block_inner(&self.inner, BlockId::from_offset(offset))?;
        let checksum_offset = offset + FRAME_HEADER_SIZE + payload.len() as u64;
        let mut stored = [0u8; HEADER_CHECKSUM_SIZE as usize];
        self.inner
            .read_exact_at(checksum_offset, &mut stored)
            .map_err(|e| StoreError::CorruptHeader(format!("checksum unreadable: {e}")))?;
        if blake3::hash(&payload).as_bytes() != &stored {
            return Err(StoreError::CorruptHeader("checksum mismatch".into()));
        }
        Ok(Some(payload))
    }
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("path", &self.inner.path)
            .field("len", &self.len())
            .field("open_readers", &self.open_readers())
            .finish()
    }
}

fn read_frame_header(inner: &StoreInner, id: BlockId) -> StoreResult<(u64, u32)> {
    let offset = id.offset();
    let end = inner.state.lock().expect("store mutex poisoned").end;
    // Checked: offsets near u64::MAX (the unassigned sentinel included)
    // must not wrap the bounds test.
    let frame_end = offset.checked_add(FRAME_HEADER_SIZE);
    if offset < FILE_HEADER_SIZE || frame_end.map_or(true, |fe| fe > end) {
        return Err(StoreError::CorruptBlock {
            offset,
            reason: "offset outside file".into(),
        });
    }
    let mut header = [0u8; FRAME_HEADER_SIZE as usize];
    inner.read_exact_at(offset, &mut header)?;
    let len = u32::from_le_bytes(header[0..4].try_into().expect("length checked")) as u64;
    let crc = u32::from_le_bytes(header[4..8].try_into().expect("length checked"));
    if offset + FRAME_HEADER_SIZE + len > end {
        return Err(StoreError::CorruptBlock {
            offset,
            reason: "payload extends beyond file".into(),
        });
    }
    Ok((len, crc))
}

fn read_block_inner(inner: &StoreInner, id: BlockId) -> StoreResult<Vec<u8>> {
    let (len, expected_crc) = read_frame_header(inner, id)?;
    let mut payload = vec![0u8; len as usize];
    inner.read_exact_at(id.offset() + FRAME_HEADER_SIZE, &mut payload)?;
    if crc32fast::hash(&payload) != expected_crc {
        return Err(StoreError::CrcMismatch { offset: id.offset() });
    }
    Ok(payload)
}

/// Read stream bounded to a byte range of one block's payload.
///
/// Holds a shared reference to the store; dropping the reader releases it.
/// The reader deliberately ignores the store's closed flag so that streams
/// opened before `close()` keep working.
pub struct BlockReader {
    inner: Arc<StoreInner>,
    pos: u64,
    remaining: u64,
}

impl BlockReader {
    /// Bytes left to read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Read everything left in the range.
    pub fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.remaining as usize);
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for BlockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.remaining as usize);
        let n = self.inner.read_at(self.pos, &mut buf[..want])?;
        self.pos += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl std::fmt::Debug for BlockReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockReader")
            .field("pos", &self.pos)
            .field("remaining", &self.remaining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, BlockStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(&dir.path().join("db.cask")).unwrap();
        (dir, store)
    }

    #[test]
    fn append_and_read_roundtrip() {
        let (_dir, store) = open_temp();
        let id = store.append_block(b"hello blocks").unwrap();
        assert_eq!(store.read_block(id).unwrap(), b"hello blocks");
    }

    #[test]
    fn append_returns_increasing_ids() {
        let (_dir, store) = open_temp();
        let a = store.append_block(b"first").unwrap();
        let b = store.append_block(b"second").unwrap();
        let c = store.append_block(b"third").unwrap();
        assert!(a < b && b < c);
        assert_eq!(store.read_block(a).unwrap(), b"first");
        assert_eq!(store.read_block(b).unwrap(), b"second");
        assert_eq!(store.read_block(c).unwrap(), b"third");
    }

    #[test]
    fn empty_block() {
        let (_dir, store) = open_temp();
        let id = store.append_block(b"").unwrap();
        assert_eq!(store.read_block(id).unwrap(), b"");
        assert_eq!(store.block_len(id).unwrap(), 0);
    }

    #[test]
    fn reopen_preserves_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.cask");
        let id = {
            let store = BlockStore::open(&path).unwrap();
            store.append_block(b"persistent").unwrap()
        };
        let store = BlockStore::open(&path).unwrap();
        assert_eq!(store.read_block(id).unwrap(), b"persistent");
    }

    #[test]
    fn bogus_offset_is_corrupt() {
        let (_dir, store) = open_temp();
        store.append_block(b"data").unwrap();
        let err = store.read_block(BlockId::from_offset(1 << 40)).unwrap_err();
        assert!(matches!(err, StoreError::CorruptBlock { .. }));
    }

    #[test]
    fn unassigned_sentinel_is_corrupt_not_a_panic() {
        let (_dir, store) = open_temp();
        store.append_block(b"data").unwrap();

        let err = store.read_block(BlockId::UNASSIGNED).unwrap_err();
        assert!(matches!(err, StoreError::CorruptBlock { .. }));
        let err = store.open_read_range(BlockId::UNASSIGNED, 0, 1).unwrap_err();
        assert!(matches!(err, StoreError::CorruptBlock { .. }));
        let err = store.block_len(BlockId::UNASSIGNED).unwrap_err();
        assert!(matches!(err, StoreError::CorruptBlock { .. }));
    }

    #[test]
    fn crc_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.cask");
        let id = {
            let store = BlockStore::open(&path).unwrap();
            store.append_block(b"soon to be corrupted").unwrap()
        };

        // Flip a payload byte on disk.
        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            let payload_start = id.offset() + FRAME_HEADER_SIZE;
            file.seek(SeekFrom::Start(payload_start)).unwrap();
            let mut byte = [0u8; 1];
            file.read_exact(&mut byte).unwrap();
            byte[0] ^= 0xFF;
            file.seek(SeekFrom::Start(payload_start)).unwrap();
            file.write_all(&byte).unwrap();
        }

        let store = BlockStore::open(&path).unwrap();
        let err = store.read_block(id).unwrap_err();
        assert!(matches!(err, StoreError::CrcMismatch { .. }));
    }

    #[test]
    fn open_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cask");
        std::fs::write(&path, b"BADMAGIC00000000").unwrap();
        let err = BlockStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMagic { .. }));
    }

    #[test]
    fn open_rejects_bad_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cask");
        let mut data = Vec::new();
        data.extend_from_slice(b"CSKB");
        data.extend_from_slice(&99u32.to_be_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        std::fs::write(&path, &data).unwrap();
        let err = BlockStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion(99)));
    }

    #[test]
    fn read_range_is_bounded() {
        let (_dir, store) = open_temp();
        let id = store.append_block(b"0123456789").unwrap();

        let mut reader = store.open_read_range(id, 2, 6).unwrap();
        assert_eq!(reader.remaining(), 4);
        let bytes = reader.read_to_vec().unwrap();
        assert_eq!(bytes, b"2345");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn read_range_rejects_out_of_bounds() {
        let (_dir, store) = open_temp();
        let id = store.append_block(b"short").unwrap();
        let err = store.open_read_range(id, 0, 100).unwrap_err();
        assert!(matches!(err, StoreError::RangeOutOfBounds { .. }));
        let err = store.open_read_range(id, 4, 2).unwrap_err();
        assert!(matches!(err, StoreError::RangeOutOfBounds { .. }));
    }

    #[test]
    fn read_range_in_small_chunks() {
        let (_dir, store) = open_temp();
        let id = store.append_block(b"abcdefgh").unwrap();
        let mut reader = store.open_read_range(id, 0, 8).unwrap();

        let mut out = Vec::new();
        let mut chunk = [0u8; 3];
        loop {
            let n = reader.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, b"abcdefgh");
    }

    #[test]
    fn close_blocks_new_operations() {
        let (_dir, store) = open_temp();
        let id = store.append_block(b"data").unwrap();
        store.close();
        assert!(matches!(store.append_block(b"more"), Err(StoreError::Closed)));
        assert!(matches!(store.read_block(id), Err(StoreError::Closed)));
        assert!(matches!(store.open_read_range(id, 0, 1), Err(StoreError::Closed)));
    }

    #[test]
    fn open_reader_survives_close() {
        let (_dir, store) = open_temp();
        let id = store.append_block(b"still readable").unwrap();
        let mut reader = store.open_read_range(id, 0, 14).unwrap();
        store.close();
        assert_eq!(reader.read_to_vec().unwrap(), b"still readable");
    }

    #[test]
    fn readers_are_counted() {
        let (_dir, store) = open_temp();
        let id = store.append_block(b"counted").unwrap();
        assert_eq!(store.open_readers(), 0);

        let r1 = store.open_read_range(id, 0, 7).unwrap();
        let r2 = store.open_read_range(id, 0, 3).unwrap();
        assert_eq!(store.open_readers(), 2);

        drop(r1);
        assert_eq!(store.open_readers(), 1);
        drop(r2);
        assert_eq!(store.open_readers(), 0);
    }

    #[test]
    fn header_roundtrip() {
        let (_dir, store) = open_temp();
        assert!(store.read_header().unwrap().is_none());

        store.append_block(b"some block").unwrap();
        store.write_header(b"registry image").unwrap();
        assert_eq!(store.read_header().unwrap().unwrap(), b"registry image");
    }

    #[test]
    fn header_survives_reopen_and_later_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.cask");
        {
            let store = BlockStore::open(&path).unwrap();
            store.write_header(b"v1").unwrap();
        }
        {
            let store = BlockStore::open(&path).unwrap();
            // Appends after reopen leave the committed header untouched.
            store.append_block(b"new data").unwrap();
            assert_eq!(store.read_header().unwrap().unwrap(), b"v1");
            store.write_header(b"v2").unwrap();
        }
        let store = BlockStore::open(&path).unwrap();
        assert_eq!(store.read_header().unwrap().unwrap(), b"v2");
    }

    #[test]
    fn header_checksum_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.cask");
        let id = {
            let store = BlockStore::open(&path).unwrap();
            store.write_header(b"registry image").unwrap()
        };

        // Corrupt the stored checksum (leaving the frame CRC intact).
        {
            let checksum_pos = id.offset() + FRAME_HEADER_SIZE + b"registry image".len() as u64;
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(checksum_pos)).unwrap();
            let mut byte = [0u8; 1];
            file.read_exact(&mut byte).unwrap();
            byte[0] ^= 0xFF;
            file.seek(SeekFrom::Start(checksum_pos)).unwrap();
            file.write_all(&byte).unwrap();
        }

        let store = BlockStore::open(&path).unwrap();
        let err = store.read_header().unwrap_err();
        assert!(matches!(err, StoreError::CorruptHeader(_)));
    }
}
