use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info};

use cask_registry::Registry;

use crate::error::{StoreError, StoreResult};
use crate::store::BlockStore;

/// Result of a compaction run.
#[derive(Clone, Debug)]
pub struct CompactReport {
    pub blocks_copied: usize,
    pub old_size: u64,
    pub new_size: u64,
    pub bytes_reclaimed: u64,
}

/// Rebuild the block file at `path`, keeping only blocks reachable from the
/// registry root, and atomically rename the result over the original.
///
/// The rename is the single commit point: a crash before it leaves the
/// original file fully intact, a crash after it leaves the new file fully
/// intact. Existing read streams on the old store keep reading the old
/// (now-unlinked) file until they are dropped; compaction never mutates the
/// old file.
///
/// Returns the freshly opened store, the remapped registry, and a report.
pub fn compact(path: &Path) -> StoreResult<(BlockStore, Registry, CompactReport)> {
    let old_store = BlockStore::open(path)?;
    let header = old_store
        .read_header()?
        .ok_or_else(|| StoreError::CorruptHeader("no header block committed".into()))?;
    let mut registry = Registry::from_bytes(&header)?;

    let reachable = registry.reachable_blocks();
    let old_size = old_store.len();
    debug!(reachable = reachable.len(), old_size, "compaction starting");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    let new_store = BlockStore::open(temp.path())?;

    let mut mapping = HashMap::with_capacity(reachable.len());
    for old_id in &reachable {
        let bytes = old_store.read_block(*old_id)?;
        let new_id = new_store.append_block(&bytes)?;
        mapping.insert(*old_id, new_id);
    }

    registry.remap_blocks(&mapping);
    new_store.write_header(&registry.to_bytes()?)?;
    let new_size = new_store.len();
    new_store.close();
    drop(new_store);

    // Make sure everything hit the disk before the rename commits it.
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| StoreError::Io(e.error))?;

    let report = CompactReport {
        blocks_copied: reachable.len(),
        old_size,
        new_size,
        bytes_reclaimed: old_size.saturating_sub(new_size),
    };
    info!(
        blocks = report.blocks_copied,
        reclaimed = report.bytes_reclaimed,
        "compaction complete"
    );

    let store = BlockStore::open(path)?;
    Ok((store, registry, report))
}
