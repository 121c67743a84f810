//! Paged access to table files through a bounded pool of buffer pages.
//!
//! A [`Pager`] owns a fixed pool of buffer pages, a table of open files and
//! two replacement queues (pinned / unpinned). [`Pager::get_page`] associates
//! a file block with a buffer page, pinning it so the pool will not steal the
//! slot while the caller holds a cursor into it; [`Pager::unpin`] releases the
//! page again, flushing it if it was modified.
//!
//! Every file is a pure sequence of [`BLOCK_SIZE`]-byte blocks. Each block
//! starts with a [`PAGE_HEADER_SIZE`]-byte header whose first four bytes hold
//! the header size itself (an integrity marker) and whose next four bytes
//! hold `free_pos`, the offset of the first unused byte.

mod page;
mod profiler;
mod queue;


pub use page::Page;
pub use profiler::IoProfiler;

use common::{DbError, DbResult};
use log::debug;
use queue::PageQueues;
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/// Block size in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Number of bytes reserved as page header at the start of every block.
pub const PAGE_HEADER_SIZE: usize = 20;

/// Size of an on-disk integer in bytes.
pub const INT_SIZE: usize = 4;

/// Default number of buffer pages in the pool.
pub const POOL_PAGES: usize = 10;

/// Default maximum number of simultaneously open files.
pub const MAX_OPEN_FILES: usize = 10;

/// Largest record that fits a block next to the page header.
pub const MAX_RECORD_LEN: usize = BLOCK_SIZE - PAGE_HEADER_SIZE;

/// Index of an open file in the pager's file table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileId(usize);

/// Identity of a file block: which file, which block number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockId {
    file: FileId,
    blk_nr: u32,
}

/// Handle to a buffer page returned by [`Pager::get_page`].
///
/// A handle remembers which block it was issued for; accessing it after the
/// slot has been reused for another block is reported as an error instead of
/// silently reading foreign bytes.
#[derive(Clone, Copy, Debug)]
pub struct PageHandle {
    slot: usize,
    block: BlockId,
}

impl PageHandle {
    /// Block number of the underlying file block.
    pub fn block_nr(&self) -> u32 {
        self.block.blk_nr
    }
}

/// Per-open-file state.
#[derive(Debug)]
struct FileHandle {
    name: String,
    file: File,
    num_blocks: u32,
}

/// Buffer pool over block-aligned files.
#[derive(Debug)]
pub struct Pager {
    dir: PathBuf,
    pool: Vec<Page>,
    files: Vec<Option<FileHandle>>,
    max_open_files: usize,
    queues: PageQueues,
    profiler: IoProfiler,
}

impl Pager {
    /// Open a pager rooted at `dir`, creating the directory if missing.
    ///
    /// This is the one-shot system-directory initialization: all files the
    /// pager touches live under `dir`, nothing outside it.
    pub fn new(dir: impl Into<PathBuf>) -> DbResult<Self> {
        Self::with_capacity(dir, POOL_PAGES, MAX_OPEN_FILES)
    }

    /// Open a pager with explicit pool and file-table capacities.
    pub fn with_capacity(
        dir: impl Into<PathBuf>,
        pool_pages: usize,
        max_open_files: usize,
    ) -> DbResult<Self> {
        assert!(pool_pages > 0, "pool_pages must be > 0");
        assert!(max_open_files > 0, "max_open_files must be > 0");
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        debug!("db dir: {}", dir.display());
        Ok(Self {
            dir,
            pool: (0..pool_pages).map(|_| Page::new()).collect(),
            files: Vec::new(),
            max_open_files,
            queues: PageQueues::new(),
            profiler: IoProfiler::new(),
        })
    }

    /// The system directory this pager operates in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get a pinned page for block `blk_nr` of `fname`, opening (and creating)
    /// the file on demand.
    ///
    /// `blk_nr = -1` means the last block (block 0 of an empty file);
    /// `blk_nr = num_blocks` appends a new block. Anything past that is out of
    /// range. The returned page's cursor sits right after the header.
    pub fn get_page(&mut self, fname: &str, blk_nr: i64) -> DbResult<PageHandle> {
        let file = self.open_file(fname)?;
        let num_blocks = self.file(file)?.num_blocks;

        let blk_nr = if blk_nr == -1 {
            num_blocks.saturating_sub(1) as i64
        } else {
            blk_nr
        };
        if blk_nr < 0 || blk_nr > num_blocks as i64 {
            return Err(DbError::Storage(format!(
                "block {} of \"{}\" out of range [0, {}]",
                blk_nr, fname, num_blocks
            )));
        }
        let blk_nr = blk_nr as u32;
        if blk_nr == num_blocks {
            self.file_mut(file)?.num_blocks = num_blocks + 1;
        }

        let block = BlockId { file, blk_nr };
        if let Some(slot) = self.find_cached(block) {
            self.queues.touch(slot);
            if !self.pool[slot].pinned {
                self.queues.turn_pinned(slot);
                self.pool[slot].pinned = true;
            }
            self.pool[slot].set_pos_begin();
            return Ok(PageHandle { slot, block });
        }

        let slot = self.available_slot()?;
        self.pool[slot].block = Some(block);
        self.queues.turn_pinned(slot);
        self.pool[slot].pinned = true;
        if let Err(err) = self.read_slot(slot) {
            self.release_slot(slot);
            return Err(err);
        }
        self.pool[slot].set_pos_begin();
        Ok(PageHandle { slot, block })
    }

    /// Get the last page of `fname` with the cursor moved to `free_pos`, so
    /// the next put writes past the existing data.
    pub fn get_page_for_append(&mut self, fname: &str) -> DbResult<PageHandle> {
        let handle = self.get_page(fname, -1)?;
        let page = self.page(handle)?;
        let free = page.free_pos();
        page.set_current_pos(free);
        Ok(handle)
    }

    /// Get the page for the block after `handle`'s, allocating one past the
    /// end of the file when `handle` is the last block.
    pub fn get_next_page(&mut self, handle: PageHandle) -> DbResult<PageHandle> {
        let name = self.file(handle.block.file)?.name.clone();
        self.get_page(&name, handle.block.blk_nr as i64 + 1)
    }

    /// Access the page behind a handle.
    pub fn page(&mut self, handle: PageHandle) -> DbResult<&mut Page> {
        let page = self
            .pool
            .get_mut(handle.slot)
            .ok_or_else(|| DbError::Storage("page handle out of range".into()))?;
        if page.block != Some(handle.block) {
            return Err(DbError::Storage(format!(
                "buffer page for block {} was replaced",
                handle.block.blk_nr
            )));
        }
        Ok(page)
    }

    /// Immutable access to the page behind a handle.
    pub fn page_ref(&self, handle: PageHandle) -> DbResult<&Page> {
        let page = self
            .pool
            .get(handle.slot)
            .ok_or_else(|| DbError::Storage("page handle out of range".into()))?;
        if page.block != Some(handle.block) {
            return Err(DbError::Storage(format!(
                "buffer page for block {} was replaced",
                handle.block.blk_nr
            )));
        }
        Ok(page)
    }

    /// Re-pin a page that is still cached and read its block.
    pub fn pin(&mut self, handle: PageHandle) -> DbResult<()> {
        self.page(handle)?;
        if !self.pool[handle.slot].pinned {
            self.queues.turn_pinned(handle.slot);
            self.pool[handle.slot].pinned = true;
        }
        self.read_slot(handle.slot)
    }

    /// Unpin the page, making it eligible for replacement. A dirty page is
    /// written back to disk.
    ///
    /// Unpinning a handle whose slot was already reclaimed is a no-op.
    pub fn unpin(&mut self, handle: PageHandle) -> DbResult<()> {
        if self.page(handle).is_err() {
            debug!("unpin of replaced block {}", handle.block.blk_nr);
            return Ok(());
        }
        if self.pool[handle.slot].pinned {
            self.queues.turn_unpinned(handle.slot);
            self.pool[handle.slot].pinned = false;
        }
        if self.pool[handle.slot].dirty {
            self.write_slot(handle.slot)?;
        }
        Ok(())
    }

    /// Explicitly read the page's block from disk.
    ///
    /// A dirty page is left untouched: the in-memory version is authoritative.
    pub fn read_page(&mut self, handle: PageHandle) -> DbResult<()> {
        self.page(handle)?;
        self.read_slot(handle.slot)
    }

    /// Explicitly write the page's block to disk. Clean pages are skipped.
    pub fn write_page(&mut self, handle: PageHandle) -> DbResult<()> {
        self.page(handle)?;
        self.write_slot(handle.slot)
    }

    /// True when the page cursor sits at the end of the last block of its
    /// file, i.e. there is no further record to read.
    pub fn peof(&self, handle: PageHandle) -> DbResult<bool> {
        let page = self.page_ref(handle)?;
        let fh = self.file(handle.block.file)?;
        Ok(handle.block.blk_nr + 1 >= fh.num_blocks && page.eop())
    }

    /// Number of blocks in `fname`, opening the file on demand.
    pub fn file_num_blocks(&mut self, fname: &str) -> DbResult<u32> {
        let file = self.open_file(fname)?;
        Ok(self.file(file)?.num_blocks)
    }

    /// Release all cached blocks of `fname` (flushing dirty ones) and close
    /// the file. Closing a file that is not open is a no-op.
    pub fn close_file(&mut self, fname: &str) -> DbResult<()> {
        let Some(idx) = self.find_file(fname) else {
            return Ok(());
        };
        for slot in 0..self.pool.len() {
            let owned = self.pool[slot]
                .block
                .map_or(false, |b| b.file == FileId(idx));
            if owned {
                if self.pool[slot].dirty {
                    self.write_slot(slot)?;
                }
                self.release_slot(slot);
            }
        }
        self.files[idx] = None;
        Ok(())
    }

    /// Flush every dirty page, release the whole pool and close all files.
    /// Safe to call more than once.
    pub fn terminate(&mut self) -> DbResult<()> {
        for slot in 0..self.pool.len() {
            if self.pool[slot].block.is_some() {
                if self.pool[slot].dirty {
                    self.write_slot(slot)?;
                }
                self.pool[slot].reset();
            }
        }
        self.queues.clear();
        for fh in self.files.iter_mut() {
            *fh = None;
        }
        Ok(())
    }

    /// I/O counters since the last reset.
    pub fn profiler(&self) -> &IoProfiler {
        &self.profiler
    }

    pub fn profiler_reset(&mut self) {
        self.profiler.reset();
    }

    /// Dump files, pages and queues at debug level.
    pub fn log_state(&self, context: &str) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        debug!("---- pager state ({}) ----", context);
        for (i, fh) in self.files.iter().enumerate() {
            if let Some(fh) = fh {
                debug!("  file {}: \"{}\", {} blocks", i, fh.name, fh.num_blocks);
            }
        }
        for (i, page) in self.pool.iter().enumerate() {
            if let Some(block) = page.block {
                debug!(
                    "  page {}: blk {} of file {}, cur {}, free {}, {}, {}",
                    i,
                    block.blk_nr,
                    block.file.0,
                    page.current_pos(),
                    page.free_pos(),
                    if page.pinned { "pinned" } else { "unpinned" },
                    if page.dirty { "dirty" } else { "clean" },
                );
            }
        }
        debug!(
            "  queues: pinned {:?}, unpinned {:?}",
            self.queues.pinned_slots(),
            self.queues.unpinned_slots()
        );
    }

    fn find_file(&self, fname: &str) -> Option<usize> {
        self.files
            .iter()
            .position(|fh| fh.as_ref().map_or(false, |fh| fh.name == fname))
    }

    fn open_file(&mut self, fname: &str) -> DbResult<FileId> {
        if let Some(idx) = self.find_file(fname) {
            return Ok(FileId(idx));
        }
        let open = self.files.iter().filter(|fh| fh.is_some()).count();
        if open >= self.max_open_files {
            return Err(DbError::Storage(format!(
                "cannot open \"{}\": the limit of {} open files is reached",
                fname, self.max_open_files
            )));
        }
        let path = self.dir.join(fname);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let num_blocks = (file.metadata()?.len() / BLOCK_SIZE as u64) as u32;
        let fh = FileHandle {
            name: fname.to_string(),
            file,
            num_blocks,
        };
        match self.files.iter().position(|f| f.is_none()) {
            Some(idx) => {
                self.files[idx] = Some(fh);
                Ok(FileId(idx))
            }
            None => {
                self.files.push(Some(fh));
                Ok(FileId(self.files.len() - 1))
            }
        }
    }

    fn file(&self, id: FileId) -> DbResult<&FileHandle> {
        self.files
            .get(id.0)
            .and_then(|fh| fh.as_ref())
            .ok_or_else(|| DbError::Storage("file is no longer open".into()))
    }

    fn file_mut(&mut self, id: FileId) -> DbResult<&mut FileHandle> {
        self.files
            .get_mut(id.0)
            .and_then(|fh| fh.as_mut())
            .ok_or_else(|| DbError::Storage("file is no longer open".into()))
    }

    fn find_cached(&self, block: BlockId) -> Option<usize> {
        self.pool.iter().position(|p| p.block == Some(block))
    }

    /// Pick a buffer slot for a new block: an unused slot if any exist, else
    /// the head of the unpinned queue, else the head of the pinned queue
    /// (force-unpinning it). The chosen slot is flushed if dirty, reset and
    /// left at the tail of the unpinned queue.
    fn available_slot(&mut self) -> DbResult<usize> {
        if self.queues.total_len() < self.pool.len() {
            let slot = self
                .pool
                .iter()
                .position(|p| p.block.is_none())
                .ok_or_else(|| DbError::Storage("buffer pool accounting is inconsistent".into()))?;
            self.queues.push_unpinned(slot);
            return Ok(slot);
        }
        let slot = match self.queues.pop_unpinned_head() {
            Some(slot) => slot,
            None => {
                let slot = self
                    .queues
                    .pop_pinned_head()
                    .ok_or_else(|| DbError::Storage("buffer pool has no pages".into()))?;
                debug!("buffer pool fully pinned, force-unpinning slot {}", slot);
                self.pool[slot].pinned = false;
                slot
            }
        };
        if self.pool[slot].dirty {
            self.write_slot(slot)?;
        }
        self.pool[slot].reset();
        self.queues.push_unpinned(slot);
        Ok(slot)
    }

    /// Drop a slot's block association entirely, returning it to the unused
    /// state.
    fn release_slot(&mut self, slot: usize) {
        self.queues.remove(slot);
        self.pool[slot].reset();
    }

    /// Read the slot's block from disk. Dirty pages are authoritative and are
    /// not re-read. A block past the end of the file (zero bytes read) is
    /// initialized empty; a non-empty block must carry the header marker of
    /// this system.
    fn read_slot(&mut self, slot: usize) -> DbResult<()> {
        if self.pool[slot].dirty {
            return Ok(());
        }
        let block = self.pool[slot]
            .block
            .ok_or_else(|| DbError::Storage("read on an unused page".into()))?;
        let offset = block.blk_nr as u64 * BLOCK_SIZE as u64;
        {
            let fh = self
                .files
                .get_mut(block.file.0)
                .and_then(|fh| fh.as_mut())
                .ok_or_else(|| DbError::Storage("file is no longer open".into()))?;
            fh.file.seek(SeekFrom::Start(offset))?;
            let page = &mut self.pool[slot];
            let mut filled = 0;
            while filled < BLOCK_SIZE {
                let n = fh.file.read(&mut page.buf_mut()[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                // A freshly allocated block: start it empty. Marking it dirty
                // makes the block reach the file even if no record follows.
                page.set_free_pos(PAGE_HEADER_SIZE);
                return Ok(());
            }
        }
        self.profiler.record_read(block.file.0, block.blk_nr);
        self.pool[slot].check_header_marker()?;
        self.pool[slot].load_free_pos_from_header()
    }

    /// Write the slot's block to disk. Clean pages are skipped.
    fn write_slot(&mut self, slot: usize) -> DbResult<()> {
        if !self.pool[slot].dirty {
            return Ok(());
        }
        let block = self.pool[slot]
            .block
            .ok_or_else(|| DbError::Storage("write on an unused page".into()))?;
        self.profiler.record_write(block.file.0, block.blk_nr);
        self.pool[slot].dirty = false;
        let offset = block.blk_nr as u64 * BLOCK_SIZE as u64;
        let fh = self
            .files
            .get_mut(block.file.0)
            .and_then(|fh| fh.as_mut())
            .ok_or_else(|| DbError::Storage("file is no longer open".into()))?;
        fh.file.seek(SeekFrom::Start(offset))?;
        fh.file.write_all(self.pool[slot].buf())?;
        Ok(())
    }

    #[cfg(test)]
    fn queue_lens(&self) -> (usize, usize) {
        (self.queues.pinned_len(), self.queues.unpinned_len())
    }

    #[cfg(test)]
    fn pool_pages(&self) -> &[Page] {
        &self.pool
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            log::error!("pager shutdown failed: {}", err);
        }
    }
}
