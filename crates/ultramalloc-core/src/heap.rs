//! Block heap: best-fit search, split and coalesce over mapped arenas.
//!
//! Blocks form one singly linked list in acquisition order. Splitting keeps
//! a block's remainder right behind it, so the blocks of one arena always
//! form a contiguous, address-ordered run of the list. Arenas are appended
//! at the tail and are generally not adjacent in memory; coalescing
//! therefore only folds list neighbours that share an arena and touch.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use crate::arena::{ArenaRegion, acquire_arena, release_arena};
use crate::block::{
    ALIGNMENT, BlockHeader, BlockView, HEADER_SIZE, MIN_BLOCK_SIZE, POISON_BYTE, align,
};
use crate::config::{AllocatorConfig, SafetyLevel};
use crate::error::AllocError;
use crate::log::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog, LogEvent};
use crate::site::CallSite;

/// Point-in-time summary of heap occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Payload plus header bytes of every block.
    pub total_bytes: usize,
    /// Payload bytes of used blocks.
    pub used_bytes: usize,
    /// Payload bytes of free blocks.
    pub free_bytes: usize,
    pub block_count: usize,
    pub free_blocks: usize,
    pub arena_count: usize,
    /// Bytes requested from the OS across all arenas.
    pub mapped_bytes: usize,
}

impl HeapStats {
    /// Share of blocks that are free, in percent.
    #[must_use]
    pub fn fragmentation_percent(&self) -> f64 {
        if self.block_count == 0 {
            return 0.0;
        }
        self.free_blocks as f64 / self.block_count as f64 * 100.0
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== MEMORY STATISTICS =====")?;
        writeln!(f, "Total heap memory: {} bytes", self.total_bytes)?;
        writeln!(f, "Used memory: {} bytes", self.used_bytes)?;
        writeln!(f, "Free memory: {} bytes", self.free_bytes)?;
        writeln!(f, "Total blocks: {}", self.block_count)?;
        writeln!(f, "Free blocks: {}", self.free_blocks)?;
        writeln!(f, "Arenas: {}", self.arena_count)?;
        writeln!(f, "Fragmentation: {:.2}%", self.fragmentation_percent())?;
        writeln!(f, "=============================")
    }
}

/// Outcome of [`BlockHeap::resize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resize {
    /// The block now holds at least the requested size at the same address.
    InPlace,
    /// The caller must move the data; `old_size` is the current block size.
    Move { old_size: usize },
}

/// List of blocks carved from OS arenas.
pub(crate) struct BlockHeap {
    head: *mut BlockHeader,
    arenas: Vec<ArenaRegion>,
    next_arena_id: u32,
    mode: SafetyLevel,
    used_blocks: usize,
    used_bytes: usize,
    log: LifecycleLog,
    shut_down: bool,
}

// SAFETY: every block pointer refers to arena memory owned exclusively by
// this heap, and all access goes through `&mut self` behind the heap lock.
unsafe impl Send for BlockHeap {}

impl fmt::Debug for BlockHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHeap")
            .field("mode", &self.mode)
            .field("stats", &self.stats())
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

struct Blocks<'a> {
    current: *mut BlockHeader,
    _heap: PhantomData<&'a BlockHeap>,
}

impl Iterator for Blocks<'_> {
    type Item = NonNull<BlockHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = NonNull::new(self.current)?;
        // SAFETY: non-null links always point at live headers.
        self.current = unsafe { (*block.as_ptr()).next };
        Some(block)
    }
}

/// Returns true if `b` is `a`'s successor in the same arena, starting
/// exactly where `a`'s payload ends.
///
/// # Safety
///
/// Both pointers must name live headers.
unsafe fn touching(a: *mut BlockHeader, b: *mut BlockHeader) -> bool {
    let (Some(a), Some(b)) = (NonNull::new(a), NonNull::new(b)) else {
        return false;
    };
    // SAFETY: caller guarantees both headers are live.
    let same_arena = unsafe { a.as_ref().arena == b.as_ref().arena };
    same_arena && BlockHeader::end_addr(a) == b.as_ptr() as usize
}

impl BlockHeap {
    pub(crate) fn new(config: &AllocatorConfig) -> Self {
        Self {
            head: ptr::null_mut(),
            arenas: Vec::new(),
            next_arena_id: 0,
            mode: config.mode,
            used_blocks: 0,
            used_bytes: 0,
            log: LifecycleLog::new(config.log_level, config.log_capacity),
            shut_down: false,
        }
    }

    fn iter(&self) -> Blocks<'_> {
        Blocks {
            current: self.head,
            _heap: PhantomData,
        }
    }

    fn tail(&self) -> Option<NonNull<BlockHeader>> {
        self.iter().last()
    }

    pub(crate) fn note(
        &mut self,
        level: AllocatorLogLevel,
        event: LogEvent,
        details: impl FnOnce() -> String,
    ) {
        if self.log.enabled(level) {
            let (blocks, bytes) = (self.used_blocks, self.used_bytes);
            self.log.push(level, event, details(), blocks, bytes);
        }
    }

    /// Smallest free block of at least `size` bytes; the first one wins
    /// ties and an exact fit ends the scan.
    pub(crate) fn find_best_fit(&self, size: usize) -> Option<NonNull<BlockHeader>> {
        let mut best: Option<(NonNull<BlockHeader>, usize)> = None;
        for block in self.iter() {
            // SAFETY: iterator only yields live headers.
            let header = unsafe { block.as_ref() };
            if !header.is_free() || header.size < size {
                continue;
            }
            if best.is_none_or(|(_, best_size)| header.size < best_size) {
                best = Some((block, header.size));
                if header.size == size {
                    break;
                }
            }
        }
        best.map(|(block, _)| block)
    }

    /// Carve the tail of `block` into a new free block if at least
    /// [`MIN_BLOCK_SIZE`] bytes would remain after a header. Returns true
    /// if a split happened.
    ///
    /// # Safety
    ///
    /// `block` must be a live header of this heap and `size` a multiple of
    /// [`ALIGNMENT`].
    pub(crate) unsafe fn split(&mut self, block: NonNull<BlockHeader>, size: usize) -> bool {
        let raw = block.as_ptr();
        // SAFETY: caller guarantees `block` is live.
        let (current, arena, next) = unsafe { ((*raw).size, (*raw).arena, (*raw).next) };
        let Some(remaining) = current
            .checked_sub(size)
            .and_then(|rest| rest.checked_sub(HEADER_SIZE))
        else {
            return false;
        };
        if remaining < MIN_BLOCK_SIZE {
            return false;
        }
        // SAFETY: `size + HEADER_SIZE + remaining == current`, so the new
        // header and its payload lie inside `block`'s old payload.
        unsafe {
            let at = BlockHeader::payload(block).add(size);
            let rest = BlockHeader::write(at, remaining, arena, true);
            (*rest.as_ptr()).next = next;
            (*raw).next = rest.as_ptr();
            (*raw).size = size;
        }
        true
    }

    /// Fold every free block into a free, touching list predecessor.
    /// Returns the number of blocks absorbed.
    pub(crate) fn merge_adjacent_free(&mut self) -> usize {
        let mut merged = 0;
        let mut current = self.head;
        while !current.is_null() {
            // SAFETY: non-null links always point at live headers.
            unsafe {
                let next = (*current).next;
                if next.is_null() {
                    break;
                }
                if (*current).is_free() && (*next).is_free() && touching(current, next) {
                    (*current).size += HEADER_SIZE + (*next).size;
                    (*current).next = (*next).next;
                    merged += 1;
                } else {
                    current = next;
                }
            }
        }
        merged
    }

    /// Map a new arena for exactly `size` payload bytes and append its
    /// (used) block at the tail.
    pub(crate) fn grow_list(&mut self, size: usize) -> Result<NonNull<BlockHeader>, AllocError> {
        let id = self.next_arena_id;
        let (region, block) = acquire_arena(size, id)?;
        self.next_arena_id = self.next_arena_id.wrapping_add(1);
        self.arenas.push(region);
        match self.tail() {
            // SAFETY: the tail is a live header.
            Some(tail) => unsafe { (*tail.as_ptr()).next = block.as_ptr() },
            None => self.head = block.as_ptr(),
        }
        let arenas = self.arenas.len();
        self.note(
            AllocatorLogLevel::Debug,
            LogEvent::new("arena", "grow", "mapped")
                .ptr(region.start())
                .size(region.len)
                .arena(id),
            || format!("arenas={arenas}"),
        );
        Ok(block)
    }

    /// Hand out a block for `size` requested bytes.
    pub(crate) fn allocate(
        &mut self,
        size: usize,
        symbol: &'static str,
        site: CallSite,
    ) -> Result<NonNull<u8>, AllocError> {
        if self.shut_down {
            return Err(AllocError::ShutDown);
        }
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let aligned = align(size);

        let (block, path) = match self.find_best_fit(aligned) {
            Some(block) => {
                // SAFETY: best fit returned a live free header of this heap.
                unsafe {
                    (*block.as_ptr()).set_free(false);
                    self.split(block, aligned);
                }
                (block, "best_fit")
            }
            None => match self.grow_list(aligned) {
                Ok(block) => (block, "new_arena"),
                Err(err) => {
                    self.note(
                        AllocatorLogLevel::Warn,
                        LogEvent::new(symbol, "alloc", "oom").size(size),
                        || format!("site={site} error={err}"),
                    );
                    return Err(err);
                }
            },
        };

        // SAFETY: `block` is live and now owned by the caller.
        let (block_size, arena) = unsafe { ((*block.as_ptr()).size, (*block.as_ptr()).arena) };
        self.used_blocks += 1;
        self.used_bytes += block_size;
        let payload = BlockHeader::payload(block);
        self.note(
            AllocatorLogLevel::Trace,
            LogEvent::new(symbol, "alloc", "success")
                .ptr(payload.as_ptr() as usize)
                .size(size)
                .arena(arena),
            || format!("path={path} block_size={block_size} site={site}"),
        );
        Ok(payload)
    }

    /// Find the header behind a payload pointer.
    ///
    /// With validation on, the pointer must be the payload of a block in the
    /// list. With validation off it is trusted.
    fn locate(&self, ptr: NonNull<u8>) -> Result<NonNull<BlockHeader>, AllocError> {
        let addr = ptr.as_ptr() as usize;
        let unknown = AllocError::UnknownPointer { addr };
        if !self.mode.validates_pointers() {
            return BlockHeader::from_payload(ptr).ok_or(unknown);
        }
        self.iter()
            .find(|block| BlockHeader::payload(*block) == ptr)
            .ok_or(unknown)
    }

    fn locate_logged(
        &mut self,
        ptr: NonNull<u8>,
        symbol: &'static str,
        site: CallSite,
    ) -> Result<NonNull<BlockHeader>, AllocError> {
        self.locate(ptr).inspect_err(|err| {
            self.note(
                AllocatorLogLevel::Warn,
                LogEvent::new(symbol, "unknown_pointer", "rejected").ptr(ptr.as_ptr() as usize),
                || format!("site={site} error={err}"),
            );
        })
    }

    /// Mark the block behind `ptr` free and coalesce. Returns the size of
    /// the released block.
    pub(crate) fn release(
        &mut self,
        ptr: NonNull<u8>,
        site: CallSite,
    ) -> Result<usize, AllocError> {
        if self.shut_down {
            return Err(AllocError::ShutDown);
        }
        let addr = ptr.as_ptr() as usize;
        let block = self.locate_logged(ptr, "free", site)?;
        // SAFETY: `block` was found in the list (or trusted in `Off` mode).
        let (size, arena, was_free) = unsafe {
            let header = block.as_ref();
            (header.size, header.arena, header.is_free())
        };
        if was_free && self.mode.validates_pointers() {
            self.note(
                AllocatorLogLevel::Warn,
                LogEvent::new("free", "double_release", "rejected")
                    .ptr(addr)
                    .size(size)
                    .arena(arena),
                || format!("site={site}"),
            );
            return Err(AllocError::DoubleRelease { addr });
        }

        // SAFETY: as above; the payload spans `size` bytes.
        unsafe {
            (*block.as_ptr()).set_free(true);
            if self.mode.poisons_on_release() {
                ptr.as_ptr().write_bytes(POISON_BYTE, size);
            }
        }
        if !was_free {
            self.used_blocks = self.used_blocks.saturating_sub(1);
            self.used_bytes = self.used_bytes.saturating_sub(size);
        }
        let merged = self.merge_adjacent_free();
        self.note(
            AllocatorLogLevel::Trace,
            LogEvent::new("free", "free", "success")
                .ptr(addr)
                .size(size)
                .arena(arena),
            || format!("merged={merged} site={site}"),
        );
        Ok(size)
    }

    /// Try to make the block behind `ptr` hold `size` bytes without moving
    /// it: shrink (or keep) it in place, or absorb a free touching successor.
    pub(crate) fn resize(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        site: CallSite,
    ) -> Result<Resize, AllocError> {
        if self.shut_down {
            return Err(AllocError::ShutDown);
        }
        let addr = ptr.as_ptr() as usize;
        let block = self.locate_logged(ptr, "realloc", site)?;
        let raw = block.as_ptr();
        // SAFETY: `block` was found in the list (or trusted in `Off` mode).
        let (current, next, arena) = unsafe { ((*raw).size, (*raw).next, (*raw).arena) };
        // SAFETY: as above.
        if self.mode.validates_pointers() && unsafe { (*raw).is_free() } {
            self.note(
                AllocatorLogLevel::Warn,
                LogEvent::new("realloc", "use_after_release", "rejected").ptr(addr),
                || format!("site={site}"),
            );
            return Err(AllocError::UseAfterRelease { addr });
        }
        let aligned = align(size);

        let path = if current >= aligned {
            "shrink_in_place"
        } else if !next.is_null()
            // SAFETY: non-null links always point at live headers.
            && unsafe { (*next).is_free() && touching(raw, next) }
            && current
                .saturating_add(HEADER_SIZE)
                // SAFETY: as above.
                .saturating_add(unsafe { (*next).size })
                >= aligned
        {
            // SAFETY: `next` is the free block physically following `block`.
            unsafe {
                (*raw).size += HEADER_SIZE + (*next).size;
                (*raw).next = (*next).next;
            }
            "grow_into_next"
        } else {
            self.note(
                AllocatorLogLevel::Trace,
                LogEvent::new("realloc", "resize", "move").ptr(addr).size(size),
                || format!("old_size={current} site={site}"),
            );
            return Ok(Resize::Move { old_size: current });
        };

        // SAFETY: `block` is live and at least `aligned` bytes long. A split
        // links its free remainder right behind it.
        let resized = unsafe {
            if self.split(block, aligned)
                && self.mode.poisons_on_release()
                && let Some(rest) = NonNull::new((*raw).next)
            {
                BlockHeader::payload(rest)
                    .as_ptr()
                    .write_bytes(POISON_BYTE, rest.as_ref().size);
            }
            (*raw).size
        };
        // A shrink remainder may touch a free successor.
        self.merge_adjacent_free();
        self.used_bytes = self.used_bytes.saturating_sub(current) + resized;
        self.note(
            AllocatorLogLevel::Trace,
            LogEvent::new("realloc", "resize", "in_place")
                .ptr(addr)
                .size(size)
                .arena(arena),
            || format!("path={path} old_size={current} new_size={resized} site={site}"),
        );
        Ok(Resize::InPlace)
    }

    pub(crate) fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            arena_count: self.arenas.len(),
            mapped_bytes: self.arenas.iter().map(|a| a.len).sum(),
            ..HeapStats::default()
        };
        for block in self.iter() {
            // SAFETY: iterator only yields live headers.
            let header = unsafe { block.as_ref() };
            stats.block_count += 1;
            stats.total_bytes += HEADER_SIZE + header.size;
            if header.is_free() {
                stats.free_blocks += 1;
                stats.free_bytes += header.size;
            } else {
                stats.used_bytes += header.size;
            }
        }
        stats
    }

    pub(crate) fn blocks(&self) -> Vec<BlockView> {
        self.iter()
            .map(|block| {
                // SAFETY: iterator only yields live headers.
                let header = unsafe { block.as_ref() };
                BlockView {
                    addr: BlockHeader::payload(block).as_ptr() as usize,
                    size: header.size,
                    free: header.is_free(),
                    arena: header.arena,
                }
            })
            .collect()
    }

    /// Walk the list and check its structural invariants.
    pub(crate) fn verify(&self) -> Result<HeapStats, AllocError> {
        let corrupted = |addr, reason| AllocError::Corrupted { addr, reason };
        let limit = self
            .arenas
            .iter()
            .map(|a| a.len / HEADER_SIZE)
            .sum::<usize>();
        let mut covered = vec![0usize; self.arenas.len()];
        let mut prev: Option<(u32, usize, bool)> = None;
        let mut steps = 0usize;

        for block in self.iter() {
            let addr = block.as_ptr() as usize;
            steps += 1;
            if steps > limit {
                return Err(corrupted(addr, "block list does not terminate"));
            }
            if addr % ALIGNMENT != 0 {
                return Err(corrupted(addr, "misaligned block header"));
            }
            let Some(idx) = self
                .arenas
                .iter()
                .position(|a| a.contains_range(addr, HEADER_SIZE))
            else {
                return Err(corrupted(addr, "block header outside every arena"));
            };
            let region = self.arenas[idx];
            // SAFETY: the header lies inside a live mapping.
            let header = unsafe { block.as_ref() };
            if !header.has_valid_tag() {
                return Err(corrupted(addr, "invalid block tag"));
            }
            if header.arena != region.id {
                return Err(corrupted(addr, "block names the wrong arena"));
            }
            if header.size % ALIGNMENT != 0 {
                return Err(corrupted(addr, "unaligned block size"));
            }
            if !region.contains_range(addr, HEADER_SIZE + header.size) {
                return Err(corrupted(addr, "block overruns its arena"));
            }
            match prev {
                Some((arena, end, was_free)) if arena == header.arena => {
                    if end != addr {
                        return Err(corrupted(addr, "arena neighbours do not touch"));
                    }
                    if was_free && header.is_free() {
                        return Err(corrupted(addr, "touching free blocks left unmerged"));
                    }
                }
                _ => {
                    if addr != region.start() {
                        return Err(corrupted(addr, "arena run does not start at its base"));
                    }
                }
            }
            covered[idx] += HEADER_SIZE + header.size;
            prev = Some((header.arena, BlockHeader::end_addr(block), header.is_free()));
        }

        if let Some((region, _)) = self
            .arenas
            .iter()
            .zip(&covered)
            .find(|(region, covered)| region.len != **covered)
        {
            return Err(corrupted(region.start(), "arena not exactly tiled by its blocks"));
        }
        let stats = self.stats();
        if stats.used_bytes != self.used_bytes
            || stats.block_count - stats.free_blocks != self.used_blocks
        {
            return Err(corrupted(0, "usage counters out of sync with block list"));
        }
        Ok(stats)
    }

    pub(crate) fn lifecycle_log(&self) -> Vec<AllocatorLogRecord> {
        self.log.snapshot()
    }

    pub(crate) fn drain_lifecycle_log(&mut self) -> Vec<AllocatorLogRecord> {
        self.log.drain()
    }

    /// Unmap every arena and forget the block list. Returns the number of
    /// arenas released; later calls release nothing.
    pub(crate) fn teardown(&mut self) -> usize {
        if self.shut_down {
            return 0;
        }
        let arenas = std::mem::take(&mut self.arenas);
        self.head = ptr::null_mut();
        self.used_blocks = 0;
        self.used_bytes = 0;
        self.shut_down = true;
        for region in &arenas {
            // SAFETY: each region was mapped by `grow_list` and is released
            // exactly once; the list pointing into it was cleared above.
            if let Err(err) = unsafe { release_arena(region) } {
                self.note(
                    AllocatorLogLevel::Error,
                    LogEvent::new("shutdown", "unmap", "failed")
                        .ptr(region.start())
                        .size(region.len)
                        .arena(region.id),
                    || err.to_string(),
                );
            }
        }
        self.note(
            AllocatorLogLevel::Info,
            LogEvent::new("shutdown", "teardown", "success"),
            || format!("arenas_released={}", arenas.len()),
        );
        arenas.len()
    }
}

impl Drop for BlockHeap {
    fn drop(&mut self) {
        self.teardown();
    }
}
