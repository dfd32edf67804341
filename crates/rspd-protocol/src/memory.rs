//! # Memory Bridge
//!
//! Bounded live reads and writes of target memory with a single cache line.
//!
//! GDB tends to re-read the same small window (the stack top, the bytes
//! around PC) many times between resumes. The line holds the last read that
//! fit in its capacity. It is never patched in place: a write that overlaps
//! it, a failed write, or a resume drops it.

use rspd_core::types::{Address, AddressRange};
use rspd_core::{DebugError, Target};

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats
{
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
struct CacheLine
{
    base: Address,
    bytes: Vec<u8>,
}

impl CacheLine
{
    fn range(&self) -> AddressRange
    {
        AddressRange::new(self.base, self.bytes.len())
    }

    fn slice(&self, range: &AddressRange) -> Option<&[u8]>
    {
        if !self.range().contains(range) {
            return None;
        }
        let start = usize::try_from(range.start.offset_from(self.base)?).ok()?;
        self.bytes.get(start..start + range.len)
    }
}

/// Single-line memory cache
#[derive(Debug)]
pub struct MemoryCache
{
    line: Option<CacheLine>,
    capacity: usize,
    stats: CacheStats,
}

impl MemoryCache
{
    /// Create an empty cache whose line holds at most `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self
    {
        Self {
            line: None,
            capacity,
            stats: CacheStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats
    {
        self.stats
    }

    /// Range currently cached, if any.
    #[must_use]
    pub fn cached_range(&self) -> Option<AddressRange>
    {
        self.line.as_ref().map(CacheLine::range)
    }

    /// Read `len` bytes at `address`, from the line when it covers the range.
    ///
    /// ## Errors
    ///
    /// Whatever the target reports for `read_memory`.
    pub fn read(&mut self, target: &dyn Target, address: Address, len: usize) -> Result<Vec<u8>, DebugError>
    {
        let range = AddressRange::new(address, len);
        if let Some(bytes) = self.line.as_ref().and_then(|line| line.slice(&range)) {
            self.stats.hits += 1;
            return Ok(bytes.to_vec());
        }

        self.stats.misses += 1;
        let bytes = target.read_memory(address, len)?;
        if !bytes.is_empty() && bytes.len() <= self.capacity {
            self.line = Some(CacheLine {
                base: address,
                bytes: bytes.clone(),
            });
        }
        Ok(bytes)
    }

    /// Write `data` at `address` and drop the line if it could be stale.
    ///
    /// ## Errors
    ///
    /// Whatever the target reports for `write_memory`.
    pub fn write(&mut self, target: &mut dyn Target, address: Address, data: &[u8]) -> Result<usize, DebugError>
    {
        let outcome = target.write_memory(address, data);
        if outcome.is_err() {
            self.invalidate();
        } else {
            self.invalidate_range(&AddressRange::new(address, data.len()));
        }
        outcome
    }

    /// Drop the line.
    pub fn invalidate(&mut self)
    {
        self.line = None;
    }

    /// Drop the line if it overlaps `range`.
    pub fn invalidate_range(&mut self, range: &AddressRange)
    {
        if self.line.as_ref().is_some_and(|line| line.range().intersects(range)) {
            tracing::trace!(%range, "memory cache line invalidated");
            self.line = None;
        }
    }
}
