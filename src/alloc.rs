//! Executable trampoline buffers, mapped within branch range of the code
//! they displace so that relocated RIP-relative operands stay encodable.

use mmap::{MapOption, MemoryMap};
use std::ptr;
use thiserror::Error;

/// The furthest distance between a target and its trampoline (2 GiB); the
/// limit of a rel32 operand in the displaced prologue.
pub const MAX_DISTANCE: usize = 0x8000_0000;

/// Errors while mapping an executable buffer
#[derive(Debug, Error)]
pub enum AllocError {
    /// No free region could be mapped within branch range of the target
    #[error("no free region within branch range of {0:#x}")]
    OutOfRange(usize),
    /// Error while querying the process memory regions
    #[error("unable to query memory regions: {0}")]
    Query(region::Error),
}

/// A read/write/executable buffer holding relocated prologue code.
pub struct ExecutableBuffer {
    /// Backing anonymous mapping
    map: MemoryMap,
    /// Requested length
    len: usize,
}

impl ExecutableBuffer {
    /// Maps an RWX buffer of at least `len` bytes within [`MAX_DISTANCE`] of
    /// `origin`.
    pub fn near(origin: usize, len: usize) -> Result<Self, AllocError> {
        let range = origin.saturating_sub(MAX_DISTANCE)..origin.saturating_add(MAX_DISTANCE);
        for address in free_addresses(origin) {
            let address = address.map_err(AllocError::Query)?;
            if !range.contains(&address) {
                continue;
            }
            let options = [
                MapOption::MapReadable,
                MapOption::MapWritable,
                MapOption::MapExecutable,
                MapOption::MapAddr(address as *const u8),
            ];
            if let Ok(map) = MemoryMap::new(len, &options) {
                // the address is only a hint; keep searching if the kernel
                // placed the mapping out of range
                let start = map.data() as usize;
                if range.contains(&start) && range.contains(&(start + len)) {
                    return Ok(Self { map, len });
                }
            }
        }
        Err(AllocError::OutOfRange(origin))
    }

    /// Start of the buffer.
    pub fn as_ptr(&self) -> *const u8 {
        self.map.data()
    }

    /// Requested length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Usable capacity (the mapping is page-rounded).
    pub fn capacity(&self) -> usize {
        self.map.len()
    }

    /// Copies `code` into the buffer at `offset`. Callers must stay within
    /// [`Self::capacity`]; the hook engine checks sizes before writing.
    pub fn write(&mut self, offset: usize, code: &[u8]) {
        assert!(offset + code.len() <= self.capacity());
        unsafe {
            ptr::copy_nonoverlapping(code.as_ptr(), self.map.data().add(offset), code.len());
        }
    }
}

// The buffer is an exclusive owner of its mapping; the raw pointer inside
// `MemoryMap` is what blocks the auto-impl.
unsafe impl Send for ExecutableBuffer {}

/// Scans for unmapped page-aligned addresses, first above `origin`, then
/// below, out to [`MAX_DISTANCE`] in each direction.
fn free_addresses(origin: usize) -> impl Iterator<Item = Result<usize, region::Error>> {
    let page = region::page::size();
    let start = origin & !(page - 1);
    let after = FreeScan {
        current: start,
        limit: origin.saturating_add(MAX_DISTANCE),
        upward: true,
        page,
    };
    let before = FreeScan {
        current: start,
        limit: origin.saturating_sub(MAX_DISTANCE),
        upward: false,
        page,
    };
    after.chain(before)
}

/// An iterator over free (unmapped) addresses in one direction.
struct FreeScan {
    /// Current position of the scan
    current: usize,
    /// Inclusive bound in the scan direction
    limit: usize,
    /// Scan direction
    upward: bool,
    /// Cached page size
    page: usize,
}

impl Iterator for FreeScan {
    type Item = Result<usize, region::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current > 0
            && if self.upward {
                self.current < self.limit
            } else {
                self.current > self.limit
            }
        {
            match region::query(self.current as *const ()) {
                Ok(region) => {
                    // mapped; skip past (or before) the whole region
                    self.current = if self.upward {
                        region.as_range().end
                    } else {
                        region.as_range().start.saturating_sub(self.page)
                    };
                }
                Err(region::Error::UnmappedRegion) => {
                    let found = self.current;
                    self.current = if self.upward {
                        self.current + self.page
                    } else {
                        self.current.saturating_sub(self.page)
                    };
                    return Some(Ok(found));
                }
                Err(error) => return Some(Err(error)),
            }
        }
        None
    }
}
