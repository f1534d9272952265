//! This module contains a byte patcher

use std::convert::Infallible;
use std::ptr;

use super::{PatchGuard, Patcher};

/// Patcher for overwriting memory locations with byte arrays.
/// This patcher never fails; the location must already be writable.
#[derive(Default)]
pub struct BytePatcher;

impl BytePatcher {
    /// Creates a new [`BytePatcher`]
    pub fn new() -> Self {
        Self::default()
    }
}

unsafe impl Patcher for BytePatcher {
    type Error = Infallible;
    type Guard = ByteGuard;

    unsafe fn patch(&self, location: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error> {
        Ok(ByteGuard::patch(location, patch))
    }
}

/// Guard for byte-patches
///
/// See [`BytePatcher`].
pub struct ByteGuard {
    /// Original data from `location`
    original: Vec<u8>,
    /// Location of the patch
    location: *mut u8,
}

impl ByteGuard {
    /// Patches a location, returning a guard for unpatching
    ///
    /// # Safety
    ///
    /// `location` must be valid for reads and writes of `patch.len()` bytes
    unsafe fn patch(location: *mut u8, patch: &[u8]) -> Self {
        let mut original = vec![0u8; patch.len()];

        // Safety: caller must pass in a `location` pointer that is valid for
        // the full length of the patch
        ptr::copy_nonoverlapping(location, original.as_mut_ptr(), patch.len());

        let guard = Self { original, location };

        // Safety: caller must ensure that `location` is writable
        ptr::copy_nonoverlapping(patch.as_ptr(), location, patch.len());

        guard
    }
}

unsafe impl PatchGuard for ByteGuard {}

impl Drop for ByteGuard {
    fn drop(&mut self) {
        // Safety: creator must pass in a `location` pointer that is valid
        // and writable for the full length of the patch
        unsafe {
            ptr::copy_nonoverlapping(self.original.as_ptr(), self.location, self.original.len());
        }
    }
}
