//! # Patcher
//!
//! Memory patching substrate: overwrite a location while keeping the
//! original bytes, and restore them when the patch is dropped. The hook
//! engine uses this to write detour jumps into read-only text segments.

pub mod byte;
pub mod mem;

/// All patchers save the original contents of the patched location and are
/// able to revert on-command.
///
/// # Safety
///
/// Patchers are inherently unsafe. The implementor must ensure that `patch`
/// writes exactly the bytes it was given and that the returned guard
/// restores the original contents.
pub unsafe trait Patcher {
    /// Error type that can occur when patching. If patching always succeeds,
    /// use [`core::convert::Infallible`].
    type Error;
    /// Guard type for the patch. When the guard is dropped, the location is
    /// restored.
    type Guard: PatchGuard;

    /// Patches a given location.
    ///
    /// # Safety
    ///
    /// This function is intended to be used on arbitrary memory addresses.
    /// The caller must guarantee that `location` is valid for the full
    /// length of the patch and not aliased by any Rust reference.
    unsafe fn patch(&self, location: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error>;
}

/// Guard for a patch.
///
/// # Safety
///
/// The guard must fully restore the location when dropped, even if
/// `restore` is never called.
pub unsafe trait PatchGuard: Sized {
    /// Restores the original value of a patch.
    fn restore(self) {
        // most implementations live in their [`Drop::drop`]
    }
}
