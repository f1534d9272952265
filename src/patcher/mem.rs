//! This module contains a patcher which adjusts memory permissions to patch read-only data

use std::convert::Infallible;

use region::Protection;
use thiserror::Error;

use super::{PatchGuard, Patcher};

/// Errors when using permission patching
#[derive(Debug, Error)]
pub enum PermissionError<E> {
    /// Error when setting memory protections
    #[error("unable to set memory protections: {0}")]
    ProtectionError(#[from] region::Error),
    /// Custom error type from the underlying patcher
    #[error("{0}")]
    CustomError(E),
}

impl From<Infallible> for PermissionError<Infallible> {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

/// This struct wraps patchers to allow them to write to memory that's normally unwritable.
/// It changes the memory permissions of the target, triggers the inner patch, and then
/// reverts the permissions.
///
/// # Safety
///
/// `PermissionWrapper` relies on the size of the patch value to determine how many pages to
/// make writable; pairing it with a patcher that writes more memory than the size of the
/// patch is undefined behavior.
///
/// Casting a `&T` or `&mut T` to a `*mut u8` for use with `PermissionWrapper` can result in
/// undefined behavior because Rust assumes `&T` never changes. The `*mut u8` must be memory
/// not tracked by Rust, or the caller must ensure no tracked reference observes the write.
pub struct PermissionWrapper<P: Patcher> {
    /// Underlying patcher.
    patcher: P,
}

impl<P: Patcher> PermissionWrapper<P> {
    /// Creates a new PermissionWrapper
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }
}

/// Converts a const pointer to a mutable pointer for our [`Patcher::patch`] implementation.
///
/// # Safety
///
/// **THIS FUNCTION DOES NOT CHANGE MEMORY PERMISSIONS.**
///
/// It is not safe to treat the returned value as mutable on its own; only our
/// [`Patcher::patch`] implementation, which lifts the permissions, may write through it.
pub unsafe fn to_mut<T>(ptr: *const T) -> *mut T {
    ptr as _
}

unsafe impl<P> Patcher for PermissionWrapper<P>
where
    P: Patcher,
    PermissionError<P::Error>: From<P::Error>,
{
    type Error = PermissionError<P::Error>;
    type Guard = PermissionGuard<P::Guard>;

    unsafe fn patch(&self, location: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error> {
        let _guard = region::protect_with_handle(location, patch.len(), Protection::READ_WRITE_EXECUTE)?;
        self.patcher
            .patch(location, patch)
            .map(|g| PermissionGuard::guard(g, location, patch.len()))
            .map_err(Into::into)
    }
}

/// Permission guard for the underlying patch guard
pub struct PermissionGuard<G: PatchGuard> {
    /// Underlying patch guard for the wrapped patcher. `Option` so that we can drop it in
    /// our [`Drop::drop`] impl
    guard: Option<G>,
    /// Location of the patch
    location: *const u8,
    /// Length of the patch
    len: usize,
}

impl<G: PatchGuard> PermissionGuard<G> {
    /// Wraps a patcher's guard. When this guard is dropped, the target location is made
    /// writable again so the underlying guard can restore it.
    fn guard(guard: G, location: *const u8, len: usize) -> Self {
        let guard = Some(guard);
        Self {
            guard,
            location,
            len,
        }
    }
}

unsafe impl<G: PatchGuard> PatchGuard for PermissionGuard<G> {}

impl<G: PatchGuard> Drop for PermissionGuard<G> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else { return };
        match unsafe {
            region::protect_with_handle(self.location, self.len, Protection::READ_WRITE_EXECUTE)
        } {
            Ok(_handle) => guard.restore(),
            Err(e) => {
                // restoring without write access would fault inside the host,
                // so the patch stays in place
                log::error!("unable to unprotect {:p} while restoring patch: {e}", self.location);
                std::mem::forget(guard);
            }
        }
    }
}
