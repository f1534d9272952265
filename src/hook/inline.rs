//! Inline detour engine for x86_64.
//!
//! Overwrites the first whole instructions of the target with an absolute
//! jump to the detour, after relocating those instructions into a nearby
//! executable buffer followed by a jump back into the unmodified body. The
//! buffer is the trampoline callers use to invoke the pre-hook logic.

use std::convert::Infallible;

use thiserror::Error;

use super::{Engine, EngineGuard};
use crate::alloc::{AllocError, ExecutableBuffer};
use crate::code::x64::{self, RelocateError, JMP_ABS_LEN};
use crate::patcher::byte::{ByteGuard, BytePatcher};
use crate::patcher::mem::{PermissionError, PermissionGuard, PermissionWrapper};
use crate::patcher::Patcher;

/// Errors while installing an inline detour
#[derive(Debug, Error)]
pub enum InlineError {
    /// The target prologue cannot be displaced
    #[error(transparent)]
    Relocate(#[from] RelocateError),
    /// No trampoline buffer could be mapped near the target
    #[error(transparent)]
    Alloc(#[from] AllocError),
    /// The detour jump could not be written over the prologue
    #[error("unable to patch target prologue: {0}")]
    Patch(#[from] PermissionError<Infallible>),
}

/// The x86_64 inline-detour engine.
pub struct InlineEngine {
    /// Writes the detour jump through read-only text
    patcher: PermissionWrapper<BytePatcher>,
}

impl InlineEngine {
    /// Creates a new engine.
    pub fn new() -> Self {
        Self {
            patcher: PermissionWrapper::new(BytePatcher::new()),
        }
    }
}

impl Default for InlineEngine {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Engine for InlineEngine {
    type Error = InlineError;
    type Guard = InlineGuard;

    unsafe fn install(
        &self,
        target: *const u8,
        detour: *const u8,
    ) -> Result<Self::Guard, Self::Error> {
        let patch = x64::jmp_abs(detour as usize);
        let (instructions, covered) = x64::displaced_instructions(target, patch.len())?;

        // block encoding may grow rel8 branches to rel32; leave slack
        let mut buffer = ExecutableBuffer::near(target as usize, covered * 2 + JMP_ABS_LEN + 8)?;
        let code = x64::encode_at(&instructions, buffer.as_ptr() as u64)?;
        if code.len() + JMP_ABS_LEN > buffer.capacity() {
            return Err(InlineError::Relocate(RelocateError::BufferTooSmall {
                needed: code.len() + JMP_ABS_LEN,
                available: buffer.capacity(),
            }));
        }
        buffer.write(0, &code);
        // resume in the unmodified body right after the displaced prologue
        buffer.write(code.len(), &x64::jmp_abs(target as usize + covered));

        let patch_guard = self.patcher.patch(target as *mut u8, &patch)?;
        Ok(InlineGuard {
            _patch: patch_guard,
            trampoline: buffer,
        })
    }
}

/// Keeps the detour patch and its trampoline alive; dropping it restores
/// the original prologue.
pub struct InlineGuard {
    /// Guard over the patched prologue bytes
    _patch: PermissionGuard<ByteGuard>,
    /// Relocated prologue plus the jump back into the body
    trampoline: ExecutableBuffer,
}

unsafe impl EngineGuard for InlineGuard {
    fn trampoline(&self) -> *const u8 {
        self.trampoline.as_ptr()
    }
}
