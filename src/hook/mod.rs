//! # Hook
//!
//! Detour-based function interception: the engine seam, the declared-hook
//! manifest, typed origin slots and the bootstrap registry.

#[cfg(target_arch = "x86_64")]
pub mod inline;
pub mod registry;

use std::fmt;

/// Identity of an interception point: a literal address inside the host
/// image, or a (mangled) symbol name resolved at bootstrap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// Hook a fixed virtual address
    Address(usize),
    /// Hook the address a symbol name resolves to
    Symbol(&'static str),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Address(address) => write!(f, "{address:#x}"),
            Target::Symbol(name) => f.write_str(name),
        }
    }
}

/// The underlying hooking engine: overwrites a function prologue with a
/// branch to a detour and produces a callable trampoline to the displaced
/// original instructions.
///
/// # Safety
///
/// Implementations patch live code. `install` must leave the target
/// completely untouched when it reports an error.
pub unsafe trait Engine {
    /// Errors the engine can report
    type Error: std::error::Error;
    /// Guard keeping the hook active
    type Guard: EngineGuard;

    /// Redirects calls of the function at `target` to `detour`.
    ///
    /// # Safety
    ///
    /// - `target` must be the entry point of a function whose prologue is
    ///   long enough to displace
    /// - `detour` must be executable code ABI-compatible with the target
    unsafe fn install(
        &self,
        target: *const u8,
        detour: *const u8,
    ) -> Result<Self::Guard, Self::Error>;
}

/// Keeps a hook active and exposes the preserved original.
///
/// # Safety
///
/// The trampoline pointer must remain callable for the guard's entire
/// lifetime, and dropping the guard must restore the target.
pub unsafe trait EngineGuard {
    /// Entry point that executes the displaced prologue and continues into
    /// the unmodified function body.
    fn trampoline(&self) -> *const u8;
}
