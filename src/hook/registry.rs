//! Declared-hook manifest, typed origin slots and the bootstrap installer.
//!
//! Hooks are not registered by static initializers; the embedding library
//! declares a descriptor table and installs it in declared order, once,
//! during its bootstrap.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{error, info, warn};

use super::{Engine, EngineGuard, Target};
use crate::symbol::SymbolResolver;

/// Process-lifetime slot holding the trampoline pointer of one hook.
///
/// The slot is non-null exactly when installation succeeded. A detour reads
/// its preserved original through [`OriginSlot::typed`]; before
/// installation (or after a failed one) that returns `None` and the detour
/// must degrade.
pub struct OriginSlot(AtomicUsize);

impl OriginSlot {
    /// An empty slot, usable in statics.
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Raw trampoline address; zero until installation succeeds.
    pub fn address(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Whether the owning hook was installed.
    pub fn is_installed(&self) -> bool {
        self.address() != 0
    }

    /// The preserved original as a typed function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be a function-pointer type matching the hooked function's
    /// exact signature and calling convention.
    pub unsafe fn typed<F: Copy>(&self) -> Option<F> {
        debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<usize>());
        let address = self.address();
        if address == 0 {
            None
        } else {
            Some(mem::transmute_copy(&address))
        }
    }

    /// Publishes the trampoline address.
    fn set(&self, address: usize) {
        self.0.store(address, Ordering::Release);
    }
}

impl Default for OriginSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// One declared interception point: a diagnostic name, the target identity,
/// the detour entry point, and the slot the trampoline is published into.
///
/// The descriptor table is fixed at build time; it is the only
/// configuration the hook layer consumes.
pub struct HookDescriptor {
    /// Human-readable name used in logs
    pub name: &'static str,
    /// Where to install
    pub target: Target,
    /// Replacement function, ABI-compatible with the target
    pub detour: *const u8,
    /// Slot that receives the trampoline pointer on success
    pub origin: &'static OriginSlot,
}

/// Installation lifecycle of a declared hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookState {
    /// Declared but not yet processed
    Declared,
    /// Target resolved, engine invoked
    Installing,
    /// Active for the remainder of the process (terminal)
    Installed,
    /// Resolution or installation failed; the original code runs unmodified
    FailedToInstall,
}

/// Post-bootstrap record of one declared hook.
pub struct HookRecord {
    /// Name from the descriptor
    pub name: &'static str,
    /// Target from the descriptor
    pub target: Target,
    /// Resolved address, if resolution got that far
    pub resolved: Option<usize>,
    /// Final state
    pub state: HookState,
}

/// Installs declared hooks in order and keeps them alive.
pub struct Registry<E: Engine> {
    /// The underlying hooking engine
    engine: E,
    /// Guards of successfully installed hooks, held for the registry's lifetime
    guards: Vec<E::Guard>,
    /// One record per processed descriptor, in declared order
    records: Vec<HookRecord>,
}

impl<E: Engine> Registry<E> {
    /// Creates an empty registry around `engine`.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            guards: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Installs every descriptor in declared order.
    ///
    /// A failure is logged and recorded, never retried, and never aborts
    /// the remaining installations: the corresponding feature silently does
    /// not activate while the host keeps running its original code.
    ///
    /// # Safety
    ///
    /// Every descriptor's detour must be ABI-compatible with its target,
    /// and no target may be installed twice.
    pub unsafe fn install_all(&mut self, resolver: &SymbolResolver, hooks: &[HookDescriptor]) {
        for hook in hooks {
            self.install(resolver, hook);
        }
        info!("{} of {} hooks installed", self.installed(), self.records.len());
    }

    /// Installs a single declared hook; returns whether it took effect.
    ///
    /// # Safety
    ///
    /// Same contract as [`Registry::install_all`].
    pub unsafe fn install(&mut self, resolver: &SymbolResolver, hook: &HookDescriptor) -> bool {
        let mut record = HookRecord {
            name: hook.name,
            target: hook.target,
            resolved: None,
            state: HookState::Declared,
        };

        let address = match hook.target {
            Target::Address(address) => Some(address),
            Target::Symbol(name) => resolver.resolve(name),
        };
        let Some(address) = address else {
            warn!("skipping hook {}: {} is unresolved", hook.name, hook.target);
            record.state = HookState::FailedToInstall;
            self.records.push(record);
            return false;
        };

        record.resolved = Some(address);
        record.state = HookState::Installing;

        match self.engine.install(address as *const u8, hook.detour) {
            Ok(guard) => {
                hook.origin.set(guard.trampoline() as usize);
                self.guards.push(guard);
                record.state = HookState::Installed;
                info!("hooked {} at {address:#x}", hook.name);
                self.records.push(record);
                true
            }
            Err(e) => {
                error!("failed to hook {} ({address:#x}): {e}", hook.name);
                record.state = HookState::FailedToInstall;
                self.records.push(record);
                false
            }
        }
    }

    /// Records of every processed descriptor, in declared order.
    pub fn records(&self) -> &[HookRecord] {
        &self.records
    }

    /// Number of active hooks.
    pub fn installed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == HookState::Installed)
            .count()
    }

    /// Number of hooks that failed to resolve or install.
    pub fn failed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.state == HookState::FailedToInstall)
            .count()
    }
}
