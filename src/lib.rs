#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod alloc;
pub mod code;
pub mod event;
pub mod hook;
pub mod patcher;
pub mod symbol;

pub use event::EventBus;
#[cfg(target_arch = "x86_64")]
pub use hook::inline::InlineEngine;
pub use hook::registry::{HookDescriptor, HookRecord, HookState, OriginSlot, Registry};
pub use hook::{Engine, EngineGuard, Target};
pub use symbol::SymbolResolver;
