//! # Symbol
//!
//! Resolves mangled symbol names to runtime addresses in the current
//! process: a static index built from the host executable's on-disk symbol
//! table, with a dynamic-loader fallback for everything else.

mod elf;
mod maps;

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::RwLock;

use log::{error, info, warn};

/// The authoritative translator from symbol name to runtime-callable
/// address for the current process.
///
/// Constructed once during bootstrap and passed by reference to every hook
/// installation site. Index construction is single-threaded; [`resolve`]
/// may afterwards be called concurrently from any host thread. The only
/// post-startup mutation is the insert-if-absent cache fill on a
/// dynamic-resolver hit, guarded by the index lock.
///
/// [`resolve`]: SymbolResolver::resolve
pub struct SymbolResolver {
    /// Name-to-address index; read-mostly after construction
    index: RwLock<HashMap<String, usize>>,
}

impl SymbolResolver {
    /// Builds the index from the currently running executable.
    ///
    /// Construction never fails: an unreadable image, a fully stripped
    /// image, or an undeterminable image base each degrade to an empty
    /// index (logged), leaving every lookup to the dynamic resolver.
    pub fn from_current_exe() -> Self {
        Self {
            index: RwLock::new(Self::index_current_exe()),
        }
    }

    /// Builds the index from an ELF image known to be loaded at
    /// `image_base`.
    pub fn from_elf_image(data: &[u8], image_base: usize) -> Self {
        let index = match elf::index_symbols(data, image_base) {
            Ok(index) => {
                info!("{} symbols loaded", index.len());
                index
            }
            Err(e) => {
                error!("unable to load symbols from image: {e}");
                HashMap::new()
            }
        };
        Self {
            index: RwLock::new(index),
        }
    }

    /// A resolver with no static index; every lookup goes through the
    /// dynamic resolver.
    pub fn empty() -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Index for the current process image, or empty on any failure.
    fn index_current_exe() -> HashMap<String, usize> {
        let exe = match std::env::current_exe() {
            Ok(path) => path,
            Err(e) => {
                error!("unable to locate host image: {e}");
                return HashMap::new();
            }
        };
        let data = match std::fs::read(&exe) {
            Ok(data) => data,
            Err(e) => {
                error!("unable to read host image {}: {e}", exe.display());
                return HashMap::new();
            }
        };
        let module = exe.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let Some(base) = maps::image_base(module) else {
            error!("unable to determine image base of {module}");
            return HashMap::new();
        };
        info!("image base: {base:#x}");
        match elf::index_symbols(&data, base) {
            Ok(index) => {
                info!("{} symbols loaded", index.len());
                index
            }
            Err(e) => {
                error!("unable to load symbols from image: {e}");
                HashMap::new()
            }
        }
    }

    /// Resolves `name` to a runtime address.
    ///
    /// Index misses fall through to the platform dynamic resolver; a hit
    /// there is cached for future lookups. `None` means the caller must
    /// degrade: skip installing the hook, or treat the call as unavailable.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        if let Some(&address) = self.index.read().unwrap().get(name) {
            return Some(address);
        }
        match dynamic_lookup(name) {
            Some(address) => {
                // first writer wins if two threads race on the same name
                let mut index = self.index.write().unwrap();
                Some(*index.entry(name.to_owned()).or_insert(address))
            }
            None => {
                warn!("{name} not found in memory");
                None
            }
        }
    }

    /// Resolves `name` to a typed function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be a function-pointer type matching the target's exact
    /// signature and calling convention; a mismatch is undefined behavior
    /// at call time.
    pub unsafe fn resolve_fn<F: Copy>(&self, name: &str) -> Option<F> {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        let address = self.resolve(name)?;
        Some(std::mem::transmute_copy(&address))
    }

    /// Number of indexed entries, for diagnostics.
    pub fn count(&self) -> usize {
        self.index.read().unwrap().len()
    }
}

/// Resolves an exported name across all loaded modules.
fn dynamic_lookup(name: &str) -> Option<usize> {
    let name = CString::new(name).ok()?;
    let address = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
    if address.is_null() {
        None
    } else {
        Some(address as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::write::{Object, Symbol, SymbolSection};
    use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};

    /// A small ELF image whose symbol table mixes regular mangled methods
    /// with every excluded category.
    fn host_image() -> Vec<u8> {
        let mut image = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let symbols: [(&str, u64); 6] = [
            ("_ZN3Foo3bazEv", 0x401000),
            ("_ZN11YSystemBase6initUiEv", 0x402340),
            ("_ZTIN3Foo3BarE", 0x402000),
            ("_ZSt4cout", 0x403000),
            ("$d", 0x405000),
            ("_ZN3Foo8strippedEv", 0),
        ];
        for (name, value) in symbols {
            image.add_symbol(Symbol {
                name: name.as_bytes().to_vec(),
                value,
                size: 0,
                kind: SymbolKind::Text,
                scope: SymbolScope::Linkage,
                weak: false,
                section: SymbolSection::Absolute,
                flags: SymbolFlags::None,
            });
        }
        image.write().unwrap()
    }

    #[test]
    fn index_round_trip() {
        let resolver = SymbolResolver::from_elf_image(&host_image(), 0);
        assert_eq!(resolver.resolve("_ZN3Foo3bazEv"), Some(0x401000));
        assert_eq!(resolver.resolve("_ZN11YSystemBase6initUiEv"), Some(0x402340));
    }

    #[test]
    fn excluded_categories_never_enter_the_index() {
        let resolver = SymbolResolver::from_elf_image(&host_image(), 0);
        // only the two regular mangled methods survive the filter
        assert_eq!(resolver.count(), 2);
        assert_eq!(resolver.resolve("_ZTIN3Foo3BarE"), None);
        assert_eq!(resolver.resolve("$d"), None);
    }

    #[test]
    fn garbage_image_degrades_to_empty_index() {
        let resolver = SymbolResolver::from_elf_image(b"not an elf", 0);
        assert_eq!(resolver.count(), 0);
    }

    #[test]
    fn dynamic_fallback_is_cached() {
        let resolver = SymbolResolver::empty();
        assert_eq!(resolver.count(), 0);

        let first = resolver.resolve("malloc").expect("malloc is always loaded");
        assert_ne!(first, 0);
        assert_eq!(resolver.count(), 1);

        // second lookup hits the cache, not the resolver
        assert_eq!(resolver.resolve("malloc"), Some(first));
        assert_eq!(resolver.count(), 1);
    }

    #[test]
    fn unresolvable_name_is_none_every_time() {
        let resolver = SymbolResolver::empty();
        assert_eq!(resolver.resolve("_ZN7nowhere8missingEv"), None);
        assert_eq!(resolver.resolve("_ZN7nowhere8missingEv"), None);
        assert_eq!(resolver.count(), 0);
    }

    #[test]
    fn typed_resolution_of_dynamic_symbol() {
        let resolver = SymbolResolver::empty();
        let labs: extern "C" fn(i64) -> i64 =
            unsafe { resolver.resolve_fn("labs") }.expect("labs is always loaded");
        assert_eq!(labs(-5), 5);
    }

    #[test]
    fn indexes_current_executable() {
        let _ = env_logger::builder().is_test(true).try_init();
        // the test binary is unstripped, so construction finds its symtab
        let resolver = SymbolResolver::from_current_exe();
        assert!(resolver.count() > 0);
    }
}
