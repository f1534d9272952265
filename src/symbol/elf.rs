//! Symbol-table indexing from an on-disk ELF image.

use std::collections::HashMap;

use object::{Object, ObjectKind, ObjectSymbol, ObjectSymbolTable};
use thiserror::Error;

/// Synthetic and compiler-internal symbol categories that never belong in
/// the index: mapping symbols, section names, std template instantiations,
/// typeinfo/vtables, standard-library internals and guard variables.
const EXCLUDED_PREFIXES: [&str; 6] = ["$", ".", "_ZNS", "_ZT", "_ZSt", "_ZGV"];

/// Errors while indexing an image's symbols
#[derive(Debug, Error)]
pub(crate) enum ElfError {
    /// The image is not a parseable object file
    #[error("unable to parse image: {0}")]
    Parse(#[from] object::read::Error),
    /// The image carries no symbol table
    #[error("image has no symbol table (stripped)")]
    Stripped,
}

/// Parses the symbol table of `data` and returns a name-to-address index.
///
/// Position-independent images get their symbol values relocated by
/// `image_base`; fixed-address images keep their link-time values.
pub(crate) fn index_symbols(
    data: &[u8],
    image_base: usize,
) -> Result<HashMap<String, usize>, ElfError> {
    let file = object::File::parse(data)?;
    let table = file.symbol_table().ok_or(ElfError::Stripped)?;
    let position_independent = file.kind() == ObjectKind::Dynamic;

    let mut index = HashMap::new();
    for symbol in table.symbols() {
        let Ok(name) = symbol.name() else { continue };
        let value = symbol.address();
        if !is_indexable(name, value) {
            continue;
        }
        index.insert(
            name.to_owned(),
            runtime_address(value, image_base, position_independent),
        );
    }
    Ok(index)
}

/// Whether a symbol-table entry belongs in the index.
fn is_indexable(name: &str, value: u64) -> bool {
    !name.is_empty()
        && value != 0
        && !EXCLUDED_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// Link-time symbol value to runtime address, per the image's load model.
fn runtime_address(value: u64, image_base: usize, position_independent: bool) -> usize {
    if position_independent {
        image_base.wrapping_add(value as usize)
    } else {
        value as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_synthetic_categories() {
        assert!(is_indexable("_ZN3Foo3bazEv", 0x401000));
        assert!(is_indexable("malloc", 0x1000));
        assert!(!is_indexable("_ZTIN3Foo3BarE", 0x402000)); // typeinfo
        assert!(!is_indexable("_ZNSt6vectorIiSaIiEE4dataEv", 0x1)); // std template
        assert!(!is_indexable("_ZSt4cout", 0x1)); // standard library
        assert!(!is_indexable("_ZGVZN3Foo3getEvE1x", 0x1)); // guard variable
        assert!(!is_indexable("$d", 0x1)); // mapping symbol
        assert!(!is_indexable(".text", 0x1)); // section name
        assert!(!is_indexable("", 0x1));
        assert!(!is_indexable("_ZN3Foo7undefedEv", 0)); // undefined
    }

    #[test]
    fn relocates_only_position_independent_values() {
        assert_eq!(runtime_address(0x401000, 0x5550_0000_0000, true), 0x5550_0040_1000);
        assert_eq!(runtime_address(0x401000, 0x5550_0000_0000, false), 0x401000);
    }
}
