//! Image-base discovery from the process memory-mapping list.

use std::fs;

/// Base the platform loader reports for certain load orders; a known
/// artifact, treated as "no base found".
const PLACEHOLDER_BASE: usize = 0x8000;

/// Lowest mapped address of `module` in the current process, read from
/// `/proc/self/maps`.
pub(crate) fn image_base(module: &str) -> Option<usize> {
    let maps = fs::read_to_string("/proc/self/maps").ok()?;
    parse_image_base(&maps, module)
}

/// Finds the first line whose path contains `module` and parses the start of
/// its address range. Mappings are listed in ascending order, so the first
/// match is the lowest mapped address.
pub(crate) fn parse_image_base(maps: &str, module: &str) -> Option<usize> {
    if module.is_empty() {
        return None;
    }
    let line = maps.lines().find(|line| line.contains(module))?;
    let start = line.split('-').next()?;
    let base = usize::from_str_radix(start, 16).ok()?;
    (base != PLACEHOLDER_BASE).then_some(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
00400000-00452000 r-xp 00000000 08:02 173521 /usr/bin/dictpen
00651000-00652000 rw-p 00051000 08:02 173521 /usr/bin/dictpen
7f3c60000000-7f3c60021000 rw-p 00000000 00:00 0
7f3c635e3000-7f3c637a2000 r-xp 00000000 08:02 135522 /usr/lib/libc-2.27.so
";

    #[test]
    fn finds_lowest_mapping_of_module() {
        assert_eq!(parse_image_base(SAMPLE, "dictpen"), Some(0x400000));
        assert_eq!(parse_image_base(SAMPLE, "libc-2.27.so"), Some(0x7f3c635e3000));
    }

    #[test]
    fn missing_module_yields_none() {
        assert_eq!(parse_image_base(SAMPLE, "launcher"), None);
        assert_eq!(parse_image_base(SAMPLE, ""), None);
    }

    #[test]
    fn placeholder_base_is_unresolved() {
        let maps = "00008000-00452000 r-xp 00000000 08:02 11 /usr/bin/dictpen\n";
        assert_eq!(parse_image_base(maps, "dictpen"), None);
    }

    #[test]
    fn resolves_base_of_current_executable() {
        let exe = std::env::current_exe().unwrap();
        let name = exe.file_name().unwrap().to_str().unwrap().to_owned();
        assert!(image_base(&name).is_some());
    }
}
