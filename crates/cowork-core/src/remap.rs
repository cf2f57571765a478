//! Bidirectional path remapping between the client's virtual namespace and
//! the host filesystem.
//!
//! The desktop client addresses files as `/sessions/<name>/...`; on the host
//! they live under the client's data directory. Rewrites operate on raw
//! bytes so JSON payloads are preserved byte-for-byte except at remap sites.
//! Substitution replaces every occurrence of the prefix, not only occurrences
//! at path boundaries; the prefixes are namespace-scoped and unique enough
//! for this to be safe.

use std::path::Path;

use tracing::debug;

/// A single from/to byte substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRemap {
    /// Bytes to search for.
    pub from: Vec<u8>,
    /// Replacement bytes.
    pub to: Vec<u8>,
}

impl PathRemap {
    /// Create a remap pair.
    pub fn new(from: impl Into<Vec<u8>>, to: impl Into<Vec<u8>>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Per-process remap state.
///
/// Forward remapping (virtual to real) applies to stdin payloads before they
/// reach the child: the session prefix first, then each mount remap. Reverse
/// remapping (real to virtual) applies to output lines, and is only enabled
/// when the virtual prefix exists as a filesystem entry; otherwise the
/// client would receive paths it cannot open.
#[derive(Debug, Clone, Default)]
pub struct RemapSet {
    vm_prefix: Vec<u8>,
    real_prefix: Vec<u8>,
    reverse_enabled: bool,
    mounts: Vec<PathRemap>,
}

impl RemapSet {
    /// Build the remap state for one process.
    ///
    /// Prefix remapping is disabled when either prefix is empty. Mount
    /// remaps apply to forward rewrites regardless.
    #[must_use]
    pub fn new(vm_prefix: &str, real_prefix: &str, mounts: Vec<PathRemap>) -> Self {
        let prefixed = !vm_prefix.is_empty() && !real_prefix.is_empty();
        let reverse_enabled = prefixed && Path::new(vm_prefix).exists();
        if prefixed && !reverse_enabled {
            debug!(
                vm_prefix,
                "virtual path not accessible, disabling output reverse-mapping"
            );
        }
        Self {
            vm_prefix: if prefixed {
                vm_prefix.as_bytes().to_vec()
            } else {
                Vec::new()
            },
            real_prefix: if prefixed {
                real_prefix.as_bytes().to_vec()
            } else {
                Vec::new()
            },
            reverse_enabled,
            mounts,
        }
    }

    /// A remap set that leaves all data untouched.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether output lines will be rewritten back to virtual paths.
    #[must_use]
    pub const fn reverse_enabled(&self) -> bool {
        self.reverse_enabled
    }

    /// Rewrite stdin bytes from virtual paths to real paths.
    #[must_use]
    pub fn apply_forward(&self, data: &[u8]) -> Vec<u8> {
        let mut data = if self.vm_prefix.is_empty() {
            data.to_vec()
        } else {
            replace_all(data, &self.vm_prefix, &self.real_prefix)
        };
        for remap in &self.mounts {
            data = replace_all(&data, &remap.from, &remap.to);
        }
        data
    }

    /// Rewrite an output line from real paths back to virtual paths.
    #[must_use]
    pub fn apply_reverse(&self, line: &[u8]) -> Vec<u8> {
        if self.reverse_enabled {
            replace_all(line, &self.real_prefix, &self.vm_prefix)
        } else {
            line.to_vec()
        }
    }
}

/// Replace every occurrence of `needle` in `haystack` with `replacement`.
///
/// First-match scanning over the full buffer; an empty needle returns the
/// haystack unchanged.
#[must_use]
pub fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return haystack.to_vec();
    }

    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out.extend_from_slice(&haystack[i..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_all_basic() {
        assert_eq!(replace_all(b"a/x/b/x/c", b"/x", b"/y"), b"a/y/b/y/c");
        assert_eq!(replace_all(b"no match", b"/x", b"/y"), b"no match");
        assert_eq!(replace_all(b"", b"/x", b"/y"), b"");
    }

    #[test]
    fn test_replace_all_empty_needle_is_identity() {
        assert_eq!(replace_all(b"abc", b"", b"zzz"), b"abc");
    }

    #[test]
    fn test_replace_all_adjacent_occurrences() {
        assert_eq!(replace_all(b"xxxx", b"xx", b"y"), b"yy");
    }

    #[test]
    fn test_forward_applies_prefix_then_mounts() {
        let tmp = tempfile::TempDir::new().unwrap();
        let vm = tmp.path().join("sessions/alpha");
        std::fs::create_dir_all(&vm).unwrap();
        let vm = vm.to_str().unwrap().to_owned();

        let mounts = vec![PathRemap::new("/data/alpha/mnt/repo", "/home/user/repo")];
        let set = RemapSet::new(&vm, "/data/alpha", mounts);

        let input = format!(r#"{{"path":"{vm}/mnt/repo/src/main.rs"}}"#);
        let rewritten = set.apply_forward(input.as_bytes());
        assert_eq!(
            rewritten,
            br#"{"path":"/home/user/repo/src/main.rs"}"#.to_vec()
        );
    }

    #[test]
    fn test_reverse_enabled_only_when_virtual_path_exists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let existing = tmp.path().join("alpha");
        std::fs::create_dir_all(&existing).unwrap();
        let existing = existing.to_str().unwrap().to_owned();

        let enabled = RemapSet::new(&existing, "/data/alpha", Vec::new());
        assert!(enabled.reverse_enabled());
        assert_eq!(
            enabled.apply_reverse(b"wrote /data/alpha/out.txt"),
            format!("wrote {existing}/out.txt").into_bytes()
        );

        let disabled = RemapSet::new("/sessions/definitely-missing", "/data/alpha", Vec::new());
        assert!(!disabled.reverse_enabled());
        assert_eq!(
            disabled.apply_reverse(b"wrote /data/alpha/out.txt"),
            b"wrote /data/alpha/out.txt".to_vec()
        );
    }

    #[test]
    fn test_forward_still_applies_when_reverse_disabled() {
        let set = RemapSet::new("/sessions/missing", "/data/missing", Vec::new());
        assert!(!set.reverse_enabled());
        assert_eq!(
            set.apply_forward(b"ls /sessions/missing/src"),
            b"ls /data/missing/src".to_vec()
        );
    }

    #[test]
    fn test_disabled_set_is_identity() {
        let set = RemapSet::disabled();
        assert_eq!(set.apply_forward(b"data"), b"data".to_vec());
        assert_eq!(set.apply_reverse(b"data"), b"data".to_vec());
    }
}
