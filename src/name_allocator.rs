//! Collision-free name allocation under a target parent directory.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::fs_gateway::FsGateway;

static TRAILING_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d+)\)$").unwrap());
const MAX_BASENAME_LEN: usize = 255;

/// Sanitize a candidate name: replace path separators and control characters
/// with `_`, trim trailing dots/spaces, and cap at the platform basename
/// limit.
pub fn sanitize(candidate: &str) -> String {
    let mut out: String = candidate
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    while out.ends_with('.') || out.ends_with(' ') {
        out.pop();
    }
    if out.is_empty() {
        out.push('_');
    }
    if out.len() > MAX_BASENAME_LEN {
        out.truncate(MAX_BASENAME_LEN);
    }
    out
}

/// Strip a trailing `(k)` suffix, e.g. `"Summer(1)" -> "Summer"`. Used by the
/// renamed-collection detector so a journal-recorded disambiguated name
/// compares equal to an unchanged remote name.
pub fn strip_trailing_suffix(name: &str) -> &str {
    match TRAILING_SUFFIX.find(name) {
        Some(m) => name[..m.start()].trim_end(),
        None => name,
    }
}

fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) => (name, ""),
        Some(idx) => (&name[..idx], &name[idx + 1..]),
        None => (name, ""),
    }
}

pub struct NameAllocator;

impl NameAllocator {
    /// Produce a name `N` such that `parent/N` does not currently exist,
    /// sanitizing `desired` and suffixing with `(k)` on collision. Races with
    /// external processes are tolerated at the "detected collision -> retry"
    /// level; this allocator does not itself lock.
    pub async fn allocate(
        fs: &dyn FsGateway,
        parent: &Path,
        desired: &str,
    ) -> Result<String> {
        let candidate = sanitize(desired);
        if !fs.exists(&parent.join(&candidate)).await? {
            return Ok(candidate);
        }

        let (stem, ext) = split_ext(&candidate);
        for k in 1.. {
            let name = if ext.is_empty() {
                format!("{stem}({k})")
            } else {
                format!("{stem}({k}).{ext}")
            };
            if !fs.exists(&parent.join(&name)).await? {
                return Ok(name);
            }
        }
        unreachable!("name allocation loop is unbounded")
    }

    pub fn join(parent: &Path, name: &str) -> PathBuf {
        parent.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_gateway::FakeFsGateway;

    #[test]
    fn sanitize_replaces_separators_and_trims() {
        assert_eq!(sanitize("a/b\\c.. "), "a_b_c");
    }

    #[test]
    fn strip_trailing_suffix_removes_only_trailing_paren_digits() {
        assert_eq!(strip_trailing_suffix("Summer(1)"), "Summer");
        assert_eq!(strip_trailing_suffix("Summer (12)"), "Summer");
        assert_eq!(strip_trailing_suffix("Summer"), "Summer");
        assert_eq!(strip_trailing_suffix("Sum(mer)"), "Sum(mer)");
    }

    #[tokio::test]
    async fn allocate_returns_candidate_when_free() {
        let fs = FakeFsGateway::new();
        let name = NameAllocator::allocate(&fs, Path::new("/root"), "Vacation")
            .await
            .unwrap();
        assert_eq!(name, "Vacation");
    }

    #[tokio::test]
    async fn allocate_suffixes_on_collision_preserving_extension() {
        let fs = FakeFsGateway::new();
        fs.seed_file(Path::new("/root/F1.jpg"), b"x");
        let name = NameAllocator::allocate(&fs, Path::new("/root"), "F1.jpg")
            .await
            .unwrap();
        assert_eq!(name, "F1(1).jpg");
    }

    #[tokio::test]
    async fn allocate_keeps_incrementing_past_first_collision() {
        let fs = FakeFsGateway::new();
        fs.seed_dir(Path::new("/root/Summer"));
        fs.seed_dir(Path::new("/root/Summer(1)"));
        let name = NameAllocator::allocate(&fs, Path::new("/root"), "Summer")
            .await
            .unwrap();
        assert_eq!(name, "Summer(2)");
    }
}
