//! Lexical path confinement.
//!
//! Candidates may point at files that do not exist yet, so confinement is
//! decided without touching the filesystem: join, fold `.`/`..`, then
//! require the allowed ancestors by prefix. Symlinks below the allowed root
//! are the operator's responsibility.

use std::path::{Component, Path, PathBuf};

/// Fold `.` and `..` components. `..` at the root is clamped (it cannot
/// escape upward lexically), which makes the later prefix check sound.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                ) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Absolute, normalized form of `path`; relative paths resolve against the
/// current working directory.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        normalize(&base.join(path))
    }
}

/// Join `candidate` under `base` when relative, then normalize.
pub fn resolve_under(base: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        normalize(candidate)
    } else {
        normalize(&base.join(candidate))
    }
}

pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_dot_and_dotdot() {
        assert_eq!(
            normalize(Path::new("/a/b/./c/../d")),
            PathBuf::from("/a/b/d")
        );
        assert_eq!(normalize(Path::new("/a/../../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn traversal_out_of_root_is_visible_to_prefix_check() {
        let root = Path::new("/data/preflight");
        let escaped = resolve_under(root, Path::new("../../etc/passwd"));
        assert!(!is_within(&escaped, root));

        let inside = resolve_under(root, Path::new("run-1/validation_report.json"));
        assert!(is_within(&inside, root));
    }
}
