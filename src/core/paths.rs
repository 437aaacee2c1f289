//! Host path helpers shared by source resolution and configuration.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Resolve a source path to an absolute, normalized path.
///
/// Existing paths are canonicalized, so symlinked sources resolve to their
/// target. Paths that do not exist are made absolute against the working
/// directory and normalized syntactically, which keeps error messages for
/// missing sources readable.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        env::current_dir().map_or_else(|_| expanded.clone(), |cwd| cwd.join(&expanded))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

/// Replace a leading `~` component with `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => env::var_os("HOME").map_or_else(
            || path.to_path_buf(),
            |home| PathBuf::from(home).join(components.as_path()),
        ),
        _ => path.to_path_buf(),
    }
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_source_is_canonicalized() {
        let tmp = tempfile::tempdir().unwrap();
        let image = tmp.path().join("disk.raw");
        std::fs::write(&image, b"").unwrap();
        let dotted = tmp.path().join(".").join("disk.raw");
        assert_eq!(
            resolve_absolute_path(&dotted),
            std::fs::canonicalize(&image).unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn missing_source_is_normalized_syntactically() {
        let input = Path::new("/nonexistent/images/../disk.E01");
        assert!(std::fs::canonicalize(input).is_err());
        assert_eq!(
            resolve_absolute_path(input),
            Path::new("/nonexistent/disk.E01")
        );
    }

    #[cfg(unix)]
    #[test]
    fn parent_of_root_stays_at_root() {
        assert_eq!(normalize_syntactic(Path::new("/../dev/sda")), Path::new("/dev/sda"));
    }

    #[test]
    fn tilde_expands_only_as_first_component() {
        let Some(home) = env::var_os("HOME") else {
            return;
        };
        assert_eq!(
            expand_home(Path::new("~/cases/disk.raw")),
            PathBuf::from(home).join("cases/disk.raw")
        );
        assert_eq!(
            expand_home(Path::new("/srv/~/disk.raw")),
            Path::new("/srv/~/disk.raw")
        );
    }
}
