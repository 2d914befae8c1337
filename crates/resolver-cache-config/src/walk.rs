//! Directory tree traversal shared by the config and registry loaders.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use resolver_cache_types::LoadError;
use walkdir::WalkDir;

/// Is this entry's base name a shadow entry staged by an atomic-swap
/// configuration mount? These are pruned (directories) or ignored (files).
pub fn is_shadow_name(name: &str) -> bool {
    name.starts_with("..")
}

/// Walk `root`, pruning shadow directories and skipping shadow files,
/// tolerating a not-found race (a symlinked entry disappearing mid-walk)
/// by silently dropping that entry. Any other I/O error aborts the walk.
///
/// Returns every non-directory, non-shadow path under `root`.
pub fn walk_tree(root: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        !is_shadow_name(&name)
    });

    for entry in walker {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
            Err(err) => {
                if is_race_not_found(&err) {
                    continue;
                }
                return Err(LoadError::Walk {
                    path: err
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| root.display().to_string()),
                    source: io_error_from(&err),
                });
            }
        }
    }

    Ok(files)
}

fn is_race_not_found(err: &walkdir::Error) -> bool {
    err.io_error()
        .map(|e| e.kind() == ErrorKind::NotFound)
        .unwrap_or(false)
}

fn io_error_from(err: &walkdir::Error) -> std::io::Error {
    err.io_error()
        .map(|e| std::io::Error::new(e.kind(), e.to_string()))
        .unwrap_or_else(|| std::io::Error::other(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn shadow_directories_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "x").unwrap();
        let shadow = dir.path().join("..2024_06_01_12_00");
        fs::create_dir(&shadow).unwrap();
        fs::write(shadow.join("b.yaml"), "x").unwrap();

        let files = walk_tree(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("a.yaml"));
    }

    #[test]
    fn shadow_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "x").unwrap();
        fs::write(dir.path().join("..b.yaml"), "x").unwrap();

        let files = walk_tree(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
    }
}
