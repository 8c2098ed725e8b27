use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use tracing::debug;
use zip::ZipArchive;

use crate::error::AcquireError;

/// Expands `~`, anchors relative paths at the current directory and folds
/// `.`/`..` components. The result is absolute; it is not required to exist.
pub fn expand_path(raw: &str) -> Result<Utf8PathBuf, AcquireError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AcquireError::InvalidConfiguration(
            "empty path".to_string(),
        ));
    }

    let expanded = if trimmed == "~" || trimmed.starts_with("~/") {
        let home = BaseDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .ok_or_else(|| {
                AcquireError::Filesystem("unable to resolve home directory".to_string())
            })?;
        home.join(trimmed.trim_start_matches('~').trim_start_matches('/'))
    } else {
        PathBuf::from(trimmed)
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map_err(|err| AcquireError::Filesystem(err.to_string()))?
            .join(expanded)
    };

    let normalized = normalize(&absolute);
    Utf8PathBuf::from_path_buf(normalized)
        .map_err(|path| AcquireError::Filesystem(format!("non-utf8 path {}", path.display())))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Extracts every entry of `zip_path` under `target_dir`. The archive is
/// unpacked into a sibling temp directory first and renamed into place, so an
/// interrupted extraction never leaves a half-populated `target_dir`.
pub fn extract_zip(zip_path: &Utf8Path, target_dir: &Utf8Path) -> Result<(), AcquireError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| AcquireError::Filesystem(format!("open zip {zip_path}: {err}")))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| AcquireError::Filesystem(err.to_string()))?;

    let parent = target_dir
        .parent()
        .ok_or_else(|| AcquireError::Filesystem("invalid extraction path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    let staging = tempfile::Builder::new()
        .prefix("kira-acquire-unzip")
        .tempdir_in(parent)
        .map_err(|err| AcquireError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => staging.path().join(path),
            None => {
                return Err(AcquireError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| AcquireError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    }

    let staged = staging.keep();
    remove_path(target_dir)?;
    fs::rename(&staged, target_dir).map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Removes whatever sits at `path`: a symlink is unlinked (never followed), a
/// directory is removed recursively, anything else as a file. Missing paths
/// are not an error.
pub fn remove_path(path: &Utf8Path) -> Result<(), AcquireError> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(AcquireError::Filesystem(err.to_string())),
    };
    let file_type = metadata.file_type();
    let result = if file_type.is_symlink() {
        remove_symlink(path)
    } else if file_type.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|err| AcquireError::Filesystem(format!("remove {path}: {err}")))
}

#[cfg(unix)]
fn remove_symlink(path: &Utf8Path) -> io::Result<()> {
    fs::remove_file(path)
}

#[cfg(windows)]
fn remove_symlink(path: &Utf8Path) -> io::Result<()> {
    fs::remove_file(path).or_else(|_| fs::remove_dir(path))
}

pub fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<(), AcquireError> {
    fs::create_dir_all(dest).map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    for entry in walk_dir(source)? {
        let relative = entry
            .strip_prefix(source)
            .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| AcquireError::Filesystem(err.to_string()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
            }
            fs::copy(&entry, &target).map_err(|err| AcquireError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), AcquireError> {
    let parent = dest
        .parent()
        .ok_or_else(|| AcquireError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix("kira-acquire-file")
        .tempfile_in(parent)
        .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    fs::copy(source, temp.path()).map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    temp.persist(dest)
        .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Moves a file into place. A rename that fails, typically because `from` and
/// `to` are on different filesystems, falls back to copy-then-remove.
pub fn move_path(from: &Utf8Path, to: &Utf8Path) -> Result<(), AcquireError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) => {
            debug!(from = %from, to = %to, error = %err, "rename failed, copying");
            copy_then_remove(from, to)
        }
    }
}

fn copy_then_remove(from: &Utf8Path, to: &Utf8Path) -> Result<(), AcquireError> {
    copy_file_atomic(from, to)?;
    fs::remove_file(from).map_err(|err| AcquireError::Filesystem(format!("remove {from}: {err}")))
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), AcquireError> {
    let parent = path
        .parent()
        .ok_or_else(|| AcquireError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix("kira-acquire-write")
        .tempfile_in(parent)
        .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| AcquireError::Filesystem(err.to_string()))?;
    Ok(())
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, AcquireError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| AcquireError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| AcquireError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_folds_dot_segments() {
        let path = expand_path("/data/./raw/../sorted").unwrap();
        assert_eq!(path, Utf8PathBuf::from("/data/sorted"));
    }

    #[test]
    fn expand_anchors_relative_paths() {
        let cwd = std::env::current_dir().unwrap();
        let path = expand_path("downloads").unwrap();
        assert_eq!(path.as_std_path(), cwd.join("downloads"));
    }

    #[test]
    fn expand_resolves_home() {
        let home = BaseDirs::new().unwrap().home_dir().to_path_buf();
        let path = expand_path("~/acquire").unwrap();
        assert_eq!(path.as_std_path(), home.join("acquire"));
    }

    #[test]
    fn remove_path_dispatches_on_kind() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

        let file = root.join("file.txt");
        fs::write(&file, b"x").unwrap();
        remove_path(&file).unwrap();
        assert!(!file.exists());

        let dir = root.join("tree");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/leaf"), b"x").unwrap();
        remove_path(&dir).unwrap();
        assert!(!dir.exists());

        remove_path(&root.join("absent")).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn remove_path_does_not_follow_symlinks() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let target = root.join("keep");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("data"), b"x").unwrap();
        let link = root.join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        remove_path(&link).unwrap();
        assert!(fs::symlink_metadata(&link).is_err());
        assert!(target.join("data").exists());
    }

    #[test]
    fn move_path_relocates_the_file() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let from = root.join("a.tbi");
        let to = root.join("work/b.tbi");
        fs::create_dir_all(root.join("work")).unwrap();
        fs::write(&from, b"index").unwrap();

        move_path(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"index");
    }

    #[test]
    fn copy_fallback_replaces_destination() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let from = root.join("fresh.tbi");
        let to = root.join("stale.tbi");
        fs::write(&from, b"fresh").unwrap();
        fs::write(&to, b"stale").unwrap();

        copy_then_remove(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"fresh");
    }

    #[test]
    fn move_path_reports_missing_source() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        assert!(matches!(
            move_path(&root.join("absent"), &root.join("dest")),
            Err(AcquireError::Filesystem(_))
        ));
    }
}
