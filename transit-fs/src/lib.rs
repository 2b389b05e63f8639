//! Filesystem helpers for the store's database file, built on `cap-std`
//! and `camino`.
#![forbid(unsafe_code)]

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io;

/// Open the directory containing `path` and return it with the file name.
pub fn open_dir_and_file(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::other("database path should include a file name"))?
        .to_owned();
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, file_name))
}

/// Create every missing directory above `path`.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent == Utf8Path::new("/") {
        return Ok(());
    }

    let (base_dir, relative) = anchored_dir(parent)?;
    if relative.as_os_str().is_empty() {
        return Ok(());
    }
    base_dir.create_dir_all(&relative)
}

/// Remove the file at `path` together with SQLite's `-wal`, `-shm` and
/// `-journal` companions. Missing files are not an error.
///
/// Returns `true` when the main file existed.
pub fn remove_database_files(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = match open_dir_and_file(path) {
        Ok(found) => found,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    let existed = remove_if_present(&dir, &name)?;
    for suffix in ["-wal", "-shm", "-journal"] {
        remove_if_present(&dir, &format!("{name}{suffix}"))?;
    }
    Ok(existed)
}

fn remove_if_present(dir: &fs_utf8::Dir, name: &str) -> io::Result<bool> {
    match dir.remove_file(name) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Open the anchor of `parent` (root, drive or `.`) and return it with the
/// remaining relative path.
fn anchored_dir(parent: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let mut anchor = Utf8PathBuf::new();
    let mut relative = Utf8PathBuf::new();
    for component in parent.components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir if relative.as_str().is_empty() => {
                anchor.push(component);
            }
            other => relative.push(other),
        }
    }
    if anchor.as_str().is_empty() {
        anchor.push(".");
    }
    let dir = fs_utf8::Dir::open_ambient_dir(&anchor, ambient_authority())?;
    Ok((dir, relative))
}
