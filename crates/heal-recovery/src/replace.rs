use std::fs::{self, File};
use std::io;
use std::path::Path;

use tracing::{debug, error, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Replaces `dest` wholesale with the directory tree at `src`.
///
/// `src` is first moved next to `dest` as a hidden sibling, then swapped in by
/// rename. Readers of `dest` see the old tree or the new one, never a blend of
/// both. If the final rename fails the old tree is put back.
pub fn replace_dir(src: &Path, dest: &Path) -> io::Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
    let name = dest
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name"))?
        .to_string_lossy()
        .into_owned();
    fs::create_dir_all(parent)?;

    let token = Uuid::new_v4().simple().to_string();
    let incoming = parent.join(format!(".{name}.incoming-{token}"));
    let previous = parent.join(format!(".{name}.previous-{token}"));

    if let Err(e) = move_tree(src, &incoming) {
        let _ = remove_entry(&incoming);
        return Err(e);
    }

    swap_into_place(&incoming, dest, &previous)?;
    debug!(dest = %dest.display(), "replaced directory");
    Ok(())
}

/// Renames `dest` aside to `previous` and `incoming` into `dest`, then drops
/// `previous`. On failure `dest` holds what it held before and `incoming` is
/// removed.
fn swap_into_place(incoming: &Path, dest: &Path, previous: &Path) -> io::Result<()> {
    let had_previous = match fs::symlink_metadata(dest) {
        Ok(_) => {
            if let Err(e) = fs::rename(dest, previous) {
                let _ = remove_entry(incoming);
                return Err(e);
            }
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            let _ = remove_entry(incoming);
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(incoming, dest) {
        if had_previous {
            if let Err(back) = fs::rename(previous, dest) {
                error!(
                    dest = %dest.display(),
                    previous = %previous.display(),
                    "could not restore previous tree after failed swap: {back:?}"
                );
            }
        }
        let _ = remove_entry(incoming);
        return Err(e);
    }

    if had_previous {
        if let Err(e) = remove_entry(previous) {
            warn!(path = %previous.display(), "failed to remove replaced tree: {e:?}");
        }
    }
    Ok(())
}

/// Rename when `src` and `dest` share a filesystem, copy then delete otherwise.
pub fn move_tree(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(src = %src.display(), "rename failed ({e}); copying instead");
            copy_tree(src, dest)?;
            fs::remove_dir_all(src)
        }
    }
}

/// Recursive copy that keeps file modification times.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dest.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            fs::create_dir_all(&target)?;
        } else if ft.is_file() {
            fs::copy(entry.path(), &target)?;
            let modified = entry.metadata()?.modified()?;
            File::options().write(true).open(&target)?.set_modified(modified)?;
        } else if ft.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dest)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dest: &Path) -> io::Result<()> {
    warn!(path = %src.display(), "skipping symlink");
    Ok(())
}

pub(crate) fn remove_entry(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    #[test]
    fn replaces_existing_tree_completely() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("staged/victim_data");
        let dest = dir.path().join("live/victim_data");
        fs::create_dir_all(src.join("docs")).unwrap();
        fs::write(src.join("docs/report.txt"), "good").unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.enc"), "junk").unwrap();

        replace_dir(&src, &dest).unwrap();

        assert_eq!(fs::read_to_string(dest.join("docs/report.txt")).unwrap(), "good");
        assert!(!dest.join("stale.enc").exists());
        assert!(!src.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("live"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("victim_data")]);
    }

    #[test]
    fn creates_destination_when_absent() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a"), "a").unwrap();
        let dest = dir.path().join("nested/out/data");
        replace_dir(&src, &dest).unwrap();
        assert!(dest.join("a").is_file());
    }

    #[test]
    fn copy_keeps_modification_times() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("logs")).unwrap();
        let file = src.join("logs/log_1.txt");
        fs::write(&file, "x").unwrap();
        let past = SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000);
        File::options().write(true).open(&file).unwrap().set_modified(past).unwrap();

        let dest = dir.path().join("dest");
        copy_tree(&src, &dest).unwrap();
        let copied = fs::metadata(dest.join("logs/log_1.txt")).unwrap().modified().unwrap();
        assert_eq!(copied, past);
    }

    #[test]
    fn failed_swap_puts_previous_tree_back() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("victim_data");
        fs::create_dir_all(dest.join("docs")).unwrap();
        fs::write(dest.join("docs/report.txt"), "old").unwrap();
        // the incoming tree vanished after staging, so the rename into place fails
        let incoming = dir.path().join(".victim_data.incoming-x");
        let previous = dir.path().join(".victim_data.previous-x");

        let err = swap_into_place(&incoming, &dest, &previous).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(fs::read_to_string(dest.join("docs/report.txt")).unwrap(), "old");
        let names: Vec<_> = fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names, vec![std::ffi::OsString::from("victim_data")]);
    }

    #[test]
    fn missing_source_leaves_destination_alone() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("data");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep.txt"), "keep").unwrap();
        assert!(replace_dir(&dir.path().join("nope"), &dest).is_err());
        assert_eq!(fs::read_to_string(dest.join("keep.txt")).unwrap(), "keep");
    }
}
