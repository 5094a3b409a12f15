//! Copying cases: a serial case (mesh, settings, initial conditions), a
//! decomposed case (whole or restricted to some times), and restoring the
//! initial conditions from their pristine copy.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::case::Case;
use crate::error::{Error, Result};

/// Directories that every case has and that must copy cleanly.
const REQUIRED: [&str; 2] = ["constant", "system"];

/// Initial condition directories; usually only one of them exists.
const INITIAL: [&str; 2] = ["0", "0.orig"];

/// Recursively copy the file or directory `src` to `dst`, creating `dst`.
/// Symbolic links are copied as links.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = if relative.as_os_str().is_empty() {
            dst.to_path_buf()
        } else {
            dst.join(relative)
        };
        let kind = entry.file_type();

        if kind.is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
        } else if kind.is_symlink() {
            copy_link(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| Error::io(&target, e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_link(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).map_err(|e| Error::io(src, e))?;
    std::os::unix::fs::symlink(&link, dst).map_err(|e| Error::io(dst, e))
}

#[cfg(not(unix))]
fn copy_link(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).map(|_| ()).map_err(|e| Error::io(dst, e))
}

/// Refuse to clone onto an existing path or from something that is not a
/// directory.
fn check_clone(src: &Path, dst: &Path) -> Result<()> {
    if dst.symlink_metadata().is_ok() {
        return Err(Error::DestinationExists(dst.to_path_buf()));
    }
    if !src.is_dir() {
        return Err(Error::NotADirectory(src.to_path_buf()));
    }
    Ok(())
}

fn create_destination(dst: &Path) -> Result<()> {
    fs::create_dir(dst).map_err(|e| Error::io(dst, e))
}

/// Clone a serial case: create `dst` and copy `constant/` and `system/` from
/// `src` (these must succeed), then `0/` and `0.orig/` if they can be copied.
/// An existing `dst` is never touched.
pub fn clone_case(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    check_clone(src, dst)?;

    info!("Cloning {} case from {}", dst.display(), src.display());
    create_destination(dst)?;

    for name in REQUIRED {
        copy_tree(&src.join(name), &dst.join(name))?;
    }
    for name in INITIAL {
        let from = src.join(name);
        if from.exists() {
            if let Err(e) = copy_tree(&from, &dst.join(name)) {
                debug!("Not copying {}: {}", from.display(), e);
            }
        }
    }
    Ok(())
}

/// Clone a decomposed case. `src/processor0` must exist. With no `times`,
/// every `processor*` directory is copied whole. Otherwise each partition is
/// recreated with its `constant/` and those of the requested time
/// directories it has. Top-level `constant/` and `system/` are copied when
/// present. An existing `dst` is never touched.
pub fn clone_parallel_case<S>(src: impl AsRef<Path>, dst: impl AsRef<Path>, times: &[S]) -> Result<()>
where
    S: AsRef<str> + Sync,
{
    let (src, dst) = (src.as_ref(), dst.as_ref());
    check_clone(src, dst)?;

    let source = Case::new(src);
    if !source.is_parallel() {
        return Err(Error::NotParallel(src.to_path_buf()));
    }
    let partitions = source.processor_dirs()?;

    info!("Cloning {} parallel case from {}", dst.display(), src.display());
    create_destination(dst)?;

    for name in REQUIRED {
        let from = src.join(name);
        if from.is_dir() {
            copy_tree(&from, &dst.join(name))?;
        } else {
            warn!("{} has no {}/ to clone", src.display(), name);
        }
    }

    if times.is_empty() {
        debug!("Cloning {} processor directories", partitions.len());
    }

    partitions
        .par_iter()
        .map(|partition| clone_partition(partition, dst, times))
        .collect::<Result<Vec<_>>>()?;

    Ok(())
}

fn clone_partition<S: AsRef<str>>(partition: &Path, dst: &Path, times: &[S]) -> Result<()> {
    let target: PathBuf = match partition.file_name() {
        Some(name) => dst.join(name),
        None => return Ok(()),
    };

    if times.is_empty() {
        return copy_tree(partition, &target);
    }
    fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;

    let constant = partition.join("constant");
    if constant.is_dir() {
        copy_tree(&constant, &target.join("constant"))?;
    } else {
        warn!("{} has no constant/", partition.display());
    }

    for time in times {
        let from = partition.join(time.as_ref());
        if from.is_dir() {
            copy_tree(&from, &target.join(time.as_ref()))?;
        }
    }
    Ok(())
}

/// Replace `0/` with a fresh copy of `0.orig/`. With `processors`, do the
/// same in every `processor*` directory, using the partition's own `0.orig/`
/// if it has one and the top-level one otherwise.
pub fn restore_0_dir(case: &Case, processors: bool) -> Result<()> {
    let orig = case.path("0.orig");

    if !orig.is_dir() {
        return Err(Error::NoInitialConditions(case.root().to_path_buf()));
    }

    if processors {
        info!("Restore processor*/0 from 0.orig/");
        for partition in case.processor_dirs()? {
            let local = partition.join("0.orig");
            let from = if local.is_dir() { local } else { orig.clone() };
            replace_dir(&from, &partition.join("0"))?;
        }
    } else {
        info!("Restore 0/ from 0.orig/");
        replace_dir(&orig, &case.path("0"))?;
    }
    Ok(())
}

fn replace_dir(from: &Path, to: &Path) -> Result<()> {
    match fs::remove_dir_all(to) {
        Ok(()) => (),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
        Err(e) => return Err(Error::io(to, e)),
    }
    copy_tree(from, to)
}

/// Delete a whole case directory. Refuses to delete anything without a
/// `system/` directory.
pub fn remove_case(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    let case = Case::new(dir);

    if !case.is_case() {
        return Err(Error::NotACase(dir.to_path_buf()));
    }
    info!("Removing case {}", dir.display());
    fs::remove_dir_all(dir).map_err(|e| Error::io(dir, e))
}
