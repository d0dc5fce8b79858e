//! Root-confined directory creation and file materialization.
//!
//! This module turns a [`ContainedPath`] into real directories and files. The work is split the
//! same way uploads are structured:
//!
//! - [`ensure_dir`] creates every missing directory between the root and the target, one
//!   component at a time
//! - [`create_file`] creates (or truncates) the destination and returns a [`PartWriter`]
//! - [`PartWriter::append`] writes one part; parts are concatenated in call order
//! - [`write_file`] does all of the above for an ordered sequence of parts
//!
//! [`ChrootService`] binds these to a single root that is created once at startup.
//!
//! # Concurrency
//!
//! Paths are composed from the explicit root for every call; the process working directory is
//! never read or changed. Two requests writing different paths only touch their own directories.
//! Two requests writing the same path race, and the last writer wins.
//!
//! # Symbolic links
//!
//! Resolution in [`crate::paths`] is lexical, so a link already present inside the root could
//! otherwise redirect a write elsewhere. Directory creation refuses to traverse a symlink, and
//! file creation refuses to open one.

use crate::paths::{self, ContainedPath};
use crate::{FilesError, FilesResult};
use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Summary of a file written by [`write_file`] or [`PartWriter::finish`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    /// Absolute path of the written file
    pub path: PathBuf,

    /// Number of parts appended, in order
    pub parts: usize,

    /// Total bytes written across all parts
    pub bytes: u64,
}

/// An open destination file accepting parts in order.
#[derive(Debug)]
pub struct PartWriter {
    path: PathBuf,
    file: fs::File,
    parts: usize,
    bytes: u64,
}

impl PartWriter {
    /// Appends one part to the end of the file.
    ///
    /// # Returns
    ///
    /// The number of bytes copied from `part`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Filesystem` if reading the part or writing the file fails. The file
    /// is left as written so far.
    pub fn append<R: Read>(&mut self, mut part: R) -> FilesResult<u64> {
        let copied = io::copy(&mut part, &mut self.file)
            .map_err(|e| FilesError::filesystem(&self.path, e))?;
        self.parts += 1;
        self.bytes += copied;
        Ok(copied)
    }

    /// Flushes the file and reports what was written.
    pub fn finish(mut self) -> FilesResult<Materialized> {
        self.file
            .flush()
            .map_err(|e| FilesError::filesystem(&self.path, e))?;

        tracing::debug!(
            "materialized {} ({} parts, {} bytes)",
            self.path.display(),
            self.parts,
            self.bytes
        );

        Ok(Materialized {
            path: self.path,
            parts: self.parts,
            bytes: self.bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn refuse_symlink(path: &Path) -> FilesError {
    FilesError::InvalidPath(format!(
        "refusing to write through symbolic link: {}",
        path.display()
    ))
}

fn not_a_directory(path: &Path) -> FilesError {
    FilesError::filesystem(
        path,
        io::Error::new(ErrorKind::AlreadyExists, "exists and is not a directory"),
    )
}

/// Checks a path component that already exists on disk.
fn check_existing_dir(path: &Path, metadata: &fs::Metadata) -> FilesResult<()> {
    if metadata.file_type().is_symlink() {
        Err(refuse_symlink(path))
    } else if metadata.is_dir() {
        Ok(())
    } else {
        Err(not_a_directory(path))
    }
}

/// Creates the directory designated by `path` and every missing ancestor below its root.
///
/// For a path naming a file, this is the file's parent directory. Existing directories are left
/// untouched, so calling this repeatedly is harmless.
///
/// # Returns
///
/// The absolute path of the directory that now exists.
///
/// # Errors
///
/// Returns:
/// - `FilesError::InvalidPath` if a component below the root is a symbolic link
/// - `FilesError::Filesystem` if a component exists as a non-directory, or creation fails
pub fn ensure_dir(path: &ContainedPath) -> FilesResult<PathBuf> {
    let mut current = path.root().to_path_buf();
    fs::create_dir_all(&current).map_err(|e| FilesError::filesystem(&current, e))?;

    for segment in path.directory_segments() {
        current.push(segment);

        match fs::symlink_metadata(&current) {
            Ok(metadata) => check_existing_dir(&current, &metadata)?,
            Err(e) if e.kind() == ErrorKind::NotFound => match fs::create_dir(&current) {
                Ok(()) => {}
                // Another request created it between the check and the create.
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let metadata = fs::symlink_metadata(&current)
                        .map_err(|e| FilesError::filesystem(&current, e))?;
                    check_existing_dir(&current, &metadata)?;
                }
                Err(e) => return Err(FilesError::filesystem(&current, e)),
            },
            Err(e) => return Err(FilesError::filesystem(&current, e)),
        }
    }

    Ok(current)
}

/// Creates or truncates the file designated by `path`, creating parent directories first.
///
/// # Returns
///
/// - `Ok(Some(writer))` ready to receive parts
/// - `Ok(None)` if `path` is directory-only; the directories were created and no file was
///
/// # Errors
///
/// Returns:
/// - `FilesError::InvalidPath` if the destination or a parent is a symbolic link
/// - `FilesError::Filesystem` if the destination is a directory, or creation fails
pub fn create_file(path: &ContainedPath) -> FilesResult<Option<PartWriter>> {
    let directory = ensure_dir(path)?;
    let Some(file_name) = path.file_name() else {
        return Ok(None);
    };

    let target = directory.join(file_name);
    match fs::symlink_metadata(&target) {
        Ok(metadata) if metadata.file_type().is_symlink() => return Err(refuse_symlink(&target)),
        Ok(metadata) if metadata.is_dir() => {
            return Err(FilesError::filesystem(
                &target,
                io::Error::new(ErrorKind::AlreadyExists, "destination is a directory"),
            ))
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(FilesError::filesystem(&target, e)),
    }

    let file = open_destination(&target)?;

    Ok(Some(PartWriter {
        path: target,
        file,
        parts: 0,
        bytes: 0,
    }))
}

/// Creates or truncates `target` for writing.
///
/// On unix the open itself refuses a symlink (`O_NOFOLLOW`), so a link planted after the
/// metadata check in [`create_file`] is still not followed.
fn open_destination(target: &Path) -> FilesResult<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NOFOLLOW);
    }

    options.open(target).map_err(|e| {
        #[cfg(unix)]
        if e.raw_os_error() == Some(libc::ELOOP) {
            return refuse_symlink(target);
        }
        FilesError::filesystem(target, e)
    })
}

/// Writes `parts` to the file designated by `path`, in order, replacing any previous content.
///
/// # Returns
///
/// - `Ok(Some(summary))` describing the written file
/// - `Ok(None)` if `path` is directory-only
///
/// # Errors
///
/// See [`create_file`] and [`PartWriter::append`]. The first failing part stops the write.
pub fn write_file<I>(path: &ContainedPath, parts: I) -> FilesResult<Option<Materialized>>
where
    I: IntoIterator,
    I::Item: Read,
{
    let Some(mut writer) = create_file(path)? else {
        return Ok(None);
    };

    for part in parts {
        writer.append(part)?;
    }

    writer.finish().map(Some)
}

/// File materialization bound to one root directory
///
/// The root is created on construction if it does not exist and is never cleared.
#[derive(Debug, Clone)]
pub struct ChrootService {
    root: PathBuf,
}

impl ChrootService {
    /// Creates a service rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidRootDirectory` if `root` exists but is not a directory, or
    /// cannot be created or canonicalized.
    pub fn new(root: &Path) -> FilesResult<Self> {
        if root.exists() && !root.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        fs::create_dir_all(root).map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot create directory {}: {}",
                root.display(),
                e
            ))
        })?;

        let root = root.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self { root })
    }

    /// Returns the canonicalized root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves an untrusted path below this root. See [`paths::resolve`].
    pub fn resolve(&self, requested: &str) -> FilesResult<ContainedPath> {
        paths::resolve(&self.root, requested)
    }

    /// Resolves an untrusted path to a single file directly below this root. See
    /// [`paths::flatten`].
    pub fn flatten(&self, requested: &str) -> FilesResult<ContainedPath> {
        paths::flatten(&self.root, requested)
    }

    pub fn ensure_dir(&self, path: &ContainedPath) -> FilesResult<PathBuf> {
        self.check_owned(path)?;
        ensure_dir(path)
    }

    pub fn create_file(&self, path: &ContainedPath) -> FilesResult<Option<PartWriter>> {
        self.check_owned(path)?;
        create_file(path)
    }

    pub fn write_file<I>(&self, path: &ContainedPath, parts: I) -> FilesResult<Option<Materialized>>
    where
        I: IntoIterator,
        I::Item: Read,
    {
        self.check_owned(path)?;
        write_file(path, parts)
    }

    fn check_owned(&self, path: &ContainedPath) -> FilesResult<()> {
        if path.root() == self.root {
            Ok(())
        } else {
            Err(FilesError::InvalidPath(format!(
                "{} was resolved against {}, not {}",
                path,
                path.root().display(),
                self.root.display()
            )))
        }
    }
}
