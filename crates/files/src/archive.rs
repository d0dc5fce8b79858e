//! Streaming ZIP export of a directory tree.
//!
//! Export happens in two phases:
//!
//! 1. [`plan`] walks the tree in lexical order, resolves every entry through
//!    [`resolve_real`](crate::symlink::resolve_real), and decides what goes into the archive.
//!    Nothing is written, so any walk or link failure surfaces before a single archive byte
//!    exists.
//! 2. [`write`] streams each planned file into a ZIP on an arbitrary [`Write`] sink through a
//!    fixed-size buffer, then finalizes the archive.
//!
//! # Entry rules
//!
//! - Entry names are the walked paths relative to the export root, with `/` separators. A
//!   symlink is archived under its own name, holding the content of the file it resolves to.
//! - Directories produce no entries, and symlinks to directories are not descended into.
//! - Entries whose resolved size is zero are skipped.
//! - Resolved fifos, sockets and device nodes are skipped with a warning.
//!
//! # Failure
//!
//! Any failure aborts the whole archive. Once [`write`] has failed, the sink receives no further
//! bytes, so a failed export never ends with a central directory that makes it look complete.

use crate::symlink::{resolve_real, ResolvedEntry};
use crate::{FilesError, FilesResult, COPY_BUFFER_SIZE};
use std::cell::Cell;
use std::fs;
use std::io::{self, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Entries at or above this size need ZIP64 extensions.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// One file scheduled for the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Name inside the archive, relative to the export root, `/`-separated
    pub name: String,

    /// Concrete file the content is read from (the end of any symlink chain)
    pub source: PathBuf,

    /// Size of the source when the plan was made, always greater than zero
    pub size: u64,

    /// Unix permission bits of the source, when available
    pub mode: Option<u32>,
}

impl ArchiveEntry {
    fn options(&self) -> SimpleFileOptions {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(self.size >= ZIP64_THRESHOLD);

        match self.mode {
            Some(mode) => options.unix_permissions(mode),
            None => options,
        }
    }
}

/// Everything [`write`] needs to produce an archive of one directory
#[derive(Debug, Clone)]
pub struct ArchivePlan {
    root: PathBuf,
    entries: Vec<ArchiveEntry>,
}

impl ArchivePlan {
    /// The resolved directory that was walked.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Planned entries in archive order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of planned entry sizes (uncompressed).
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|entry| entry.size).sum()
    }
}

/// What [`write`] put into the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub bytes: u64,
}

#[cfg(unix)]
fn permissions(resolved: &ResolvedEntry) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(resolved.metadata().permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permissions(_resolved: &ResolvedEntry) -> Option<u32> {
    None
}

/// Builds the archive name for a walked path relative to the export root.
fn entry_name(relative: &Path) -> FilesResult<String> {
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str().ok_or_else(|| {
                FilesError::InvalidPath(format!(
                    "file name is not valid UTF-8: {}",
                    relative.display()
                ))
            })?),
            _ => {
                return Err(FilesError::InvalidPath(format!(
                    "unexpected component in walked path: {}",
                    relative.display()
                )))
            }
        }
    }
    Ok(segments.join("/"))
}

fn walk_error(root: &Path, e: walkdir::Error) -> FilesError {
    let path = e.path().unwrap_or(root).to_path_buf();
    FilesError::filesystem(path, e.into())
}

/// Walks `directory` and decides which files the archive will contain.
///
/// `directory` may itself be a symlink; it is resolved first.
///
/// # Errors
///
/// Returns:
/// - `FilesError::SymlinkChain` if `directory` or any entry has a cyclic or too-deep link chain
/// - `FilesError::InvalidPath` if `directory` does not resolve to a directory, or an entry name
///   is not valid UTF-8
/// - `FilesError::Filesystem` if the walk or a link resolution fails
pub fn plan(directory: &Path) -> FilesResult<ArchivePlan> {
    let resolved_root = resolve_real(directory)?;
    if !resolved_root.is_dir() {
        return Err(FilesError::InvalidPath(format!(
            "export root is not a directory: {}",
            directory.display()
        )));
    }
    let root = resolved_root.path().to_path_buf();

    let mut entries = Vec::new();
    let walker = WalkDir::new(&root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for walked in walker {
        let walked = walked.map_err(|e| walk_error(&root, e))?;
        if walked.file_type().is_dir() {
            continue;
        }

        let relative = walked.path().strip_prefix(&root).map_err(|_| {
            FilesError::InvalidPath(format!(
                "walked path {} is outside {}",
                walked.path().display(),
                root.display()
            ))
        })?;
        let name = entry_name(relative)?;
        let resolved = resolve_real(walked.path())?;

        if resolved.is_dir() {
            tracing::debug!("skipping {} (resolves to a directory)", name);
            continue;
        }
        if !resolved.is_file() {
            tracing::warn!(
                "skipping {} ({} is not a regular file)",
                name,
                resolved.path().display()
            );
            continue;
        }
        if resolved.is_empty() {
            tracing::debug!("skipping {} (empty)", name);
            continue;
        }

        entries.push(ArchiveEntry {
            name,
            source: resolved.path().to_path_buf(),
            size: resolved.len(),
            mode: permissions(&resolved),
        });
    }

    Ok(ArchivePlan { root, entries })
}

/// Refuses all writes once tripped.
///
/// `ZipWriter` finalizes itself when dropped, including when `finish` fails part way. The fuse
/// trips on the first sink error as well as on request, so an aborted archive is never completed
/// behind the caller's back.
struct Fuse<W> {
    inner: W,
    tripped: Rc<Cell<bool>>,
}

impl<W: Write> Fuse<W> {
    fn check(&self) -> io::Result<()> {
        if self.tripped.get() {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "archive aborted"))
        } else {
            Ok(())
        }
    }

    fn trip_on_error<T>(&self, result: io::Result<T>) -> io::Result<T> {
        if result.is_err() {
            self.tripped.set(true);
        }
        result
    }
}

impl<W: Write> Write for Fuse<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        let result = self.inner.write(buf);
        self.trip_on_error(result)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        let result = self.inner.flush();
        self.trip_on_error(result)
    }
}

fn write_entries<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    plan: &ArchivePlan,
) -> FilesResult<ArchiveSummary> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut summary = ArchiveSummary {
        entries: 0,
        bytes: 0,
    };

    for entry in plan.entries() {
        let mut source =
            fs::File::open(&entry.source).map_err(|e| FilesError::filesystem(&entry.source, e))?;
        zip.start_file(entry.name.as_str(), entry.options())?;

        let mut copied = 0u64;
        loop {
            let read = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FilesError::filesystem(&entry.source, e)),
            };
            zip.write_all(&buffer[..read])
                .map_err(zip::result::ZipError::Io)?;
            copied += read as u64;
        }

        if copied != entry.size {
            tracing::warn!(
                "{} changed size while archiving ({} planned, {} written)",
                entry.name,
                entry.size,
                copied
            );
        }
        tracing::debug!("archived {} ({} bytes)", entry.name, copied);

        summary.entries += 1;
        summary.bytes += copied;
    }

    Ok(summary)
}

/// Streams the files in `plan` into a ZIP archive written to `sink`.
///
/// The sink does not need to be seekable. It is flushed once the archive is complete.
///
/// # Errors
///
/// Returns:
/// - `FilesError::Filesystem` if a planned file cannot be opened or read
/// - `FilesError::ArchiveWrite` if writing to the sink or finalizing the archive fails
pub fn write<W: Write>(plan: &ArchivePlan, sink: &mut W) -> FilesResult<ArchiveSummary> {
    let tripped = Rc::new(Cell::new(false));
    let mut zip = ZipWriter::new_stream(Fuse {
        inner: &mut *sink,
        tripped: Rc::clone(&tripped),
    });

    let summary = match write_entries(&mut zip, plan) {
        Ok(summary) => summary,
        Err(e) => {
            tripped.set(true);
            return Err(e);
        }
    };

    if let Err(e) = zip.finish() {
        tripped.set(true);
        return Err(e.into());
    }

    sink.flush()
        .map_err(|e| FilesError::ArchiveWrite(zip::result::ZipError::Io(e)))?;
    Ok(summary)
}

/// Archives `directory` into `sink`: [`plan`] followed by [`write`].
pub fn archive<W: Write>(directory: &Path, sink: &mut W) -> FilesResult<ArchiveSummary> {
    let plan = plan(directory)?;
    tracing::info!(
        "archiving {} ({} entries, {} bytes)",
        plan.root().display(),
        plan.len(),
        plan.total_bytes()
    );
    write(&plan, sink)
}
