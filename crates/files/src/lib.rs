//! redkit file handling
//!
//! This crate holds the filesystem work behind the redkit server: materializing untrusted
//! uploads inside a root directory, and exporting a directory tree as a streamed ZIP archive.
//!
//! ## Containment Model
//!
//! Every upload destination starts life as an untrusted string (a multipart field name, a URL
//! segment). It is resolved against an explicit root by [`paths::resolve`], which works purely on
//! path segments and never consults or changes the process working directory:
//!
//! ```text
//! <root>/
//! ├── etc/passwd        # "/etc/passwd" is treated as root-relative
//! └── a/b/c.txt         # "a/./b/../b/c.txt"
//!
//! "../../etc/passwd"    # rejected: escapes <root>
//! "a/../../b"           # rejected: escapes <root>
//! ```
//!
//! Directories are then created one component at a time below the root, refusing to traverse any
//! symbolic link already planted in the tree.
//!
//! ## Export Model
//!
//! [`archive::plan`] walks a directory in lexical order and follows each symbolic link chain (up
//! to [`MAX_SYMLINK_DEPTH`] links, cycles rejected) to the real file. Directories and empty files
//! produce no entries. [`archive::write`] then streams the planned files into a ZIP written to any
//! [`std::io::Write`] sink, so the archive never has to fit in memory.
//!
//! ## Example Usage
//!
//! ```no_run
//! use redkit_files::ChrootService;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let chroot = ChrootService::new(Path::new("chroot"))?;
//! let target = chroot.resolve("tools/linux/readme.txt")?;
//! chroot.write_file(&target, [&b"hello "[..], &b"world"[..]])?;
//!
//! let mut out = Vec::new();
//! redkit_files::archive::archive(Path::new("chroot/tools"), &mut out)?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod chroot;
mod constants;
pub mod paths;
pub mod symlink;

use std::path::{Path, PathBuf};

pub use archive::{ArchiveEntry, ArchivePlan, ArchiveSummary};
pub use chroot::{ChrootService, Materialized, PartWriter};
pub use constants::{COPY_BUFFER_SIZE, MAX_SYMLINK_DEPTH};
pub use paths::ContainedPath;
pub use symlink::{ResolvedEntry, SymlinkChainError};

/// Errors that can occur during file operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Root directory exists but is not a directory, or cannot be created
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// Path validation failed (containment violation or malformed path)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Create/open/read/write failure from the underlying storage
    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Symbolic link chain too deep or cyclic
    #[error(transparent)]
    SymlinkChain(#[from] SymlinkChainError),

    /// Failure writing or finalizing an archive entry
    #[error("Archive write error: {0}")]
    ArchiveWrite(#[from] zip::result::ZipError),
}

impl FilesError {
    pub(crate) fn filesystem(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Returns true if the error was caused by the caller's input rather than the server.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::InvalidPath(_))
    }

    /// Returns true if a filesystem entry the operation needed does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Filesystem { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

pub type FilesResult<T> = Result<T, FilesError>;
