//! Symbolic link chain resolution.
//!
//! Kit directories are mostly made of symlinks into build outputs or system locations. Exporting
//! one means following each link, possibly through several hops, to the file it designates.
//!
//! Resolution is an explicit loop rather than recursion. Each hop records the identity of the
//! link it passed through (device and inode on unix) so that a chain revisiting a link is
//! reported as a cycle, and the number of hops is capped at [`MAX_SYMLINK_DEPTH`].

use crate::{FilesError, FilesResult, MAX_SYMLINK_DEPTH};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// A symbolic link chain that cannot be resolved to a concrete entry
#[derive(Debug, thiserror::Error)]
pub enum SymlinkChainError {
    /// More than [`MAX_SYMLINK_DEPTH`] links were followed
    #[error("Symlink chain starting at {} is longer than {max} links", start.display())]
    TooDeep { start: PathBuf, max: usize },

    /// The chain passed through the same link twice
    #[error("Symlink cycle detected at {} (starting from {})", at.display(), start.display())]
    Cycle { start: PathBuf, at: PathBuf },
}

/// The first non-symlink entry at the end of a link chain.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    path: PathBuf,
    metadata: fs::Metadata,
    hops: usize,
}

impl ResolvedEntry {
    /// Location of the concrete entry. Equal to the input path when no link was followed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &fs::Metadata {
        &self.metadata
    }

    /// Number of links followed to reach this entry.
    pub fn hops(&self) -> usize {
        self.hops
    }

    pub fn is_file(&self) -> bool {
        self.metadata.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.metadata.is_dir()
    }

    pub fn len(&self) -> u64 {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.len() == 0
    }

    /// Opens the resolved entry for reading.
    pub fn open(&self) -> FilesResult<fs::File> {
        fs::File::open(&self.path).map_err(|e| FilesError::filesystem(&self.path, e))
    }
}

#[derive(Debug, Hash, PartialEq, Eq)]
enum LinkIdentity {
    #[cfg(unix)]
    Inode { dev: u64, ino: u64 },
    #[cfg_attr(unix, allow(dead_code))]
    Path(PathBuf),
}

#[cfg(unix)]
fn link_identity(_path: &Path, metadata: &fs::Metadata) -> LinkIdentity {
    use std::os::unix::fs::MetadataExt;
    LinkIdentity::Inode {
        dev: metadata.dev(),
        ino: metadata.ino(),
    }
}

#[cfg(not(unix))]
fn link_identity(path: &Path, _metadata: &fs::Metadata) -> LinkIdentity {
    LinkIdentity::Path(path.to_path_buf())
}

/// Follows `path` through any chain of symbolic links to the first entry that is not a link.
///
/// Relative link targets are interpreted against the directory containing the link, never the
/// process working directory. Targets are not required to stay inside any particular tree.
///
/// # Errors
///
/// Returns:
/// - `FilesError::SymlinkChain` if the chain revisits a link or exceeds [`MAX_SYMLINK_DEPTH`]
/// - `FilesError::Filesystem` if an entry cannot be inspected or a link target does not exist
pub fn resolve_real(path: &Path) -> FilesResult<ResolvedEntry> {
    let mut current = path.to_path_buf();
    let mut visited = HashSet::new();
    let mut hops = 0;

    loop {
        let metadata =
            fs::symlink_metadata(&current).map_err(|e| FilesError::filesystem(&current, e))?;

        if !metadata.file_type().is_symlink() {
            return Ok(ResolvedEntry {
                path: current,
                metadata,
                hops,
            });
        }

        if !visited.insert(link_identity(&current, &metadata)) {
            return Err(SymlinkChainError::Cycle {
                start: path.to_path_buf(),
                at: current,
            }
            .into());
        }

        if hops == MAX_SYMLINK_DEPTH {
            return Err(SymlinkChainError::TooDeep {
                start: path.to_path_buf(),
                max: MAX_SYMLINK_DEPTH,
            }
            .into());
        }

        let target = fs::read_link(&current).map_err(|e| FilesError::filesystem(&current, e))?;
        tracing::trace!("{} -> {}", current.display(), target.display());

        current = match current.parent() {
            Some(parent) if target.is_relative() => parent.join(target),
            _ => target,
        };
        hops += 1;
    }
}
