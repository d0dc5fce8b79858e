//! Limits shared across the file-handling modules.

/// Maximum number of symbolic links followed while resolving one entry.
///
/// Matches the `MAXSYMLINKS` limit used by Linux path resolution.
pub const MAX_SYMLINK_DEPTH: usize = 40;

/// Buffer size used when copying file content into an archive.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;
