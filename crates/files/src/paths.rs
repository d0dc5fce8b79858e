//! Resolution of untrusted request paths against a root directory.
//!
//! Requested paths arrive from clients (multipart field names, URL segments) and are never used
//! as-is. Resolution is purely lexical:
//!
//! - leading separators are stripped, so `/etc/passwd` means `<root>/etc/passwd`
//! - empty and `.` segments are dropped
//! - `..` removes the preceding segment, and is rejected when there is nothing left to remove
//! - a trailing separator marks the path as directory-only
//!
//! The resulting [`ContainedPath`] is always the root itself or a descendant of it. Nothing here
//! touches the filesystem.

use crate::{FilesError, FilesResult};
use std::path::{Component, Path, PathBuf};

/// A path that has been checked to lie inside its root.
///
/// Constructed only by the resolver functions in this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainedPath {
    root: PathBuf,
    segments: Vec<String>,
    directory_only: bool,
}

impl ContainedPath {
    /// The containment boundary this path was resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalised path segments below the root.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Path relative to the root, using the platform separator.
    pub fn relative(&self) -> PathBuf {
        self.segments.iter().collect()
    }

    /// Absolute location on disk: the root joined with every segment.
    pub fn absolute(&self) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(&self.segments);
        path
    }

    /// True when no file should be created at this path, only directories.
    ///
    /// Set for requests ending in a separator, and for requests that normalise to the root.
    pub fn is_directory_only(&self) -> bool {
        self.directory_only
    }

    /// The final segment when this path names a file.
    pub fn file_name(&self) -> Option<&str> {
        if self.directory_only {
            None
        } else {
            self.segments.last().map(String::as_str)
        }
    }

    /// Segments of the directory that must exist before the file can be created.
    pub(crate) fn directory_segments(&self) -> &[String] {
        if self.directory_only {
            &self.segments
        } else {
            &self.segments[..self.segments.len().saturating_sub(1)]
        }
    }
}

impl std::fmt::Display for ContainedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.absolute().display())
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || (cfg!(windows) && c == '\\')
}

/// Checks that a segment is a single plain path component on this platform.
///
/// Catches segments that `Path::join` would treat specially, such as drive prefixes on Windows.
fn check_segment(requested: &str, segment: &str) -> FilesResult<()> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(FilesError::InvalidPath(format!(
            "unsupported path segment {segment:?} in {requested:?}"
        ))),
    }
}

/// Resolves an untrusted relative path against `root`.
///
/// # Errors
///
/// Returns `FilesError::InvalidPath` if:
/// - the path contains a NUL byte
/// - `..` segments would climb above `root`
/// - a segment is not a plain path component on this platform
pub fn resolve(root: &Path, requested: &str) -> FilesResult<ContainedPath> {
    if requested.contains('\0') {
        return Err(FilesError::InvalidPath(format!(
            "path contains a NUL byte: {requested:?}"
        )));
    }

    let mut segments: Vec<String> = Vec::new();
    for segment in requested.split(is_separator) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(FilesError::InvalidPath(format!(
                        "path escapes its root: {requested:?}"
                    )));
                }
            }
            _ => {
                check_segment(requested, segment)?;
                segments.push(segment.to_owned());
            }
        }
    }

    let directory_only = segments.is_empty() || requested.ends_with(is_separator);

    Ok(ContainedPath {
        root: root.to_path_buf(),
        segments,
        directory_only,
    })
}

/// Resolves a path and collapses it into a single file name directly under `root`.
///
/// Segments are joined with `_`, so `docs/notes.txt` becomes `<root>/docs_notes.txt`.
///
/// # Errors
///
/// Returns `FilesError::InvalidPath` if the path fails [`resolve`], or if it names a directory
/// rather than a file.
pub fn flatten(root: &Path, requested: &str) -> FilesResult<ContainedPath> {
    let resolved = resolve(root, requested)?;
    if resolved.is_directory_only() {
        return Err(FilesError::InvalidPath(format!(
            "path does not name a file: {requested:?}"
        )));
    }

    Ok(ContainedPath {
        root: resolved.root,
        segments: vec![resolved.segments.join("_")],
        directory_only: false,
    })
}

/// Resolves a single directory-entry name, such as a kit name taken from a URL.
///
/// # Errors
///
/// Returns `FilesError::InvalidPath` if the name is empty, is `.` or `..`, or contains a
/// separator or NUL byte.
pub fn resolve_segment(root: &Path, name: &str) -> FilesResult<ContainedPath> {
    if name.is_empty() || name == "." || name == ".." || name.contains(is_separator) {
        return Err(FilesError::InvalidPath(format!(
            "not a single path segment: {name:?}"
        )));
    }

    let resolved = resolve(root, name)?;
    debug_assert_eq!(resolved.segments.len(), 1);
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/srv/redkit/chroot")
    }

    #[test]
    fn test_resolve_plain_relative_path() {
        let path = resolve(&root(), "a/b/c.txt").unwrap();

        assert_eq!(path.segments(), ["a", "b", "c.txt"]);
        assert_eq!(path.absolute(), root().join("a").join("b").join("c.txt"));
        assert_eq!(path.file_name(), Some("c.txt"));
        assert!(!path.is_directory_only());
    }

    #[test]
    fn test_resolve_strips_leading_separators() {
        let path = resolve(&root(), "/etc/passwd").unwrap();
        assert_eq!(path.absolute(), root().join("etc").join("passwd"));

        let path = resolve(&root(), "///etc//passwd").unwrap();
        assert_eq!(path.segments(), ["etc", "passwd"]);
    }

    #[test]
    fn test_resolve_collapses_dot_segments() {
        let path = resolve(&root(), "a/./b/../b/c.txt").unwrap();
        assert_eq!(path.segments(), ["a", "b", "c.txt"]);

        let path = resolve(&root(), "a/b/../../c").unwrap();
        assert_eq!(path.segments(), ["c"]);
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        for requested in [
            "..",
            "../x",
            "../../etc/passwd",
            "a/../../b",
            "/../etc",
            "a/b/../../../c",
            "./..",
        ] {
            let result = resolve(&root(), requested);
            assert!(
                matches!(result, Err(FilesError::InvalidPath(_))),
                "expected rejection for {requested:?}, got {result:?}"
            );
        }
    }

    #[test]
    fn test_resolve_never_leaves_root() {
        let candidates = [
            "../../etc/passwd",
            "/etc/passwd",
            "a/../../b",
            "a/../b",
            "",
            ".",
            "/",
            "x/y/z/../../..",
            "x/y/z/../../../..",
            "...",
            "..a/b",
            "a/..b",
        ];

        for requested in candidates {
            match resolve(&root(), requested) {
                Ok(path) => assert!(
                    path.absolute().starts_with(root()),
                    "{requested:?} resolved outside root: {}",
                    path.absolute().display()
                ),
                Err(e) => assert!(e.is_rejection()),
            }
        }
    }

    #[test]
    fn test_resolve_rejects_nul_bytes() {
        assert!(matches!(
            resolve(&root(), "a\0b"),
            Err(FilesError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_trailing_separator_is_directory_only() {
        let path = resolve(&root(), "foo/").unwrap();

        assert!(path.is_directory_only());
        assert_eq!(path.file_name(), None);
        assert_eq!(path.directory_segments(), ["foo"]);
    }

    #[test]
    fn test_empty_path_is_root_directory() {
        for requested in ["", ".", "/", "a/.."] {
            let path = resolve(&root(), requested).unwrap();
            assert!(path.is_directory_only(), "{requested:?}");
            assert_eq!(path.absolute(), root());
        }
    }

    #[test]
    fn test_directory_segments_exclude_file_name() {
        let path = resolve(&root(), "a/b/c.txt").unwrap();
        assert_eq!(path.directory_segments(), ["a", "b"]);

        let path = resolve(&root(), "c.txt").unwrap();
        assert!(path.directory_segments().is_empty());
    }

    #[test]
    fn test_dot_prefixed_names_are_ordinary() {
        let path = resolve(&root(), "...").unwrap();
        assert_eq!(path.segments(), ["..."]);

        let path = resolve(&root(), ".hidden/..config").unwrap();
        assert_eq!(path.segments(), [".hidden", "..config"]);
    }

    #[test]
    fn test_flatten_joins_segments() {
        let path = flatten(&root(), "docs/2024/notes.txt").unwrap();

        assert_eq!(path.segments(), ["docs_2024_notes.txt"]);
        assert_eq!(path.absolute(), root().join("docs_2024_notes.txt"));
    }

    #[test]
    fn test_flatten_rejects_directories_and_escapes() {
        assert!(flatten(&root(), "docs/").is_err());
        assert!(flatten(&root(), "").is_err());
        assert!(flatten(&root(), "../secret").is_err());
    }

    #[test]
    fn test_resolve_segment() {
        let path = resolve_segment(&root(), "linux").unwrap();
        assert_eq!(path.absolute(), root().join("linux"));

        for name in ["", ".", "..", "a/b", "/linux", "linux/"] {
            assert!(
                resolve_segment(&root(), name).is_err(),
                "expected rejection for {name:?}"
            );
        }
    }

    #[test]
    fn test_display_shows_absolute_path() {
        let path = resolve(&root(), "a/b").unwrap();
        assert_eq!(path.to_string(), root().join("a").join("b").display().to_string());
    }
}
