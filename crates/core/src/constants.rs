//! Constants used throughout the redkit core crate.
//!
//! Default locations and limits, kept together so the server, the CLI and the tests agree.

/// Default listen address for the REST server.
pub const DEFAULT_REST_ADDR: &str = "0.0.0.0:8080";

/// Default root for chroot uploads (field names become nested paths).
pub const DEFAULT_CHROOT_DIR: &str = "chroot";

/// Default root for flat uploads (field names are collapsed into one file name).
pub const DEFAULT_UPLOADS_DIR: &str = "uploads";

/// Default directory holding one subdirectory per kit.
pub const DEFAULT_KITS_DIR: &str = "kits";

/// Default directory served as static files under `/bin/`.
pub const DEFAULT_BIN_DIR: &str = "bin";

/// Name of the directory inside a kit that gets exported.
pub const KIT_BIN_DIR_NAME: &str = "bin";

/// Default request body limit for upload routes (1 GiB).
pub const DEFAULT_UPLOAD_LIMIT_BYTES: usize = 1024 * 1024 * 1024;
